//! Scenario seed 5: declare a second user, change the first's password,
//! delete the first, then fail to delete the last remaining user.

use bastion::credentials::{change_password, declare_user, delete_user, list_users};

#[test]
fn user_lifecycle_scenario() {
    let dir = tempfile::tempdir().unwrap();

    declare_user(dir.path(), "Alice", "alice-pw", b"device-secret").unwrap();
    declare_user(dir.path(), "Bob", "bob-pw", b"device-secret").unwrap();
    assert_eq!(
        list_users(dir.path()),
        vec!["Alice".to_string(), "Bob".to_string()]
    );

    change_password(dir.path(), "alice-pw", "alice-pw-2").unwrap();
    delete_user(dir.path(), "Alice", None).unwrap();
    assert_eq!(list_users(dir.path()), vec!["Bob".to_string()]);

    assert!(delete_user(dir.path(), "Bob", None).is_err());
    assert_eq!(list_users(dir.path()), vec!["Bob".to_string()]);
}
