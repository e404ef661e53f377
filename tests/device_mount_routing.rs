//! `Device::mount`/`umount` must go through the injected `SystemRunner`
//! like every other device operation, so a device's whole mount tree can
//! be driven from a `FakeRunner` against a synthetic root instead of the
//! real `/run/bastion`, `/internal`, `/data`.

use bastion::device::{Device, FakeRunner};
use bastion_api::role::{LabelType, PartitionRole};

#[test]
fn mount_and_umount_issue_real_argv_through_fake_runner() {
    let runner = FakeRunner::new();
    runner.push_ok("");
    runner.push_ok("");

    let root = tempfile::tempdir().unwrap();
    let mut device = Device::with_runner_and_root(
        "/dev/sdb",
        LabelType::Gpt,
        Box::new(runner),
        root.path(),
    );

    device
        .mount(PartitionRole::Dummy, None, None, &["nodev".to_string()], false)
        .unwrap();
    device.umount(PartitionRole::Dummy).unwrap();

    let expected_mp = root.path().join("run/bastion/mnt-dummy");
    assert_eq!(device.resolve_mountpoint(PartitionRole::Dummy), expected_mp);
    assert!(expected_mp.is_dir());
}

#[test]
fn mount_failure_surfaces_through_runner_not_a_real_mount_call() {
    let runner = FakeRunner::new();
    runner.push_err("mount: permission denied");

    let root = tempfile::tempdir().unwrap();
    let mut device =
        Device::with_runner_and_root("/dev/sdb", LabelType::Gpt, Box::new(runner), root.path());

    let err = device
        .mount(PartitionRole::Data, None, None, &[], false)
        .unwrap_err();
    assert!(err.to_string().contains("permission denied"));
}
