//! Scenario seed 6: cancelling mid-build kills the active container,
//! leaves the build log ending with `Interrupted: ...`, and produces no
//! output ISO.

use std::fs;
use std::path::PathBuf;

use bastion::builder::runner::FakeContainerRunner;
use bastion::builder::ImageBuilder;
use bastion::config::{BuildConfig, ComponentRef};
use bastion_api::blob::BuildType;

fn base_config(image_infos_file: PathBuf) -> BuildConfig {
    BuildConfig {
        components: vec![ComponentRef {
            name: "base".to_string(),
            path: PathBuf::from("base"),
        }],
        device_public_key: None,
        image_infos_file,
        version: "1.0".to_string(),
        build_id: "abc".to_string(),
        build_type: BuildType::WKS,
        valid_from: 0,
        valid_to: 100,
        l10n: Default::default(),
    }
}

#[test]
fn cancelled_build_leaves_interrupted_log_and_no_iso() {
    let sources = tempfile::tempdir().unwrap();
    let build = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();

    let config = base_config(out.path().join("keyinfos.json"));
    fs::create_dir_all(sources.path().join("base")).unwrap();

    let builder = ImageBuilder::with_runner(
        sources.path(),
        build.path(),
        out.path(),
        config,
        Box::new(FakeContainerRunner::new()),
    );
    builder.cancel_token().cancel();

    let err = builder.build().unwrap_err();
    assert!(err.to_string().contains("cancelled"));

    let log = fs::read_to_string(out.path().join("live-build.log")).unwrap();
    assert!(log.trim_end().ends_with("Interrupted: build cancelled"));

    assert!(fs::read_dir(out.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .all(|e| e.path().extension().and_then(|x| x.to_str()) != Some("iso")));
}
