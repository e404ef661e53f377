//! Best-effort steps run once the device is `Unlocked`. A step's failure
//! never rolls back the unlock: it is logged as an event and folded into
//! the composite report returned to the caller.

use std::fs;
use std::path::{Path, PathBuf};

use bastion_api::constants::{LIVE_CONFIG_TAR_ENC, POST_UNLOCK_SCRIPT, PRIVDATA_TAR_ENC};
use bastion_api::error::PostUnlockError;
use rsa::pkcs8::DecodePrivateKey;
use rsa::RsaPrivateKey;

use super::collaborators::{EventSink, SessionEnvironment};
use super::context::UnlockContext;

/// Directories bind-mounted from `<data>/<key>` onto a fixed absolute
/// path once `data` is mounted. Illustrative set; production deployments
/// would source this from configuration rather than a constant.
pub const BIND_MOUNT_TARGETS: &[(&str, &str)] = &[
    ("ssh", "/etc/ssh"),
    ("gnupg", "/root/.gnupg"),
    ("browser-profile", "/root/.mozilla"),
];

pub trait PostUnlockStep {
    fn name(&self) -> &'static str;
    fn run(&self, ctx: &UnlockContext) -> Result<(), PostUnlockError>;
}

fn step_err(step: &str, reason: impl std::fmt::Display) -> PostUnlockError {
    PostUnlockError {
        step: step.to_string(),
        reason: reason.to_string(),
    }
}

pub struct ChangeLoginPassword<'a, S: SessionEnvironment>(pub &'a S);
impl<S: SessionEnvironment> PostUnlockStep for ChangeLoginPassword<'_, S> {
    fn name(&self) -> &'static str {
        "change-login-password"
    }
    fn run(&self, ctx: &UnlockContext) -> Result<(), PostUnlockError> {
        self.0.set_login_password(ctx)
    }
}

pub struct DisableAutologin<'a, S: SessionEnvironment>(pub &'a S);
impl<S: SessionEnvironment> PostUnlockStep for DisableAutologin<'_, S> {
    fn name(&self) -> &'static str {
        "disable-autologin"
    }
    fn run(&self, _ctx: &UnlockContext) -> Result<(), PostUnlockError> {
        self.0.disable_autologin()
    }
}

/// Loads the device's own RSA keypair (sealed during image build,
/// persisted only on the `internal` partition) so sealed payload
/// archives can be opened.
fn load_privdata_key(ctx: &UnlockContext) -> Result<RsaPrivateKey, PostUnlockError> {
    let path = ctx
        .internal_mountpoint
        .join(bastion_api::constants::credentials::PRIVDATA_EKEY_PRIV);
    let pem = fs::read_to_string(&path).map_err(|e| step_err("extract-privdata", e))?;
    RsaPrivateKey::from_pkcs8_pem(&pem).map_err(|e| step_err("extract-privdata", e))
}

/// Decrypts `sealed_path` (relative to `root`) with the device keypair
/// and unpacks the resulting tar archive onto `root`.
fn extract_sealed_tar(
    step: &'static str,
    root: &Path,
    sealed_path: &str,
    key: &RsaPrivateKey,
) -> Result<(), PostUnlockError> {
    let sealed_file = root.join(sealed_path.trim_start_matches('/'));
    if !sealed_file.exists() {
        return Ok(());
    }
    let sealed = fs::read(&sealed_file).map_err(|e| step_err(step, e))?;
    let tar_bytes = bastion_crypto::asym::asym_decrypt(key, &sealed).map_err(|e| step_err(step, e))?;
    let mut archive = tar::Archive::new(&tar_bytes[..]);
    archive.unpack(root).map_err(|e| step_err(step, e))
}

pub struct ExtractPrivdata;
impl PostUnlockStep for ExtractPrivdata {
    fn name(&self) -> &'static str {
        "extract-privdata"
    }
    fn run(&self, ctx: &UnlockContext) -> Result<(), PostUnlockError> {
        let key = load_privdata_key(ctx)?;
        extract_sealed_tar(self.name(), Path::new("/"), PRIVDATA_TAR_ENC, &key)
    }
}

pub struct ExtractLiveConfig;
impl PostUnlockStep for ExtractLiveConfig {
    fn name(&self) -> &'static str {
        "extract-live-config"
    }
    fn run(&self, ctx: &UnlockContext) -> Result<(), PostUnlockError> {
        let key = load_privdata_key(ctx)?;
        extract_sealed_tar(self.name(), Path::new("/"), LIVE_CONFIG_TAR_ENC, &key)
    }
}

/// Bind-mounts each configured `<data>/<key>` onto its fixed absolute
/// target, seeding the source with the target's current contents the
/// first time the directory doesn't exist yet on `data`.
pub struct BindDataDirectories;
impl PostUnlockStep for BindDataDirectories {
    fn name(&self) -> &'static str {
        "bind-data-directories"
    }
    fn run(&self, ctx: &UnlockContext) -> Result<(), PostUnlockError> {
        for (key, target) in BIND_MOUNT_TARGETS {
            let source = ctx.data_mountpoint.join(key);
            let target = PathBuf::from(target);
            if !source.exists() {
                fs::create_dir_all(&source).map_err(|e| step_err(self.name(), e))?;
                if target.exists() {
                    copy_dir_contents(&target, &source).map_err(|e| step_err(self.name(), e))?;
                }
            }
            osutils::mount::ensure_mount_directory(&target)
                .map_err(|e| step_err(self.name(), e))?;
            osutils::mount::mount(&source, &target, None, &["bind".to_string()])
                .map_err(|e| step_err(self.name(), e))?;
        }
        Ok(())
    }
}

fn copy_dir_contents(from: &Path, to: &Path) -> std::io::Result<()> {
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let dest = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            fs::create_dir_all(&dest)?;
            copy_dir_contents(&entry.path(), &dest)?;
        } else {
            fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}

/// Generates a fresh per-device ed25519 host keypair if one isn't
/// already present, and installs it over the running system's host
/// keys. The on-disk encoding here is this project's own minimal
/// raw-bytes format, not full OpenSSH host-key wire format.
pub struct RegenerateHostKeys {
    pub root: PathBuf,
}
impl PostUnlockStep for RegenerateHostKeys {
    fn name(&self) -> &'static str {
        "regenerate-host-keys"
    }
    fn run(&self, _ctx: &UnlockContext) -> Result<(), PostUnlockError> {
        use ed25519_dalek::SigningKey;

        let key_dir = self.root.join("etc/bastion/host-keys");
        let priv_path = key_dir.join("host_ed25519");
        let pub_path = key_dir.join("host_ed25519.pub");
        if priv_path.exists() {
            return Ok(());
        }
        fs::create_dir_all(&key_dir).map_err(|e| step_err(self.name(), e))?;

        let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);
        fs::write(&priv_path, signing_key.to_bytes()).map_err(|e| step_err(self.name(), e))?;
        fs::write(&pub_path, signing_key.verifying_key().to_bytes())
            .map_err(|e| step_err(self.name(), e))?;
        Ok(())
    }
}

/// Runs `/opt/share/post-unlock-script` if it exists and is executable;
/// a missing script is not an error.
pub struct RunPostUnlockScript {
    pub root: PathBuf,
}
impl PostUnlockStep for RunPostUnlockScript {
    fn name(&self) -> &'static str {
        "run-post-unlock-script"
    }
    fn run(&self, _ctx: &UnlockContext) -> Result<(), PostUnlockError> {
        let script = self.root.join(POST_UNLOCK_SCRIPT.trim_start_matches('/'));
        if !script.exists() {
            return Ok(());
        }
        std::process::Command::new(&script)
            .status()
            .map_err(|e| step_err(self.name(), e))
            .and_then(|status| {
                if status.success() {
                    Ok(())
                } else {
                    Err(step_err(self.name(), format!("exited with {status}")))
                }
            })
    }
}

/// The outcome of running every configured post-unlock step. Always
/// complete: a failing step never stops the ones after it.
#[derive(Default)]
pub struct PostUnlockReport {
    pub results: Vec<(&'static str, Result<(), PostUnlockError>)>,
}

impl PostUnlockReport {
    pub fn all_ok(&self) -> bool {
        self.results.iter().all(|(_, r)| r.is_ok())
    }

    /// Turns a report with failures into a single composite error naming
    /// every step that failed, without undoing the already-successful
    /// unlock.
    pub fn into_result(self) -> anyhow::Result<()> {
        let failures: Vec<String> = self
            .results
            .into_iter()
            .filter_map(|(name, r)| r.err().map(|e| format!("{name}: {e}")))
            .collect();
        if failures.is_empty() {
            Ok(())
        } else {
            anyhow::bail!("post-unlock steps failed: {}", failures.join("; "))
        }
    }
}

pub fn run_post_unlock_steps(
    ctx: &UnlockContext,
    steps: &[&dyn PostUnlockStep],
    sink: &dyn EventSink,
) -> PostUnlockReport {
    let mut report = PostUnlockReport::default();
    for step in steps {
        let result = step.run(ctx);
        if let Err(e) = &result {
            sink.record(&format!("post-unlock step '{}' failed: {e}", step.name()));
        }
        report.results.push((step.name(), result));
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unlock::collaborators::NoopEventSink;
    use crate::unlock::context::SecretString;

    fn test_ctx(tmp: &Path) -> UnlockContext {
        UnlockContext {
            user_uuid: uuid::Uuid::new_v4(),
            cn: "Alice".to_string(),
            password: SecretString::new("pw"),
            internal_mountpoint: tmp.join("internal"),
            data_mountpoint: tmp.join("data"),
        }
    }

    struct FailingStep;
    impl PostUnlockStep for FailingStep {
        fn name(&self) -> &'static str {
            "failing-step"
        }
        fn run(&self, _ctx: &UnlockContext) -> Result<(), PostUnlockError> {
            Err(step_err(self.name(), "boom"))
        }
    }

    struct OkStep;
    impl PostUnlockStep for OkStep {
        fn name(&self) -> &'static str {
            "ok-step"
        }
        fn run(&self, _ctx: &UnlockContext) -> Result<(), PostUnlockError> {
            Ok(())
        }
    }

    #[test]
    fn one_failure_does_not_stop_remaining_steps() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_ctx(dir.path());
        let steps: Vec<&dyn PostUnlockStep> = vec![&FailingStep, &OkStep];
        let report = run_post_unlock_steps(&ctx, &steps, &NoopEventSink);
        assert_eq!(report.results.len(), 2);
        assert!(!report.all_ok());
        assert!(report.results[1].1.is_ok());
    }

    #[test]
    fn all_ok_report_converts_to_ok_result() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_ctx(dir.path());
        let steps: Vec<&dyn PostUnlockStep> = vec![&OkStep];
        let report = run_post_unlock_steps(&ctx, &steps, &NoopEventSink);
        assert!(report.into_result().is_ok());
    }

    #[test]
    fn failing_report_names_the_step_in_the_composite_error() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_ctx(dir.path());
        let steps: Vec<&dyn PostUnlockStep> = vec![&FailingStep];
        let report = run_post_unlock_steps(&ctx, &steps, &NoopEventSink);
        let err = report.into_result().unwrap_err();
        assert!(err.to_string().contains("failing-step"));
    }

    #[test]
    fn missing_post_unlock_script_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_ctx(dir.path());
        let step = RunPostUnlockScript { root: dir.path().to_path_buf() };
        assert!(step.run(&ctx).is_ok());
    }

    #[test]
    fn host_keys_generated_once_and_not_regenerated() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_ctx(dir.path());
        let step = RegenerateHostKeys { root: dir.path().to_path_buf() };
        step.run(&ctx).unwrap();
        let priv_path = dir.path().join("etc/bastion/host-keys/host_ed25519");
        let first = fs::read(&priv_path).unwrap();

        step.run(&ctx).unwrap();
        let second = fs::read(&priv_path).unwrap();
        assert_eq!(first, second, "second run must not overwrite an existing key");
    }
}
