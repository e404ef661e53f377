//! YAML-deserialized configuration for the two CLI-driven operations:
//! formatting a device (`FormatConfig`) and building a live image
//! (`BuildConfig`). Both split user-supplied parameters from
//! configuration-fixed ones, with the fixed side always taking
//! precedence on conflict.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use bastion_api::blob::BuildType;

/// A single named device-format profile: fixed parameters plus the
/// device public key used to seal PRIVDATA at build time and verify
/// signed metadata at unlock time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatConfig {
    pub id: String,

    #[serde(rename = "device-public-key")]
    pub device_public_key: PathBuf,

    /// The private half of `device_public_key` (blob1), held by the
    /// formatting authority and never written to the device in the
    /// clear: format time wraps it under the freshly-generated blob0
    /// instead of generating a new keypair per device, since the same
    /// key already seals every component's PRIVDATA baked into the
    /// image at build time.
    #[serde(rename = "device-private-key")]
    pub device_private_key: PathBuf,

    /// The admin authority's signing key, used to sign
    /// `resources/metadata.json` at format time.
    #[serde(rename = "admin-private-key")]
    pub admin_private_key: PathBuf,

    /// Parameters fixed by this configuration; these win over whatever
    /// the caller's params file supplies for the same key.
    #[serde(default)]
    pub fixed_params: BTreeMap<String, serde_json::Value>,
}

/// User-supplied parameters for `dev-format`, read from a JSON file.
/// Must carry at least `password-user`, `fs-data`, and `enctype-data`;
/// anything else is config-specific and passed through as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatParams {
    #[serde(rename = "password-user")]
    pub password_user: String,

    #[serde(rename = "fs-data")]
    pub fs_data: String,

    #[serde(rename = "enctype-data")]
    pub enctype_data: String,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Loads every format configuration declared in `path` (a YAML list) and
/// returns the one whose `id` matches.
pub fn load_format_config(path: &std::path::Path, id: &str) -> anyhow::Result<FormatConfig> {
    let yaml = std::fs::read_to_string(path)?;
    let configs: Vec<FormatConfig> = serde_yaml::from_str(&yaml)?;
    configs
        .into_iter()
        .find(|c| c.id == id)
        .ok_or_else(|| anyhow::anyhow!("no format configuration named '{id}' in {}", path.display()))
}

impl FormatParams {
    /// Merges `self` with `fixed`, with `fixed` entries always winning —
    /// the format configuration overrides what the caller asked for, not
    /// the other way around.
    pub fn merged_with(&self, fixed: &BTreeMap<String, serde_json::Value>) -> BTreeMap<String, serde_json::Value> {
        let mut merged = self.extra.clone();
        merged.insert("password-user".to_string(), self.password_user.clone().into());
        merged.insert("fs-data".to_string(), self.fs_data.clone().into());
        merged.insert("enctype-data".to_string(), self.enctype_data.clone().into());
        for (k, v) in fixed {
            merged.insert(k.clone(), v.clone());
        }
        merged
    }
}

/// One component directory referenced by a [`BuildConfig`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentRef {
    pub name: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    pub components: Vec<ComponentRef>,

    #[serde(rename = "device-public-key")]
    pub device_public_key: Option<PathBuf>,

    #[serde(rename = "image-infos-file")]
    pub image_infos_file: PathBuf,

    pub version: String,
    #[serde(rename = "build-id")]
    pub build_id: String,
    #[serde(rename = "build-type")]
    pub build_type: BuildType,
    #[serde(rename = "valid-from")]
    pub valid_from: i64,
    #[serde(rename = "valid-to")]
    pub valid_to: i64,

    #[serde(default)]
    pub l10n: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_params_fixed_wins_over_user_supplied() {
        let params = FormatParams {
            password_user: "hunter2".to_string(),
            fs_data: "ext4".to_string(),
            enctype_data: "luks2".to_string(),
            extra: BTreeMap::new(),
        };
        let mut fixed = BTreeMap::new();
        fixed.insert("fs-data".to_string(), serde_json::json!("btrfs"));

        let merged = params.merged_with(&fixed);
        assert_eq!(merged.get("fs-data"), Some(&serde_json::json!("btrfs")));
        assert_eq!(merged.get("password-user"), Some(&serde_json::json!("hunter2")));
    }

    #[test]
    fn load_format_config_finds_matching_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("formats.yaml");
        std::fs::write(
            &path,
            r#"
- id: laptop
  device-public-key: /keys/laptop.pub
  device-private-key: /keys/laptop.priv
  admin-private-key: /keys/admin.priv
- id: desktop
  device-public-key: /keys/desktop.pub
  device-private-key: /keys/desktop.priv
  admin-private-key: /keys/admin.priv
"#,
        )
        .unwrap();

        let cfg = load_format_config(&path, "desktop").unwrap();
        assert_eq!(cfg.device_public_key, PathBuf::from("/keys/desktop.pub"));
        assert!(load_format_config(&path, "missing").is_err());
    }

    #[test]
    fn build_config_round_trips_yaml() {
        let yaml = r#"
components:
  - name: base
    path: /components/base
device-public-key: /keys/device.pub
image-infos-file: /out/keyinfos.json
version: "1.0"
build-id: abc123
build-type: WKS
valid-from: 1000
valid-to: 2000
"#;
        let cfg: BuildConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.components.len(), 1);
        assert_eq!(cfg.components[0].name, "base");
        assert_eq!(cfg.build_type, BuildType::WKS);
    }
}
