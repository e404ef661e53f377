//! On-disk JSON shapes. Modeled as tagged records with explicit optional
//! fields: unknown `mode` values are rejected on read rather than
//! silently accepted.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum_macros::Display;
use uuid::Uuid;

/// A single slot of `resources/blob0.json`: one user's encrypted copy
/// of the device-wide blob0 secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobZeroSlot {
    pub mode: BlobZeroMode,

    /// Present for `mode = password`. Absent (or equal to the legacy
    /// sentinel) on devices created before salted hardening.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salt: Option<String>,

    /// Base64 (or similarly opaque) ciphertext that decrypts to the
    /// device-wide blob0 secret under this slot's hardened key.
    #[serde(rename = "enc-blob")]
    pub enc_blob: String,

    /// Human-readable display name. Not used as a key anywhere.
    pub cn: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BlobZeroMode {
    Password,
}

/// `resources/blob0.json`: `user_uuid -> slot`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobZeroFile(pub BTreeMap<Uuid, BlobZeroSlot>);

impl BlobZeroFile {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn find_by_cn(&self, cn: &str) -> Option<(Uuid, &BlobZeroSlot)> {
        self.0.iter().find(|(_, s)| s.cn == cn).map(|(u, s)| (*u, s))
    }
}

/// One entry of `resources/chunks.enc`: an expected hash of an ordered
/// byte range within a file of the `live` partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkEntry {
    /// Path relative to the `live` partition mountpoint.
    pub file: String,
    pub offset: u64,
    pub length: u64,
    /// Hex-encoded expected hash of `file[offset..offset+length]`.
    pub hash: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkList(pub Vec<ChunkEntry>);

/// One line of the per-file chunk-verification log produced by
/// `verify_files_chunks`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkLogEntry {
    pub file: String,
    pub matched: bool,
}

/// `opt/share/keyinfos.json`, written both into the live filesystem and
/// to the external `image_infos_file`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyInfos {
    pub version: String,
    #[serde(rename = "valid-from")]
    pub valid_from: i64,
    #[serde(rename = "valid-to")]
    pub valid_to: i64,
    #[serde(rename = "build-id")]
    pub build_id: String,
    #[serde(rename = "build-type")]
    pub build_type: BuildType,
    pub l10n: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum BuildType {
    WKS,
    SERVER,
    ADMIN,
    SIMPLE,
}

impl BuildType {
    /// ISO volume label derived from the build type.
    pub fn iso_volume_label(self) -> &'static str {
        match self {
            BuildType::ADMIN => "INSECA-ADMIN",
            BuildType::WKS | BuildType::SERVER => "INSECA",
            BuildType::SIMPLE => "INSECA-LIVE",
        }
    }
}
