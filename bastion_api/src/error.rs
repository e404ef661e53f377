//! Error taxonomy: one `thiserror` enum per category. `IntegrityError`
//! is a single opaque surface by design: its variants carry no detail
//! that would let a caller distinguish a missing file from a hash
//! mismatch from a decryption failure.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum CredentialError {
    #[error("no user slot accepted the supplied password")]
    InvalidCredential,
    #[error("too many failed unlock attempts")]
    TooManyAttempts,
    #[error("declaring this user would exceed the blob0 size cap")]
    SlotCapExceeded,
    #[error("deleting this user would leave the device with no users")]
    WouldEmptyStore,
    #[error("no user with that name exists")]
    NoSuchUser,
}

/// Unified, deliberately vague surface for every failure between
/// post-authentication and the successful decryption of
/// `internal-pass.enc`. The internal reason is retained only
/// in the integrity log, never in this error's `Display` output.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum IntegrityError {
    #[error("device may be compromised")]
    Tampered,
}

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceError {
    #[error("device is busy: {0}")]
    Busy(String),
    #[error("mount failed: {0}")]
    MountFailure(String),
    #[error("filesystem operation failed: {0}")]
    FsOpFailure(String),
    #[error("no partition with role '{0}'")]
    UnknownRole(String),
}

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ConfigurationError {
    #[error("missing keyinfos.json")]
    MissingKeyInfos,
    #[error("invalid build configuration: {0}")]
    InvalidBuildConfig(String),
    #[error("component '{0}' produced privdata but no device public key was supplied")]
    MissingDevicePublicKey(String),
    #[error("missing required format parameter '{0}'")]
    MissingFormatParam(String),
}

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum BuilderError {
    #[error("build directory mount does not permit exec/dev access")]
    MountRestricted,
    #[error("live-build run failed, see {log_path}")]
    LiveBuildFailed { log_path: String },
    #[error("ISO post-processing failed: {0}")]
    IsoPostProcessing(String),
}

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[error("build interrupted: {0}")]
pub struct InterruptedError(pub String);

/// Best-effort post-unlock step failure. Errors
/// here are event-logged and re-raised as a composite, never roll back
/// the already-successful unlock.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[error("post-unlock step '{step}' failed: {reason}")]
pub struct PostUnlockError {
    pub step: String,
    pub reason: String,
}
