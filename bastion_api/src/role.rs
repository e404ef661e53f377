use std::fmt;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter};

/// Stable identifier for one of the five partitions a device carries.
///
/// The set is closed and the ordering below is the order in which the
/// partitions appear on the device; it is not the order in which the
/// integrity chain visits them (see [`crate::constants::INTEGRITY_STEP_ORDER`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PartitionRole {
    Dummy,
    Efi,
    Live,
    Internal,
    Data,
}

impl PartitionRole {
    pub fn is_encrypted(self) -> bool {
        matches!(self, PartitionRole::Internal | PartitionRole::Data)
    }

    pub fn mountpoint(self) -> &'static str {
        match self {
            PartitionRole::Dummy => "/run/bastion/mnt-dummy",
            PartitionRole::Efi => "/run/bastion/mnt-efi",
            PartitionRole::Live => "/run/bastion/mnt-live",
            PartitionRole::Internal => "/internal",
            PartitionRole::Data => "/data",
        }
    }
}

/// The partition table format used to interpret the raw bytes consumed by
/// `compute_partitions_table_hash` and the inter-partition gap hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LabelType {
    Mbr,
    Gpt,
}

/// What kind of secret is installed on an encrypted partition with
/// `Device::set_partition_secret`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretKind {
    LuksPassphrase,
}

impl fmt::Display for SecretKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecretKind::LuksPassphrase => write!(f, "luks-passphrase"),
        }
    }
}
