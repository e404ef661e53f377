use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KnownFilesystemType {
    Ext4,
    Ext3,
    Ext2,
    Cramfs,
    Squashfs,
    Vfat,
    Msdos,
    Exfat,
    Iso9660,
    Ntfs,
    Btrfs,
    Xfs,
    Tmpfs,
    Swap,
    Overlay,
    #[serde(untagged)]
    Other(String),
}

impl KnownFilesystemType {
    /// Whether mounting this filesystem requires the `uid=1000,gid=1000`
    /// options used for the `data` partition (FAT family has no POSIX
    /// ownership of its own).
    pub fn is_fat_family(&self) -> bool {
        matches!(
            self,
            KnownFilesystemType::Vfat | KnownFilesystemType::Msdos | KnownFilesystemType::Exfat
        )
    }

    /// Maps the lowercase `TYPE` value reported by `blkid -s TYPE` to a
    /// known variant, falling back to `Other` for anything unrecognized.
    pub fn from_blkid_type(value: &str) -> Self {
        match value {
            "ext4" => Self::Ext4,
            "ext3" => Self::Ext3,
            "ext2" => Self::Ext2,
            "cramfs" => Self::Cramfs,
            "squashfs" => Self::Squashfs,
            "vfat" => Self::Vfat,
            "msdos" => Self::Msdos,
            "exfat" => Self::Exfat,
            "iso9660" => Self::Iso9660,
            "ntfs" => Self::Ntfs,
            "btrfs" => Self::Btrfs,
            "xfs" => Self::Xfs,
            "tmpfs" => Self::Tmpfs,
            "swap" => Self::Swap,
            "overlay" => Self::Overlay,
            other => Self::Other(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_blkid_type_known() {
        assert_eq!(KnownFilesystemType::from_blkid_type("vfat"), KnownFilesystemType::Vfat);
    }

    #[test]
    fn from_blkid_type_unknown_falls_back() {
        assert_eq!(
            KnownFilesystemType::from_blkid_type("zfs_member"),
            KnownFilesystemType::Other("zfs_member".to_string())
        );
    }
}
