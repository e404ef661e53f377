//! Raw-byte hashing of the partition table and the inter-partition gap.
//! Both read overlapping regions of the device by design: the partition
//! table hash is the narrow, structural view (used as integrity chain
//! step "mbr"), while the gap hash is the broader "everything that isn't
//! a partition" view (chain step "gap"), which for both label types
//! necessarily includes the table bytes themselves.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use anyhow::Result;
use bastion_api::role::LabelType;
use bastion_crypto::hash::{Sha256Hash, StreamingHasher};
use osutils::sfdisk::SfDisk;

const MBR_TABLE_OFFSET: u64 = 446;
const MBR_TABLE_LEN: u64 = 64;
const MBR_SECTOR_LEN: u64 = 512;

/// Hashes the raw bytes of the partition table itself: for MBR, the
/// 64-byte entry table within the boot sector; for GPT, the primary
/// header and partition entry array up to the first usable LBA.
pub fn compute_partitions_table_hash(
    devfile: &Path,
    layout: &SfDisk,
    label_type: LabelType,
) -> Result<Sha256Hash> {
    let mut file = File::open(devfile)?;
    let mut hasher = StreamingHasher::new();
    match label_type {
        LabelType::Mbr => {
            file.seek(SeekFrom::Start(MBR_TABLE_OFFSET))?;
            let mut buf = vec![0u8; MBR_TABLE_LEN as usize];
            file.read_exact(&mut buf)?;
            hasher.update(&buf);
        }
        LabelType::Gpt => {
            let len = layout.firstlba.saturating_sub(1) * layout.sectorsize;
            file.seek(SeekFrom::Start(layout.sectorsize))?;
            let mut buf = vec![0u8; len as usize];
            file.read_exact(&mut buf)?;
            hasher.update(&buf);
        }
    }
    Ok(hasher.finish())
}

/// Hashes every byte that is not part of a declared partition: for MBR,
/// the whole region from the start of the disk through the first
/// partition's start sector (boot code, table, and any pad); for GPT,
/// the primary header/array region plus the mirrored secondary
/// header/array at the very end of the disk.
pub fn compute_gap_hash(devfile: &Path, layout: &SfDisk, label_type: LabelType) -> Result<Sha256Hash> {
    let mut file = File::open(devfile)?;
    let mut hasher = StreamingHasher::new();
    match label_type {
        LabelType::Mbr => {
            let gap_end = layout
                .partitions
                .first()
                .map(|p| p.start * layout.sectorsize)
                .unwrap_or(MBR_SECTOR_LEN);
            let mut buf = vec![0u8; gap_end as usize];
            file.read_exact(&mut buf)?;
            hasher.update(&buf);
        }
        LabelType::Gpt => {
            let primary_len = layout.firstlba * layout.sectorsize;
            let mut primary = vec![0u8; primary_len as usize];
            file.read_exact(&mut primary)?;
            hasher.update(&primary);

            let device_len = device_len_bytes(&mut file)?;
            let secondary_start = (layout.lastlba + 1) * layout.sectorsize;
            if device_len > secondary_start {
                file.seek(SeekFrom::Start(secondary_start))?;
                let mut secondary = vec![0u8; (device_len - secondary_start) as usize];
                file.read_exact(&mut secondary)?;
                hasher.update(&secondary);
            }
        }
    }
    Ok(hasher.finish())
}

/// Total device length. `File::metadata().len()` reports 0 for block
/// special files, so this seeks to the end instead, which works both
/// for a real block device node and for the regular files used to
/// simulate one in tests.
fn device_len_bytes(file: &mut File) -> Result<u64> {
    Ok(file.seek(SeekFrom::End(0))?)
}
