use std::path::{Path, PathBuf};

use anyhow::{Context, Error};
use duct::cmd;
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, PartialEq, Deserialize)]
struct SfdiskOutput {
    partitiontable: SfDisk,
}

/// Parsed `sfdisk -J <device>` output: enough to locate the partition
/// table bytes and the inter-partition gaps.
#[derive(Debug, PartialEq, Deserialize)]
pub struct SfDisk {
    pub label: SfDiskLabel,
    pub id: Uuid,
    pub device: PathBuf,
    pub unit: SfDiskUnit,
    pub firstlba: u64,
    pub lastlba: u64,
    #[serde(default = "SfDisk::default_sectorsize")]
    pub sectorsize: u64,
    #[serde(default)]
    pub partitions: Vec<SfPartition>,
    #[serde(skip)]
    pub capacity: u64,
}

impl SfDisk {
    fn default_sectorsize() -> u64 {
        512
    }
}

#[derive(Debug, PartialEq, Deserialize, Clone)]
pub struct SfPartition {
    pub node: PathBuf,
    pub start: u64,
    #[serde(rename = "size")]
    pub size_sectors: u64,
    #[serde(rename = "type")]
    pub partition_type: String,
    #[serde(rename = "uuid")]
    pub id: Uuid,
    pub name: Option<String>,
    #[serde(skip)]
    pub size: u64,
}

#[derive(Debug, PartialEq, Deserialize, Clone, Copy)]
pub enum SfDiskLabel {
    #[serde(rename = "gpt")]
    Gpt,
    #[serde(rename = "dos")]
    Mbr,
}

#[derive(Debug, PartialEq, Deserialize)]
pub enum SfDiskUnit {
    #[serde(rename = "sectors")]
    Sectors,
}

impl SfDisk {
    pub fn get_info<S>(disk_bus_path: S) -> Result<Self, Error>
    where
        S: AsRef<Path>,
    {
        let sfdisk_output_json = cmd!("sfdisk", "-J", disk_bus_path.as_ref())
            .read()
            .context(format!(
                "Failed to fetch disk information for {}",
                disk_bus_path.as_ref().display()
            ))?;

        SfDisk::parse_sfdisk_output(&sfdisk_output_json).context(format!(
            "Failed to extract disk information for {}",
            disk_bus_path.as_ref().display()
        ))
    }

    fn parse_sfdisk_output(output: &str) -> Result<Self, Error> {
        let mut disk = serde_json::from_str::<SfdiskOutput>(output)
            .context("Failed to parse disk information")?
            .partitiontable;

        disk.capacity = (disk.lastlba - disk.firstlba + 1) * disk.sectorsize;
        disk.partitions.iter_mut().for_each(|part| {
            part.size = part.size_sectors * disk.sectorsize;
        });

        Ok(disk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_gpt_disk() {
        let sfdisk_output_json = r#"
        {
            "partitiontable": {
               "label": "gpt",
               "id": "3E6494F9-91E1-426B-A25A-0A8101E464A4",
               "device": "/dev/sda",
               "unit": "sectors",
               "firstlba": 34,
               "lastlba": 266338270,
               "sectorsize": 512,
               "partitions": [
                  {
                     "node": "/dev/sda1",
                     "start": 2048,
                     "size": 16384,
                     "type": "C12A7328-F81F-11D2-BA4B-00A0C93EC93B",
                     "uuid": "F764E91F-9D15-4F6E-8508-0AFC1D0DF0B5",
                     "name": "esp"
                  }
               ]
            }
         }
         "#;
        let parsed = SfDisk::parse_sfdisk_output(sfdisk_output_json).unwrap();
        assert_eq!(parsed.label, SfDiskLabel::Gpt);
        assert_eq!(parsed.capacity, 136_365_177_344);
        assert_eq!(parsed.partitions[0].size, 8_388_608);
    }

    #[test]
    fn test_parse_mbr_disk() {
        let sfdisk_output_json = r#"
        {
            "partitiontable": {
               "label": "dos",
               "id": "3E6494F9-91E1-426B-A25A-0A8101E464A4",
               "device": "/dev/sda",
               "unit": "sectors",
               "firstlba": 2048,
               "lastlba": 1048575,
               "sectorsize": 512,
               "partitions": []
            }
         }
         "#;
        let parsed = SfDisk::parse_sfdisk_output(sfdisk_output_json).unwrap();
        assert_eq!(parsed.label, SfDiskLabel::Mbr);
    }

    #[test]
    fn test_malformed_input_rejected() {
        let sfdisk_output_json = r#"
        {
            "partitiontable": {
                "label": "gpt",
                "id": "3E6494F9-91E1-426B-A25A-0A81",
                "device": "/dev/sda",
                "firstlba": 2048,
                "lastlba": 67108830,
                "sectorsize": 512,
                "unit": "sectors"
            }
        }"#;
        assert!(SfDisk::parse_sfdisk_output(sfdisk_output_json).is_err());
    }
}
