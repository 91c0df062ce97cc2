use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};

use uuid::Uuid;

const FILE_DEVICE_CD_ROM: u32 = 0x02;
const FILE_DEVICE_DISK: u32 = 0x07;
const FILE_DEVICE_MASS_STORAGE: u32 = 0x2d;
const FILE_DEVICE_DVD: u32 = 0x33;

/// MBR partition type of a dynamic disk's LDM partition.
pub const PARTITION_LDM: u8 = 0x42;
/// GPT partition type of the LDM metadata partition.
pub const LDM_METADATA_PARTITION_TYPE: Uuid =
    Uuid::from_u128(0x5808c8aa_7e8f_42e0_85d2_e1e90434cfb3);
/// GPT partition type of the LDM data partition.
pub const LDM_DATA_PARTITION_TYPE: Uuid = Uuid::from_u128(0xaf9b60a0_1431_4f62_bc68_3311714a69ad);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceType {
    Disk,
    CdRom,
    Dvd,
    MassStorage,
    Other(u32),
}

impl DeviceType {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            FILE_DEVICE_DISK => DeviceType::Disk,
            FILE_DEVICE_CD_ROM => DeviceType::CdRom,
            FILE_DEVICE_DVD => DeviceType::Dvd,
            FILE_DEVICE_MASS_STORAGE => DeviceType::MassStorage,
            other => DeviceType::Other(other),
        }
    }

    pub fn is_optical(&self) -> bool {
        matches!(self, DeviceType::CdRom | DeviceType::Dvd)
    }
}

/// Physical device (and optionally partition) behind a path.
///
/// `partition_number` is 0 for the whole device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceIdentity {
    pub device_type: DeviceType,
    pub device_number: u32,
    pub partition_number: u32,
}

impl DeviceIdentity {
    pub fn is_whole_device(&self) -> bool {
        self.partition_number == 0
    }

    /// `\\.\PhysicalDriveN` or `\\.\CdRomN` for this device.
    pub fn device_path(&self) -> String {
        if self.device_type.is_optical() {
            format!(r"\\.\CdRom{}", self.device_number)
        } else {
            format!(r"\\.\PhysicalDrive{}", self.device_number)
        }
    }

    /// Whether both identities live on the same class of device with the same number.
    pub fn same_device(&self, other: &DeviceIdentity) -> bool {
        self.device_number == other.device_number
            && self.device_type.is_optical() == other.device_type.is_optical()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BusType {
    #[default]
    Unknown,
    Scsi,
    Atapi,
    Ata,
    Ieee1394,
    Ssa,
    Fibre,
    Usb,
    Raid,
    Iscsi,
    Sas,
    Sata,
    Sd,
    Mmc,
    Virtual,
    FileBackedVirtual,
    Spaces,
    Nvme,
    Scm,
    Ufs,
    Other(u32),
}

impl BusType {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0x00 => BusType::Unknown,
            0x01 => BusType::Scsi,
            0x02 => BusType::Atapi,
            0x03 => BusType::Ata,
            0x04 => BusType::Ieee1394,
            0x05 => BusType::Ssa,
            0x06 => BusType::Fibre,
            0x07 => BusType::Usb,
            0x08 => BusType::Raid,
            0x09 => BusType::Iscsi,
            0x0a => BusType::Sas,
            0x0b => BusType::Sata,
            0x0c => BusType::Sd,
            0x0d => BusType::Mmc,
            0x0e => BusType::Virtual,
            0x0f => BusType::FileBackedVirtual,
            0x10 => BusType::Spaces,
            0x11 => BusType::Nvme,
            0x12 => BusType::Scm,
            0x13 => BusType::Ufs,
            other => BusType::Other(other),
        }
    }
}

/// Adapter and device descriptor data.
///
/// Only filled in when the caller is elevated; otherwise every field keeps
/// its default (empty strings, zeros, `BusType::Unknown`).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StorageAdapterInfo {
    pub bus_type: BusType,
    pub bus_major_version: u16,
    pub bus_minor_version: u16,
    pub vendor_id: String,
    pub product_id: String,
    pub product_revision: String,
    pub serial_number: String,
    pub removable_media: bool,
    pub command_queueing: bool,
    pub max_transfer_length: u32,
    pub max_physical_pages: u32,
    pub alignment_mask: u32,
}

impl StorageAdapterInfo {
    pub fn is_empty(&self) -> bool {
        *self == StorageAdapterInfo::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum PartitionStyle {
    GPT = 1i32,
    MBR = 0i32,
    RAW = 2i32,
}

impl PartitionStyle {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0 => PartitionStyle::MBR,
            1 => PartitionStyle::GPT,
            _ => PartitionStyle::RAW,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LdmRole {
    Metadata,
    Data,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionRecord {
    pub partition_style: PartitionStyle,
    pub starting_offset: i64,
    pub partition_length: i64,
    pub partition_number: u32,
    pub rewrite_partition: bool,
    pub is_service_partition: bool,
    pub extra: PartitionExtra,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitionExtra {
    Mbr(PartitionExtraMbr),
    Gpt(PartitionExtraGpt),
    Raw,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionExtraMbr {
    pub partition_type: u8,
    pub boot_indicator: bool,
    pub recognized_partition: bool,
    pub hidden_sectors: u32,
    pub partition_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionExtraGpt {
    pub partition_type: Uuid,
    pub partition_id: Uuid,
    pub attributes: u64,
    pub name: String,
}

impl PartitionRecord {
    /// Role of this partition on a dynamic disk, if it belongs to LDM.
    pub fn ldm_role(&self) -> Option<LdmRole> {
        match &self.extra {
            PartitionExtra::Mbr(mbr) if mbr.partition_type == PARTITION_LDM => Some(LdmRole::Data),
            PartitionExtra::Gpt(gpt) if gpt.partition_type == LDM_DATA_PARTITION_TYPE => {
                Some(LdmRole::Data)
            }
            PartitionExtra::Gpt(gpt) if gpt.partition_type == LDM_METADATA_PARTITION_TYPE => {
                Some(LdmRole::Metadata)
            }
            _ => None,
        }
    }
}

/// Parsed drive layout: the partition table plus disk-level table data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveLayout {
    pub partition_style: PartitionStyle,
    pub partitions: Vec<PartitionRecord>,
    pub extra: DiskExtra,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiskExtra {
    Mbr(DiskExtraMbr),
    Gpt(DiskExtraGpt),
    Raw,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskExtraMbr {
    pub signature: u32,
    pub checksum: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskExtraGpt {
    pub disk_id: Uuid,
    pub starting_usable_offset: i64,
    pub usable_length: i64,
    pub max_partition_count: u32,
}

impl DriveLayout {
    pub fn partition(&self, partition_number: u32) -> Option<&PartitionRecord> {
        self.partitions
            .iter()
            .find(|p| p.partition_number == partition_number)
    }

    /// The user data partition of a dynamic disk.
    pub fn ldm_data_partition(&self) -> Option<&PartitionRecord> {
        self.partitions
            .iter()
            .find(|p| p.ldm_role() == Some(LdmRole::Data))
    }

    pub fn is_dynamic(&self) -> bool {
        self.partitions.iter().any(|p| p.ldm_role().is_some())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Unknown,
    RemovableMedia,
    FixedMedia,
    Other(u32),
}

impl MediaType {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0 => MediaType::Unknown,
            11 => MediaType::RemovableMedia,
            12 => MediaType::FixedMedia,
            other => MediaType::Other(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskGeometry {
    pub media_type: MediaType,
    pub cylinders: i64,
    pub tracks_per_cylinder: u32,
    pub sectors_per_track: u32,
    pub bytes_per_sector: u32,
    pub disk_size: u64,
    pub partition_info: Option<DiskPartitionInfo>,
    pub detection: Option<DetectionInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiskPartitionInfo {
    Mbr { signature: u32, checksum: u32 },
    Gpt { disk_id: Uuid },
    Raw,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectionInfo {
    Int13(Int13Info),
    ExInt13(ExInt13Info),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Int13Info {
    pub drive_select: u16,
    pub max_cylinders: u32,
    pub sectors_per_track: u16,
    pub max_heads: u16,
    pub number_drives: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExInt13Info {
    pub buffer_size: u16,
    pub flags: u16,
    pub cylinders: u32,
    pub heads: u32,
    pub sectors_per_track: u32,
    pub sectors_per_drive: u64,
    pub sector_size: u16,
}

/// One physical disk (or optical device) and everything mounted on it.
///
/// Two values are equal when their device path, device number and partition
/// number match; the remaining fields are a snapshot and do not take part.
#[derive(Debug, Clone)]
pub struct PhysicalDiskInfo {
    pub device_path: String,
    pub name: String,
    pub device_description: String,
    pub identity: DeviceIdentity,
    pub adapter: StorageAdapterInfo,
    pub geometry: Option<DiskGeometry>,
    pub layout: Option<DriveLayout>,
    pub total_size: u64,
    pub partition_indexes: BTreeSet<u32>,
    pub volume_guids: BTreeSet<String>,
    pub logical_drives: BTreeSet<String>,
}

impl PhysicalDiskInfo {
    pub fn new(device_path: impl Into<String>, identity: DeviceIdentity) -> Self {
        PhysicalDiskInfo {
            device_path: device_path.into(),
            name: String::new(),
            device_description: String::new(),
            identity,
            adapter: StorageAdapterInfo::default(),
            geometry: None,
            layout: None,
            total_size: 0,
            partition_indexes: BTreeSet::new(),
            volume_guids: BTreeSet::new(),
            logical_drives: BTreeSet::new(),
        }
    }

    pub fn partitions(&self) -> &[PartitionRecord] {
        self.layout
            .as_ref()
            .map(|l| l.partitions.as_slice())
            .unwrap_or_default()
    }

    pub fn is_dynamic(&self) -> bool {
        self.layout.as_ref().is_some_and(DriveLayout::is_dynamic)
    }

    pub fn contains_volume(&self, volume_guid: &str) -> bool {
        self.volume_guids
            .iter()
            .any(|g| g.eq_ignore_ascii_case(volume_guid))
    }

    pub fn contains_drive(&self, drive: &str) -> bool {
        self.logical_drives
            .iter()
            .any(|d| d.eq_ignore_ascii_case(drive))
    }
}

impl PartialEq for PhysicalDiskInfo {
    fn eq(&self, other: &Self) -> bool {
        self.device_path == other.device_path
            && self.identity.device_number == other.identity.device_number
            && self.identity.partition_number == other.identity.partition_number
    }
}

impl Eq for PhysicalDiskInfo {}

impl Hash for PhysicalDiskInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.device_path.hash(state);
        self.identity.device_number.hash(state);
        self.identity.partition_number.hash(state);
    }
}
