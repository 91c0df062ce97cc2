//! Decoding of the native structures returned by storage control codes.
//!
//! Every offset below comes from the documented x64 layout of the Win32
//! structure, never from `size_of` on a Rust type. The driver writes
//! fixed-size array elements regardless of which union member is meaningful,
//! so element `i` of a trailing array always lives at
//! `HEADER_SIZE + i * ELEMENT_SIZE`.

use log::{debug, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::*;

pub const STORAGE_DEVICE_NUMBER_SIZE: usize = 12;

pub const STORAGE_PROPERTY_QUERY_SIZE: usize = 12;
pub const STORAGE_DESCRIPTOR_HEADER_SIZE: usize = 8;
pub const STORAGE_ADAPTER_DESCRIPTOR_SIZE: usize = 32;
/// Fixed part of `STORAGE_DEVICE_DESCRIPTOR`, up to `RawDeviceProperties`.
pub const STORAGE_DEVICE_DESCRIPTOR_SIZE: usize = 40;

pub const DRIVE_LAYOUT_INFORMATION_EX_HEADER_SIZE: usize = 48;
pub const PARTITION_INFORMATION_EX_SIZE: usize = 144;

/// `DISK_GEOMETRY` followed by `DiskSize`.
pub const DISK_GEOMETRY_EX_HEADER_SIZE: usize = 32;
pub const DISK_PARTITION_INFO_SIZE: usize = 24;
pub const DISK_DETECTION_INFO_SIZE: usize = 56;

pub const VOLUME_DISK_EXTENTS_HEADER_SIZE: usize = 8;
pub const DISK_EXTENT_SIZE: usize = 24;

const GPT_NAME_CHARS: usize = 36;

/// `STORAGE_PROPERTY_ID` values used here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum StorageProperty {
    Device = 0,
    Adapter = 1,
}

/// Bounds-checked little-endian reads over a reply buffer.
#[derive(Clone, Copy)]
struct Reader<'a> {
    buf: &'a [u8],
    structure: &'static str,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8], structure: &'static str) -> Self {
        Reader { buf, structure }
    }

    fn bytes<const N: usize>(&self, offset: usize) -> Result<[u8; N]> {
        let end = offset.checked_add(N).unwrap_or(usize::MAX);
        match self.buf.get(offset..end) {
            Some(slice) => {
                let mut out = [0u8; N];
                out.copy_from_slice(slice);
                Ok(out)
            }
            None => Err(Error::Truncated {
                structure: self.structure,
                offset: end,
                len: self.buf.len(),
            }),
        }
    }

    fn require(&self, len: usize) -> Result<()> {
        if self.buf.len() < len {
            return Err(Error::Truncated {
                structure: self.structure,
                offset: len,
                len: self.buf.len(),
            });
        }
        Ok(())
    }

    fn u8(&self, offset: usize) -> Result<u8> {
        Ok(self.bytes::<1>(offset)?[0])
    }

    fn bool(&self, offset: usize) -> Result<bool> {
        Ok(self.u8(offset)? != 0)
    }

    fn u16(&self, offset: usize) -> Result<u16> {
        Ok(u16::from_le_bytes(self.bytes(offset)?))
    }

    fn u32(&self, offset: usize) -> Result<u32> {
        Ok(u32::from_le_bytes(self.bytes(offset)?))
    }

    fn u64(&self, offset: usize) -> Result<u64> {
        Ok(u64::from_le_bytes(self.bytes(offset)?))
    }

    fn i64(&self, offset: usize) -> Result<i64> {
        Ok(i64::from_le_bytes(self.bytes(offset)?))
    }

    /// A Win32 `GUID`: the first three fields are little-endian.
    fn guid(&self, offset: usize) -> Result<Uuid> {
        Ok(Uuid::from_bytes_le(self.bytes(offset)?))
    }

    /// Trailing array element `index`, or `None` past the end of the buffer.
    fn element(&self, header: usize, size: usize, index: usize) -> Option<Reader<'a>> {
        let start = header.checked_add(index.checked_mul(size)?)?;
        let end = start.checked_add(size)?;
        self.buf.get(start..end).map(|buf| Reader::new(buf, self.structure))
    }

    fn tail(&self, offset: usize) -> Option<Reader<'a>> {
        self.buf.get(offset..).map(|buf| Reader::new(buf, self.structure))
    }

    /// NUL-terminated ASCII string at a self-relative offset; 0 means absent.
    fn c_string(&self, offset: u32) -> String {
        let offset = offset as usize;
        if offset == 0 {
            return String::new();
        }
        let Some(rest) = self.buf.get(offset..) else {
            debug!("{}: string offset {offset} past end of buffer", self.structure);
            return String::new();
        };
        let len = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
        String::from_utf8_lossy(&rest[..len]).trim().to_string()
    }
}

/// `STORAGE_PROPERTY_QUERY` for a standard query of `property`.
pub fn property_query(property: StorageProperty) -> Vec<u8> {
    let mut query = vec![0u8; STORAGE_PROPERTY_QUERY_SIZE];
    query[0..4].copy_from_slice(&(property as u32).to_le_bytes());
    // QueryType = PropertyStandardQuery (0), AdditionalParameters zeroed
    query
}

/// `STORAGE_DEVICE_NUMBER`
pub fn parse_device_number(buf: &[u8]) -> Result<DeviceIdentity> {
    let r = Reader::new(buf, "STORAGE_DEVICE_NUMBER");
    r.require(STORAGE_DEVICE_NUMBER_SIZE)?;
    Ok(DeviceIdentity {
        device_type: DeviceType::from_raw(r.u32(0)?),
        device_number: r.u32(4)?,
        partition_number: r.u32(8)?,
    })
}

/// Total descriptor size reported by a `STORAGE_DESCRIPTOR_HEADER`.
pub fn descriptor_size(buf: &[u8]) -> Result<usize> {
    let r = Reader::new(buf, "STORAGE_DESCRIPTOR_HEADER");
    Ok(r.u32(4)? as usize)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterDescriptor {
    pub max_transfer_length: u32,
    pub max_physical_pages: u32,
    pub alignment_mask: u32,
    pub adapter_uses_pio: bool,
    pub command_queueing: bool,
    pub bus_type: BusType,
    pub bus_major_version: u16,
    pub bus_minor_version: u16,
}

/// `STORAGE_ADAPTER_DESCRIPTOR`
pub fn parse_adapter_descriptor(buf: &[u8]) -> Result<AdapterDescriptor> {
    let r = Reader::new(buf, "STORAGE_ADAPTER_DESCRIPTOR");
    r.require(STORAGE_ADAPTER_DESCRIPTOR_SIZE)?;
    Ok(AdapterDescriptor {
        max_transfer_length: r.u32(8)?,
        max_physical_pages: r.u32(12)?,
        alignment_mask: r.u32(16)?,
        adapter_uses_pio: r.bool(20)?,
        command_queueing: r.bool(22)?,
        bus_type: BusType::from_raw(r.u8(24)? as u32),
        bus_major_version: r.u16(26)?,
        bus_minor_version: r.u16(28)?,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub removable_media: bool,
    pub command_queueing: bool,
    pub vendor_id: String,
    pub product_id: String,
    pub product_revision: String,
    pub serial_number: String,
    pub bus_type: BusType,
}

/// `STORAGE_DEVICE_DESCRIPTOR` with its trailing id strings.
pub fn parse_device_descriptor(buf: &[u8]) -> Result<DeviceDescriptor> {
    let r = Reader::new(buf, "STORAGE_DEVICE_DESCRIPTOR");
    // RawPropertiesLength ends at 36; the rest is padding before the raw bytes
    r.require(36)?;
    Ok(DeviceDescriptor {
        removable_media: r.bool(10)?,
        command_queueing: r.bool(11)?,
        vendor_id: r.c_string(r.u32(12)?),
        product_id: r.c_string(r.u32(16)?),
        product_revision: r.c_string(r.u32(20)?),
        serial_number: r.c_string(r.u32(24)?),
        bus_type: BusType::from_raw(r.u32(28)?),
    })
}

/// `DRIVE_LAYOUT_INFORMATION_EX` and its `PARTITION_INFORMATION_EX` entries.
///
/// Unused MBR slots are dropped: MBR disks always report four entries.
pub fn parse_drive_layout(buf: &[u8]) -> Result<DriveLayout> {
    let r = Reader::new(buf, "DRIVE_LAYOUT_INFORMATION_EX");
    r.require(DRIVE_LAYOUT_INFORMATION_EX_HEADER_SIZE)?;

    let partition_style = PartitionStyle::from_raw(r.u32(0)?);
    let partition_count = r.u32(4)? as usize;

    let extra = match partition_style {
        PartitionStyle::MBR => DiskExtra::Mbr(DiskExtraMbr {
            signature: r.u32(8)?,
            checksum: r.u32(12)?,
        }),
        PartitionStyle::GPT => DiskExtra::Gpt(DiskExtraGpt {
            disk_id: r.guid(8)?,
            starting_usable_offset: r.i64(24)?,
            usable_length: r.i64(32)?,
            max_partition_count: r.u32(40)?,
        }),
        PartitionStyle::RAW => DiskExtra::Raw,
    };

    let mut partitions = Vec::with_capacity(partition_count.min(128));
    for index in 0..partition_count {
        let Some(entry) = r.element(
            DRIVE_LAYOUT_INFORMATION_EX_HEADER_SIZE,
            PARTITION_INFORMATION_EX_SIZE,
            index,
        ) else {
            warn!("Drive layout reports {partition_count} partitions, buffer holds {index}");
            break;
        };

        let partition = parse_partition_entry(entry)?;
        if let PartitionExtra::Mbr(mbr) = &partition.extra {
            // See https://learn.microsoft.com/en-us/windows/win32/api/winioctl/ns-winioctl-drive_layout_information_ex#members
            if mbr.partition_type == 0 {
                continue;
            }
        }
        partitions.push(partition);
    }

    Ok(DriveLayout {
        partition_style,
        partitions,
        extra,
    })
}

fn parse_partition_entry(r: Reader<'_>) -> Result<PartitionRecord> {
    let partition_style = PartitionStyle::from_raw(r.u32(0)?);

    let extra = match partition_style {
        PartitionStyle::MBR => PartitionExtra::Mbr(PartitionExtraMbr {
            partition_type: r.u8(32)?,
            boot_indicator: r.bool(33)?,
            recognized_partition: r.bool(34)?,
            hidden_sectors: r.u32(36)?,
            partition_id: r.guid(40)?,
        }),
        PartitionStyle::GPT => {
            let mut name = Vec::with_capacity(GPT_NAME_CHARS);
            for i in 0..GPT_NAME_CHARS {
                let c = r.u16(72 + i * 2)?;
                if c == 0 {
                    break;
                }
                name.push(c);
            }
            PartitionExtra::Gpt(PartitionExtraGpt {
                partition_type: r.guid(32)?,
                partition_id: r.guid(48)?,
                attributes: r.u64(64)?,
                name: String::from_utf16_lossy(&name),
            })
        }
        PartitionStyle::RAW => PartitionExtra::Raw,
    };

    Ok(PartitionRecord {
        partition_style,
        starting_offset: r.i64(8)?,
        partition_length: r.i64(16)?,
        partition_number: r.u32(24)?,
        rewrite_partition: r.bool(28)?,
        is_service_partition: r.bool(29)?,
        extra,
    })
}

/// `DISK_GEOMETRY_EX` with its trailing `DISK_PARTITION_INFO` and
/// `DISK_DETECTION_INFO`.
///
/// The trailing segments are optional: virtual and mounted-image devices
/// often fill them inconsistently, so a bad read there is logged and the
/// segment left out.
pub fn parse_disk_geometry(buf: &[u8]) -> Result<DiskGeometry> {
    let r = Reader::new(buf, "DISK_GEOMETRY_EX");
    r.require(DISK_GEOMETRY_EX_HEADER_SIZE)?;

    let mut geometry = DiskGeometry {
        cylinders: r.i64(0)?,
        media_type: MediaType::from_raw(r.u32(8)?),
        tracks_per_cylinder: r.u32(12)?,
        sectors_per_track: r.u32(16)?,
        bytes_per_sector: r.u32(20)?,
        disk_size: r.i64(24)?.max(0) as u64,
        partition_info: None,
        detection: None,
    };

    let Some(partition_info) = r.tail(DISK_GEOMETRY_EX_HEADER_SIZE).filter(|t| !t.buf.is_empty())
    else {
        return Ok(geometry);
    };

    let info_size = match parse_partition_info(partition_info) {
        Ok((info, size)) => {
            geometry.partition_info = Some(info);
            size
        }
        Err(e) => {
            warn!("Ignoring disk partition info: {e}");
            return Ok(geometry);
        }
    };

    match partition_info
        .tail(info_size)
        .filter(|t| !t.buf.is_empty())
        .map(parse_detection_info)
    {
        Some(Ok(detection)) => geometry.detection = detection,
        Some(Err(e)) => warn!("Ignoring disk detection info: {e}"),
        None => {}
    }

    Ok(geometry)
}

fn parse_partition_info(r: Reader<'_>) -> Result<(DiskPartitionInfo, usize)> {
    let size = r.u32(0)? as usize;
    if size < 8 {
        return Err(Error::Truncated {
            structure: "DISK_PARTITION_INFO",
            offset: DISK_PARTITION_INFO_SIZE,
            len: size,
        });
    }
    let info = match PartitionStyle::from_raw(r.u32(4)?) {
        PartitionStyle::MBR => DiskPartitionInfo::Mbr {
            signature: r.u32(8)?,
            checksum: r.u32(12)?,
        },
        PartitionStyle::GPT => DiskPartitionInfo::Gpt {
            disk_id: r.guid(8)?,
        },
        PartitionStyle::RAW => DiskPartitionInfo::Raw,
    };
    Ok((info, size))
}

fn parse_detection_info(r: Reader<'_>) -> Result<Option<DetectionInfo>> {
    let r = Reader::new(r.buf, "DISK_DETECTION_INFO");
    let size = r.u32(0)? as usize;
    if size < 8 || size > r.buf.len() {
        return Err(Error::Truncated {
            structure: "DISK_DETECTION_INFO",
            offset: size.max(8),
            len: r.buf.len(),
        });
    }
    let detection = match r.u32(4)? {
        0 => None,
        1 => Some(DetectionInfo::Int13(Int13Info {
            drive_select: r.u16(8)?,
            max_cylinders: r.u32(12)?,
            sectors_per_track: r.u16(16)?,
            max_heads: r.u16(18)?,
            number_drives: r.u16(20)?,
        })),
        2 => Some(DetectionInfo::ExInt13(ExInt13Info {
            buffer_size: r.u16(24)?,
            flags: r.u16(26)?,
            cylinders: r.u32(28)?,
            heads: r.u32(32)?,
            sectors_per_track: r.u32(36)?,
            sectors_per_drive: r.u64(40)?,
            sector_size: r.u16(48)?,
        })),
        other => {
            debug!("Unknown disk detection type {other}");
            None
        }
    };
    Ok(detection)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskExtent {
    pub disk_number: u32,
    pub starting_offset: i64,
    pub extent_length: i64,
}

/// `VOLUME_DISK_EXTENTS`
pub fn parse_disk_extents(buf: &[u8]) -> Result<Vec<DiskExtent>> {
    let r = Reader::new(buf, "VOLUME_DISK_EXTENTS");
    let count = r.u32(0)? as usize;

    let mut extents = Vec::with_capacity(count.min(64));
    for index in 0..count {
        let Some(extent) = r.element(VOLUME_DISK_EXTENTS_HEADER_SIZE, DISK_EXTENT_SIZE, index)
        else {
            warn!("Volume reports {count} extents but the buffer only holds {index}");
            break;
        };
        extents.push(DiskExtent {
            disk_number: extent.u32(0)?,
            starting_offset: extent.i64(8)?,
            extent_length: extent.i64(16)?,
        });
    }
    Ok(extents)
}
