use log::debug;

use crate::device::{open_device, Access, ControlCode, DeviceOpener, ERROR_ACCESS_DENIED};
use crate::error::{Error, Result};
use crate::ioctl::{query, Reply};
use crate::options::QueryOptions;
use crate::parse;
use crate::path::DevicePath;
use crate::types::{DeviceIdentity, DiskGeometry, DriveLayout};

/// Partition table and geometry of one device. Either half may be missing
/// when the device does not answer that query.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GeometryReport {
    pub geometry: Option<DiskGeometry>,
    pub layout: Option<DriveLayout>,
}

impl GeometryReport {
    /// Device size in bytes, 0 when the geometry is unknown.
    pub fn total_size(&self) -> u64 {
        self.geometry.as_ref().map_or(0, |g| g.disk_size)
    }

    /// Identity and size as seen by a volume on this disk.
    ///
    /// On a dynamic disk the volume lives inside the LDM data partition, so
    /// the partition number and size are replaced by that partition's.
    pub fn redirect(&self, identity: DeviceIdentity) -> (DeviceIdentity, u64) {
        match self.layout.as_ref().and_then(DriveLayout::ldm_data_partition) {
            Some(data) => (
                DeviceIdentity {
                    partition_number: data.partition_number,
                    ..identity
                },
                data.partition_length.max(0) as u64,
            ),
            None => (identity, self.total_size()),
        }
    }
}

/// Reads the drive layout and geometry of a physical device.
pub struct PartitionGeometryResolver<O> {
    opener: O,
    options: QueryOptions,
}

impl<O: DeviceOpener> PartitionGeometryResolver<O> {
    pub fn new(opener: O) -> Self {
        Self::with_options(opener, QueryOptions::default())
    }

    pub fn with_options(opener: O, options: QueryOptions) -> Self {
        PartitionGeometryResolver { opener, options }
    }

    /// Layout and geometry of the device at `path`.
    ///
    /// `Ok(None)` when the device is missing, read access is denied, or it
    /// answers neither query.
    pub fn resolve_geometry(&self, path: &str) -> Result<Option<GeometryReport>> {
        let device_path = DevicePath::parse(path)?.device_path();

        let handle = match open_device(&self.opener, &device_path, Access::Read) {
            Ok(Some(handle)) => handle,
            Ok(None) => return Ok(None),
            Err(Error::Open { code, .. }) if code == ERROR_ACCESS_DENIED => {
                debug!("{device_path}: read access denied, no geometry");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let layout = match query(
            &handle,
            ControlCode::DriveLayout,
            &[],
            parse::DRIVE_LAYOUT_INFORMATION_EX_HEADER_SIZE,
            &device_path,
            &self.options,
        )? {
            Reply::Data(buf) => Some(parse::parse_drive_layout(&buf)?),
            Reply::Unsupported(_) => None,
        };

        let geometry = match query(
            &handle,
            ControlCode::DriveGeometry,
            &[],
            parse::DISK_GEOMETRY_EX_HEADER_SIZE,
            &device_path,
            &self.options,
        )? {
            Reply::Data(buf) => Some(parse::parse_disk_geometry(&buf)?),
            Reply::Unsupported(_) => None,
        };

        if layout.is_none() && geometry.is_none() {
            return Ok(None);
        }
        Ok(Some(GeometryReport { geometry, layout }))
    }

    /// Geometry of the whole device behind `identity`.
    pub fn resolve_for(&self, identity: &DeviceIdentity) -> Result<Option<GeometryReport>> {
        self.resolve_geometry(&identity.device_path())
    }
}
