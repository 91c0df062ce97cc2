//! Device-number resolution with the dynamic disk fallback.
//!
//! Volumes on dynamic (LDM) disks do not answer the device-number query
//! themselves. For those the volume's disk extents are read and the query is
//! repeated once against the physical drive holding the first extent:
//!
//! ```text
//! Direct --unsupported--> ResolveExtents --extent--> Retry(\\.\PhysicalDriveN) --> done
//!                                        \--none or error---> no data
//! ```
//!
//! Spanned and mirrored volumes are therefore reported on the disk of their
//! first extent only.

use log::{debug, warn};

use crate::device::{open_device, Access, ControlCode, DeviceHandle, DeviceOpener};
use crate::error::Result;
use crate::ioctl::{query, Reply};
use crate::options::QueryOptions;
use crate::parse;
use crate::path::DevicePath;
use crate::types::DeviceIdentity;

/// A resolved device number and the path that answered for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumberResolution {
    pub identity: DeviceIdentity,
    /// Path whose handle returned `identity`.
    pub resolved_path: String,
    /// Set when the identity came from the physical drive of a dynamic volume.
    pub dynamic: bool,
}

/// Issues the device-number query on an open handle.
///
/// `Ok(None)` means the device does not support the query directly.
pub fn query_device_number<H: DeviceHandle + ?Sized>(
    handle: &H,
    path: &str,
    options: &QueryOptions,
) -> Result<Option<DeviceIdentity>> {
    let reply = query(
        handle,
        ControlCode::StorageDeviceNumber,
        &[],
        parse::STORAGE_DEVICE_NUMBER_SIZE,
        path,
        options,
    )?;
    reply
        .into_data()
        .map(|buf| parse::parse_device_number(&buf))
        .transpose()
}

/// Disk number of the first extent of the volume open on `handle`.
pub fn first_extent_disk<H: DeviceHandle + ?Sized>(
    handle: &H,
    path: &str,
    options: &QueryOptions,
) -> Result<Option<u32>> {
    let reply = query(
        handle,
        ControlCode::VolumeDiskExtents,
        &[],
        parse::VOLUME_DISK_EXTENTS_HEADER_SIZE + parse::DISK_EXTENT_SIZE,
        path,
        options,
    )?;
    let Reply::Data(buf) = reply else {
        return Ok(None);
    };

    let extents = parse::parse_disk_extents(&buf)?;
    if extents.len() > 1 {
        debug!(
            "{path}: volume spans {} extents, using disk {}",
            extents.len(),
            extents[0].disk_number
        );
    }
    Ok(extents.first().map(|e| e.disk_number))
}

/// Resolves the device number behind `device_path` (an already canonical
/// open path), falling back to the volume's first disk extent.
pub fn resolve_device_number<O: DeviceOpener + ?Sized>(
    opener: &O,
    device_path: &str,
    options: &QueryOptions,
) -> Result<Option<NumberResolution>> {
    let Some(handle) = open_device(opener, device_path, Access::None)? else {
        return Ok(None);
    };

    if let Some(identity) = query_device_number(&handle, device_path, options)? {
        return Ok(Some(NumberResolution {
            identity,
            resolved_path: device_path.to_string(),
            dynamic: false,
        }));
    }

    let disk = match first_extent_disk(&handle, device_path, options) {
        Ok(disk) => disk,
        Err(e) => {
            warn!("{device_path}: failed to read disk extents: {e}");
            None
        }
    };
    // The volume handle is released before the physical drive is opened
    drop(handle);

    let Some(disk) = disk else {
        debug!("{device_path}: no disk extents, topology unknown");
        return Ok(None);
    };

    let physical = DevicePath::PhysicalDrive(disk).device_path();
    debug!("{device_path}: dynamic volume, retrying on {physical}");

    let Some(handle) = open_device(opener, &physical, Access::None)? else {
        return Ok(None);
    };
    Ok(query_device_number(&handle, &physical, options)?.map(|identity| {
        NumberResolution {
            identity,
            resolved_path: physical,
            dynamic: true,
        }
    }))
}
