use std::fmt;

use log::debug;

use crate::error::{Error, Result};

/// Raw Win32 error code (`GetLastError` value).
pub type OsCode = u32;

pub const ERROR_INVALID_FUNCTION: OsCode = 1;
pub const ERROR_FILE_NOT_FOUND: OsCode = 2;
pub const ERROR_PATH_NOT_FOUND: OsCode = 3;
pub const ERROR_ACCESS_DENIED: OsCode = 5;
pub const ERROR_NOT_READY: OsCode = 21;
pub const ERROR_NOT_SUPPORTED: OsCode = 50;
pub const ERROR_INVALID_PARAMETER: OsCode = 87;
pub const ERROR_INSUFFICIENT_BUFFER: OsCode = 122;
pub const ERROR_MORE_DATA: OsCode = 234;

/// The control codes the topology core sends to storage drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlCode {
    /// `IOCTL_STORAGE_GET_DEVICE_NUMBER`
    StorageDeviceNumber,
    /// `IOCTL_STORAGE_QUERY_PROPERTY`
    StorageQueryProperty,
    /// `IOCTL_DISK_GET_DRIVE_LAYOUT_EX`
    DriveLayout,
    /// `IOCTL_DISK_GET_DRIVE_GEOMETRY_EX`
    DriveGeometry,
    /// `IOCTL_VOLUME_GET_VOLUME_DISK_EXTENTS`
    VolumeDiskExtents,
}

impl fmt::Display for ControlCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ControlCode::StorageDeviceNumber => "IOCTL_STORAGE_GET_DEVICE_NUMBER",
            ControlCode::StorageQueryProperty => "IOCTL_STORAGE_QUERY_PROPERTY",
            ControlCode::DriveLayout => "IOCTL_DISK_GET_DRIVE_LAYOUT_EX",
            ControlCode::DriveGeometry => "IOCTL_DISK_GET_DRIVE_GEOMETRY_EX",
            ControlCode::VolumeDiskExtents => "IOCTL_VOLUME_GET_VOLUME_DISK_EXTENTS",
        };
        f.write_str(name)
    }
}

/// Rights requested when opening a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// No data access. Enough for the device number and extent queries.
    None,
    /// Read access, needed for property, layout and geometry queries.
    Read,
}

/// An open device. Implementations release the underlying OS handle on drop.
pub trait DeviceHandle {
    /// Issues `code` and fills `output`, returning the number of bytes written.
    fn io_control(
        &self,
        code: ControlCode,
        input: &[u8],
        output: &mut [u8],
    ) -> std::result::Result<usize, OsCode>;
}

/// Opens devices by their canonical `\\.\` path.
pub trait DeviceOpener {
    type Handle: DeviceHandle;

    fn open(&self, path: &str, access: Access) -> std::result::Result<Self::Handle, OsCode>;
}

impl<T: DeviceOpener + ?Sized> DeviceOpener for &T {
    type Handle = T::Handle;

    fn open(&self, path: &str, access: Access) -> std::result::Result<Self::Handle, OsCode> {
        (**self).open(path, access)
    }
}

/// Opens `path`, mapping "file/path not found" to `Ok(None)`.
pub fn open_device<O: DeviceOpener + ?Sized>(
    opener: &O,
    path: &str,
    access: Access,
) -> Result<Option<O::Handle>> {
    match opener.open(path, access) {
        Ok(handle) => Ok(Some(handle)),
        Err(code) if code == ERROR_FILE_NOT_FOUND || code == ERROR_PATH_NOT_FOUND => {
            debug!("{path}: no such device");
            Ok(None)
        }
        Err(code) => Err(Error::Open {
            path: path.to_string(),
            code,
        }),
    }
}
