//! Win32 implementation of the device and enumeration traits.

use std::ffi::c_void;
use std::mem::{offset_of, size_of};

use log::{debug, warn};
use windows::{
    core::*, Win32::Devices::DeviceAndDriverInstallation::*, Win32::Foundation::*,
    Win32::Security::*, Win32::Storage::FileSystem::*, Win32::System::Ioctl::*,
    Win32::System::Threading::*, Win32::System::IO::*,
};

use crate::device::{Access, ControlCode, DeviceHandle, DeviceOpener, OsCode};
use crate::error::{self, Error};
use crate::resolver::{StorageDevice, StorageDeviceResolver};
use crate::topology::{DeviceInterface, StorageEnumerator, Topology};
use crate::types::PhysicalDiskInfo;

const ERROR_NO_MORE_FILES_CODE: OsCode = 18;
const ERROR_NO_MORE_ITEMS_CODE: OsCode = 259;

// GetDriveTypeW results that cannot hold a local volume
const DRIVE_NO_ROOT_DIR: u32 = 1;
const DRIVE_REMOTE: u32 = 4;

type WinError = windows::core::Error;

/// Win32 error code carried by a `windows` error.
fn os_code(err: &WinError) -> OsCode {
    let hr = err.code().0 as u32;
    if hr & 0xFFFF_0000 == 0x8007_0000 {
        hr & 0xFFFF
    } else {
        hr
    }
}

fn enumeration(what: &'static str, err: &WinError) -> Error {
    Error::Enumeration {
        what,
        code: os_code(err),
    }
}

fn wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(Some(0)).collect()
}

fn from_wide(buf: &[u16]) -> String {
    let end = buf.iter().position(|&c| c == 0).unwrap_or(buf.len());
    String::from_utf16_lossy(&buf[..end])
}

/// The local machine.
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowsSystem;

/// A device opened with `CreateFileW`. Closed on drop.
pub struct WindowsDevice {
    handle: HANDLE,
    path: String,
}

impl DeviceHandle for WindowsDevice {
    fn io_control(
        &self,
        code: ControlCode,
        input: &[u8],
        output: &mut [u8],
    ) -> std::result::Result<usize, OsCode> {
        let ioctl_code = match code {
            ControlCode::StorageDeviceNumber => IOCTL_STORAGE_GET_DEVICE_NUMBER,
            ControlCode::StorageQueryProperty => IOCTL_STORAGE_QUERY_PROPERTY,
            ControlCode::DriveLayout => IOCTL_DISK_GET_DRIVE_LAYOUT_EX,
            ControlCode::DriveGeometry => IOCTL_DISK_GET_DRIVE_GEOMETRY_EX,
            ControlCode::VolumeDiskExtents => IOCTL_VOLUME_GET_VOLUME_DISK_EXTENTS,
        };
        let input_ptr = (!input.is_empty()).then(|| input.as_ptr() as *const c_void);
        let mut bytes_returned = 0u32;

        unsafe {
            DeviceIoControl(
                self.handle,
                ioctl_code,
                input_ptr,
                input.len() as u32,
                Some(output.as_mut_ptr() as *mut c_void),
                output.len() as u32,
                Some(&mut bytes_returned),
                None,
            )
        }
        .map_err(|e| os_code(&e))?;

        Ok(bytes_returned as usize)
    }
}

impl Drop for WindowsDevice {
    fn drop(&mut self) {
        if let Err(err) = unsafe { CloseHandle(self.handle) } {
            warn!("Failed to close handle for {}: {err:?}", self.path);
        }
    }
}

impl DeviceOpener for WindowsSystem {
    type Handle = WindowsDevice;

    fn open(&self, path: &str, access: Access) -> std::result::Result<WindowsDevice, OsCode> {
        let wpath = wide(path);
        let desired_access = match access {
            Access::None => 0,
            Access::Read => FILE_GENERIC_READ.0,
        };

        let handle = unsafe {
            CreateFileW(
                PCWSTR(wpath.as_ptr()),
                desired_access,
                FILE_SHARE_READ | FILE_SHARE_WRITE,
                None,
                OPEN_EXISTING,
                FILE_ATTRIBUTE_NORMAL,
                None,
            )
        }
        .map_err(|e| os_code(&e))?;

        Ok(WindowsDevice {
            handle,
            path: path.to_string(),
        })
    }
}

/// A SetupAPI device information set, destroyed on drop.
struct DeviceInfoSet(HDEVINFO);

impl Drop for DeviceInfoSet {
    fn drop(&mut self) {
        if let Err(err) = unsafe { SetupDiDestroyDeviceInfoList(self.0) } {
            warn!("Failed to destroy device info list: {err:?}");
        }
    }
}

impl DeviceInfoSet {
    fn present_interfaces(class: &GUID, what: &'static str) -> error::Result<Self> {
        let set = unsafe {
            SetupDiGetClassDevsW(
                Some(class as *const GUID),
                PCWSTR::null(),
                None,
                DIGCF_PRESENT | DIGCF_DEVICEINTERFACE,
            )
        }
        .map_err(|e| enumeration(what, &e))?;
        Ok(DeviceInfoSet(set))
    }

    /// Interface path of `interface`, filling `devinfo` for property lookups.
    fn interface_path(
        &self,
        interface: &SP_DEVICE_INTERFACE_DATA,
        devinfo: &mut SP_DEVINFO_DATA,
    ) -> std::result::Result<String, WinError> {
        let mut required = 0u32;
        // Sizing call; fails with ERROR_INSUFFICIENT_BUFFER by contract
        let _ = unsafe {
            SetupDiGetDeviceInterfaceDetailW(self.0, interface, None, 0, Some(&mut required), None)
        };
        let path_offset = offset_of!(SP_DEVICE_INTERFACE_DETAIL_DATA_W, DevicePath);
        let required_len = (required as usize).max(path_offset + 2);

        // u64 storage keeps the detail struct aligned
        let mut storage = vec![0u64; required_len.div_ceil(size_of::<u64>())];
        let detail = storage.as_mut_ptr() as *mut SP_DEVICE_INTERFACE_DETAIL_DATA_W;
        unsafe {
            (*detail).cbSize = size_of::<SP_DEVICE_INTERFACE_DETAIL_DATA_W>() as u32;
            SetupDiGetDeviceInterfaceDetailW(
                self.0,
                interface,
                Some(detail),
                required_len as u32,
                None,
                Some(devinfo),
            )?;
        }

        let chars = (required_len - path_offset) / 2;
        let path = unsafe {
            std::slice::from_raw_parts((detail as *const u8).add(path_offset) as *const u16, chars)
        };
        Ok(from_wide(path))
    }

    fn registry_string(
        &self,
        devinfo: &SP_DEVINFO_DATA,
        property: SETUP_DI_REGISTRY_PROPERTY,
    ) -> String {
        let mut buffer = [0u8; 1024];
        match unsafe {
            SetupDiGetDeviceRegistryPropertyW(
                self.0,
                devinfo,
                property,
                None,
                Some(&mut buffer[..]),
                None,
            )
        } {
            Ok(()) => {
                let wide: Vec<u16> = buffer
                    .chunks_exact(2)
                    .map(|c| u16::from_le_bytes([c[0], c[1]]))
                    .collect();
                from_wide(&wide)
            }
            Err(err) => {
                debug!("Device property {} unavailable: {err:?}", property.0);
                String::new()
            }
        }
    }
}

fn device_interfaces(class: &GUID, what: &'static str) -> error::Result<Vec<DeviceInterface>> {
    let set = DeviceInfoSet::present_interfaces(class, what)?;
    let mut interfaces = Vec::new();

    for index in 0.. {
        let mut interface = SP_DEVICE_INTERFACE_DATA {
            cbSize: size_of::<SP_DEVICE_INTERFACE_DATA>() as u32,
            ..Default::default()
        };
        if let Err(err) = unsafe {
            SetupDiEnumDeviceInterfaces(set.0, None, class, index, &mut interface)
        } {
            if os_code(&err) == ERROR_NO_MORE_ITEMS_CODE {
                break;
            }
            return Err(enumeration(what, &err));
        }

        let mut devinfo = SP_DEVINFO_DATA {
            cbSize: size_of::<SP_DEVINFO_DATA>() as u32,
            ..Default::default()
        };
        let device_path = match set.interface_path(&interface, &mut devinfo) {
            Ok(path) if !path.is_empty() => path,
            Ok(_) => continue,
            Err(err) => {
                warn!("Skipping {what} interface {index}: {err:?}");
                continue;
            }
        };

        interfaces.push(DeviceInterface {
            device_path,
            name: set.registry_string(&devinfo, SPDRP_FRIENDLYNAME),
            description: set.registry_string(&devinfo, SPDRP_DEVICEDESC),
        });
    }

    debug!("Found {} {what} interfaces", interfaces.len());
    Ok(interfaces)
}

impl StorageEnumerator for WindowsSystem {
    fn disk_interfaces(&self) -> error::Result<Vec<DeviceInterface>> {
        device_interfaces(&GUID_DEVINTERFACE_DISK, "disk interfaces")
    }

    fn cdrom_interfaces(&self) -> error::Result<Vec<DeviceInterface>> {
        device_interfaces(&GUID_DEVINTERFACE_CDROM, "CD-ROM interfaces")
    }

    fn volume_guid_paths(&self) -> error::Result<Vec<String>> {
        let mut name = [0u16; MAX_PATH as usize + 1];
        let find = unsafe { FindFirstVolumeW(&mut name) }.map_err(|e| enumeration("volumes", &e))?;

        let mut volumes = vec![from_wide(&name)];
        let result = loop {
            match unsafe { FindNextVolumeW(find, &mut name) } {
                Ok(()) => volumes.push(from_wide(&name)),
                Err(err) if os_code(&err) == ERROR_NO_MORE_FILES_CODE => break Ok(()),
                Err(err) => break Err(enumeration("volumes", &err)),
            }
        };
        if let Err(err) = unsafe { FindVolumeClose(find) } {
            warn!("Failed to close volume search: {err:?}");
        }

        result.map(|()| volumes)
    }

    fn logical_drives(&self) -> error::Result<Vec<String>> {
        let mask = unsafe { GetLogicalDrives() };
        if mask == 0 {
            return Err(Error::Enumeration {
                what: "logical drives",
                code: unsafe { GetLastError() }.0,
            });
        }

        let mut drives = Vec::new();
        for (bit, letter) in ('A'..='Z').enumerate() {
            if mask & (1 << bit) == 0 {
                continue;
            }
            let root = format!("{letter}:\\");
            let wroot = wide(&root);
            match unsafe { GetDriveTypeW(PCWSTR(wroot.as_ptr())) } {
                DRIVE_NO_ROOT_DIR | DRIVE_REMOTE => debug!("{root}: not a local volume"),
                _ => drives.push(root),
            }
        }
        Ok(drives)
    }
}

/// Whether the current process token is elevated.
///
/// Only used to pick the `is_elevated` argument; the topology code itself
/// never looks at the process token.
pub fn is_process_elevated() -> bool {
    let mut token = HANDLE::default();
    if let Err(err) = unsafe { OpenProcessToken(GetCurrentProcess(), TOKEN_QUERY, &mut token) } {
        debug!("OpenProcessToken failed: {err:?}");
        return false;
    }

    let mut elevation = TOKEN_ELEVATION::default();
    let mut returned = 0u32;
    let result = unsafe {
        GetTokenInformation(
            token,
            TokenElevation,
            Some(&mut elevation as *mut TOKEN_ELEVATION as *mut c_void),
            size_of::<TOKEN_ELEVATION>() as u32,
            &mut returned,
        )
    };
    if let Err(err) = unsafe { CloseHandle(token) } {
        warn!("Failed to close process token: {err:?}");
    }

    match result {
        Ok(()) => elevation.TokenIsElevated != 0,
        Err(err) => {
            debug!("GetTokenInformation failed: {err:?}");
            false
        }
    }
}

/// Every physical disk and optical device on this machine. Devices that
/// fail to resolve are logged and left out.
pub fn physical_disks(is_elevated: bool) -> error::Result<Vec<PhysicalDiskInfo>> {
    Topology::new(WindowsSystem, is_elevated).list_physical_disks()
}

/// Physical device behind a drive letter, volume GUID path or device path.
pub fn storage_device(path: &str, is_elevated: bool) -> error::Result<Option<StorageDevice>> {
    StorageDeviceResolver::new(WindowsSystem).storage_device(path, is_elevated)
}
