use log::{debug, warn};

use crate::device::{open_device, Access, DeviceOpener};
use crate::error::Result;
use crate::ioctl::{query_descriptor, Reply};
use crate::options::QueryOptions;
use crate::parse::{self, AdapterDescriptor, DeviceDescriptor, StorageProperty};
use crate::path::DevicePath;
use crate::redirect::resolve_device_number;
use crate::types::{DeviceIdentity, StorageAdapterInfo};

/// Identity of a device plus whatever adapter data could be read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageDevice {
    pub identity: DeviceIdentity,
    pub adapter: StorageAdapterInfo,
    /// The identity was found through the disk extents of a dynamic volume.
    pub dynamic: bool,
}

/// Maps drive letters, volume GUID paths and device paths to the physical
/// device and partition behind them.
pub struct StorageDeviceResolver<O> {
    opener: O,
    options: QueryOptions,
}

impl<O: DeviceOpener> StorageDeviceResolver<O> {
    pub fn new(opener: O) -> Self {
        Self::with_options(opener, QueryOptions::default())
    }

    pub fn with_options(opener: O, options: QueryOptions) -> Self {
        StorageDeviceResolver { opener, options }
    }

    pub fn opener(&self) -> &O {
        &self.opener
    }

    /// Device and partition number behind `path`.
    ///
    /// `Ok(None)` when the device does not exist or its topology cannot be
    /// determined. Malformed paths fail before any device is opened.
    pub fn resolve(&self, path: &str) -> Result<Option<DeviceIdentity>> {
        let device_path = DevicePath::parse(path)?.device_path();
        Ok(resolve_device_number(&self.opener, &device_path, &self.options)?
            .map(|resolution| resolution.identity))
    }

    /// Like [`resolve`](Self::resolve), also reading adapter and device
    /// descriptors when `is_elevated`.
    ///
    /// Without elevation, or when the descriptors cannot be read, the adapter
    /// info is left at its defaults; that is not an error.
    pub fn storage_device(&self, path: &str, is_elevated: bool) -> Result<Option<StorageDevice>> {
        let device_path = DevicePath::parse(path)?.device_path();
        let Some(resolution) = resolve_device_number(&self.opener, &device_path, &self.options)?
        else {
            return Ok(None);
        };

        let adapter = if is_elevated {
            self.adapter_info(&resolution.resolved_path)
        } else {
            StorageAdapterInfo::default()
        };

        Ok(Some(StorageDevice {
            identity: resolution.identity,
            adapter,
            dynamic: resolution.dynamic,
        }))
    }

    fn adapter_info(&self, device_path: &str) -> StorageAdapterInfo {
        let mut info = StorageAdapterInfo::default();

        let handle = match open_device(&self.opener, device_path, Access::Read) {
            Ok(Some(handle)) => handle,
            Ok(None) => return info,
            Err(e) => {
                warn!("Skipping adapter info: {e}");
                return info;
            }
        };

        match self.descriptor(
            &handle,
            device_path,
            StorageProperty::Adapter,
            parse::parse_adapter_descriptor,
        ) {
            Ok(Some(adapter)) => merge_adapter(&mut info, &adapter),
            Ok(None) => debug!("{device_path}: no adapter descriptor"),
            Err(e) => warn!("Skipping adapter descriptor: {e}"),
        }
        match self.descriptor(
            &handle,
            device_path,
            StorageProperty::Device,
            parse::parse_device_descriptor,
        ) {
            Ok(Some(device)) => merge_device(&mut info, &device),
            Ok(None) => debug!("{device_path}: no device descriptor"),
            Err(e) => warn!("Skipping device descriptor: {e}"),
        }
        info
    }

    fn descriptor<T>(
        &self,
        handle: &O::Handle,
        device_path: &str,
        property: StorageProperty,
        parse: impl FnOnce(&[u8]) -> Result<T>,
    ) -> Result<Option<T>> {
        match query_descriptor(handle, property, device_path, &self.options)? {
            Reply::Data(buf) => parse(&buf).map(Some),
            Reply::Unsupported(_) => Ok(None),
        }
    }
}

fn merge_adapter(info: &mut StorageAdapterInfo, adapter: &AdapterDescriptor) {
    info.bus_type = adapter.bus_type;
    info.bus_major_version = adapter.bus_major_version;
    info.bus_minor_version = adapter.bus_minor_version;
    info.max_transfer_length = adapter.max_transfer_length;
    info.max_physical_pages = adapter.max_physical_pages;
    info.alignment_mask = adapter.alignment_mask;
    info.command_queueing |= adapter.command_queueing;
}

fn merge_device(info: &mut StorageAdapterInfo, device: &DeviceDescriptor) {
    info.vendor_id = device.vendor_id.clone();
    info.product_id = device.product_id.clone();
    info.product_revision = device.product_revision.clone();
    info.serial_number = device.serial_number.clone();
    info.removable_media = device.removable_media;
    info.command_queueing |= device.command_queueing;
    if info.bus_type == Default::default() {
        info.bus_type = device.bus_type;
    }
}
