//! Correlation of physical disks with the volumes and drive letters on them.

use std::vec;

use log::{debug, warn};

use crate::device::DeviceOpener;
use crate::error::Result;
use crate::geometry::PartitionGeometryResolver;
use crate::options::QueryOptions;
use crate::path::DevicePath;
use crate::resolver::StorageDeviceResolver;
use crate::types::{DeviceIdentity, PhysicalDiskInfo};

/// A device interface reported by the platform's device enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInterface {
    /// Path the device can be opened with.
    pub device_path: String,
    /// Friendly name, e.g. "Samsung SSD 980 1TB".
    pub name: String,
    pub description: String,
}

/// The platform enumerations the correlator is built on.
pub trait StorageEnumerator {
    /// Interfaces of the disk device class.
    fn disk_interfaces(&self) -> Result<Vec<DeviceInterface>>;
    /// Interfaces of the CD-ROM device class.
    fn cdrom_interfaces(&self) -> Result<Vec<DeviceInterface>>;
    /// Volume GUID paths, `\\?\Volume{GUID}\`.
    fn volume_guid_paths(&self) -> Result<Vec<String>>;
    /// Root paths of local drive letters, `C:\`.
    fn logical_drives(&self) -> Result<Vec<String>>;
}

impl<T: StorageEnumerator + ?Sized> StorageEnumerator for &T {
    fn disk_interfaces(&self) -> Result<Vec<DeviceInterface>> {
        (**self).disk_interfaces()
    }

    fn cdrom_interfaces(&self) -> Result<Vec<DeviceInterface>> {
        (**self).cdrom_interfaces()
    }

    fn volume_guid_paths(&self) -> Result<Vec<String>> {
        (**self).volume_guid_paths()
    }

    fn logical_drives(&self) -> Result<Vec<String>> {
        (**self).logical_drives()
    }
}

/// A volume and the drive letters mounted on it.
#[derive(Debug, Clone)]
struct MountedVolume {
    identity: DeviceIdentity,
    guid_path: String,
    drives: Vec<String>,
}

/// Builds [`PhysicalDiskInfo`] snapshots of the machine.
pub struct Topology<S> {
    system: S,
    options: QueryOptions,
    is_elevated: bool,
}

impl<S: DeviceOpener + StorageEnumerator> Topology<S> {
    /// `is_elevated` controls whether adapter descriptors are read; without
    /// elevation they cannot be opened for reading anyway.
    pub fn new(system: S, is_elevated: bool) -> Self {
        Topology {
            system,
            options: QueryOptions::default(),
            is_elevated,
        }
    }

    pub fn with_options(mut self, options: QueryOptions) -> Self {
        self.options = options;
        self
    }

    pub fn system(&self) -> &S {
        &self.system
    }

    /// Physical disks followed by CD-ROM devices.
    ///
    /// Volumes and drive letters are resolved up front; each device is then
    /// opened and joined when the iterator reaches it. Every call takes a
    /// fresh snapshot.
    pub fn physical_disks(&self) -> Result<PhysicalDisks<'_, S>> {
        let mut pending: Vec<(DeviceInterface, bool)> = self
            .system
            .disk_interfaces()?
            .into_iter()
            .map(|i| (i, false))
            .collect();
        pending.extend(
            self.system
                .cdrom_interfaces()?
                .into_iter()
                .map(|i| (i, true)),
        );

        let volumes = self.mounted_volumes()?;

        Ok(PhysicalDisks {
            topology: self,
            pending: pending.into_iter(),
            volumes,
        })
    }

    /// Collects [`Topology::physical_disks`], logging and skipping the disks
    /// that fail to resolve.
    pub fn list_physical_disks(&self) -> Result<Vec<PhysicalDiskInfo>> {
        Ok(self
            .physical_disks()?
            .filter_map(|disk| match disk {
                Ok(disk) => Some(disk),
                Err(e) => {
                    warn!("Skipping disk: {e}");
                    None
                }
            })
            .collect())
    }

    fn resolver(&self) -> StorageDeviceResolver<&S> {
        StorageDeviceResolver::with_options(&self.system, self.options)
    }

    fn geometry(&self) -> PartitionGeometryResolver<&S> {
        PartitionGeometryResolver::with_options(&self.system, self.options)
    }

    /// Identity of the volume or drive at `path`, corrected to the LDM data
    /// partition when it sits on a dynamic disk.
    fn volume_identity(&self, path: &str) -> Result<Option<DeviceIdentity>> {
        let Some(device) = self.resolver().storage_device(path, false)? else {
            debug!("{path}: no device behind volume");
            return Ok(None);
        };
        if !device.dynamic {
            return Ok(Some(device.identity));
        }

        match self.geometry().resolve_for(&device.identity)? {
            Some(report) => Ok(Some(report.redirect(device.identity).0)),
            None => Ok(Some(device.identity)),
        }
    }

    /// Like [`Topology::volume_identity`], but a volume that fails to resolve
    /// is logged and treated as having no device.
    fn mounted_identity(&self, path: &str) -> Option<DeviceIdentity> {
        match self.volume_identity(path) {
            Ok(identity) => identity,
            Err(e) => {
                warn!("{path}: skipping volume: {e}");
                None
            }
        }
    }

    fn mounted_volumes(&self) -> Result<Vec<MountedVolume>> {
        let mut volumes = Vec::new();
        for guid_path in self.system.volume_guid_paths()? {
            let path = DevicePath::parse(&guid_path)?;
            if let Some(identity) = self.mounted_identity(&guid_path) {
                volumes.push(MountedVolume {
                    identity,
                    guid_path: path.to_string(),
                    drives: Vec::new(),
                });
            }
        }

        for drive in self.system.logical_drives()? {
            let path = DevicePath::parse(&drive)?;
            let Some(identity) = self.mounted_identity(&drive) else {
                continue;
            };
            match volumes.iter_mut().find(|v| v.identity == identity) {
                Some(volume) => volume.drives.push(path.to_string()),
                None => debug!("{path}: no volume GUID path on {identity:?}"),
            }
        }

        Ok(volumes)
    }

    fn disk_info(
        &self,
        interface: &DeviceInterface,
        is_cdrom: bool,
        volumes: &[MountedVolume],
    ) -> Result<Option<PhysicalDiskInfo>> {
        let path = &interface.device_path;
        let Some(device) = self.resolver().storage_device(path, self.is_elevated)? else {
            debug!("{path}: no device number, skipping");
            return Ok(None);
        };

        let mut info = PhysicalDiskInfo::new(path.as_str(), device.identity);
        info.name = interface.name.clone();
        info.device_description = interface.description.clone();
        info.adapter = device.adapter;

        if let Some(report) = self.geometry().resolve_geometry(path)? {
            info.total_size = report.total_size();
            info.geometry = report.geometry;
            info.layout = report.layout;
        }

        let identity = info.identity;
        let mut on_device = volumes.iter().filter(|v| v.identity.same_device(&identity));

        if is_cdrom {
            // At most one volume per optical drive
            let Some(volume) = on_device.next() else {
                return Ok(Some(info));
            };
            if on_device.next().is_some() {
                warn!("{path}: several volumes claim this device, attaching none");
                return Ok(Some(info));
            }
            let partition_number = volume.identity.partition_number;
            if (1..u32::MAX).contains(&partition_number) {
                info.partition_indexes.insert(partition_number);
            }
            attach(&mut info, volume);
        } else {
            for volume in on_device {
                if volume.identity.is_whole_device() {
                    debug!("{}: partition unknown on {path}", volume.guid_path);
                } else {
                    info.partition_indexes.insert(volume.identity.partition_number);
                }
                attach(&mut info, volume);
            }
        }

        Ok(Some(info))
    }
}

fn attach(info: &mut PhysicalDiskInfo, volume: &MountedVolume) {
    info.volume_guids.insert(volume.guid_path.clone());
    info.logical_drives.extend(volume.drives.iter().cloned());
}

/// Lazily resolved devices of one [`Topology::physical_disks`] call.
pub struct PhysicalDisks<'a, S> {
    topology: &'a Topology<S>,
    pending: vec::IntoIter<(DeviceInterface, bool)>,
    volumes: Vec<MountedVolume>,
}

impl<S: DeviceOpener + StorageEnumerator> Iterator for PhysicalDisks<'_, S> {
    type Item = Result<PhysicalDiskInfo>;

    fn next(&mut self) -> Option<Self::Item> {
        for (interface, is_cdrom) in self.pending.by_ref() {
            match self.topology.disk_info(&interface, is_cdrom, &self.volumes) {
                Ok(Some(info)) => return Some(Ok(info)),
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
        None
    }
}
