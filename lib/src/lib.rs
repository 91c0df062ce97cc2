//! Maps Windows drive letters, volume GUID paths and device paths to the
//! physical disks behind them, and lists every physical disk together with
//! its partition table, geometry, volumes and drive letters.
//!
//! The query and correlation logic is written against the [`DeviceOpener`]
//! and [`StorageEnumerator`] traits; the Win32 implementation lives in
//! [`sys`] and is only built on Windows.
//!
//! ```no_run
//! # #[cfg(windows)]
//! # fn main() -> win_storage_topology::Result<()> {
//! use win_storage_topology::sys;
//!
//! for disk in sys::physical_disks(sys::is_process_elevated())? {
//!     println!("{}: {:?}", disk.device_path, disk.logical_drives);
//! }
//! # Ok(())
//! # }
//! # #[cfg(not(windows))]
//! # fn main() {}
//! ```

pub mod device;
pub mod error;
pub mod geometry;
pub mod ioctl;
pub mod options;
pub mod parse;
pub mod path;
pub mod redirect;
pub mod resolver;
pub mod topology;
pub mod types;

#[cfg(windows)]
pub mod sys;

#[cfg(test)]
mod testing;

pub use device::{Access, ControlCode, DeviceHandle, DeviceOpener, OsCode};
pub use error::{Error, Result};
pub use geometry::{GeometryReport, PartitionGeometryResolver};
pub use options::QueryOptions;
pub use path::DevicePath;
pub use resolver::{StorageDevice, StorageDeviceResolver};
pub use topology::{DeviceInterface, PhysicalDisks, StorageEnumerator, Topology};
pub use types::{DeviceIdentity, PhysicalDiskInfo};
