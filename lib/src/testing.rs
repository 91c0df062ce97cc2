//! Scripted devices for exercising the core without a Windows kernel.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use crate::device::*;
use crate::error::Result;
use crate::parse::StorageProperty;
use crate::topology::{DeviceInterface, StorageEnumerator};

pub(crate) enum Response {
    /// Fails with "buffer too small" until the output buffer holds all of it.
    Data(Vec<u8>),
    /// Copies whatever fits and succeeds, like descriptor queries do.
    Truncating(Vec<u8>),
    Fail(OsCode),
}

#[derive(Default)]
pub(crate) struct FakeDevice {
    responses: HashMap<(ControlCode, u32), Response>,
    read_denied: bool,
}

impl FakeDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(mut self, code: ControlCode, response: Response) -> Self {
        self.responses.insert((code, 0), response);
        self
    }

    pub fn property(mut self, property: StorageProperty, response: Response) -> Self {
        self.responses
            .insert((ControlCode::StorageQueryProperty, property as u32), response);
        self
    }

    /// Opening with read access fails, as it does for a non-elevated caller.
    pub fn read_denied(mut self) -> Self {
        self.read_denied = true;
        self
    }

    pub fn device_number(
        self,
        device_type: u32,
        device_number: u32,
        partition_number: u32,
    ) -> Self {
        self.reply(
            ControlCode::StorageDeviceNumber,
            Response::Data(native::device_number(
                device_type,
                device_number,
                partition_number,
            )),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Call {
    pub path: String,
    pub code: ControlCode,
    pub buffer_size: usize,
}

#[derive(Default)]
pub(crate) struct Ledger {
    opened: Cell<usize>,
    closed: Cell<usize>,
    live: Cell<usize>,
    max_live: Cell<usize>,
    opens: RefCell<Vec<(String, Access)>>,
    calls: RefCell<Vec<Call>>,
}

impl Ledger {
    pub fn opened(&self) -> usize {
        self.opened.get()
    }

    pub fn closed(&self) -> usize {
        self.closed.get()
    }

    pub fn max_live(&self) -> usize {
        self.max_live.get()
    }

    pub fn opens(&self) -> Vec<(String, Access)> {
        self.opens.borrow().clone()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    pub fn buffer_sizes(&self, code: ControlCode) -> Vec<usize> {
        self.calls
            .borrow()
            .iter()
            .filter(|c| c.code == code)
            .map(|c| c.buffer_size)
            .collect()
    }
}

pub(crate) struct FakeHandle {
    path: String,
    device: Rc<FakeDevice>,
    ledger: Rc<Ledger>,
}

impl DeviceHandle for FakeHandle {
    fn io_control(
        &self,
        code: ControlCode,
        input: &[u8],
        output: &mut [u8],
    ) -> std::result::Result<usize, OsCode> {
        self.ledger.calls.borrow_mut().push(Call {
            path: self.path.clone(),
            code,
            buffer_size: output.len(),
        });

        let key = match code {
            ControlCode::StorageQueryProperty => {
                let id = input.get(0..4).ok_or(ERROR_INVALID_FUNCTION)?;
                (code, u32::from_le_bytes([id[0], id[1], id[2], id[3]]))
            }
            _ => (code, 0),
        };

        match self.device.responses.get(&key) {
            None => Err(ERROR_INVALID_FUNCTION),
            Some(Response::Fail(os_code)) => Err(*os_code),
            Some(Response::Data(data)) if output.len() < data.len() => {
                if code == ControlCode::VolumeDiskExtents {
                    Err(ERROR_MORE_DATA)
                } else {
                    Err(ERROR_INSUFFICIENT_BUFFER)
                }
            }
            Some(Response::Data(data)) => {
                output[..data.len()].copy_from_slice(data);
                Ok(data.len())
            }
            Some(Response::Truncating(data)) => {
                let n = data.len().min(output.len());
                output[..n].copy_from_slice(&data[..n]);
                Ok(n)
            }
        }
    }
}

impl Drop for FakeHandle {
    fn drop(&mut self) {
        self.ledger.closed.set(self.ledger.closed.get() + 1);
        self.ledger.live.set(self.ledger.live.get() - 1);
    }
}

/// A machine made of scripted devices and enumeration results.
#[derive(Default)]
pub(crate) struct FakeSystem {
    devices: HashMap<String, Rc<FakeDevice>>,
    ledger: Rc<Ledger>,
    disks: Vec<DeviceInterface>,
    cdroms: Vec<DeviceInterface>,
    volumes: Vec<String>,
    drives: Vec<String>,
}

impl FakeSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn device(mut self, path: &str, device: FakeDevice) -> Self {
        self.devices.insert(path.to_ascii_lowercase(), Rc::new(device));
        self
    }

    pub fn disk_interface(mut self, device_path: &str, name: &str) -> Self {
        self.disks.push(interface(device_path, name));
        self
    }

    pub fn cdrom_interface(mut self, device_path: &str, name: &str) -> Self {
        self.cdroms.push(interface(device_path, name));
        self
    }

    pub fn volume(mut self, volume_guid_path: &str) -> Self {
        self.volumes.push(volume_guid_path.to_string());
        self
    }

    pub fn drive(mut self, drive: &str) -> Self {
        self.drives.push(drive.to_string());
        self
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }
}

fn interface(device_path: &str, name: &str) -> DeviceInterface {
    DeviceInterface {
        device_path: device_path.to_string(),
        name: name.to_string(),
        description: "Disk drive".to_string(),
    }
}

impl DeviceOpener for FakeSystem {
    type Handle = FakeHandle;

    fn open(&self, path: &str, access: Access) -> std::result::Result<FakeHandle, OsCode> {
        let device = self
            .devices
            .get(&path.to_ascii_lowercase())
            .ok_or(ERROR_FILE_NOT_FOUND)?;
        if access == Access::Read && device.read_denied {
            return Err(ERROR_ACCESS_DENIED);
        }

        let ledger = &self.ledger;
        ledger.opened.set(ledger.opened.get() + 1);
        ledger.live.set(ledger.live.get() + 1);
        ledger.max_live.set(ledger.max_live.get().max(ledger.live.get()));
        ledger.opens.borrow_mut().push((path.to_string(), access));

        Ok(FakeHandle {
            path: path.to_string(),
            device: Rc::clone(device),
            ledger: Rc::clone(&self.ledger),
        })
    }
}

impl StorageEnumerator for FakeSystem {
    fn disk_interfaces(&self) -> Result<Vec<DeviceInterface>> {
        Ok(self.disks.clone())
    }

    fn cdrom_interfaces(&self) -> Result<Vec<DeviceInterface>> {
        Ok(self.cdroms.clone())
    }

    fn volume_guid_paths(&self) -> Result<Vec<String>> {
        Ok(self.volumes.clone())
    }

    fn logical_drives(&self) -> Result<Vec<String>> {
        Ok(self.drives.clone())
    }
}

/// Byte images of the native structures, written field by field.
pub(crate) mod native {
    use uuid::Uuid;

    fn pad_to(buf: &mut Vec<u8>, len: usize) {
        assert!(buf.len() <= len, "structure overflow: {} > {len}", buf.len());
        buf.resize(len, 0);
    }

    pub fn device_number(device_type: u32, device_number: u32, partition_number: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&device_type.to_le_bytes());
        buf.extend_from_slice(&device_number.to_le_bytes());
        buf.extend_from_slice(&partition_number.to_le_bytes());
        buf
    }

    pub fn adapter_descriptor(bus_type: u8, max_transfer_length: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&32u32.to_le_bytes()); // Version
        buf.extend_from_slice(&32u32.to_le_bytes()); // Size
        buf.extend_from_slice(&max_transfer_length.to_le_bytes());
        buf.extend_from_slice(&0x21u32.to_le_bytes()); // MaximumPhysicalPages
        buf.extend_from_slice(&1u32.to_le_bytes()); // AlignmentMask
        buf.extend_from_slice(&[0, 0, 1, 1]); // Pio, ScansDown, CommandQueueing, Accelerated
        buf.push(bus_type);
        buf.push(0);
        buf.extend_from_slice(&2u16.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&[0, 0]); // SrbType, AddressType
        buf
    }

    pub fn device_descriptor(
        vendor: &str,
        product: &str,
        revision: &str,
        serial: &str,
        bus_type: u32,
        removable: bool,
    ) -> Vec<u8> {
        let mut strings = Vec::new();
        let mut offsets = Vec::new();
        for s in [vendor, product, revision, serial] {
            offsets.push(40 + strings.len() as u32);
            strings.extend_from_slice(s.as_bytes());
            strings.push(0);
        }
        let size = 40 + strings.len() as u32;

        let mut buf = Vec::new();
        buf.extend_from_slice(&40u32.to_le_bytes()); // Version
        buf.extend_from_slice(&size.to_le_bytes());
        buf.extend_from_slice(&[0, 0, removable as u8, 0]);
        for offset in offsets {
            buf.extend_from_slice(&offset.to_le_bytes());
        }
        buf.extend_from_slice(&bus_type.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes()); // RawPropertiesLength
        pad_to(&mut buf, 40);
        buf.extend_from_slice(&strings);
        buf
    }

    pub struct MbrPartition {
        number: u32,
        partition_type: u8,
        start: i64,
        length: i64,
    }

    impl MbrPartition {
        pub fn new(number: u32, partition_type: u8, start: i64, length: i64) -> Self {
            MbrPartition {
                number,
                partition_type,
                start,
                length,
            }
        }

        pub fn unused() -> Self {
            Self::new(0, 0, 0, 0)
        }
    }

    pub fn mbr_layout(signature: u32, partitions: &[MbrPartition]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&0u32.to_le_bytes()); // PARTITION_STYLE_MBR
        buf.extend_from_slice(&(partitions.len() as u32).to_le_bytes());
        buf.extend_from_slice(&signature.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes()); // CheckSum
        pad_to(&mut buf, 48);

        for p in partitions {
            let start = buf.len();
            buf.extend_from_slice(&0u32.to_le_bytes());
            buf.extend_from_slice(&[0; 4]);
            buf.extend_from_slice(&p.start.to_le_bytes());
            buf.extend_from_slice(&p.length.to_le_bytes());
            buf.extend_from_slice(&p.number.to_le_bytes());
            buf.extend_from_slice(&[0, 0, 0, 0]); // Rewrite, Service, padding
            buf.push(p.partition_type);
            buf.push(0); // BootIndicator
            buf.push((p.partition_type != 0) as u8);
            buf.push(0);
            buf.extend_from_slice(&((p.start / 512) as u32).to_le_bytes());
            buf.extend_from_slice(&[0; 16]); // PartitionId
            pad_to(&mut buf, start + 144);
        }
        buf
    }

    pub struct GptPartition {
        number: u32,
        partition_type: Uuid,
        partition_id: Uuid,
        name: String,
        start: i64,
        length: i64,
    }

    /// Microsoft basic data partition.
    pub const BASIC_DATA: Uuid = Uuid::from_u128(0xebd0a0a2_b9e5_4433_87c0_68b6b72699c7);

    impl GptPartition {
        pub fn new(
            number: u32,
            partition_type: Uuid,
            partition_id: Uuid,
            name: &str,
            start: i64,
            length: i64,
        ) -> Self {
            GptPartition {
                number,
                partition_type,
                partition_id,
                name: name.to_string(),
                start,
                length,
            }
        }

        pub fn basic(number: u32, start: i64, length: i64) -> Self {
            Self::new(
                number,
                BASIC_DATA,
                Uuid::from_u128(number as u128),
                "Basic data partition",
                start,
                length,
            )
        }
    }

    pub fn gpt_layout(disk_id: Uuid, partitions: &[GptPartition]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&1u32.to_le_bytes()); // PARTITION_STYLE_GPT
        buf.extend_from_slice(&(partitions.len() as u32).to_le_bytes());
        buf.extend_from_slice(&disk_id.to_bytes_le());
        buf.extend_from_slice(&(34i64 * 512).to_le_bytes());
        buf.extend_from_slice(&(1i64 << 40).to_le_bytes());
        buf.extend_from_slice(&128u32.to_le_bytes());
        pad_to(&mut buf, 48);

        for p in partitions {
            let start = buf.len();
            buf.extend_from_slice(&1u32.to_le_bytes());
            buf.extend_from_slice(&[0; 4]);
            buf.extend_from_slice(&p.start.to_le_bytes());
            buf.extend_from_slice(&p.length.to_le_bytes());
            buf.extend_from_slice(&p.number.to_le_bytes());
            buf.extend_from_slice(&[0, 0, 0, 0]);
            buf.extend_from_slice(&p.partition_type.to_bytes_le());
            buf.extend_from_slice(&p.partition_id.to_bytes_le());
            buf.extend_from_slice(&0u64.to_le_bytes()); // Attributes
            for c in p.name.encode_utf16().take(36) {
                buf.extend_from_slice(&c.to_le_bytes());
            }
            pad_to(&mut buf, start + 144);
        }
        buf
    }

    pub enum PartitionInfo {
        Mbr(u32),
        Gpt(Uuid),
    }

    /// `DISK_GEOMETRY_EX`; `detection` is the `DetectionType` to emit.
    pub fn geometry(
        media_type: u32,
        bytes_per_sector: u32,
        disk_size: u64,
        partition_info: Option<PartitionInfo>,
        detection: Option<u32>,
    ) -> Vec<u8> {
        let cylinders = disk_size / (255 * 63 * bytes_per_sector as u64);

        let mut buf = Vec::new();
        buf.extend_from_slice(&(cylinders as i64).to_le_bytes());
        buf.extend_from_slice(&media_type.to_le_bytes());
        buf.extend_from_slice(&255u32.to_le_bytes());
        buf.extend_from_slice(&63u32.to_le_bytes());
        buf.extend_from_slice(&bytes_per_sector.to_le_bytes());
        buf.extend_from_slice(&(disk_size as i64).to_le_bytes());

        let Some(info) = partition_info else {
            return buf;
        };
        let info_start = buf.len();
        buf.extend_from_slice(&24u32.to_le_bytes()); // SizeOfPartitionInfo
        match info {
            PartitionInfo::Mbr(signature) => {
                buf.extend_from_slice(&0u32.to_le_bytes());
                buf.extend_from_slice(&signature.to_le_bytes());
                buf.extend_from_slice(&0u32.to_le_bytes());
            }
            PartitionInfo::Gpt(disk_id) => {
                buf.extend_from_slice(&1u32.to_le_bytes());
                buf.extend_from_slice(&disk_id.to_bytes_le());
            }
        }
        pad_to(&mut buf, info_start + 24);

        let Some(detection_type) = detection else {
            return buf;
        };
        let detect_start = buf.len();
        buf.extend_from_slice(&56u32.to_le_bytes()); // SizeOfDetectInfo
        buf.extend_from_slice(&detection_type.to_le_bytes());
        // DISK_INT13_INFO
        buf.extend_from_slice(&0x80u16.to_le_bytes());
        buf.extend_from_slice(&[0; 2]);
        buf.extend_from_slice(&1023u32.to_le_bytes());
        buf.extend_from_slice(&63u16.to_le_bytes());
        buf.extend_from_slice(&254u16.to_le_bytes());
        buf.extend_from_slice(&1u16.to_le_bytes());
        buf.extend_from_slice(&[0; 2]);
        // DISK_EX_INT13_INFO
        buf.extend_from_slice(&30u16.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&(cylinders as u32).to_le_bytes());
        buf.extend_from_slice(&255u32.to_le_bytes());
        buf.extend_from_slice(&63u32.to_le_bytes());
        buf.extend_from_slice(&(disk_size / bytes_per_sector as u64).to_le_bytes());
        buf.extend_from_slice(&(bytes_per_sector as u16).to_le_bytes());
        pad_to(&mut buf, detect_start + 56);
        buf
    }

    pub fn disk_extents(extents: &[(u32, i64, i64)]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(extents.len() as u32).to_le_bytes());
        buf.extend_from_slice(&[0; 4]);
        for (disk_number, start, length) in extents {
            buf.extend_from_slice(&disk_number.to_le_bytes());
            buf.extend_from_slice(&[0; 4]);
            buf.extend_from_slice(&start.to_le_bytes());
            buf.extend_from_slice(&length.to_le_bytes());
        }
        buf
    }
}
