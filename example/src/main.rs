#[cfg(windows)]
use win_storage_topology::{
    sys,
    types::{PartitionExtra, PhysicalDiskInfo},
};

/// Prints one disk with its partitions, volumes and drive letters
#[cfg(windows)]
fn print_disk(disk: &PhysicalDiskInfo) {
    println!(
        "{} ({}): {} MB, {:?} #{}",
        disk.name,
        disk.device_path,
        disk.total_size / (1024 * 1024),
        disk.identity.device_type,
        disk.identity.device_number
    );
    if !disk.adapter.is_empty() {
        println!(
            "  {:?} {} {} (serial {})",
            disk.adapter.bus_type,
            disk.adapter.vendor_id,
            disk.adapter.product_id,
            disk.adapter.serial_number
        );
    }
    if disk.is_dynamic() {
        println!("  Dynamic disk");
    }

    for partition in disk.partitions() {
        println!(
            "  Partition {}: {} MB (offset: {} bytes)",
            partition.partition_number,
            partition.partition_length / (1024 * 1024),
            partition.starting_offset
        );
        match &partition.extra {
            PartitionExtra::Gpt(gpt) => {
                println!(
                    "    GPT: GUID: {}, Type: {}, Name: {}",
                    gpt.partition_id, gpt.partition_type, gpt.name
                );
            }
            PartitionExtra::Mbr(mbr) => {
                println!(
                    "    MBR: Type: {:#04x}, Bootable: {}",
                    mbr.partition_type, mbr.boot_indicator
                );
            }
            PartitionExtra::Raw => {}
        }
    }

    for volume in &disk.volume_guids {
        println!("  Volume {volume}");
    }
    if !disk.logical_drives.is_empty() {
        let drives: Vec<&str> = disk.logical_drives.iter().map(String::as_str).collect();
        println!("  Drives: {}", drives.join(", "));
    }
}

#[cfg(windows)]
fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let is_elevated = sys::is_process_elevated();
    if !is_elevated {
        log::info!("Not elevated: adapter details and some geometry will be missing");
    }

    let disks = match sys::physical_disks(is_elevated) {
        Ok(disks) => disks,
        Err(e) => {
            eprintln!("Failed to list disks: {e}");
            std::process::exit(1);
        }
    };
    for disk in &disks {
        print_disk(disk);
    }

    for path in std::env::args().skip(1) {
        match sys::storage_device(&path, is_elevated) {
            Ok(Some(device)) => println!("{path} -> {:?}", device.identity),
            Ok(None) => println!("{path} -> unknown"),
            Err(e) => println!("{path} -> {e}"),
        }
    }
}

#[cfg(not(windows))]
fn main() {
    env_logger::init();
    eprintln!("Storage topology is only available on Windows");
}
