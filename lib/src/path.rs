use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

use crate::error::{Error, Result};

/// A path naming a storage device, in one of the accepted input forms.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DevicePath {
    /// `C`, `C:`, `C:\`
    Drive(char),
    /// `\\?\Volume{GUID}\`
    Volume(Uuid),
    /// `\\.\PhysicalDriveN`
    PhysicalDrive(u32),
    /// `\\.\CdRomN`
    CdRom(u32),
    /// Any other local device path, e.g. a device interface path from SetupAPI.
    Device(String),
}

const LOCAL_DEVICE_PREFIX: &str = r"\\.\";
const WIN32_FILE_PREFIX: &str = r"\\?\";

impl DevicePath {
    pub fn parse(input: &str) -> Result<Self> {
        let path = input.trim();
        if path.is_empty() {
            return Err(Error::invalid_path(input, "empty path"));
        }

        if let Some(letter) = parse_drive(path) {
            return Ok(DevicePath::Drive(letter));
        }

        let (prefix, rest) = if let Some(rest) = path.strip_prefix(LOCAL_DEVICE_PREFIX) {
            (LOCAL_DEVICE_PREFIX, rest)
        } else if let Some(rest) = path.strip_prefix(WIN32_FILE_PREFIX) {
            (WIN32_FILE_PREFIX, rest)
        } else {
            return Err(Error::invalid_path(input, "not a drive, volume or device path"));
        };

        let name = rest.trim_end_matches(['\\', '/']);
        if name.is_empty() {
            return Err(Error::invalid_path(input, "missing device name"));
        }

        if let Some(guid) = strip_prefix_ignore_case(name, "Volume") {
            let guid = guid
                .strip_prefix('{')
                .and_then(|g| g.strip_suffix('}'))
                .ok_or_else(|| Error::invalid_path(input, "volume GUID must be braced"))?;
            let guid = Uuid::parse_str(guid)
                .map_err(|_| Error::invalid_path(input, "malformed volume GUID"))?;
            return Ok(DevicePath::Volume(guid));
        }

        if let Some(letter) = parse_drive(name) {
            return Ok(DevicePath::Drive(letter));
        }

        if let Some(n) = strip_prefix_ignore_case(name, "PhysicalDrive").and_then(parse_number) {
            return Ok(DevicePath::PhysicalDrive(n));
        }

        if let Some(n) = strip_prefix_ignore_case(name, "CdRom").and_then(parse_number) {
            return Ok(DevicePath::CdRom(n));
        }

        if name.contains(['\\', '/']) {
            return Err(Error::invalid_path(input, "device paths cannot contain directories"));
        }

        Ok(DevicePath::Device(format!("{prefix}{name}")))
    }

    /// Path handed to `CreateFileW` to open the device.
    ///
    /// Volumes and drives are opened without a trailing backslash; with one
    /// the root directory would be opened instead of the volume.
    pub fn device_path(&self) -> String {
        match self {
            DevicePath::Drive(letter) => format!(r"\\.\{letter}:"),
            DevicePath::Volume(guid) => format!(r"\\.\Volume{{{guid}}}"),
            DevicePath::PhysicalDrive(n) => format!(r"\\.\PhysicalDrive{n}"),
            DevicePath::CdRom(n) => format!(r"\\.\CdRom{n}"),
            DevicePath::Device(path) => path.clone(),
        }
    }

    pub fn is_volume(&self) -> bool {
        matches!(self, DevicePath::Drive(_) | DevicePath::Volume(_))
    }
}

impl FromStr for DevicePath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        DevicePath::parse(s)
    }
}

/// Display form: `C:`, `\\?\Volume{GUID}\`, or the device path.
impl fmt::Display for DevicePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DevicePath::Drive(letter) => write!(f, "{letter}:"),
            DevicePath::Volume(guid) => write!(f, r"\\?\Volume{{{guid}}}\"),
            other => f.write_str(&other.device_path()),
        }
    }
}

fn parse_drive(path: &str) -> Option<char> {
    let mut chars = path.chars();
    let letter = chars.next().filter(char::is_ascii_alphabetic)?;
    match chars.as_str() {
        "" | ":" | r":\" | ":/" => Some(letter.to_ascii_uppercase()),
        _ => None,
    }
}

fn parse_number(digits: &str) -> Option<u32> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| &s[prefix.len()..])
}

#[cfg(test)]
mod tests {
    use super::*;

    const GUID: &str = "3f2504e0-4f89-11d3-9a0c-0305e82c3301";

    #[test]
    fn drive_forms() {
        for input in ["c", "C:", r"C:\", "c:/", r"\\.\C:", r"\\?\c:\"] {
            assert_eq!(DevicePath::parse(input).unwrap(), DevicePath::Drive('C'), "{input}");
        }
        assert_eq!(DevicePath::Drive('C').device_path(), r"\\.\C:");
        assert_eq!(DevicePath::Drive('C').to_string(), "C:");
    }

    #[test]
    fn volume_forms() {
        let expected = DevicePath::Volume(Uuid::parse_str(GUID).unwrap());
        for input in [
            format!(r"\\?\Volume{{{GUID}}}\"),
            format!(r"\\.\Volume{{{GUID}}}"),
            format!(r"\\?\volume{{{}}}\", GUID.to_uppercase()),
        ] {
            assert_eq!(DevicePath::parse(&input).unwrap(), expected, "{input}");
        }
        assert_eq!(expected.device_path(), format!(r"\\.\Volume{{{GUID}}}"));
        assert_eq!(expected.to_string(), format!(r"\\?\Volume{{{GUID}}}\"));
    }

    #[test]
    fn numbered_devices() {
        assert_eq!(
            DevicePath::parse(r"\\.\PhysicalDrive12").unwrap(),
            DevicePath::PhysicalDrive(12)
        );
        assert_eq!(
            DevicePath::parse(r"\\.\PHYSICALDRIVE0").unwrap().device_path(),
            r"\\.\PhysicalDrive0"
        );
        assert_eq!(DevicePath::parse(r"\\.\CdRom1").unwrap(), DevicePath::CdRom(1));
    }

    #[test]
    fn device_interface_path() {
        let input = concat!(
            r"\\?\scsi#disk&ven_acme&prod_disk#4&1a2b3c&0&000000",
            r"#{53f56307-b6bf-11d0-94f2-00a0c91efb8b}"
        );
        let path = DevicePath::parse(input).unwrap();
        assert_eq!(path, DevicePath::Device(input.to_string()));
        assert_eq!(path.device_path(), input);
    }

    #[test]
    fn rejects_malformed_input() {
        let unbraced = format!(r"\\?\Volume{GUID}\");
        for input in [
            "",
            "   ",
            "CC",
            r"C:\Windows",
            "relative/path",
            r"\\.\",
            r"\\?\Volume{not-a-guid}\",
            unbraced.as_str(),
            r"\\.\Harddisk0\Partition1",
        ] {
            let err = DevicePath::parse(input).unwrap_err();
            assert!(matches!(err, Error::InvalidPath { .. }), "{input}: {err:?}");
        }
    }

    #[test]
    fn unnumbered_names_keep_their_prefix() {
        assert_eq!(
            DevicePath::parse(r"\\.\PhysicalDrive").unwrap(),
            DevicePath::Device(r"\\.\PhysicalDrive".to_string())
        );
        assert_eq!(
            DevicePath::parse(r"\\.\Tape0\").unwrap().device_path(),
            r"\\.\Tape0"
        );
    }
}
