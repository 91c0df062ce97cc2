use log::debug;

use crate::device::*;
use crate::error::{Error, Result};
use crate::options::QueryOptions;
use crate::parse;

/// Outcome of a native query that did not fail fatally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// The reply bytes, truncated to what the driver wrote.
    Data(Vec<u8>),
    /// The device does not answer this query directly ("not ready",
    /// "invalid function" or "not supported").
    Unsupported(OsCode),
}

impl Reply {
    pub fn into_data(self) -> Option<Vec<u8>> {
        match self {
            Reply::Data(data) => Some(data),
            Reply::Unsupported(_) => None,
        }
    }
}

fn is_buffer_too_small(code: OsCode) -> bool {
    code == ERROR_INSUFFICIENT_BUFFER || code == ERROR_MORE_DATA
}

fn is_unsupported(code: OsCode) -> bool {
    matches!(
        code,
        ERROR_NOT_READY | ERROR_INVALID_FUNCTION | ERROR_NOT_SUPPORTED
    )
}

/// Issues `control` on `handle`, doubling the output buffer while the driver
/// reports it as too small.
///
/// `floor` is the smallest reply the caller can make sense of; the first
/// attempt uses at least that many bytes. Growth stops at
/// `options.max_buffer_size` with [`Error::BufferLimit`].
pub fn query<H: DeviceHandle + ?Sized>(
    handle: &H,
    control: ControlCode,
    input: &[u8],
    floor: usize,
    path: &str,
    options: &QueryOptions,
) -> Result<Reply> {
    let mut buffer = vec![0u8; options.initial_for(floor)];

    loop {
        match handle.io_control(control, input, &mut buffer) {
            Ok(bytes_returned) => {
                debug!("{path}: {control} returned {bytes_returned} bytes");
                buffer.truncate(bytes_returned);
                return Ok(Reply::Data(buffer));
            }
            Err(code) if is_buffer_too_small(code) => {
                if buffer.len() >= options.max_buffer_size {
                    return Err(Error::BufferLimit {
                        path: path.to_string(),
                        control,
                        size: options.max_buffer_size,
                    });
                }
                // The last attempt is made at the cap itself
                let next = (buffer.len() * 2).min(options.max_buffer_size);
                debug!("{path}: {control} buffer too small, reallocating to {next}");
                buffer.resize(next, 0);
            }
            Err(code) if is_unsupported(code) => {
                debug!("{path}: {control} not supported (error {code})");
                return Ok(Reply::Unsupported(code));
            }
            Err(code) => {
                return Err(Error::Native {
                    path: path.to_string(),
                    control,
                    code,
                });
            }
        }
    }
}

/// Runs a `IOCTL_STORAGE_QUERY_PROPERTY` request.
///
/// Descriptor replies succeed even when truncated and report their full
/// size in the header, so a short reply is reissued once at that size.
pub fn query_descriptor<H: DeviceHandle + ?Sized>(
    handle: &H,
    property: parse::StorageProperty,
    path: &str,
    options: &QueryOptions,
) -> Result<Reply> {
    let input = parse::property_query(property);
    let control = ControlCode::StorageQueryProperty;

    let reply = query(
        handle,
        control,
        &input,
        parse::STORAGE_DESCRIPTOR_HEADER_SIZE,
        path,
        options,
    )?;
    let Reply::Data(buffer) = reply else {
        return Ok(reply);
    };

    let reported = parse::descriptor_size(&buffer)?;
    if reported <= buffer.len() {
        return Ok(Reply::Data(buffer));
    }
    if reported > options.max_buffer_size {
        return Err(Error::BufferLimit {
            path: path.to_string(),
            control,
            size: options.max_buffer_size,
        });
    }
    debug!(
        "{path}: {property:?} descriptor needs {reported} bytes, got {}",
        buffer.len()
    );
    query(handle, control, &input, reported, path, options)
}
