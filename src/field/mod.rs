//! Fixed-width header field codec for tar-style headers.
//!
//! Every function works on a caller-owned buffer addressed by
//! `(offset, length)`. Decoders never mutate the buffer. Encoders validate
//! capacity before the first byte is written, so a failed encode leaves the
//! buffer exactly as it was.
//!
//! # Numeric fields
//! Numbers are stored as zero-padded octal ASCII terminated by a space or NUL.
//! When a value does not fit, the GNU base-256 extension is used instead: the
//! first byte carries the `0x80` marker and the remaining `length - 1` bytes
//! hold the value as a big-endian unsigned integer.
//!
//! | Writer                   | Layout (length = 8)            |
//! |--------------------------|--------------------------------|
//! | `format_unsigned_octal`  | `00000644`                     |
//! | `format_octal`           | `0000644\0`                    |
//! | `format_long_octal`      | `0000644 `                     |
//! | `format_checksum`        | `011732\0 `                    |
//! | `format_octal_or_binary` | octal as above, else `80 ..`   |

pub mod encoding;

use byteorder::{BigEndian, ByteOrder};
use thiserror::Error;

pub use encoding::EntryEncoding;

/// Marker bit announcing the base-256 binary encoding.
pub const BINARY_MARKER: u8 = 0x80;

const NUL: u8 = 0;
const SPACE: u8 = b' ';

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FieldError {
    #[error("Precondition violated: {0}")]
    PreconditionViolation(String),
    #[error("Malformed field at offset {offset}: {reason}")]
    MalformedField { offset: usize, reason: String },
    #[error("Field at offset {offset} holds a value wider than 64 bits")]
    FieldOverflow { offset: usize },
    #[error("Value {value} does not fit in a {length}-byte field")]
    ValueTooLarge { value: u64, length: usize },
    #[error("Invalid {encoding} text: {reason}")]
    EncodingError { encoding: &'static str, reason: String },
}

pub type Result<T> = std::result::Result<T, FieldError>;

// ── Range helpers ────────────────────────────────────────────────────────────

fn field(buf: &[u8], offset: usize, length: usize) -> Result<&[u8]> {
    offset
        .checked_add(length)
        .and_then(|end| buf.get(offset..end))
        .ok_or_else(|| out_of_range(buf.len(), offset, length))
}

fn field_mut(buf: &mut [u8], offset: usize, length: usize) -> Result<&mut [u8]> {
    let available = buf.len();
    match offset.checked_add(length) {
        Some(end) if end <= available => Ok(&mut buf[offset..end]),
        _ => Err(out_of_range(available, offset, length)),
    }
}

fn out_of_range(available: usize, offset: usize, length: usize) -> FieldError {
    FieldError::PreconditionViolation(format!(
        "field {offset}+{length} exceeds buffer of {available} bytes"
    ))
}

fn malformed(offset: usize, reason: impl Into<String>) -> FieldError {
    FieldError::MalformedField { offset, reason: reason.into() }
}

#[inline]
fn is_padding(b: u8) -> bool {
    b == NUL || b == SPACE
}

/// Number of octal digits needed to print `value` (at least one).
#[inline]
fn octal_digits(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.div_ceil(3).max(1)
}

/// Number of big-endian bytes needed to hold `value` (zero for zero).
#[inline]
fn binary_width(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.div_ceil(8)
}

/// Right-justify `value` in `dst` as zero-padded octal.
/// Capacity must already have been checked.
fn write_octal_digits(value: u64, dst: &mut [u8]) {
    let mut v = value;
    for slot in dst.iter_mut().rev() {
        *slot = b'0' + (v & 7) as u8;
        v >>= 3;
    }
}

// ── Decoders ─────────────────────────────────────────────────────────────────

/// Parse an octal ASCII field.
///
/// Leading NULs and spaces are skipped and an all-padding field is zero.
/// The digit run ends at the first NUL or space, or at the end of the field;
/// anything after the terminator must be padding too.
pub fn parse_octal(buf: &[u8], offset: usize, length: usize) -> Result<u64> {
    let bytes = field(buf, offset, length)?;
    if length < 2 {
        return Err(malformed(offset, format!("octal field of length {length} cannot hold a digit and a terminator")));
    }

    let start = match bytes.iter().position(|&b| !is_padding(b)) {
        Some(i) => i,
        None    => return Ok(0),
    };
    let end = bytes[start..]
        .iter()
        .position(|&b| is_padding(b))
        .map_or(bytes.len(), |i| start + i);

    if let Some(pos) = bytes[end..].iter().position(|&b| !is_padding(b)) {
        return Err(malformed(
            offset + end + pos,
            format!("unexpected byte {:#04x} after octal terminator", bytes[end + pos]),
        ));
    }

    let mut value: u64 = 0;
    for (i, &b) in bytes[start..end].iter().enumerate() {
        if !(b'0'..=b'7').contains(&b) {
            return Err(malformed(offset + start + i, format!("invalid octal digit {b:#04x}")));
        }
        value = value
            .checked_mul(8)
            .map(|v| v | u64::from(b - b'0'))
            .ok_or(FieldError::FieldOverflow { offset })?;
    }
    Ok(value)
}

/// Parse a numeric field that is either octal or GNU base-256.
///
/// With the marker bit set, the `length - 1` bytes after the marker are read
/// as a big-endian unsigned integer; the marker's low bits are ignored.
/// A `0xff` marker denotes a negative value and is rejected.
pub fn parse_octal_or_binary(buf: &[u8], offset: usize, length: usize) -> Result<u64> {
    let bytes = field(buf, offset, length)?;
    let marker = match bytes.first() {
        Some(&b) => b,
        None     => return Err(FieldError::PreconditionViolation("empty numeric field".into())),
    };
    if marker & BINARY_MARKER == 0 {
        return parse_octal(buf, offset, length);
    }
    if marker == 0xff {
        return Err(malformed(offset, "negative base-256 value"));
    }

    let payload = &bytes[1..];
    let significant = match payload.iter().position(|&b| b != 0) {
        Some(i) => &payload[i..],
        None    => return Ok(0),
    };
    if significant.len() > 8 {
        return Err(FieldError::FieldOverflow { offset });
    }
    let mut be = [0u8; 8];
    be[8 - significant.len()..].copy_from_slice(significant);
    Ok(BigEndian::read_u64(&be))
}

/// Parse a single-byte boolean flag (`0` or `1`).
pub fn parse_boolean(buf: &[u8], offset: usize) -> Result<bool> {
    match field(buf, offset, 1)?[0] {
        0 => Ok(false),
        1 => Ok(true),
        b => Err(malformed(offset, format!("invalid boolean byte {b:#04x}"))),
    }
}

/// Parse a NUL-terminated name field as ISO-8859-1.
pub fn parse_name(buf: &[u8], offset: usize, length: usize) -> Result<String> {
    parse_name_with(buf, offset, length, EntryEncoding::default())
}

/// Parse a NUL-terminated name field with an explicit text encoding.
pub fn parse_name_with(buf: &[u8], offset: usize, length: usize, encoding: EntryEncoding) -> Result<String> {
    encoding.decode(truncate_nul(field(buf, offset, length)?))
}

/// Cut a byte slice at its first NUL.
pub fn truncate_nul(bytes: &[u8]) -> &[u8] {
    match bytes.iter().position(|&b| b == NUL) {
        Some(pos) => &bytes[..pos],
        None      => bytes,
    }
}

// ── Encoders ─────────────────────────────────────────────────────────────────

/// Write `value` as an ISO-8859-1 name field. See [`format_name_with`].
pub fn format_name(value: &str, buf: &mut [u8], offset: usize, length: usize) -> Result<usize> {
    format_name_with(value, buf, offset, length, EntryEncoding::default())
}

/// Write `value` left-justified and NUL-padded.
///
/// Values longer than the field are truncated to `length` bytes, leaving no
/// terminator. Returns `offset + length`.
pub fn format_name_with(
    value:    &str,
    buf:      &mut [u8],
    offset:   usize,
    length:   usize,
    encoding: EntryEncoding,
) -> Result<usize> {
    let encoded = encoding.encode(value)?;
    let dst = field_mut(buf, offset, length)?;
    let n = encoded.len().min(length);
    dst[..n].copy_from_slice(&encoded[..n]);
    dst[n..].fill(NUL);
    Ok(offset + length)
}

/// Write `value` as exactly `length` zero-padded octal digits.
pub fn format_unsigned_octal(value: u64, buf: &mut [u8], offset: usize, length: usize) -> Result<()> {
    let dst = field_mut(buf, offset, length)?;
    if octal_digits(value) > length {
        return Err(FieldError::ValueTooLarge { value, length });
    }
    write_octal_digits(value, dst);
    Ok(())
}

fn format_terminated_octal(
    value:      u64,
    buf:        &mut [u8],
    offset:     usize,
    length:     usize,
    terminator: &[u8],
) -> Result<usize> {
    let dst = field_mut(buf, offset, length)?;
    if length < terminator.len() {
        return Err(FieldError::PreconditionViolation(format!(
            "field of length {length} has no room for a {}-byte terminator",
            terminator.len()
        )));
    }
    let digits = length - terminator.len();
    if octal_digits(value) > digits {
        return Err(FieldError::ValueTooLarge { value, length });
    }
    write_octal_digits(value, &mut dst[..digits]);
    dst[digits..].copy_from_slice(terminator);
    Ok(offset + length)
}

/// Write `length - 1` octal digits followed by a NUL terminator.
pub fn format_octal(value: u64, buf: &mut [u8], offset: usize, length: usize) -> Result<usize> {
    format_terminated_octal(value, buf, offset, length, &[NUL])
}

/// Write `length - 1` octal digits followed by a single trailing space.
pub fn format_long_octal(value: u64, buf: &mut [u8], offset: usize, length: usize) -> Result<usize> {
    format_terminated_octal(value, buf, offset, length, &[SPACE])
}

/// Write `value` as octal when it fits, else as GNU base-256.
///
/// The binary form accepts every value that fits in `length - 1` bytes,
/// including one that uses all of the payload bits.
pub fn format_octal_or_binary(value: u64, buf: &mut [u8], offset: usize, length: usize) -> Result<usize> {
    match format_long_octal(value, buf, offset, length) {
        Err(FieldError::ValueTooLarge { .. }) => {}
        other => return other,
    }

    let dst = field_mut(buf, offset, length)?;
    let width = binary_width(value);
    if length < 2 || width > length - 1 {
        return Err(FieldError::ValueTooLarge { value, length });
    }
    let mut be = [0u8; 8];
    BigEndian::write_u64(&mut be, value);
    dst.fill(0);
    dst[0] = BINARY_MARKER;
    dst[length - width..].copy_from_slice(&be[8 - width..]);
    Ok(offset + length)
}

/// Write a header checksum: `length - 2` octal digits, a NUL, then a space.
pub fn format_checksum(value: u64, buf: &mut [u8], offset: usize, length: usize) -> Result<usize> {
    format_terminated_octal(value, buf, offset, length, &[NUL, SPACE])
}

/// Unsigned sum of every byte in `buf`.
///
/// Callers blank the checksum field to spaces before summing a header.
pub fn compute_checksum(buf: &[u8]) -> u64 {
    buf.iter().map(|&b| u64::from(b)).sum()
}
