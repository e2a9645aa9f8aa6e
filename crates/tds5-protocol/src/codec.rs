//! Low-level encoding and decoding utilities shared by the token and
//! login codecs.

use bytes::{Buf, BufMut};

use crate::error::ProtocolError;

/// Fail unless `src` has at least `n` bytes left.
pub fn ensure(src: &impl Buf, n: usize) -> Result<(), ProtocolError> {
    if src.remaining() < n {
        return Err(ProtocolError::UnexpectedEof);
    }
    Ok(())
}

/// Read `n` raw bytes into a `Vec`.
pub fn read_bytes(src: &mut impl Buf, n: usize) -> Result<Vec<u8>, ProtocolError> {
    ensure(src, n)?;
    let mut out = vec![0u8; n];
    src.copy_to_slice(&mut out);
    Ok(out)
}

/// Read a string of `n` bytes, validating UTF-8.
pub fn read_string(src: &mut impl Buf, n: usize) -> Result<String, ProtocolError> {
    let bytes = read_bytes(src, n)?;
    String::from_utf8(bytes).map_err(|_| ProtocolError::InvalidUtf8)
}

/// Read a string with a one-byte length prefix.
pub fn read_u8_string(src: &mut impl Buf) -> Result<String, ProtocolError> {
    ensure(src, 1)?;
    let len = src.get_u8() as usize;
    read_string(src, len)
}

/// Read a string with a two-byte little-endian length prefix.
pub fn read_u16_string(src: &mut impl Buf) -> Result<String, ProtocolError> {
    ensure(src, 2)?;
    let len = src.get_u16_le() as usize;
    read_string(src, len)
}

/// Write a string with a one-byte length prefix, truncated to 255 bytes.
pub fn write_u8_string(dst: &mut impl BufMut, s: &str) {
    let bytes = s.as_bytes();
    let len = bytes.len().min(255);
    dst.put_u8(len as u8);
    dst.put_slice(&bytes[..len]);
}

/// Write a string with a two-byte little-endian length prefix.
pub fn write_u16_string(dst: &mut impl BufMut, s: &str) {
    let bytes = s.as_bytes();
    let len = bytes.len().min(65535);
    dst.put_u16_le(len as u16);
    dst.put_slice(&bytes[..len]);
}

/// Write a fixed-width login record field: the string bytes, zero
/// padding up to `width`, then a one-byte actual length.
pub fn write_login_field(dst: &mut impl BufMut, s: &str, width: usize) {
    let bytes = s.as_bytes();
    let len = bytes.len().min(width);
    dst.put_slice(&bytes[..len]);
    dst.put_bytes(0, width - len);
    dst.put_u8(len as u8);
}
