//! Adapter over postcard, the primitive value codec.
//!
//! Values are written back to back into one buffer and read back through a
//! cursor (`&mut &[u8]`) that advances past each decoded value.

use serde::{Serialize, de::DeserializeOwned};

use crate::error::ProtocolError;

/// Append the encoding of `value` to `buf`.
pub fn put<T: Serialize + ?Sized>(value: &T, buf: &mut Vec<u8>) -> Result<(), postcard::Error> {
    let encoded = postcard::to_allocvec(value)?;
    buf.extend_from_slice(&encoded);
    Ok(())
}

/// Decode one value from the front of `cursor` and advance it.
pub fn take<T: DeserializeOwned>(cursor: &mut &[u8]) -> Result<T, ProtocolError> {
    let (value, rest) = postcard::take_from_bytes::<T>(*cursor).map_err(classify)?;
    *cursor = rest;
    Ok(value)
}

pub fn put_method_id(id: u32, buf: &mut Vec<u8>) -> Result<(), postcard::Error> {
    put(&id, buf)
}

pub fn take_method_id(cursor: &mut &[u8]) -> Result<u32, ProtocolError> {
    take(cursor)
}

fn classify(err: postcard::Error) -> ProtocolError {
    match err {
        postcard::Error::DeserializeUnexpectedEnd => ProtocolError::Truncated,
        other => ProtocolError::Malformed(other.to_string()),
    }
}
