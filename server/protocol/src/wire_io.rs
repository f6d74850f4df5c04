//! Low-level read/write primitives shared by envelope and body (de)serialization.
//!
//! Strings and variable-length byte blobs are length-prefixed with an
//! unsigned LEB128 varint, the same framing the teacher's
//! `server/gateway/src/frame.rs` uses for whole messages; here it is reused
//! at the field level since this protocol is not protobuf-backed.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{ProtocolError, ProtocolResult};

pub fn put_varint_u64(out: &mut BytesMut, mut v: u64) {
    loop {
        let byte = (v & 0x7f) as u8;
        v >>= 7;
        if v == 0 {
            out.put_u8(byte);
            break;
        }
        out.put_u8(byte | 0x80);
    }
}

pub fn get_varint_u64(buf: &mut Bytes) -> ProtocolResult<u64> {
    let mut result: u64 = 0;
    let mut shift = 0u32;
    for _ in 0..10 {
        if !buf.has_remaining() {
            return Err(ProtocolError::MalformedData("truncated varint"));
        }
        let byte = buf.get_u8();
        result |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
    }
    Err(ProtocolError::MalformedData("varint too long"))
}

pub fn put_string(out: &mut BytesMut, s: &str) {
    put_varint_u64(out, s.len() as u64);
    out.put_slice(s.as_bytes());
}

pub fn get_string(buf: &mut Bytes) -> ProtocolResult<String> {
    let len = get_varint_u64(buf)? as usize;
    if buf.remaining() < len {
        return Err(ProtocolError::MalformedData("truncated string"));
    }
    let bytes = buf.copy_to_bytes(len);
    String::from_utf8(bytes.to_vec()).map_err(|_| ProtocolError::MalformedData("invalid utf8"))
}

pub fn put_bytes_blob(out: &mut BytesMut, b: &[u8]) {
    put_varint_u64(out, b.len() as u64);
    out.put_slice(b);
}

pub fn get_bytes_blob(buf: &mut Bytes) -> ProtocolResult<Bytes> {
    let len = get_varint_u64(buf)? as usize;
    if buf.remaining() < len {
        return Err(ProtocolError::MalformedData("truncated byte blob"));
    }
    Ok(buf.copy_to_bytes(len))
}

pub fn put_bool(out: &mut BytesMut, v: bool) {
    out.put_u8(if v { 1 } else { 0 });
}

pub fn get_bool(buf: &mut Bytes) -> ProtocolResult<bool> {
    if !buf.has_remaining() {
        return Err(ProtocolError::MalformedData("truncated bool"));
    }
    Ok(buf.get_u8() != 0)
}

pub fn put_option_string(out: &mut BytesMut, s: &Option<String>) {
    match s {
        Some(v) => {
            put_bool(out, true);
            put_string(out, v);
        }
        None => put_bool(out, false),
    }
}

pub fn get_option_string(buf: &mut Bytes) -> ProtocolResult<Option<String>> {
    if get_bool(buf)? {
        Ok(Some(get_string(buf)?))
    } else {
        Ok(None)
    }
}

pub fn put_json(out: &mut BytesMut, v: &serde_json::Value) -> ProtocolResult<()> {
    let s = serde_json::to_string(v).map_err(|_| ProtocolError::EncodingFailed("json serialize"))?;
    put_string(out, &s);
    Ok(())
}

pub fn get_json(buf: &mut Bytes) -> ProtocolResult<serde_json::Value> {
    let s = get_string(buf)?;
    serde_json::from_str(&s).map_err(|_| ProtocolError::MalformedData("invalid json"))
}

pub fn put_option_json(out: &mut BytesMut, v: &Option<serde_json::Value>) -> ProtocolResult<()> {
    match v {
        Some(j) => {
            put_bool(out, true);
            put_json(out, j)?;
        }
        None => put_bool(out, false),
    }
    Ok(())
}

pub fn get_option_json(buf: &mut Bytes) -> ProtocolResult<Option<serde_json::Value>> {
    if get_bool(buf)? {
        Ok(Some(get_json(buf)?))
    } else {
        Ok(None)
    }
}

pub fn put_string_vec(out: &mut BytesMut, items: &[String]) {
    put_varint_u64(out, items.len() as u64);
    for s in items {
        put_string(out, s);
    }
}

pub fn get_string_vec(buf: &mut Bytes) -> ProtocolResult<Vec<String>> {
    let count = get_varint_u64(buf)? as usize;
    let mut out = Vec::with_capacity(count.min(4096));
    for _ in 0..count {
        out.push(get_string(buf)?);
    }
    Ok(out)
}
