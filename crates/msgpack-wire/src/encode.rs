use crate::tag;
use crate::{EncodeError, Value};

/// Encodes `value` into a fresh buffer.
///
/// The call is all-or-nothing: on error no partial bytes escape, so callers
/// can push the result straight into a transport.
pub fn encode(value: &Value) -> Result<Vec<u8>, EncodeError> {
    let mut buf = Vec::with_capacity(64);
    encode_into(value, &mut buf)?;
    Ok(buf)
}

/// Appends the encoding of `value` to `buf`. On error `buf` is truncated back
/// to its original length.
pub fn encode_into(value: &Value, buf: &mut Vec<u8>) -> Result<(), EncodeError> {
    let start = buf.len();
    if let Err(err) = write_value(value, buf) {
        buf.truncate(start);
        return Err(err);
    }
    Ok(())
}

fn write_value(value: &Value, buf: &mut Vec<u8>) -> Result<(), EncodeError> {
    match value {
        Value::Nil => buf.push(tag::NIL),
        Value::Boolean(b) => buf.push(if *b { tag::TRUE } else { tag::FALSE }),
        Value::Integer(n) => write_int(*n, buf),
        Value::UnsignedInteger(n) => match i64::try_from(*n) {
            Ok(signed) => write_int(signed, buf),
            Err(_) => {
                buf.push(tag::UINT64);
                buf.extend_from_slice(&n.to_be_bytes());
            }
        },
        Value::Float(f) => {
            if !f.is_finite() {
                return Err(EncodeError::NonFiniteFloat);
            }
            buf.push(tag::FLOAT64);
            buf.extend_from_slice(&f.to_be_bytes());
        }
        Value::String(s) => {
            let len = s.len();
            if len <= 31 {
                buf.push(tag::FIXSTR | len as u8);
            } else {
                write_len(buf, len, tag::STR8, tag::STR16, tag::STR32)?;
            }
            buf.extend_from_slice(s.as_bytes());
        }
        Value::Binary(bytes) => {
            write_len(buf, bytes.len(), tag::BIN8, tag::BIN16, tag::BIN32)?;
            buf.extend_from_slice(bytes);
        }
        Value::Array(items) => {
            let len = items.len();
            if len <= 15 {
                buf.push(tag::FIXARRAY | len as u8);
            } else {
                write_wide_len(buf, len, tag::ARRAY16, tag::ARRAY32)?;
            }
            for item in items {
                write_value(item, buf)?;
            }
        }
        Value::Map(entries) => {
            let len = entries.len();
            if len <= 15 {
                buf.push(tag::FIXMAP | len as u8);
            } else {
                write_wide_len(buf, len, tag::MAP16, tag::MAP32)?;
            }
            for (key, val) in entries {
                write_value(key, buf)?;
                write_value(val, buf)?;
            }
        }
        Value::Ext { type_id, data } => {
            match data.len() {
                1 => buf.push(tag::FIXEXT1),
                2 => buf.push(tag::FIXEXT2),
                4 => buf.push(tag::FIXEXT4),
                8 => buf.push(tag::FIXEXT8),
                16 => buf.push(tag::FIXEXT16),
                len => write_len(buf, len, tag::EXT8, tag::EXT16, tag::EXT32)?,
            }
            buf.push(*type_id);
            buf.extend_from_slice(data);
        }
    }
    Ok(())
}

fn write_int(n: i64, buf: &mut Vec<u8>) {
    if (0..=0x7f).contains(&n) {
        buf.push(n as u8);
    } else if (-32..0).contains(&n) {
        buf.push(n as i8 as u8);
    } else if let Ok(v) = i8::try_from(n) {
        buf.push(tag::INT8);
        buf.push(v as u8);
    } else if let Ok(v) = i16::try_from(n) {
        buf.push(tag::INT16);
        buf.extend_from_slice(&v.to_be_bytes());
    } else if let Ok(v) = i32::try_from(n) {
        buf.push(tag::INT32);
        buf.extend_from_slice(&v.to_be_bytes());
    } else {
        buf.push(tag::INT64);
        buf.extend_from_slice(&n.to_be_bytes());
    }
}

/// Length header for families with an 8-bit tier (str, bin, ext).
fn write_len(
    buf: &mut Vec<u8>,
    len: usize,
    tag8: u8,
    tag16: u8,
    tag32: u8,
) -> Result<(), EncodeError> {
    if len <= u8::MAX as usize {
        buf.push(tag8);
        buf.push(len as u8);
        Ok(())
    } else {
        write_wide_len(buf, len, tag16, tag32)
    }
}

fn write_wide_len(buf: &mut Vec<u8>, len: usize, tag16: u8, tag32: u8) -> Result<(), EncodeError> {
    if len <= u16::MAX as usize {
        buf.push(tag16);
        buf.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        let len32 = u32::try_from(len).map_err(|_| EncodeError::LengthOverflow(len))?;
        buf.push(tag32);
        buf.extend_from_slice(&len32.to_be_bytes());
    }
    Ok(())
}
