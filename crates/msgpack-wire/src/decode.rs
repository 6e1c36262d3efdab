use bytes::{Buf, BytesMut};
use tracing::{debug, trace};

use crate::tag;
use crate::{DecodeError, Value};

/// Nesting beyond this depth is treated as a corrupt stream rather than
/// recursing until the stack runs out.
pub const MAX_DEPTH: usize = 512;

/// Decodes one value from the front of `bytes`, returning it together with
/// the number of bytes consumed.
pub fn decode_value(bytes: &[u8]) -> Result<(Value, usize), DecodeError> {
    let mut cursor = Cursor::new(bytes);
    let value = cursor.read_value(0)?;
    Ok((value, cursor.pos))
}

/// Streaming decoder that accumulates arbitrary chunks and yields every
/// complete value in arrival order.
///
/// ```
/// # use msgpack_wire::{encode, Decoder, Value};
/// let bytes = encode(&Value::from("redraw")).unwrap();
/// let mut decoder = Decoder::new();
/// let mut seen = Vec::new();
/// decoder.push(&bytes[..2], |v| seen.push(v)).unwrap();
/// assert!(seen.is_empty());
/// decoder.push(&bytes[2..], |v| seen.push(v)).unwrap();
/// assert_eq!(seen, vec![Value::from("redraw")]);
/// ```
#[derive(Debug, Default)]
pub struct Decoder {
    buffer: BytesMut,
    boundary: Boundary,
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `chunk` and hands each fully decoded value to `on_value`.
    ///
    /// Returns how many values were delivered. A malformed tag clears the
    /// internal buffer and returns the error; values decoded earlier in the
    /// same push have already been delivered.
    pub fn push<F>(&mut self, chunk: &[u8], mut on_value: F) -> Result<usize, DecodeError>
    where
        F: FnMut(Value),
    {
        self.buffer.extend_from_slice(chunk);
        let mut delivered = 0usize;
        loop {
            let end = match self.boundary.scan(&self.buffer) {
                Ok(Some(end)) => end,
                Ok(None) => {
                    trace!(
                        buffered = self.buffer.len(),
                        scanned = self.boundary.pos,
                        "waiting for more bytes"
                    );
                    break;
                }
                Err(err) => {
                    debug!(error = %err, dropped = self.buffer.len(), "resetting decoder");
                    self.reset();
                    return Err(err);
                }
            };
            let frame = self.buffer.split_to(end);
            self.boundary = Boundary::default();
            match decode_value(&frame) {
                Ok((value, _)) => {
                    delivered += 1;
                    on_value(value);
                }
                Err(err) => {
                    debug!(error = %err, dropped = self.buffer.len(), "resetting decoder");
                    self.reset();
                    return Err(err);
                }
            }
        }
        Ok(delivered)
    }

    /// Convenience wrapper over [`Decoder::push`] that collects the values.
    pub fn push_collect(&mut self, chunk: &[u8]) -> Result<Vec<Value>, DecodeError> {
        let mut out = Vec::new();
        self.push(chunk, |value| out.push(value))?;
        Ok(out)
    }

    /// Bytes held back waiting for the rest of a value.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.boundary = Boundary::default();
    }
}

/// Finds where the first buffered value ends by walking headers only.
///
/// Progress is kept between pushes, so a value that arrives in many small
/// chunks is scanned once in total instead of once per chunk.
#[derive(Debug, Default)]
struct Boundary {
    /// Offset of the next header to inspect.
    pos: usize,
    /// Items still owed by each open array or map, innermost last.
    open: Vec<usize>,
}

impl Boundary {
    /// `Some(end)` once the value starting at offset 0 is complete.
    fn scan(&mut self, bytes: &[u8]) -> Result<Option<usize>, DecodeError> {
        while self.pos < bytes.len() {
            let tag = bytes[self.pos];
            if self.open.len() > MAX_DEPTH {
                return Err(DecodeError::Malformed {
                    tag,
                    offset: self.pos,
                });
            }
            let Some((span, items)) = header(&bytes[self.pos..], self.pos)? else {
                return Ok(None);
            };
            let Some(next) = self.pos.checked_add(span).filter(|end| *end <= bytes.len())
            else {
                return Ok(None);
            };
            self.pos = next;
            if items > 0 {
                self.open.push(items);
                continue;
            }
            // A leaf finished; close every container it completes.
            loop {
                match self.open.last_mut() {
                    None => return Ok(Some(self.pos)),
                    Some(owed) => {
                        *owed -= 1;
                        if *owed > 0 {
                            break;
                        }
                        self.open.pop();
                    }
                }
            }
        }
        Ok(None)
    }
}

/// Size of the header plus any inline payload, and the number of child
/// values that follow. `None` when the header itself is cut short;
/// `offset` only feeds the error.
fn header(bytes: &[u8], offset: usize) -> Result<Option<(usize, usize)>, DecodeError> {
    let t = bytes[0];
    let sized = |width: usize| -> Option<usize> {
        let raw = bytes.get(1..1 + width)?;
        Some(raw.iter().fold(0usize, |acc, b| (acc << 8) | usize::from(*b)))
    };
    let found = match t {
        0x00..=0x7f | tag::NEGATIVE_FIXINT..=0xff | tag::NIL | tag::FALSE | tag::TRUE => {
            Some((1, 0))
        }
        0x80..=0x8f => Some((1, usize::from(t & 0x0f) * 2)),
        0x90..=0x9f => Some((1, usize::from(t & 0x0f))),
        0xa0..=0xbf => Some((1 + usize::from(t & 0x1f), 0)),
        tag::BIN8 | tag::BIN16 | tag::BIN32 => {
            let width = 1 << (t - tag::BIN8);
            sized(width).map(|len| (len.saturating_add(1 + width), 0))
        }
        tag::STR8 | tag::STR16 | tag::STR32 => {
            let width = 1 << (t - tag::STR8);
            sized(width).map(|len| (len.saturating_add(1 + width), 0))
        }
        tag::EXT8 | tag::EXT16 | tag::EXT32 => {
            let width = 1 << (t - tag::EXT8);
            sized(width).map(|len| (len.saturating_add(2 + width), 0))
        }
        tag::UINT8 | tag::INT8 => Some((2, 0)),
        tag::UINT16 | tag::INT16 => Some((3, 0)),
        tag::UINT32 | tag::INT32 | tag::FLOAT32 => Some((5, 0)),
        tag::UINT64 | tag::INT64 | tag::FLOAT64 => Some((9, 0)),
        tag::FIXEXT1 => Some((3, 0)),
        tag::FIXEXT2 => Some((4, 0)),
        tag::FIXEXT4 => Some((6, 0)),
        tag::FIXEXT8 => Some((10, 0)),
        tag::FIXEXT16 => Some((18, 0)),
        tag::ARRAY16 => sized(2).map(|n| (3, n)),
        tag::ARRAY32 => sized(4).map(|n| (5, n)),
        tag::MAP16 => sized(2).map(|n| (3, n.saturating_mul(2))),
        tag::MAP32 => sized(4).map(|n| (5, n.saturating_mul(2))),
        _ => return Err(DecodeError::Malformed { tag: t, offset }),
    };
    Ok(found)
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len().saturating_sub(self.pos)
    }

    fn read_u8(&mut self) -> Result<u8, DecodeError> {
        let byte = *self.bytes.get(self.pos).ok_or(DecodeError::Incomplete)?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if len > self.remaining() {
            return Err(DecodeError::Incomplete);
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    /// Reads a big-endian length header of `width` bytes.
    fn read_len(&mut self, width: usize) -> Result<usize, DecodeError> {
        let len = match width {
            1 => u32::from(self.read_u8()?),
            2 => u32::from(u16::from_be_bytes(self.read_array()?)),
            _ => u32::from_be_bytes(self.read_array()?),
        };
        Ok(len as usize)
    }

    fn read_value(&mut self, depth: usize) -> Result<Value, DecodeError> {
        let offset = self.pos;
        let t = self.read_u8()?;
        if depth > MAX_DEPTH {
            return Err(DecodeError::Malformed { tag: t, offset });
        }
        match t {
            0x00..=0x7f => Ok(Value::Integer(i64::from(t))),
            0x80..=0x8f => self.read_map(usize::from(t & 0x0f), depth),
            0x90..=0x9f => self.read_array_value(usize::from(t & 0x0f), depth),
            0xa0..=0xbf => self.read_str(usize::from(t & 0x1f)),
            tag::NEGATIVE_FIXINT..=0xff => Ok(Value::Integer(i64::from(t as i8))),
            tag::NIL => Ok(Value::Nil),
            tag::FALSE => Ok(Value::Boolean(false)),
            tag::TRUE => Ok(Value::Boolean(true)),
            tag::BIN8 | tag::BIN16 | tag::BIN32 => {
                let len = self.read_len(1 << (t - tag::BIN8))?;
                Ok(Value::Binary(self.read_bytes(len)?.to_vec()))
            }
            tag::EXT8 | tag::EXT16 | tag::EXT32 => {
                let len = self.read_len(1 << (t - tag::EXT8))?;
                self.read_ext(len)
            }
            tag::FLOAT32 => Ok(Value::Float(f64::from(f32::from_be_bytes(
                self.read_array()?,
            )))),
            tag::FLOAT64 => Ok(Value::Float(f64::from_be_bytes(self.read_array()?))),
            tag::UINT8 => Ok(Value::Integer(i64::from(self.read_u8()?))),
            tag::UINT16 => Ok(Value::Integer(i64::from(u16::from_be_bytes(
                self.read_array()?,
            )))),
            tag::UINT32 => Ok(Value::Integer(i64::from(u32::from_be_bytes(
                self.read_array()?,
            )))),
            tag::UINT64 => Ok(Value::from(u64::from_be_bytes(self.read_array()?))),
            tag::INT8 => Ok(Value::Integer(i64::from(self.read_u8()? as i8))),
            tag::INT16 => Ok(Value::Integer(i64::from(i16::from_be_bytes(
                self.read_array()?,
            )))),
            tag::INT32 => Ok(Value::Integer(i64::from(i32::from_be_bytes(
                self.read_array()?,
            )))),
            tag::INT64 => Ok(Value::Integer(i64::from_be_bytes(self.read_array()?))),
            tag::FIXEXT1 => self.read_ext(1),
            tag::FIXEXT2 => self.read_ext(2),
            tag::FIXEXT4 => self.read_ext(4),
            tag::FIXEXT8 => self.read_ext(8),
            tag::FIXEXT16 => self.read_ext(16),
            tag::STR8 | tag::STR16 | tag::STR32 => {
                let len = self.read_len(1 << (t - tag::STR8))?;
                self.read_str(len)
            }
            tag::ARRAY16 => {
                let len = self.read_len(2)?;
                self.read_array_value(len, depth)
            }
            tag::ARRAY32 => {
                let len = self.read_len(4)?;
                self.read_array_value(len, depth)
            }
            tag::MAP16 => {
                let len = self.read_len(2)?;
                self.read_map(len, depth)
            }
            tag::MAP32 => {
                let len = self.read_len(4)?;
                self.read_map(len, depth)
            }
            _ => Err(DecodeError::Malformed { tag: t, offset }),
        }
    }

    fn read_str(&mut self, len: usize) -> Result<Value, DecodeError> {
        let raw = self.read_bytes(len)?;
        Ok(Value::String(String::from_utf8_lossy(raw).into_owned()))
    }

    fn read_ext(&mut self, len: usize) -> Result<Value, DecodeError> {
        let type_id = self.read_u8()?;
        let data = self.read_bytes(len)?.to_vec();
        Ok(Value::Ext { type_id, data })
    }

    fn read_array_value(&mut self, len: usize, depth: usize) -> Result<Value, DecodeError> {
        // Every element takes at least one byte, so the buffered tail bounds the
        // allocation no matter what the header claims.
        let mut items = Vec::with_capacity(len.min(self.remaining()));
        for _ in 0..len {
            items.push(self.read_value(depth + 1)?);
        }
        Ok(Value::Array(items))
    }

    fn read_map(&mut self, len: usize, depth: usize) -> Result<Value, DecodeError> {
        let mut entries = Vec::with_capacity(len.min(self.remaining() / 2));
        for _ in 0..len {
            let key = self.read_value(depth + 1)?;
            let value = self.read_value(depth + 1)?;
            entries.push((key, value));
        }
        Ok(Value::Map(entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode;

    #[test]
    fn decodes_foreign_integer_tags() {
        assert_eq!(decode_value(&[0xcc, 0xff]).unwrap(), (Value::Integer(255), 2));
        assert_eq!(
            decode_value(&[0xcd, 0x01, 0x00]).unwrap(),
            (Value::Integer(256), 3)
        );
        assert_eq!(
            decode_value(&[0xce, 0xff, 0xff, 0xff, 0xff]).unwrap().0,
            Value::Integer(u32::MAX as i64)
        );
        let mut big = vec![0xcf];
        big.extend_from_slice(&u64::MAX.to_be_bytes());
        assert_eq!(
            decode_value(&big).unwrap().0,
            Value::UnsignedInteger(u64::MAX)
        );
        let mut small = vec![0xcf];
        small.extend_from_slice(&9u64.to_be_bytes());
        assert!(matches!(decode_value(&small).unwrap().0, Value::Integer(9)));
    }

    #[test]
    fn decodes_float32() {
        let mut bytes = vec![0xca];
        bytes.extend_from_slice(&1.5f32.to_be_bytes());
        assert_eq!(decode_value(&bytes).unwrap().0, Value::Float(1.5));
    }

    #[test]
    fn short_headers_are_incomplete_not_malformed() {
        assert_eq!(decode_value(&[]), Err(DecodeError::Incomplete));
        assert_eq!(decode_value(&[0xda, 0x00]), Err(DecodeError::Incomplete));
        assert_eq!(decode_value(&[0xd9, 5, b'a']), Err(DecodeError::Incomplete));
        assert_eq!(decode_value(&[0x92, 0x01]), Err(DecodeError::Incomplete));
        assert_eq!(decode_value(&[0xd4, 0x01]), Err(DecodeError::Incomplete));
    }

    #[test]
    fn reserved_tag_is_malformed() {
        assert_eq!(
            decode_value(&[0x92, 0x01, 0xc1]),
            Err(DecodeError::Malformed {
                tag: 0xc1,
                offset: 2
            })
        );
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let (value, _) = decode_value(&[0xa2, 0xff, b'a']).unwrap();
        assert_eq!(value, Value::from("\u{fffd}a"));
    }

    #[test]
    fn huge_declared_length_does_not_preallocate() {
        assert_eq!(
            decode_value(&[0xdd, 0xff, 0xff, 0xff, 0xff, 0x01]),
            Err(DecodeError::Incomplete)
        );
    }

    #[test]
    fn excessive_nesting_is_rejected() {
        let bytes = vec![0x91; MAX_DEPTH + 2];
        assert!(matches!(
            decode_value(&bytes),
            Err(DecodeError::Malformed { tag: 0x91, .. })
        ));
    }

    #[test]
    fn push_keeps_values_decoded_before_a_malformed_tag() {
        let mut bytes = encode(&Value::from(1i64)).unwrap();
        bytes.extend(encode(&Value::from("ok")).unwrap());
        bytes.push(0xc1);
        bytes.extend(encode(&Value::from(2i64)).unwrap());

        let mut decoder = Decoder::new();
        let mut seen = Vec::new();
        let err = decoder.push(&bytes, |v| seen.push(v)).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed { tag: 0xc1, .. }));
        assert_eq!(seen, vec![Value::from(1i64), Value::from("ok")]);
        assert_eq!(decoder.buffered_len(), 0);

        let values = decoder.push_collect(&encode(&Value::Nil).unwrap()).unwrap();
        assert_eq!(values, vec![Value::Nil]);
    }

    #[test]
    fn push_retains_incomplete_tail() {
        let bytes = encode(&Value::Array(vec![Value::from("abc"), Value::from(300i64)])).unwrap();
        let mut decoder = Decoder::new();
        assert!(decoder.push_collect(&bytes[..4]).unwrap().is_empty());
        assert_eq!(decoder.buffered_len(), 4);
        let values = decoder.push_collect(&bytes[4..]).unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(decoder.buffered_len(), 0);
    }

    #[test]
    fn byte_at_a_time_scan_only_moves_forward() {
        let batch = Value::Array((0..1000i64).map(Value::from).collect());
        let bytes = encode(&batch).unwrap();
        let mut decoder = Decoder::new();
        let mut seen = Vec::new();
        let mut last_pos = 0;
        for (i, byte) in bytes.iter().enumerate() {
            decoder.push(&[*byte], |v| seen.push(v)).unwrap();
            if i + 1 < bytes.len() {
                assert!(decoder.boundary.pos >= last_pos);
                assert!(decoder.boundary.pos <= i + 1);
                last_pos = decoder.boundary.pos;
            }
        }
        assert_eq!(seen, vec![batch]);
        assert_eq!(decoder.boundary.pos, 0);
        assert!(decoder.boundary.open.is_empty());
    }

    #[test]
    fn scan_waits_for_whole_payloads() {
        let bytes = encode(&Value::Array(vec![Value::from("abcdef"), Value::Nil])).unwrap();
        let mut boundary = Boundary::default();
        assert_eq!(boundary.scan(&bytes[..4]), Ok(None));
        assert_eq!(boundary.pos, 1);
        assert_eq!(boundary.scan(&bytes[..8]), Ok(None));
        assert_eq!(boundary.pos, 8);
        assert_eq!(boundary.scan(&bytes), Ok(Some(bytes.len())));
    }

    #[test]
    fn scan_reports_malformed_offset_within_buffer() {
        let mut boundary = Boundary::default();
        assert_eq!(
            boundary.scan(&[0x93, 0x01, 0x02, 0xc1]),
            Err(DecodeError::Malformed {
                tag: 0xc1,
                offset: 3
            })
        );
    }
}
