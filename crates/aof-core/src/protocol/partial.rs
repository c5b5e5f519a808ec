//! Best-effort MessagePack decoder for truncated buffers.
//!
//! While a large response is still streaming in, the client only holds a prefix
//! of its encoding.  [`partial_decode`] turns such a prefix into the most
//! complete value it can, so a view can render a provisional state.
//!
//! The result is a *preview*.  It is never assumed to match the final decode.
//!
//! # Rules
//!
//! - Scalars (nil, booleans, integers, floats, strings, binaries) are atomic:
//!   a scalar cut off mid-representation is absent.
//! - An array or map stops at the first element that cannot complete.  That
//!   element is dropped, unless it is itself a container whose header was
//!   read, in which case its own prefix is kept and decoding ends there.
//! - A map entry needs a complete key.
//! - Tags this decoder does not understand (`0xC1`, ext types) stop decoding
//!   exactly like a truncation does.
//! - A container nested deeper than [`MAX_NESTING_DEPTH`] is treated as absent.
//!
//! Decoding never panics and never returns an error.

use rmpv::Value;

use super::payload::MAX_NESTING_DEPTH;

/// Decodes the longest meaningful value from the start of `buf`.
///
/// Returns `None` when not even the outermost value can be started (empty
/// buffer, cut-off scalar, unsupported tag).
///
/// # Examples
///
/// ```rust
/// use aof_core::protocol::partial_decode;
/// use rmpv::Value;
///
/// // {"a": 1, "b": "hello"} cut inside "hello"
/// let bytes = [0x82, 0xA1, b'a', 0x01, 0xA1, b'b', 0xA5, b'h', b'e'];
/// let value = partial_decode(&bytes).unwrap();
/// assert_eq!(value, Value::Map(vec![(Value::from("a"), Value::from(1u8))]));
/// ```
pub fn partial_decode(buf: &[u8]) -> Option<Value> {
    match Reader::new(buf).value() {
        Decoded::Complete(value) | Decoded::Partial(value) => Some(value),
        Decoded::Missing => None,
    }
}

/// Outcome of decoding one value.
enum Decoded {
    /// The value was read in full.
    Complete(Value),
    /// A container whose header was read but whose elements ran out.
    Partial(Value),
    /// Nothing usable could be read.
    Missing,
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
    depth: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            depth: 0,
        }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        let bytes = self.buf.get(self.pos..end)?;
        self.pos = end;
        Some(bytes)
    }

    fn take_array<const N: usize>(&mut self) -> Option<[u8; N]> {
        let bytes = self.take(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Some(out)
    }

    fn u8(&mut self) -> Option<u8> {
        self.take_array::<1>().map(|[b]| b)
    }

    fn u16(&mut self) -> Option<u16> {
        self.take_array().map(u16::from_be_bytes)
    }

    fn u32(&mut self) -> Option<u32> {
        self.take_array().map(u32::from_be_bytes)
    }

    fn value(&mut self) -> Decoded {
        let Some(tag) = self.u8() else {
            return Decoded::Missing;
        };

        let scalar = match tag {
            0x00..=0x7F => Some(Value::from(tag)),
            0x80..=0x8F => return self.nested(|r| r.map(usize::from(tag & 0x0F))),
            0x90..=0x9F => return self.nested(|r| r.array(usize::from(tag & 0x0F))),
            0xA0..=0xBF => self.str(usize::from(tag & 0x1F)),
            0xC0 => Some(Value::Nil),
            0xC2 => Some(Value::Boolean(false)),
            0xC3 => Some(Value::Boolean(true)),
            0xC4 => self.u8().and_then(|n| self.bin(usize::from(n))),
            0xC5 => self.u16().and_then(|n| self.bin(usize::from(n))),
            0xC6 => self.u32().and_then(|n| self.bin(n as usize)),
            0xCA => self.take_array().map(|b| Value::F32(f32::from_be_bytes(b))),
            0xCB => self.take_array().map(|b| Value::F64(f64::from_be_bytes(b))),
            0xCC => self.u8().map(Value::from),
            0xCD => self.u16().map(Value::from),
            0xCE => self.u32().map(Value::from),
            0xCF => self.take_array().map(|b| Value::from(u64::from_be_bytes(b))),
            0xD0 => self.take_array().map(|b| Value::from(i8::from_be_bytes(b))),
            0xD1 => self.take_array().map(|b| Value::from(i16::from_be_bytes(b))),
            0xD2 => self.take_array().map(|b| Value::from(i32::from_be_bytes(b))),
            0xD3 => self.take_array().map(|b| Value::from(i64::from_be_bytes(b))),
            0xD9 => self.u8().and_then(|n| self.str(usize::from(n))),
            0xDA => self.u16().and_then(|n| self.str(usize::from(n))),
            0xDB => self.u32().and_then(|n| self.str(n as usize)),
            0xDC => match self.u16() {
                Some(n) => return self.nested(|r| r.array(usize::from(n))),
                None => None,
            },
            0xDD => match self.u32() {
                Some(n) => return self.nested(|r| r.array(n as usize)),
                None => None,
            },
            0xDE => match self.u16() {
                Some(n) => return self.nested(|r| r.map(usize::from(n))),
                None => None,
            },
            0xDF => match self.u32() {
                Some(n) => return self.nested(|r| r.map(n as usize)),
                None => None,
            },
            0xE0..=0xFF => Some(Value::from(tag as i8)),
            // 0xC1 is never used; 0xC7..=0xC9 and 0xD4..=0xD8 are ext types.
            _ => None,
        };

        match scalar {
            Some(value) => Decoded::Complete(value),
            None => Decoded::Missing,
        }
    }

    /// Reads one container level, refusing to go past the depth limit.
    fn nested(&mut self, read: impl FnOnce(&mut Self) -> Decoded) -> Decoded {
        if self.depth >= MAX_NESTING_DEPTH {
            return Decoded::Missing;
        }
        self.depth += 1;
        let decoded = read(self);
        self.depth -= 1;
        decoded
    }

    fn str(&mut self, len: usize) -> Option<Value> {
        self.take(len)
            .map(|bytes| Value::from(String::from_utf8_lossy(bytes).into_owned()))
    }

    fn bin(&mut self, len: usize) -> Option<Value> {
        self.take(len).map(|bytes| Value::Binary(bytes.to_vec()))
    }

    fn array(&mut self, count: usize) -> Decoded {
        // Every element needs at least one byte, which bounds a hostile count.
        let mut items = Vec::with_capacity(count.min(self.remaining()));
        for _ in 0..count {
            match self.value() {
                Decoded::Complete(item) => items.push(item),
                Decoded::Partial(item) => {
                    items.push(item);
                    return Decoded::Partial(Value::Array(items));
                }
                Decoded::Missing => return Decoded::Partial(Value::Array(items)),
            }
        }
        Decoded::Complete(Value::Array(items))
    }

    fn map(&mut self, count: usize) -> Decoded {
        let mut entries = Vec::with_capacity(count.min(self.remaining() / 2));
        for _ in 0..count {
            let key = match self.value() {
                Decoded::Complete(key) => key,
                Decoded::Partial(_) | Decoded::Missing => {
                    return Decoded::Partial(Value::Map(entries));
                }
            };
            match self.value() {
                Decoded::Complete(value) => entries.push((key, value)),
                Decoded::Partial(value) => {
                    entries.push((key, value));
                    return Decoded::Partial(Value::Map(entries));
                }
                Decoded::Missing => return Decoded::Partial(Value::Map(entries)),
            }
        }
        Decoded::Complete(Value::Map(entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(value: &Value) -> Vec<u8> {
        let mut buf = Vec::new();
        rmpv::encode::write_value(&mut buf, value).unwrap();
        buf
    }

    fn sample() -> Value {
        Value::Map(vec![
            (Value::from("name"), Value::from("Example source")),
            (Value::from("count"), Value::from(70_000u32)),
            (Value::from("neg"), Value::from(-3i64)),
            (Value::from("ratio"), Value::F64(0.25)),
            (Value::from("flag"), Value::Boolean(true)),
            (Value::from("none"), Value::Nil),
            (Value::from("blob"), Value::Binary(vec![1, 2, 3, 4])),
            (
                Value::from("items"),
                Value::Array(vec![Value::from(1u8), Value::from("two"), Value::F32(3.5)]),
            ),
        ])
    }

    #[test]
    fn test_partial_decode_complete_buffer_matches_reference() {
        // Arrange
        let value = sample();
        let bytes = encode(&value);

        // Act
        let decoded = partial_decode(&bytes);

        // Assert
        let reference = rmpv::decode::read_value(&mut bytes.as_slice()).unwrap();
        assert_eq!(decoded, Some(reference));
    }

    #[test]
    fn test_partial_decode_empty_buffer_is_absent() {
        assert_eq!(partial_decode(&[]), None);
    }

    #[test]
    fn test_partial_decode_cut_scalar_is_absent() {
        // uint32 with only two of its four bytes
        assert_eq!(partial_decode(&[0xCE, 0x00, 0x01]), None);
        // str8 announcing 5 bytes, only 2 present
        assert_eq!(partial_decode(&[0xD9, 5, b'a', b'b']), None);
    }

    #[test]
    fn test_partial_decode_drops_incomplete_map_value() {
        // Arrange: {"a": 1, "b": "hello"} cut after "he"
        let bytes = [0x82, 0xA1, b'a', 0x01, 0xA1, b'b', 0xA5, b'h', b'e'];

        // Act
        let value = partial_decode(&bytes).unwrap();

        // Assert
        assert_eq!(value, Value::Map(vec![(Value::from("a"), Value::from(1u8))]));
    }

    #[test]
    fn test_partial_decode_drops_entry_with_incomplete_key() {
        // {"abc": 1} cut inside the key
        let value = partial_decode(&[0x81, 0xA3, b'a', b'b']).unwrap();
        assert_eq!(value, Value::Map(vec![]));
    }

    #[test]
    fn test_partial_decode_keeps_prefix_of_nested_container() {
        // Arrange: {"items": [1, 2, 3]} cut after the 2
        let full = encode(&Value::Map(vec![(
            Value::from("items"),
            Value::Array(vec![Value::from(1u8), Value::from(2u8), Value::from(3u8)]),
        )]));
        let cut = &full[..full.len() - 1];

        // Act
        let value = partial_decode(cut).unwrap();

        // Assert
        assert_eq!(
            value,
            Value::Map(vec![(
                Value::from("items"),
                Value::Array(vec![Value::from(1u8), Value::from(2u8)]),
            )])
        );
    }

    #[test]
    fn test_partial_decode_stops_at_unsupported_tag() {
        // [1, <0xC1>, 2]
        let value = partial_decode(&[0x93, 0x01, 0xC1, 0x02]).unwrap();
        assert_eq!(value, Value::Array(vec![Value::from(1u8)]));
    }

    #[test]
    fn test_partial_decode_keeps_non_string_keys() {
        // {1: "x"}
        let value = partial_decode(&[0x81, 0x01, 0xA1, b'x']).unwrap();
        assert_eq!(value, Value::Map(vec![(Value::from(1u8), Value::from("x"))]));
    }

    #[test]
    fn test_partial_decode_hostile_count_does_not_allocate() {
        // array32 declaring u32::MAX elements with nothing after the header
        let value = partial_decode(&[0xDD, 0xFF, 0xFF, 0xFF, 0xFF]).unwrap();
        assert_eq!(value, Value::Array(vec![]));
    }

    #[test]
    fn test_partial_decode_stops_at_nesting_limit() {
        // Arrange: 16 KiB of fixarray(1) headers
        let bytes = vec![0x91u8; 16 * 1024];

        // Act
        let value = partial_decode(&bytes).unwrap();

        // Assert
        let mut depth = 0;
        let mut current = &value;
        while let Value::Array(items) = current {
            depth += 1;
            match items.first() {
                Some(inner) => current = inner,
                None => break,
            }
        }
        assert_eq!(depth, MAX_NESTING_DEPTH);
    }

    #[test]
    fn test_partial_decode_every_prefix_never_panics() {
        let bytes = encode(&sample());
        for end in 0..=bytes.len() {
            let _ = partial_decode(&bytes[..end]);
        }
    }
}
