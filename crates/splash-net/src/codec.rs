//! Wire format of the link channels.
//!
//! A message on the wire is a sequence of frames. On the stream, each
//! message starts with a little-endian `u32` frame count, followed by each
//! frame as a little-endian `u32` length and its bytes.
//!
//! Attribute messages carry, in order: the target name, the attribute name,
//! then the values. A value sequence is an `i32` element count followed, per
//! element, by an `i32` type tag, the element name and the payload. Integers
//! are `i64`, reals are `f64`, strings are NUL-terminated and nested
//! sequences recurse without a payload frame. Names are NUL-terminated.
//!
//! Buffer messages carry exactly two frames: the target name and the raw
//! serialized bytes.

use std::io::{self, Write};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use splash_core::{SerializedObject, Value, ValueData, ValueType, Values};

use crate::error::CodecError;

/// Frames of one message.
pub type Frames = Vec<Bytes>;

/// Largest accepted frame, in bytes.
pub const MAX_FRAME_LEN: usize = 1 << 30;

/// Largest accepted number of frames in one message.
pub const MAX_FRAMES: usize = 1 << 20;

/// Deepest accepted nesting of value sequences.
pub const MAX_NESTING: usize = 64;

const HEADER_LEN: usize = 4;
const DIRECT_WRITE_LEN: usize = 64 * 1024;

/// Encode an attribute message.
pub fn encode_message(target: &str, attribute: &str, values: &[Value]) -> Frames {
    let mut frames = Vec::with_capacity(3 + values.len() * 3);
    frames.push(c_string(target));
    frames.push(c_string(attribute));
    encode_values(values, &mut frames);
    frames
}

fn encode_values(values: &[Value], frames: &mut Frames) {
    frames.push(Bytes::copy_from_slice(&(values.len() as i32).to_le_bytes()));
    for value in values {
        let tag = i32::from(value.value_type().wire_code());
        frames.push(Bytes::copy_from_slice(&tag.to_le_bytes()));
        frames.push(c_string(value.name()));
        match value.data() {
            ValueData::Integer(i) => frames.push(Bytes::copy_from_slice(&i.to_le_bytes())),
            ValueData::Real(r) => frames.push(Bytes::copy_from_slice(&r.to_le_bytes())),
            ValueData::String(s) => frames.push(c_string(s)),
            ValueData::Values(nested) => encode_values(nested, frames),
        }
    }
}

/// Decode an attribute message into target name, attribute name and values.
pub fn decode_message(frames: &[Bytes]) -> Result<(String, String, Values), CodecError> {
    let mut cursor = FrameCursor::new(frames);
    let target = cursor.string("target name")?;
    let attribute = cursor.string("attribute name")?;
    let values = decode_values(&mut cursor, 0)?;
    cursor.finish()?;
    Ok((target, attribute, values))
}

fn decode_values(cursor: &mut FrameCursor<'_>, depth: usize) -> Result<Values, CodecError> {
    if depth > MAX_NESTING {
        return Err(CodecError::Malformed("value nesting too deep"));
    }

    let count = i32::from_le_bytes(cursor.fixed("element count")?);
    let count = usize::try_from(count).map_err(|_| CodecError::Malformed("negative element count"))?;
    let mut values = Vec::with_capacity(count.min(cursor.remaining()));
    for _ in 0..count {
        let tag = i32::from_le_bytes(cursor.fixed("type tag")?);
        let value_type = u8::try_from(tag)
            .ok()
            .and_then(ValueType::from_wire_code)
            .ok_or(CodecError::UnknownType(tag))?;
        let name = cursor.string("element name")?;
        let data = match value_type {
            ValueType::Integer => ValueData::Integer(i64::from_le_bytes(cursor.fixed("integer")?)),
            ValueType::Real => ValueData::Real(f64::from_le_bytes(cursor.fixed("real")?)),
            ValueType::String => ValueData::String(cursor.string("string")?),
            ValueType::Values => ValueData::Values(decode_values(cursor, depth + 1)?),
        };
        values.push(Value::new(data).named(name));
    }
    Ok(values)
}

/// First frame of a buffer message.
pub fn encode_buffer_header(target: &str) -> Bytes {
    c_string(target)
}

/// Decode a buffer message. The payload shares memory with the frame.
pub fn decode_buffer(frames: &[Bytes]) -> Result<(String, SerializedObject), CodecError> {
    let mut cursor = FrameCursor::new(frames);
    let target = cursor.string("target name")?;
    let payload = cursor.next("buffer payload")?.clone();
    cursor.finish()?;
    Ok((target, SerializedObject::new(payload)))
}

fn c_string(s: &str) -> Bytes {
    let mut bytes = BytesMut::with_capacity(s.len() + 1);
    bytes.put_slice(s.as_bytes());
    bytes.put_u8(0);
    bytes.freeze()
}

struct FrameCursor<'a> {
    frames: &'a [Bytes],
    position: usize,
}

impl<'a> FrameCursor<'a> {
    fn new(frames: &'a [Bytes]) -> Self {
        Self {
            frames,
            position: 0,
        }
    }

    fn remaining(&self) -> usize {
        self.frames.len() - self.position
    }

    fn next(&mut self, what: &'static str) -> Result<&'a Bytes, CodecError> {
        let frame = self
            .frames
            .get(self.position)
            .ok_or(CodecError::MissingFrame(what))?;
        self.position += 1;
        Ok(frame)
    }

    fn fixed<const N: usize>(&mut self, what: &'static str) -> Result<[u8; N], CodecError> {
        let frame = self.next(what)?;
        <[u8; N]>::try_from(frame.as_ref()).map_err(|_| CodecError::Truncated {
            expected: N,
            actual: frame.len(),
        })
    }

    fn string(&mut self, what: &'static str) -> Result<String, CodecError> {
        let frame = self.next(what)?;
        let end = frame
            .iter()
            .position(|&b| b == 0)
            .ok_or(CodecError::Malformed("string without NUL terminator"))?;
        String::from_utf8(frame[..end].to_vec()).map_err(|_| CodecError::Malformed("invalid UTF-8"))
    }

    fn finish(&self) -> Result<(), CodecError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(CodecError::TrailingFrames(n)),
        }
    }
}

/// Write one message to a stream.
///
/// Small frames are coalesced; large ones are written straight from their
/// memory without copying. A message the envelope cannot carry is refused
/// with [`io::ErrorKind::InvalidInput`] before anything is written.
pub fn write_frames<W: Write>(writer: &mut W, frames: &[&[u8]]) -> io::Result<()> {
    if frames.len() > MAX_FRAMES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} frames exceed the limit of {MAX_FRAMES}", frames.len()),
        ));
    }
    if let Some(frame) = frames.iter().find(|frame| frame.len() > MAX_FRAME_LEN) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("frame of {} bytes exceeds the limit of {MAX_FRAME_LEN}", frame.len()),
        ));
    }

    let mut pending = BytesMut::with_capacity(256);
    pending.put_u32_le(frames.len() as u32);
    for frame in frames {
        pending.put_u32_le(frame.len() as u32);
        if frame.len() >= DIRECT_WRITE_LEN {
            writer.write_all(&pending)?;
            pending.clear();
            writer.write_all(frame)?;
        } else {
            pending.put_slice(frame);
        }
    }
    if !pending.is_empty() {
        writer.write_all(&pending)?;
    }
    writer.flush()
}

/// Reassembles messages from stream bytes.
#[derive(Debug)]
pub struct FrameReader {
    buffer: BytesMut,
    max_frame_len: usize,
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameReader {
    pub fn new() -> Self {
        Self::with_max_frame_len(MAX_FRAME_LEN)
    }

    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            max_frame_len,
        }
    }

    /// Append bytes read from the stream.
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Number of buffered bytes not yet part of a returned message.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Take the next complete message, if one is buffered.
    ///
    /// An error means the stream is out of sync and must be dropped.
    pub fn next_message(&mut self) -> Result<Option<Frames>, CodecError> {
        let Some(count) = self.peek_u32(0) else {
            return Ok(None);
        };
        let count = count as usize;
        if count > MAX_FRAMES {
            return Err(CodecError::FrameTooLarge(count));
        }

        let mut offset = HEADER_LEN;
        let mut lengths = Vec::with_capacity(count);
        for _ in 0..count {
            let Some(len) = self.peek_u32(offset) else {
                return Ok(None);
            };
            let len = len as usize;
            if len > self.max_frame_len {
                return Err(CodecError::FrameTooLarge(len));
            }
            offset += HEADER_LEN + len;
            if offset > self.buffer.len() {
                // Make room for the rest of the message in one go
                self.buffer.reserve(offset - self.buffer.len());
                return Ok(None);
            }
            lengths.push(len);
        }

        let mut message = self.buffer.split_to(offset).freeze();
        message.advance(HEADER_LEN);
        let frames = lengths
            .into_iter()
            .map(|len| {
                message.advance(HEADER_LEN);
                message.split_to(len)
            })
            .collect();
        Ok(Some(frames))
    }

    fn peek_u32(&self, offset: usize) -> Option<u32> {
        let bytes = self.buffer.get(offset..offset + HEADER_LEN)?;
        Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}
