use bytes::{BufMut, BytesMut};
use std::{
    io::Write,
    path::Path,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use crate::{error::SnapshotError, store::StoreValue};

const MAGIC: &[u8] = b"THERM";
const VERSION: u16 = 1;
const CHECKSUM_LEN: usize = 8;
// opcode, deadline, value type, empty key, value
const MIN_ENTRY_LEN: usize = 1 + 8 + 1 + 1 + 8;

enum OpCode {
    EndOfFile = 0xFF,
    ExpireTimeMillis = 0xFC,
    ResizeStore = 0xFB,
}

impl TryFrom<u8> for OpCode {
    type Error = SnapshotError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0xFF => Ok(OpCode::EndOfFile),
            0xFC => Ok(OpCode::ExpireTimeMillis),
            0xFB => Ok(OpCode::ResizeStore),
            _ => Err(SnapshotError::corrupt(format!("invalid opcode {:#04x}", value))),
        }
    }
}

enum ValueType {
    Double = 5,
}

impl TryFrom<u8> for ValueType {
    type Error = SnapshotError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            5 => Ok(ValueType::Double),
            _ => Err(SnapshotError::corrupt(format!("invalid value type {:#04x}", value))),
        }
    }
}

pub fn read_snapshot_file<P>(path: P) -> Result<Vec<(String, StoreValue)>, SnapshotError>
where
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let data = std::fs::read(path).map_err(|e| SnapshotError::io(path, e))?;
    decode_snapshot(&data)
}

/// Encodes `entries` into a fresh temporary file beside `path`, syncs it,
/// then renames it over `path`. Every call gets its own temporary file.
pub fn write_snapshot_file<P>(entries: &[(String, StoreValue)], path: P) -> Result<(), SnapshotError>
where
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let data = encode_snapshot(entries)?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    // Dropped on any error below, which removes it
    let mut file = tempfile::Builder::new()
        .prefix(".snapshot")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|e| SnapshotError::io(path, e))?;
    file.write_all(&data)
        .and_then(|_| file.as_file().sync_all())
        .map_err(|e| SnapshotError::io(path, e))?;
    file.persist(path)
        .map_err(|e| SnapshotError::io(path, e.error))?;
    Ok(())
}

pub fn encode_snapshot(entries: &[(String, StoreValue)]) -> Result<BytesMut, SnapshotError> {
    let mut buf = BytesMut::with_capacity(MAGIC.len() + 4 + entries.len() * 32 + 1 + CHECKSUM_LEN);
    buf.put(MAGIC);
    buf.put(format!("{:04}", VERSION).as_bytes());

    buf.put_u8(OpCode::ResizeStore as u8);
    put_length(&mut buf, entries.len())?;
    put_length(&mut buf, entries.len())?;

    for (key, value) in entries {
        buf.put_u8(OpCode::ExpireTimeMillis as u8);
        buf.put_u64_le(unix_millis(value.expires_at));
        buf.put_u8(ValueType::Double as u8);
        put_length(&mut buf, key.len())?;
        buf.put(key.as_bytes());
        buf.put_f64_le(value.data);
    }

    buf.put_u8(OpCode::EndOfFile as u8);
    // A zero checksum means "not computed"
    buf.put_bytes(0, CHECKSUM_LEN);
    Ok(buf)
}

pub fn decode_snapshot(data: &[u8]) -> Result<Vec<(String, StoreValue)>, SnapshotError> {
    if data.len() < MAGIC.len() + 4 + 1 + CHECKSUM_LEN {
        return Err(SnapshotError::corrupt("file too short"));
    }
    if &data[0..MAGIC.len()] != MAGIC {
        return Err(SnapshotError::corrupt("invalid magic string"));
    }
    let version = std::str::from_utf8(&data[5..9])
        .ok()
        .and_then(|s| s.parse::<u16>().ok())
        .ok_or_else(|| SnapshotError::corrupt("invalid version"))?;
    if version != VERSION {
        return Err(SnapshotError::corrupt(format!("unsupported version {}", version)));
    }

    let mut entries = Vec::new();
    let mut rest = &data[9..];
    loop {
        let (opcode, tail) = take(rest, 1)?;
        rest = tail;
        match OpCode::try_from(opcode[0])? {
            OpCode::EndOfFile => {
                let (_checksum, tail) = take(rest, CHECKSUM_LEN)?;
                if !tail.is_empty() {
                    return Err(SnapshotError::corrupt("trailing bytes after end of file"));
                }
                return Ok(entries);
            }
            OpCode::ResizeStore => {
                let (size, tail) = parse_length(rest)?;
                let (_expiry_size, tail) = parse_length(tail)?;
                rest = tail;
                entries.reserve(size.min(rest.len() / MIN_ENTRY_LEN));
            }
            OpCode::ExpireTimeMillis => {
                let (millis, tail) = take_word(rest)?;
                let millis = u64::from_le_bytes(millis);
                let (value_type, tail) = take(tail, 1)?;
                match ValueType::try_from(value_type[0])? {
                    ValueType::Double => {
                        let (key, tail) = parse_string(tail)?;
                        let (value, tail) = take_word(tail)?;
                        rest = tail;
                        entries.push((
                            key,
                            StoreValue {
                                data: f64::from_le_bytes(value),
                                expires_at: UNIX_EPOCH + Duration::from_millis(millis),
                            },
                        ));
                    }
                }
            }
        }
    }
}

fn unix_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn take(data: &[u8], len: usize) -> Result<(&[u8], &[u8]), SnapshotError> {
    if data.len() < len {
        return Err(SnapshotError::corrupt("unexpected end of snapshot"));
    }
    Ok(data.split_at(len))
}

fn take_word(data: &[u8]) -> Result<([u8; 8], &[u8]), SnapshotError> {
    let (bytes, rest) = take(data, 8)?;
    let mut word = [0u8; 8];
    word.copy_from_slice(bytes);
    Ok((word, rest))
}

fn put_length(buf: &mut BytesMut, len: usize) -> Result<(), SnapshotError> {
    if len < 1 << 6 {
        buf.put_u8(len as u8);
    } else if len < 1 << 14 {
        buf.put_u16(0x4000 | len as u16);
    } else if let Ok(len) = u32::try_from(len) {
        buf.put_u8(0x80);
        buf.put_u32(len);
    } else {
        return Err(SnapshotError::corrupt(format!("length {} too large", len)));
    }
    Ok(())
}

fn parse_length(data: &[u8]) -> Result<(usize, &[u8]), SnapshotError> {
    let (first, rest) = take(data, 1)?;
    match first[0] >> 6 {
        // The remaining 6 bits are the length
        0b00 => Ok(((first[0] & 0x3f) as usize, rest)),
        // 14 bits across this byte and the next
        0b01 => {
            let (next, rest) = take(rest, 1)?;
            Ok((u16::from_be_bytes([first[0] & 0x3f, next[0]]) as usize, rest))
        }
        // The next 4 bytes, big-endian
        0b10 => {
            let (next, rest) = take(rest, 4)?;
            Ok((
                u32::from_be_bytes([next[0], next[1], next[2], next[3]]) as usize,
                rest,
            ))
        }
        _ => Err(SnapshotError::corrupt("unsupported length encoding")),
    }
}

fn parse_string(data: &[u8]) -> Result<(String, &[u8]), SnapshotError> {
    let (len, rest) = parse_length(data)?;
    let (bytes, rest) = take(rest, len)?;
    let string = std::str::from_utf8(bytes)
        .map_err(|_| SnapshotError::corrupt("key is not valid utf-8"))?
        .to_string();
    Ok((string, rest))
}
