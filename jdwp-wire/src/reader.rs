// Helpers for reading JDWP data types from reply and event buffers
//
// Every helper checks the remaining length first so a truncated packet
// surfaces as a protocol error instead of a panic inside `bytes`.

use crate::protocol::{JdwpError, JdwpResult};
use crate::types::{tags, Location, TaggedObject, Value, ValueData};
use bytes::Buf;

fn ensure(buf: &&[u8], needed: usize, what: &str) -> JdwpResult<()> {
    if buf.remaining() < needed {
        return Err(JdwpError::Protocol(format!(
            "Not enough data for {}: need {}, have {}",
            what,
            needed,
            buf.remaining()
        )));
    }
    Ok(())
}

/// Read a JDWP string (4-byte length prefix + UTF-8 bytes)
pub fn read_string(buf: &mut &[u8]) -> JdwpResult<String> {
    ensure(buf, 4, "string length")?;
    let len = buf.get_u32() as usize;
    ensure(buf, len, "string")?;

    let bytes = &buf[..len];
    buf.advance(len);

    String::from_utf8(bytes.to_vec())
        .map_err(|e| JdwpError::Protocol(format!("Invalid UTF-8 in string: {}", e)))
}

pub fn read_u8(buf: &mut &[u8]) -> JdwpResult<u8> {
    ensure(buf, 1, "u8")?;
    Ok(buf.get_u8())
}

pub fn read_i8(buf: &mut &[u8]) -> JdwpResult<i8> {
    ensure(buf, 1, "i8")?;
    Ok(buf.get_i8())
}

pub fn read_u16(buf: &mut &[u8]) -> JdwpResult<u16> {
    ensure(buf, 2, "u16")?;
    Ok(buf.get_u16())
}

pub fn read_i16(buf: &mut &[u8]) -> JdwpResult<i16> {
    ensure(buf, 2, "i16")?;
    Ok(buf.get_i16())
}

pub fn read_u32(buf: &mut &[u8]) -> JdwpResult<u32> {
    ensure(buf, 4, "u32")?;
    Ok(buf.get_u32())
}

pub fn read_i32(buf: &mut &[u8]) -> JdwpResult<i32> {
    ensure(buf, 4, "i32")?;
    Ok(buf.get_i32())
}

pub fn read_u64(buf: &mut &[u8]) -> JdwpResult<u64> {
    ensure(buf, 8, "u64")?;
    Ok(buf.get_u64())
}

pub fn read_i64(buf: &mut &[u8]) -> JdwpResult<i64> {
    ensure(buf, 8, "i64")?;
    Ok(buf.get_i64())
}

pub fn read_f32(buf: &mut &[u8]) -> JdwpResult<f32> {
    ensure(buf, 4, "f32")?;
    Ok(buf.get_f32())
}

pub fn read_f64(buf: &mut &[u8]) -> JdwpResult<f64> {
    ensure(buf, 8, "f64")?;
    Ok(buf.get_f64())
}

/// Read a count prefix, rejecting negative values
pub fn read_count(buf: &mut &[u8]) -> JdwpResult<usize> {
    let count = read_i32(buf)?;
    usize::try_from(count).map_err(|_| JdwpError::Protocol(format!("Negative count: {}", count)))
}

/// Read a location (type tag, class id, method id, code index)
pub fn read_location(buf: &mut &[u8]) -> JdwpResult<Location> {
    Ok(Location {
        type_tag: read_u8(buf)?,
        class_id: read_u64(buf)?,
        method_id: read_u64(buf)?,
        index: read_u64(buf)?,
    })
}

/// Read a tagged object id (tag byte + object id)
pub fn read_tagged_object(buf: &mut &[u8]) -> JdwpResult<TaggedObject> {
    Ok(TaggedObject {
        tag: read_u8(buf)?,
        id: read_u64(buf)?,
    })
}

/// Read an untagged value whose type is given by `tag`
pub fn read_value(tag: u8, buf: &mut &[u8]) -> JdwpResult<ValueData> {
    let data = match tag {
        tags::BYTE => ValueData::Byte(read_i8(buf)?),
        tags::CHAR => ValueData::Char(read_u16(buf)?),
        tags::DOUBLE => ValueData::Double(read_f64(buf)?),
        tags::FLOAT => ValueData::Float(read_f32(buf)?),
        tags::INT => ValueData::Int(read_i32(buf)?),
        tags::LONG => ValueData::Long(read_i64(buf)?),
        tags::SHORT => ValueData::Short(read_i16(buf)?),
        tags::BOOLEAN => ValueData::Boolean(read_u8(buf)? != 0),
        tags::VOID => ValueData::Void,
        t if tags::is_object(t) => ValueData::Object(read_u64(buf)?),
        _ => return Err(JdwpError::Protocol(format!("Unknown value tag: {}", tag))),
    };
    Ok(data)
}

/// Read a tagged value (tag byte followed by the value)
pub fn read_tagged_value(buf: &mut &[u8]) -> JdwpResult<Value> {
    let tag = read_u8(buf)?;
    let data = read_value(tag, buf)?;
    Ok(Value { tag, data })
}
