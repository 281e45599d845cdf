// ArrayReference command implementations

use crate::commands::{command_sets, array_reference_commands};
use crate::connection::JdwpConnection;
use crate::protocol::{JdwpError, JdwpResult};
use crate::reader::{read_count, read_i32, read_u8, read_value};
use crate::types::{tags, ArrayId, Value};
use bytes::BufMut;

impl JdwpConnection {
    /// ArrayReference.Length
    pub async fn get_array_length(&self, array_id: ArrayId) -> JdwpResult<i32> {
        let mut body = Vec::with_capacity(8);
        body.put_u64(array_id);

        let reply = self
            .request(
                command_sets::ARRAY_REFERENCE,
                array_reference_commands::LENGTH,
                body,
            )
            .await?;
        let mut data = reply.data();
        read_i32(&mut data)
    }

    /// A range of array elements (ArrayReference.GetValues)
    pub async fn get_array_values(
        &self,
        array_id: ArrayId,
        first_index: i32,
        length: i32,
    ) -> JdwpResult<Vec<Value>> {
        let mut body = Vec::with_capacity(16);
        body.put_u64(array_id);
        body.put_i32(first_index);
        body.put_i32(length);

        let reply = self
            .request(
                command_sets::ARRAY_REFERENCE,
                array_reference_commands::GET_VALUES,
                body,
            )
            .await?;
        let mut data = reply.data();
        parse_array_region(&mut data)
    }
}

/// An arrayregion: element tag, count, then untagged primitives or tagged objects
fn parse_array_region(data: &mut &[u8]) -> JdwpResult<Vec<Value>> {
    let element_tag = read_u8(data)?;
    let count = read_count(data)?;
    let mut values = Vec::with_capacity(count);

    for _ in 0..count {
        let tag = if tags::is_primitive(element_tag) {
            element_tag
        } else if tags::is_object(element_tag) {
            read_u8(data)?
        } else {
            return Err(JdwpError::Protocol(format!(
                "Unknown array element tag: {}",
                element_tag
            )));
        };
        values.push(Value {
            tag,
            data: read_value(tag, data)?,
        });
    }

    Ok(values)
}
