// ObjectReference command implementations
//
// Commands for working with object instances

use crate::commands::{command_sets, object_reference_commands};
use crate::connection::JdwpConnection;
use crate::protocol::JdwpResult;
use crate::reader::{read_count, read_tagged_value, read_u64, read_u8};
use crate::types::{FieldId, ObjectId, ReferenceTypeId, Value};
use bytes::BufMut;

impl JdwpConnection {
    /// Runtime class of an object (ObjectReference.ReferenceType)
    pub async fn get_object_reference_type(&self, object_id: ObjectId) -> JdwpResult<ReferenceTypeId> {
        let mut body = Vec::with_capacity(8);
        body.put_u64(object_id);

        let reply = self
            .request(
                command_sets::OBJECT_REFERENCE,
                object_reference_commands::REFERENCE_TYPE,
                body,
            )
            .await?;
        let mut data = reply.data();

        let _type_tag = read_u8(&mut data)?;
        read_u64(&mut data)
    }

    /// Instance field values of an object (ObjectReference.GetValues)
    pub async fn get_object_values(
        &self,
        object_id: ObjectId,
        field_ids: &[FieldId],
    ) -> JdwpResult<Vec<Value>> {
        let mut body = Vec::with_capacity(12 + 8 * field_ids.len());
        body.put_u64(object_id);
        body.put_i32(field_ids.len() as i32);
        for field_id in field_ids {
            body.put_u64(*field_id);
        }

        let reply = self
            .request(
                command_sets::OBJECT_REFERENCE,
                object_reference_commands::GET_VALUES,
                body,
            )
            .await?;
        let mut data = reply.data();

        let count = read_count(&mut data)?;
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            values.push(read_tagged_value(&mut data)?);
        }

        Ok(values)
    }
}
