// StringReference command implementations

use crate::commands::{command_sets, string_reference_commands};
use crate::connection::JdwpConnection;
use crate::protocol::JdwpResult;
use crate::reader::read_string;
use crate::types::ObjectId;
use bytes::BufMut;

impl JdwpConnection {
    /// Characters of a java.lang.String object (StringReference.Value)
    pub async fn get_string_value(&self, string_id: ObjectId) -> JdwpResult<String> {
        let mut body = Vec::with_capacity(8);
        body.put_u64(string_id);

        let reply = self
            .request(
                command_sets::STRING_REFERENCE,
                string_reference_commands::VALUE,
                body,
            )
            .await?;
        let mut data = reply.data();
        read_string(&mut data)
    }
}
