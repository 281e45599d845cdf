// StackFrame command implementations
//
// Commands for inspecting stack frame variables

use crate::commands::{command_sets, stack_frame_commands};
use crate::connection::JdwpConnection;
use crate::protocol::JdwpResult;
use crate::reader::{read_count, read_tagged_object, read_tagged_value};
use crate::types::{FrameId, ObjectId, ThreadId, Value};
use bytes::BufMut;

/// Variable slot information for GetValues
#[derive(Debug, Clone)]
pub struct VariableSlot {
    pub slot: i32,
    pub sig_byte: u8,
}

impl VariableSlot {
    /// Slot request for a variable with the given type signature
    pub fn for_signature(slot: u32, signature: &str) -> Self {
        Self {
            slot: slot as i32,
            sig_byte: signature.as_bytes().first().copied().unwrap_or(b'L'),
        }
    }
}

impl JdwpConnection {
    /// Get values for variable slots in a frame (StackFrame.GetValues)
    pub async fn get_frame_values(
        &self,
        thread_id: ThreadId,
        frame_id: FrameId,
        slots: &[VariableSlot],
    ) -> JdwpResult<Vec<Value>> {
        let mut body = Vec::new();
        body.put_u64(thread_id);
        body.put_u64(frame_id);
        body.put_i32(slots.len() as i32);
        for slot in slots {
            body.put_i32(slot.slot);
            body.put_u8(slot.sig_byte);
        }

        let reply = self
            .request(command_sets::STACK_FRAME, stack_frame_commands::GET_VALUES, body)
            .await?;
        let mut data = reply.data();

        let count = read_count(&mut data)?;
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            values.push(read_tagged_value(&mut data)?);
        }

        Ok(values)
    }

    /// The frame's `this` object, or None for static and native frames (StackFrame.ThisObject)
    pub async fn get_this_object(
        &self,
        thread_id: ThreadId,
        frame_id: FrameId,
    ) -> JdwpResult<Option<ObjectId>> {
        let mut body = Vec::new();
        body.put_u64(thread_id);
        body.put_u64(frame_id);

        let reply = self
            .request(command_sets::STACK_FRAME, stack_frame_commands::THIS_OBJECT, body)
            .await?;
        let mut data = reply.data();

        let this = read_tagged_object(&mut data)?;
        Ok((this.id != 0).then_some(this.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_signature_byte() {
        assert_eq!(VariableSlot::for_signature(2, "I").sig_byte, b'I');
        assert_eq!(VariableSlot::for_signature(0, "Ljava/lang/String;").sig_byte, b'L');
        assert_eq!(VariableSlot::for_signature(1, "[J").sig_byte, b'[');
    }
}
