// ThreadReference command implementations
//
// Commands for working with threads (name, frames, suspend/resume)

use crate::commands::{command_sets, thread_commands};
use crate::connection::JdwpConnection;
use crate::protocol::JdwpResult;
use crate::reader::{read_count, read_location, read_string, read_u64};
use crate::types::{FrameId, Location, ThreadId};
use bytes::BufMut;
use serde::{Deserialize, Serialize};

/// Stack frame information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub frame_id: FrameId,
    pub location: Location,
}

fn thread_body(thread_id: ThreadId) -> Vec<u8> {
    let mut body = Vec::with_capacity(8);
    body.put_u64(thread_id);
    body
}

impl JdwpConnection {
    /// ThreadReference.Name
    pub async fn get_thread_name(&self, thread_id: ThreadId) -> JdwpResult<String> {
        let reply = self
            .request(
                command_sets::THREAD_REFERENCE,
                thread_commands::NAME,
                thread_body(thread_id),
            )
            .await?;
        let mut data = reply.data();
        read_string(&mut data)
    }

    /// Get stack frames for a suspended thread (ThreadReference.Frames).
    /// `length` of -1 means all remaining frames.
    pub async fn get_frames(
        &self,
        thread_id: ThreadId,
        start_frame: i32,
        length: i32,
    ) -> JdwpResult<Vec<Frame>> {
        let mut body = thread_body(thread_id);
        body.put_i32(start_frame);
        body.put_i32(length);

        let reply = self
            .request(command_sets::THREAD_REFERENCE, thread_commands::FRAMES, body)
            .await?;
        let mut data = reply.data();

        let count = read_count(&mut data)?;
        let mut frames = Vec::with_capacity(count);

        for _ in 0..count {
            frames.push(Frame {
                frame_id: read_u64(&mut data)?,
                location: read_location(&mut data)?,
            });
        }

        Ok(frames)
    }

    /// ThreadReference.Suspend
    pub async fn suspend_thread(&self, thread_id: ThreadId) -> JdwpResult<()> {
        self.request(
            command_sets::THREAD_REFERENCE,
            thread_commands::SUSPEND,
            thread_body(thread_id),
        )
        .await?;
        Ok(())
    }

    /// ThreadReference.Resume
    pub async fn resume_thread(&self, thread_id: ThreadId) -> JdwpResult<()> {
        self.request(
            command_sets::THREAD_REFERENCE,
            thread_commands::RESUME,
            thread_body(thread_id),
        )
        .await?;
        Ok(())
    }
}
