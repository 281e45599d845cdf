// EventRequest command implementations
//
// Set up event requests (breakpoints, steps, exceptions, class prepare, etc.)

use crate::commands::{command_sets, event_commands, event_kinds, step_sizes};
use crate::connection::JdwpConnection;
use crate::events::EventModifier;
use crate::protocol::JdwpResult;
use crate::reader::read_i32;
use crate::types::{Location, RequestId, ThreadId};
use bytes::BufMut;
use tracing::debug;

/// Suspend policy for events
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspendPolicy {
    None = 0,
    EventThread = 1,
    All = 2,
}

impl JdwpConnection {
    /// EventRequest.Set; returns the id the VM assigned to the request
    pub async fn set_event_request(
        &self,
        event_kind: u8,
        suspend_policy: SuspendPolicy,
        modifiers: &[EventModifier],
    ) -> JdwpResult<RequestId> {
        let mut body = Vec::new();
        body.put_u8(event_kind);
        body.put_u8(suspend_policy as u8);
        body.put_i32(modifiers.len() as i32);
        for modifier in modifiers {
            modifier.write_to(&mut body);
        }

        let reply = self
            .request(command_sets::EVENT_REQUEST, event_commands::SET, body)
            .await?;
        let mut data = reply.data();
        let request_id = read_i32(&mut data)?;

        debug!("Installed event request kind={} id={}", event_kind, request_id);
        Ok(request_id)
    }

    /// EventRequest.Clear
    pub async fn clear_event_request(&self, event_kind: u8, request_id: RequestId) -> JdwpResult<()> {
        let mut body = Vec::new();
        body.put_u8(event_kind);
        body.put_i32(request_id);

        self.request(command_sets::EVENT_REQUEST, event_commands::CLEAR, body)
            .await?;
        Ok(())
    }

    /// Breakpoint at an exact code location
    pub async fn set_breakpoint(
        &self,
        location: Location,
        suspend_policy: SuspendPolicy,
    ) -> JdwpResult<RequestId> {
        self.set_event_request(
            event_kinds::BREAKPOINT,
            suspend_policy,
            &[EventModifier::LocationOnly(location)],
        )
        .await
    }

    pub async fn clear_breakpoint(&self, request_id: RequestId) -> JdwpResult<()> {
        self.clear_event_request(event_kinds::BREAKPOINT, request_id)
            .await
    }

    /// Notify when a class whose name matches `class_pattern` is prepared.
    /// The pattern may start or end with `*`.
    pub async fn set_class_prepare(
        &self,
        class_pattern: &str,
        suspend_policy: SuspendPolicy,
    ) -> JdwpResult<RequestId> {
        self.set_event_request(
            event_kinds::CLASS_PREPARE,
            suspend_policy,
            &[EventModifier::ClassMatch(class_pattern.to_string())],
        )
        .await
    }

    /// Stop on thrown exceptions of any class
    pub async fn set_exception_request(
        &self,
        caught: bool,
        uncaught: bool,
        suspend_policy: SuspendPolicy,
    ) -> JdwpResult<RequestId> {
        self.set_event_request(
            event_kinds::EXCEPTION,
            suspend_policy,
            &[EventModifier::ExceptionOnly {
                ref_type: 0,
                caught,
                uncaught,
            }],
        )
        .await
    }

    /// One-shot line step on `thread`; `depth` is one of `step_depths`
    pub async fn set_step(
        &self,
        thread: ThreadId,
        depth: i32,
        suspend_policy: SuspendPolicy,
    ) -> JdwpResult<RequestId> {
        self.set_event_request(
            event_kinds::SINGLE_STEP,
            suspend_policy,
            &[
                EventModifier::Step {
                    thread,
                    size: step_sizes::LINE,
                    depth,
                },
                EventModifier::Count(1),
            ],
        )
        .await
    }

    /// Thread start and death notifications without suspending anything
    pub async fn watch_thread_lifecycle(&self) -> JdwpResult<(RequestId, RequestId)> {
        let start = self
            .set_event_request(event_kinds::THREAD_START, SuspendPolicy::None, &[])
            .await?;
        let death = self
            .set_event_request(event_kinds::THREAD_DEATH, SuspendPolicy::None, &[])
            .await?;
        Ok((start, death))
    }
}
