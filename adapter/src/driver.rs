// Debuggee driver interface
//
// What the session needs from a running VM. `JdwpDebuggee` is the only real
// implementation; tests plug in their own.

use async_trait::async_trait;

use crate::error::AdapterResult;
use crate::event_bus::EventBus;
use crate::model::{
    CompletionItem, DebugEvent, FrameRef, ResumeOutcome, Scope, StackFrame, StepKind, ThreadId,
    ThreadInfo, Variable, VariableRef,
};

#[async_trait]
pub trait DebuggeeDriver: Send + Sync {
    /// Live threads of the VM
    async fn threads(&self) -> AdapterResult<Vec<ThreadInfo>>;

    /// Resume one thread. `ThreadUnavailable` means nothing was resumed and
    /// the caller should resume the whole VM instead.
    async fn resume(&self, thread: ThreadId) -> AdapterResult<ResumeOutcome>;

    async fn resume_all(&self) -> AdapterResult<()>;

    async fn pause(&self, thread: ThreadId) -> AdapterResult<()>;

    /// Start a single step; completion arrives later as `DebugEvent::Step`
    async fn step(&self, thread: ThreadId, kind: StepKind) -> AdapterResult<()>;

    async fn stack_trace(&self, thread: ThreadId) -> AdapterResult<Vec<StackFrame>>;

    async fn scopes(&self, frame: &FrameRef) -> AdapterResult<Vec<Scope>>;

    async fn variables(&self, reference: &VariableRef) -> AdapterResult<Vec<Variable>>;

    /// Resolve an expression in the frame; `None` when nothing matches
    async fn evaluate(&self, frame: &FrameRef, expression: &str) -> AdapterResult<Option<Variable>>;

    async fn completions(&self, frame: &FrameRef, prefix: &str) -> AdapterResult<Vec<CompletionItem>>;

    fn events(&self) -> &EventBus<DebugEvent>;

    /// Terminate a launched VM or detach from an attached one. Safe to call twice.
    async fn disconnect(&self) -> AdapterResult<()>;
}
