// JDWP-backed debuggee
//
// Binds one VM connection to the session: keeps the VM's breakpoint requests
// in sync with the BreakpointManager, turns VM events into DebugEvents on the
// bus, and implements execution control and inspection.

mod inspect;
pub mod placement;

use async_trait::async_trait;
use jdwp_wire::commands::{event_kinds, step_depths};
use jdwp_wire::protocol::error_codes;
use jdwp_wire::types::{signature_to_binary_name, FieldId, ObjectId, RequestId};
use jdwp_wire::{EventKind, EventSet, JdwpConnection, SuspendPolicy};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::process::Child;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use self::inspect::{is_stale, TypeCache};
use self::placement::{BreakpointPlacer, LoadedClass};
use crate::breakpoints::{BreakpointManager, BreakpointSet, ExceptionFilters};
use crate::classpath::SourceMapping;
use crate::driver::DebuggeeDriver;
use crate::error::{AdapterError, AdapterResult};
use crate::event_bus::EventBus;
use crate::model::{
    CompletionItem, DebugEvent, DebuggeeException, FrameRef, ResumeOutcome, Scope, StackFrame, StepKind,
    ThreadId, ThreadInfo, ThreadReason, Variable, VariableRef,
};

/// How long to wait for a launched VM's process to report its exit code
const EXIT_CODE_TIMEOUT: Duration = Duration::from_secs(2);

/// How the VM came to be debugged; decides what disconnect does
pub enum Origin {
    Launched(Child),
    Attached,
}

enum VmProcess {
    Launched(tokio::sync::Mutex<Option<Child>>),
    Attached,
}

pub(crate) struct Inner {
    connection: Arc<JdwpConnection>,
    bus: EventBus<DebugEvent>,
    placer: tokio::sync::Mutex<BreakpointPlacer<JdwpConnection>>,
    manager: Arc<BreakpointManager>,
    mapping: Arc<dyn SourceMapping>,
    workspace_root: PathBuf,
    process: VmProcess,
    types: TypeCache,
    detail_message: Mutex<Option<FieldId>>,
    /// Outstanding single-step request per thread
    pending_steps: Mutex<HashMap<ThreadId, RequestId>>,
    exited: AtomicBool,
    disconnected: AtomicBool,
    rehook: Mutex<Option<JoinHandle<()>>>,
}

pub struct JdwpDebuggee {
    inner: Arc<Inner>,
}

impl JdwpDebuggee {
    /// Take over a freshly connected VM. Breakpoints known to `manager` are
    /// installed before this returns; the VM is left suspended until
    /// `resume_all`.
    pub async fn start(
        connection: JdwpConnection,
        manager: Arc<BreakpointManager>,
        mapping: Arc<dyn SourceMapping>,
        workspace_root: PathBuf,
        origin: Origin,
    ) -> AdapterResult<Self> {
        let connection = Arc::new(connection);
        let events = connection
            .take_events()
            .ok_or_else(|| AdapterError::ConnectionFailure("VM events are already being consumed".into()))?;

        let version = connection.get_version().await?;
        info!("Connected to {} ({})", version.vm_name, version.vm_version);

        connection.watch_thread_lifecycle().await?;
        let process = match origin {
            Origin::Launched(child) => VmProcess::Launched(tokio::sync::Mutex::new(Some(child))),
            Origin::Attached => {
                // Hold everything still until breakpoints are in place
                connection.suspend_all().await?;
                VmProcess::Attached
            }
        };

        let mut placer = BreakpointPlacer::new(connection.clone(), mapping.clone(), workspace_root.clone());
        let mut breakpoints = manager.breakpoints();
        let mut filters = manager.exception_filters();

        let initial = breakpoints.borrow_and_update().clone();
        let verified = placer.sync(&initial).await?;
        let active = filters.borrow_and_update().clone();
        placer.set_exception_filters(&active).await?;
        manager.report_synced(initial.generation, verified);

        let inner = Arc::new(Inner {
            connection,
            bus: EventBus::new(),
            placer: tokio::sync::Mutex::new(placer),
            manager,
            mapping,
            workspace_root,
            process,
            types: TypeCache::default(),
            detail_message: Mutex::new(None),
            pending_steps: Mutex::new(HashMap::new()),
            exited: AtomicBool::new(false),
            disconnected: AtomicBool::new(false),
            rehook: Mutex::new(None),
        });

        let rehook = tokio::spawn(rehook(inner.clone(), breakpoints, filters));
        if let Ok(mut slot) = inner.rehook.lock() {
            *slot = Some(rehook);
        }
        tokio::spawn(pump(inner.clone(), events));

        Ok(Self { inner })
    }
}

/// Re-install requests whenever the client changes breakpoints or filters
async fn rehook(
    inner: Arc<Inner>,
    mut breakpoints: watch::Receiver<BreakpointSet>,
    mut filters: watch::Receiver<ExceptionFilters>,
) {
    loop {
        tokio::select! {
            changed = breakpoints.changed() => {
                if changed.is_err() {
                    break;
                }
                let set = breakpoints.borrow_and_update().clone();
                let mut placer = inner.placer.lock().await;
                let result = placer.sync(&set).await;
                let verified = placer.verified();
                drop(placer);

                // Report even after a failure so nobody waits for this generation forever
                inner.manager.report_synced(set.generation, verified);
                if let Err(e) = result {
                    warn!("Could not update breakpoints: {}", e);
                    if e.is_disconnect() {
                        break;
                    }
                }
            }
            changed = filters.changed() => {
                if changed.is_err() {
                    break;
                }
                let active = filters.borrow_and_update().clone();
                if let Err(e) = inner.placer.lock().await.set_exception_filters(&active).await {
                    warn!("Could not update exception breakpoints: {}", e);
                    if e.is_disconnect() {
                        break;
                    }
                }
            }
        }
    }
    debug!("Breakpoint re-hook task stopped");
}

/// Deliver VM events to the bus in the order the VM sent them
async fn pump(inner: Arc<Inner>, mut events: mpsc::UnboundedReceiver<EventSet>) {
    'sets: while let Some(set) = events.recv().await {
        let only_class_prepares = set
            .events
            .iter()
            .all(|e| matches!(e.details, EventKind::ClassPrepare { .. }));

        for event in &set.events {
            match inner.handle_event(event).await {
                Ok(true) => break 'sets,
                Ok(false) => {}
                Err(e) if e.is_disconnect() => break 'sets,
                Err(e) => warn!("Failed to handle {:?}: {}", event.details, e),
            }
        }

        // Class prepares only suspend so breakpoints can go in first
        if only_class_prepares {
            inner.resume_after_class_prepare(&set).await;
        }
    }

    inner.finish().await;
}

impl Inner {
    /// Returns true when the VM is gone
    async fn handle_event(&self, event: &jdwp_wire::Event) -> AdapterResult<bool> {
        trace!("VM event: {:?}", event.details);

        match &event.details {
            EventKind::Breakpoint { thread, .. } => {
                self.bus.publish(&DebugEvent::BreakpointHit { thread: *thread });
            }
            EventKind::Step { thread, .. } => {
                self.clear_pending_step(*thread).await?;
                self.bus.publish(&DebugEvent::Step { thread: *thread });
            }
            EventKind::Exception {
                thread,
                exception,
                catch_location,
                ..
            } => {
                let exception = self.describe_exception(exception.id, catch_location.is_some()).await?;
                self.bus.publish(&DebugEvent::ExceptionThrown {
                    thread: *thread,
                    exception,
                });
            }
            EventKind::ThreadStart { thread } => {
                self.bus.publish(&DebugEvent::ThreadChanged {
                    thread: *thread,
                    reason: ThreadReason::Started,
                });
            }
            EventKind::ThreadDeath { thread } => {
                if let Ok(mut pending) = self.pending_steps.lock() {
                    pending.remove(thread);
                }
                self.bus.publish(&DebugEvent::ThreadChanged {
                    thread: *thread,
                    reason: ThreadReason::Exited,
                });
            }
            EventKind::ClassPrepare {
                ref_type_tag,
                ref_type,
                signature,
                ..
            } => {
                debug!("Prepared {}", signature_to_binary_name(signature));
                let class = LoadedClass {
                    tag: *ref_type_tag,
                    id: *ref_type,
                };
                let resolved = self
                    .placer
                    .lock()
                    .await
                    .on_class_prepared(event.request_id, class)
                    .await?;
                for (breakpoint_id, line) in resolved {
                    self.manager.mark_verified(breakpoint_id);
                    self.bus.publish(&DebugEvent::BreakpointResolved { breakpoint_id, line });
                }
            }
            EventKind::VMDeath => {
                info!("VM terminated");
                return Ok(true);
            }
            EventKind::VMStart { .. } | EventKind::MethodEntry { .. } | EventKind::MethodExit { .. } => {}
        }
        Ok(false)
    }

    async fn resume_after_class_prepare(&self, set: &EventSet) {
        let result = if set.suspend_policy == SuspendPolicy::All as u8 {
            self.connection.resume_all().await
        } else if set.suspend_policy == SuspendPolicy::EventThread as u8 {
            match set.events.first().and_then(|e| e.details.thread()) {
                Some(thread) => self.connection.resume_thread(thread).await,
                None => Ok(()),
            }
        } else {
            Ok(())
        };
        if let Err(e) = result {
            debug!("Could not resume after class prepare: {}", e);
        }
    }

    async fn describe_exception(&self, exception: ObjectId, caught: bool) -> AdapterResult<DebuggeeException> {
        let class = self.connection.get_object_reference_type(exception).await?;
        let binary_name = signature_to_binary_name(&self.signature(class).await?);
        let message = match self.exception_message(exception).await {
            Ok(message) => message,
            Err(e) if e.is_disconnect() => return Err(e),
            Err(e) => {
                debug!("No message for {}: {}", binary_name, e);
                None
            }
        };
        Ok(DebuggeeException::new(&binary_name, message, caught))
    }

    async fn clear_pending_step(&self, thread: ThreadId) -> AdapterResult<()> {
        let pending = self.pending_steps.lock().ok().and_then(|mut p| p.remove(&thread));
        if let Some(request) = pending {
            match self
                .connection
                .clear_event_request(event_kinds::SINGLE_STEP, request)
                .await
            {
                Ok(()) => {}
                Err(e) if e.is_disconnect() => return Err(e.into()),
                Err(e) => debug!("Step request {} already gone: {}", request, e),
            }
        }
        Ok(())
    }

    fn stop_rehook(&self) {
        if let Some(task) = self.rehook.lock().ok().and_then(|mut t| t.take()) {
            task.abort();
        }
    }

    /// Publish `Exited` once
    async fn finish(&self) {
        if self.exited.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stop_rehook();

        let code = match &self.process {
            VmProcess::Launched(child) => match child.lock().await.as_mut() {
                Some(child) => match tokio::time::timeout(EXIT_CODE_TIMEOUT, child.wait()).await {
                    Ok(Ok(status)) => status.code(),
                    _ => None,
                },
                None => None,
            },
            VmProcess::Attached => None,
        };

        info!("Debuggee exited (code {:?})", code);
        self.bus.publish(&DebugEvent::Exited { code });
    }
}

/// Report requests against frames or objects that went away as stale handles
fn stale_as_not_found(error: AdapterError) -> AdapterError {
    if is_stale(&error) {
        AdapterError::NotFound(error.to_string())
    } else {
        error
    }
}

#[async_trait]
impl DebuggeeDriver for JdwpDebuggee {
    async fn threads(&self) -> AdapterResult<Vec<ThreadInfo>> {
        let connection = &self.inner.connection;
        let mut threads = Vec::new();
        for id in connection.get_all_threads().await? {
            match connection.get_thread_name(id).await {
                Ok(name) => threads.push(ThreadInfo { id, name }),
                Err(e) if e.is_disconnect() => return Err(e.into()),
                // Died between the two commands
                Err(e) => debug!("Skipping thread {}: {}", id, e),
            }
        }
        Ok(threads)
    }

    async fn resume(&self, thread: ThreadId) -> AdapterResult<ResumeOutcome> {
        match self.inner.connection.resume_thread(thread).await {
            Ok(()) => Ok(ResumeOutcome::Resumed),
            Err(e)
                if matches!(
                    e.code(),
                    Some(error_codes::INVALID_THREAD)
                        | Some(error_codes::THREAD_NOT_ALIVE)
                        | Some(error_codes::INVALID_OBJECT)
                ) =>
            {
                debug!("Thread {} cannot be resumed on its own: {}", thread, e);
                Ok(ResumeOutcome::ThreadUnavailable)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn resume_all(&self) -> AdapterResult<()> {
        Ok(self.inner.connection.resume_all().await?)
    }

    async fn pause(&self, thread: ThreadId) -> AdapterResult<()> {
        Ok(self.inner.connection.suspend_thread(thread).await?)
    }

    async fn step(&self, thread: ThreadId, kind: StepKind) -> AdapterResult<()> {
        // The VM allows one step request per thread
        self.inner.clear_pending_step(thread).await?;

        let depth = match kind {
            StepKind::Over => step_depths::OVER,
            StepKind::Into => step_depths::INTO,
            StepKind::Out => step_depths::OUT,
        };
        let request = self
            .inner
            .connection
            .set_step(thread, depth, SuspendPolicy::EventThread)
            .await?;
        if let Ok(mut pending) = self.inner.pending_steps.lock() {
            pending.insert(thread, request);
        }

        Ok(self.inner.connection.resume_thread(thread).await?)
    }

    async fn stack_trace(&self, thread: ThreadId) -> AdapterResult<Vec<StackFrame>> {
        self.inner.stack_trace(thread).await.map_err(stale_as_not_found)
    }

    async fn scopes(&self, frame: &FrameRef) -> AdapterResult<Vec<Scope>> {
        Ok(self.inner.scopes(frame))
    }

    async fn variables(&self, reference: &VariableRef) -> AdapterResult<Vec<Variable>> {
        self.inner.variables(reference).await.map_err(stale_as_not_found)
    }

    async fn evaluate(&self, frame: &FrameRef, expression: &str) -> AdapterResult<Option<Variable>> {
        self.inner.evaluate(frame, expression).await.map_err(stale_as_not_found)
    }

    async fn completions(&self, frame: &FrameRef, prefix: &str) -> AdapterResult<Vec<CompletionItem>> {
        self.inner.completions(frame, prefix).await.map_err(stale_as_not_found)
    }

    fn events(&self) -> &EventBus<DebugEvent> {
        &self.inner.bus
    }

    async fn disconnect(&self) -> AdapterResult<()> {
        if self.inner.disconnected.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.inner.stop_rehook();

        match &self.inner.process {
            VmProcess::Launched(child) => {
                info!("Terminating the debuggee");
                if let Err(e) = self.inner.connection.exit(0).await {
                    debug!("VM exit: {}", e);
                }
                if let Some(child) = child.lock().await.as_mut() {
                    if let Err(e) = child.kill().await {
                        debug!("Debuggee process already gone: {}", e);
                    }
                }
            }
            VmProcess::Attached => {
                info!("Detaching from the debuggee");
                match self.inner.connection.dispose().await {
                    Ok(()) => {}
                    Err(e) if e.is_disconnect() => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(())
    }
}
