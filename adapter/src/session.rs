// Debug session
//
// Protocol-facing coordinator. Requests are handled on serialized lanes:
// launch and attach on their own lane, configurationDone on its own task,
// everything else in arrival order on the default lane. Debuggee events come
// in through the event bus and leave as notifications.

use serde::Serialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::{debug, info, warn};

use crate::breakpoints::{BreakpointManager, ExceptionFilters};
use crate::builder::BuildService;
use crate::classpath::{SourceClassNames, SourceMapping};
use crate::client::DapClient;
use crate::converter::{thread_from_client, thread_to_client, Converter, Numbering};
use crate::driver::DebuggeeDriver;
use crate::error::{AdapterError, AdapterResult};
use crate::event_bus::SubscriptionBag;
use crate::lanes::{ConfigurationRendezvous, Lane};
use crate::launcher::{self, LaunchConfig, Launched};
use crate::logging::{LogLevel, LoggingHandle};
use crate::model::{
    self, DebugEvent, DebuggeeException, ExceptionBreakpoint, Position, ResumeOutcome, StepKind, ThreadId,
    ThreadReason,
};
use crate::pool::ReferencePool;
use crate::protocol::{
    AttachArguments, BreakpointEvent, Capabilities, CompletionsArguments, EvaluateArguments, ExceptionBreakpointsFilter,
    ExceptionDetails, ExceptionInfoResponse, ExitedEvent, InitializeArguments, LaunchArguments, LoggingArguments,
    Request, ScopesArguments, SetBreakpointsArguments, SetExceptionBreakpointsArguments, StackTraceArguments,
    StoppedEvent, ThreadArguments, ThreadEvent, VariablesArguments,
};

/// Requests that exist in the protocol but are deliberately unsupported
const NOT_IMPLEMENTED: &[&str] = &[
    "restart",
    "reverseContinue",
    "stepBack",
    "restartFrame",
    "goto",
    "setFunctionBreakpoints",
    "setVariable",
    "source",
    "modules",
    "loadedSources",
    "stepInTargets",
    "gotoTargets",
];

/// A debuggee output stream forwarded as `output` notifications
pub type OutputStream = Box<dyn AsyncRead + Send + Unpin>;

/// How long setBreakpoints waits for a running debuggee to install the new set
const BREAKPOINT_SYNC_TIMEOUT: Duration = Duration::from_secs(5);

fn body<T: Serialize>(value: T) -> AdapterResult<Option<Value>> {
    Ok(Some(serde_json::to_value(value).map_err(std::io::Error::from)?))
}

pub struct DebugSession {
    client: DapClient,
    converter: Converter,
    breakpoints: Arc<BreakpointManager>,
    rendezvous: ConfigurationRendezvous,
    build: Arc<dyn BuildService>,
    logging: Option<LoggingHandle>,
    debuggee: RwLock<Option<Arc<dyn DebuggeeDriver>>>,
    subscriptions: Mutex<SubscriptionBag>,
    /// Exceptions that stopped a thread, owned by that thread
    exceptions: Mutex<ReferencePool<ThreadId, DebuggeeException>>,
    initialized: AtomicBool,
    default_lane: Lane,
    launcher_lane: Lane,
}

impl DebugSession {
    /// Must be called inside a tokio runtime; spawns the request lanes
    pub fn new(client: DapClient, build: Arc<dyn BuildService>, logging: Option<LoggingHandle>) -> Arc<Self> {
        if let Some(logging) = &logging {
            logging.connect_console(client.clone());
        }

        Arc::new(Self {
            client,
            converter: Converter::new(),
            breakpoints: Arc::new(BreakpointManager::new()),
            rendezvous: ConfigurationRendezvous::new(),
            build,
            logging,
            debuggee: RwLock::new(None),
            subscriptions: Mutex::new(SubscriptionBag::new()),
            exceptions: Mutex::new(ReferencePool::new("exception")),
            initialized: AtomicBool::new(false),
            default_lane: Lane::spawn("default"),
            launcher_lane: Lane::spawn("launcher"),
        })
    }

    /// Queue a request on its lane; the response is sent when it completes
    pub fn dispatch(self: &Arc<Self>, request: Request) {
        enum Route {
            Launcher,
            Own,
            Default,
        }
        let route = match request.command.as_str() {
            "launch" | "attach" => Route::Launcher,
            "configurationDone" => Route::Own,
            _ => Route::Default,
        };

        let session = self.clone();
        let job = async move {
            let result = session.handle(&request).await;
            let succeeded = result.is_ok();
            session.client.respond(&request, result);
            if succeeded {
                session.after_response(&request);
            }
        };

        match route {
            Route::Launcher => self.launcher_lane.execute(job),
            Route::Own => {
                tokio::spawn(job);
            }
            Route::Default => self.default_lane.execute(job),
        }
    }

    /// Handle one request and produce its response body
    pub async fn handle(self: &Arc<Self>, request: &Request) -> AdapterResult<Option<Value>> {
        debug!("Handling {} (seq {})", request.command, request.seq);

        match request.command.as_str() {
            "initialize" => self.handle_initialize(request.arguments()?),
            "configurationDone" => {
                self.rendezvous.arrive_and_wait().await;
                Ok(None)
            }
            "launch" => self.handle_launch(request.arguments()?).await,
            "attach" => self.handle_attach(request.arguments()?).await,
            "setBreakpoints" => self.handle_set_breakpoints(request.arguments()?).await,
            "setExceptionBreakpoints" => self.handle_set_exception_breakpoints(request.arguments()?),
            "threads" => self.handle_threads().await,
            "continue" => self.handle_continue(request.arguments()?).await,
            "next" => self.handle_step(request.arguments()?, StepKind::Over).await,
            "stepIn" => self.handle_step(request.arguments()?, StepKind::Into).await,
            "stepOut" => self.handle_step(request.arguments()?, StepKind::Out).await,
            "pause" => self.handle_pause(request.arguments()?).await,
            "stackTrace" => self.handle_stack_trace(request.arguments()?).await,
            "scopes" => self.handle_scopes(request.arguments()?).await,
            "variables" => self.handle_variables(request.arguments()?).await,
            "evaluate" => self.handle_evaluate(request.arguments()?).await,
            "completions" => self.handle_completions(request.arguments()?).await,
            "exceptionInfo" => self.handle_exception_info(request.arguments()?),
            "disconnect" => self.handle_disconnect().await,
            command if NOT_IMPLEMENTED.contains(&command) => Err(AdapterError::NotImplemented(command.to_string())),
            command => Err(AdapterError::UnrecognizedRequest(command.to_string())),
        }
    }

    /// Notifications that must follow a successful response
    fn after_response(&self, request: &Request) {
        match request.command.as_str() {
            "initialize" => {
                if !self.initialized.swap(true, Ordering::SeqCst) {
                    self.client.event("initialized", ());
                }
            }
            "pause" => {
                if let Ok(args) = request.arguments::<ThreadArguments>() {
                    self.stopped("pause", thread_from_client(args.thread_id));
                }
            }
            _ => {}
        }
    }

    fn driver(&self) -> AdapterResult<Arc<dyn DebuggeeDriver>> {
        self.debuggee
            .read()
            .ok()
            .and_then(|d| d.clone())
            .ok_or(AdapterError::NoDebuggee)
    }

    fn has_debuggee(&self) -> bool {
        self.debuggee.read().map(|d| d.is_some()).unwrap_or(false)
    }

    /// Make `driver` the session's debuggee and route its events to the client
    pub fn install_debuggee(self: &Arc<Self>, driver: Arc<dyn DebuggeeDriver>) {
        let session: Weak<Self> = Arc::downgrade(self);
        let subscription = driver.events().subscribe(move |event: &DebugEvent| {
            if let Some(session) = session.upgrade() {
                session.on_debug_event(event);
            }
        });

        if let Ok(mut subscriptions) = self.subscriptions.lock() {
            subscriptions.unsubscribe_all();
            subscriptions.add(subscription);
        }
        if let Ok(mut slot) = self.debuggee.write() {
            *slot = Some(driver);
        }
    }

    fn on_debug_event(&self, event: &DebugEvent) {
        match event {
            DebugEvent::BreakpointHit { thread } => self.stopped("breakpoint", *thread),
            DebugEvent::Step { thread } => self.stopped("step", *thread),
            DebugEvent::ExceptionThrown { thread, exception } => {
                if let Ok(mut exceptions) = self.exceptions.lock() {
                    exceptions.store(*thread, exception.clone());
                }
                self.stopped("exception", *thread);
            }
            DebugEvent::ThreadChanged { thread, reason } => {
                let reason = match reason {
                    ThreadReason::Started => "started",
                    ThreadReason::Exited => {
                        self.release_thread(*thread);
                        "exited"
                    }
                };
                self.client.event(
                    "thread",
                    ThreadEvent {
                        reason: reason.to_string(),
                        thread_id: thread_to_client(*thread),
                    },
                );
            }
            DebugEvent::BreakpointResolved { breakpoint_id, .. } => {
                let current = self.breakpoints.current();
                let resolved = current.all().find(|bp| bp.id == *breakpoint_id).cloned();
                if let Some(bp) = resolved {
                    self.client.event(
                        "breakpoint",
                        BreakpointEvent {
                            reason: "changed".to_string(),
                            breakpoint: self.converter.breakpoint_to_client(&bp, true),
                        },
                    );
                }
            }
            DebugEvent::Exited { code } => {
                info!("Debuggee exited");
                // Nothing is left to install breakpoints into or to resume
                if let Ok(mut slot) = self.debuggee.write() {
                    slot.take();
                }
                self.breakpoints.clear_verified();
                self.release_all();
                self.rendezvous.release();
                self.client.event(
                    "exited",
                    ExitedEvent {
                        exit_code: code.unwrap_or(0) as i64,
                    },
                );
                self.client.event("terminated", ());
            }
        }
    }

    fn stopped(&self, reason: &str, thread: ThreadId) {
        self.client.event(
            "stopped",
            StoppedEvent {
                reason: reason.to_string(),
                thread_id: thread_to_client(thread),
                all_threads_stopped: false,
            },
        );
    }

    fn release_thread(&self, thread: ThreadId) {
        self.converter.release_thread(thread);
        if let Ok(mut exceptions) = self.exceptions.lock() {
            exceptions.remove_all_owned_by(&thread);
        }
    }

    fn release_all(&self) {
        self.converter.release_all();
        if let Ok(mut exceptions) = self.exceptions.lock() {
            exceptions.clear();
        }
    }

    fn handle_initialize(&self, args: InitializeArguments) -> AdapterResult<Option<Value>> {
        info!(
            "Initializing for {}",
            args.client_id.as_deref().unwrap_or("an unnamed client")
        );
        self.converter.set_numbering(Numbering {
            lines_start_at1: args.lines_start_at1,
            columns_start_at1: args.columns_start_at1,
        });

        body(Capabilities {
            supports_configuration_done_request: true,
            supports_completions_request: true,
            supports_exception_info_request: true,
            supports_evaluate_for_hovers: true,
            exception_breakpoint_filters: ExceptionBreakpoint::ALL
                .iter()
                .map(|e| ExceptionBreakpointsFilter {
                    filter: e.filter_id().to_string(),
                    label: e.label().to_string(),
                    default: false,
                })
                .collect(),
        })
    }

    fn apply_logging(&self, args: &LoggingArguments) -> AdapterResult<()> {
        let level = args.log_level.as_deref().map(str::parse::<LogLevel>).transpose()?;
        let json_file = if args.enable_json_logging {
            Some(args.json_log_file.as_deref().ok_or_else(|| {
                AdapterError::ProtocolArgument("jsonLogFile is required when enableJsonLogging is set".into())
            })?)
        } else {
            None
        };

        if let Some(logging) = &self.logging {
            if let Some(level) = level {
                logging.set_level(level)?;
            }
            if let Some(path) = json_file {
                logging.enable_json_file(Path::new(path))?;
            }
        }
        Ok(())
    }

    async fn handle_launch(self: &Arc<Self>, args: LaunchArguments) -> AdapterResult<Option<Value>> {
        self.apply_logging(&args.logging)?;
        let workspace_root = PathBuf::from(&args.workspace_root);

        self.build
            .build(&workspace_root, std::slice::from_ref(&args.bazel_target), &args.build_flags)
            .await?;
        let classpath = self
            .build
            .classpath(&workspace_root, &args.bazel_target, &args.build_flags)
            .await?;
        let mapping = scan_sources(workspace_root.clone()).await?;

        let config = LaunchConfig {
            workspace_root,
            classpath,
            main_class: args.main_class,
            vm_arguments: args.vm_arguments,
            additional_args: args.additional_args,
        };
        let Launched {
            debuggee,
            stdout,
            stderr,
        } = launcher::launch(&config, self.breakpoints.clone(), mapping).await?;

        let mut outputs: Vec<(&'static str, OutputStream)> = Vec::new();
        if let Some(stdout) = stdout {
            outputs.push(("stdout", Box::new(stdout)));
        }
        if let Some(stderr) = stderr {
            outputs.push(("stderr", Box::new(stderr)));
        }
        self.start_debuggee(Arc::new(debuggee), outputs, false);

        Ok(None)
    }

    async fn handle_attach(self: &Arc<Self>, args: AttachArguments) -> AdapterResult<Option<Value>> {
        self.apply_logging(&args.logging)?;
        let workspace_root = PathBuf::from(&args.workspace_root);
        let mapping = scan_sources(workspace_root.clone()).await?;

        let debuggee = launcher::attach(
            &args.host_name,
            args.port,
            Duration::from_millis(args.timeout),
            &workspace_root,
            self.breakpoints.clone(),
            mapping,
        )
        .await?;
        self.start_debuggee(Arc::new(debuggee), Vec::new(), true);

        Ok(None)
    }

    /// Install `driver` and queue the job that lets it run. The job waits on
    /// the launcher lane until configurationDone is pending; only then does
    /// output forwarding start and the VM resume. An attached VM was already
    /// running, so its existing threads are announced first.
    pub fn start_debuggee(
        self: &Arc<Self>,
        driver: Arc<dyn DebuggeeDriver>,
        outputs: Vec<(&'static str, OutputStream)>,
        announce_threads: bool,
    ) {
        self.install_debuggee(driver.clone());

        let session = self.clone();
        self.launcher_lane.execute(async move {
            session.rendezvous.release_when_waiting().await;

            if announce_threads {
                match driver.threads().await {
                    Ok(threads) => {
                        for thread in threads {
                            session.client.event(
                                "thread",
                                ThreadEvent {
                                    reason: "started".to_string(),
                                    thread_id: thread_to_client(thread.id),
                                },
                            );
                        }
                    }
                    Err(e) => warn!("Could not list the attached VM's threads: {}", e),
                }
            }
            for (category, stream) in outputs {
                Lane::spawn(category).execute(forward_output(stream, session.client.clone(), category));
            }
            session.run_debuggee().await;
        });
    }

    /// Let the suspended VM run once the client has finished configuring
    async fn run_debuggee(&self) {
        let driver = match self.driver() {
            Ok(driver) => driver,
            Err(_) => return,
        };
        info!("Resuming the debuggee");
        if let Err(e) = driver.resume_all().await {
            warn!("Could not resume the debuggee: {}", e);
        }
    }

    async fn handle_set_breakpoints(&self, args: SetBreakpointsArguments) -> AdapterResult<Option<Value>> {
        let source = self.converter.source_from_client(&args.source)?;

        let requested = args
            .breakpoints
            .iter()
            .map(|bp| {
                if bp.condition.is_some() {
                    debug!("Ignoring the condition of the breakpoint at line {}", bp.line);
                }
                Ok(model::SourceBreakpoint {
                    position: Position {
                        source: source.clone(),
                        line: self.converter.line_from_client(bp.line)?,
                        column: bp.column.and_then(|c| self.converter.column_from_client(c)),
                    },
                    condition: bp.condition.clone(),
                })
            })
            .collect::<AdapterResult<Vec<_>>>()?;

        let (generation, stored) = self.breakpoints.set_source_breakpoints(&source, requested);
        if self.has_debuggee() && !self.breakpoints.wait_synced(generation, BREAKPOINT_SYNC_TIMEOUT).await {
            warn!("Breakpoints for {} were not installed in time", source.path.display());
        }

        let breakpoints: Vec<_> = stored
            .iter()
            .map(|bp| self.converter.breakpoint_to_client(bp, self.breakpoints.is_verified(bp.id)))
            .collect();
        body(json!({ "breakpoints": breakpoints }))
    }

    fn handle_set_exception_breakpoints(&self, args: SetExceptionBreakpointsArguments) -> AdapterResult<Option<Value>> {
        let mut filters = ExceptionFilters::new();
        for id in &args.filters {
            match ExceptionBreakpoint::from_filter_id(id) {
                Some(filter) => {
                    filters.insert(filter);
                }
                None => warn!("Unknown exception filter {}", id),
            }
        }
        self.breakpoints.set_exception_filters(filters);
        Ok(None)
    }

    async fn handle_threads(&self) -> AdapterResult<Option<Value>> {
        let threads = match self.driver() {
            Ok(driver) => driver.threads().await?,
            Err(_) => Vec::new(),
        };
        let threads: Vec<_> = threads.iter().map(|t| self.converter.thread_to_client(t)).collect();
        body(json!({ "threads": threads }))
    }

    async fn handle_continue(&self, args: ThreadArguments) -> AdapterResult<Option<Value>> {
        let driver = self.driver()?;
        let thread = thread_from_client(args.thread_id);

        self.release_thread(thread);
        let all_threads_continued = match driver.resume(thread).await? {
            ResumeOutcome::Resumed => false,
            ResumeOutcome::ThreadUnavailable => {
                debug!("Thread {} cannot be resumed alone, resuming all threads", thread);
                self.release_all();
                driver.resume_all().await?;
                true
            }
        };

        body(json!({ "allThreadsContinued": all_threads_continued }))
    }

    async fn handle_step(&self, args: ThreadArguments, kind: StepKind) -> AdapterResult<Option<Value>> {
        let driver = self.driver()?;
        let thread = thread_from_client(args.thread_id);

        self.release_thread(thread);
        driver.step(thread, kind).await?;
        Ok(None)
    }

    async fn handle_pause(&self, args: ThreadArguments) -> AdapterResult<Option<Value>> {
        self.driver()?.pause(thread_from_client(args.thread_id)).await?;
        Ok(None)
    }

    async fn handle_stack_trace(&self, args: StackTraceArguments) -> AdapterResult<Option<Value>> {
        let frames = self.driver()?.stack_trace(thread_from_client(args.thread_id)).await?;
        let total_frames = frames.len();

        let start = args.start_frame.unwrap_or(0).max(0) as usize;
        let levels = match args.levels {
            Some(levels) if levels > 0 => levels as usize,
            _ => total_frames,
        };

        let stack_frames = frames
            .into_iter()
            .skip(start)
            .take(levels)
            .map(|frame| self.converter.frame_to_client(frame))
            .collect::<AdapterResult<Vec<_>>>()?;

        body(json!({ "stackFrames": stack_frames, "totalFrames": total_frames }))
    }

    async fn handle_scopes(&self, args: ScopesArguments) -> AdapterResult<Option<Value>> {
        let frame = self.converter.frame(args.frame_id)?;
        let scopes = self
            .driver()?
            .scopes(&frame)
            .await?
            .into_iter()
            .map(|scope| self.converter.scope_to_client(scope))
            .collect::<AdapterResult<Vec<_>>>()?;

        body(json!({ "scopes": scopes }))
    }

    async fn handle_variables(&self, args: VariablesArguments) -> AdapterResult<Option<Value>> {
        let reference = self.converter.variables(args.variables_reference)?;
        let variables = self
            .driver()?
            .variables(&reference)
            .await?
            .into_iter()
            .map(|variable| self.converter.variable_to_client(variable))
            .collect::<AdapterResult<Vec<_>>>()?;

        body(json!({ "variables": variables }))
    }

    async fn handle_evaluate(&self, args: EvaluateArguments) -> AdapterResult<Option<Value>> {
        let frame_id = args
            .frame_id
            .ok_or_else(|| AdapterError::ProtocolArgument("evaluate needs a frameId".into()))?;
        let frame = self.converter.frame(frame_id)?;

        let variable = self
            .driver()?
            .evaluate(&frame, args.expression.trim())
            .await?
            .ok_or_else(|| AdapterError::NotFound(format!("{} is not in scope", args.expression.trim())))?;
        let variable = self.converter.variable_to_client(variable)?;

        body(json!({
            "result": variable.value,
            "type": variable.type_name,
            "variablesReference": variable.variables_reference,
        }))
    }

    async fn handle_completions(&self, args: CompletionsArguments) -> AdapterResult<Option<Value>> {
        let Some(frame_id) = args.frame_id else {
            return body(json!({ "targets": [] }));
        };
        let frame = self.converter.frame(frame_id)?;

        // Columns point between characters; everything before the cursor is the prefix
        let cursor = self
            .converter
            .column_from_client(args.column)
            .map(|c| c as usize - 1)
            .unwrap_or(0);
        let prefix: String = args.text.chars().take(cursor).collect();

        let targets: Vec<_> = self
            .driver()?
            .completions(&frame, &prefix)
            .await?
            .into_iter()
            .map(|item| self.converter.completion_to_client(item))
            .collect();

        body(json!({ "targets": targets }))
    }

    fn handle_exception_info(&self, args: ThreadArguments) -> AdapterResult<Option<Value>> {
        let thread = thread_from_client(args.thread_id);
        let latest = self.exceptions.lock().ok().and_then(|pool| {
            pool.handles_owned_by(&thread)
                .last()
                .and_then(|handle| pool.get(*handle).ok().cloned())
        });

        let info = match latest {
            Some(exception) => ExceptionInfoResponse {
                exception_id: exception.full_type_name.clone(),
                description: exception
                    .message
                    .clone()
                    .unwrap_or_else(|| exception.description.clone()),
                break_mode: "always".to_string(),
                details: Some(ExceptionDetails {
                    message: exception.message,
                    type_name: Some(exception.type_name),
                    full_type_name: Some(exception.full_type_name),
                }),
            },
            None => ExceptionInfoResponse {
                exception_id: "unknown".to_string(),
                description: "Unknown exception".to_string(),
                break_mode: "always".to_string(),
                details: None,
            },
        };
        body(info)
    }

    async fn handle_disconnect(&self) -> AdapterResult<Option<Value>> {
        // A configurationDone that never got released must not outlive the session
        self.rendezvous.release();

        if let Ok(mut subscriptions) = self.subscriptions.lock() {
            subscriptions.unsubscribe_all();
        }
        let driver = self.debuggee.write().ok().and_then(|mut d| d.take());
        self.release_all();

        if let Some(driver) = driver {
            match driver.disconnect().await {
                Ok(()) => {}
                Err(e) if e.is_disconnect() => debug!("Debuggee already gone"),
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }
}

async fn scan_sources(workspace_root: PathBuf) -> AdapterResult<Arc<dyn SourceMapping>> {
    let names = tokio::task::spawn_blocking(move || SourceClassNames::scan(&workspace_root))
        .await
        .map_err(std::io::Error::other)?;
    Ok(Arc::new(names))
}

/// Forward each line of a debuggee output stream as an output notification
pub async fn forward_output<R>(reader: R, client: DapClient, category: &'static str)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => client.output(category, format!("{}\n", line)),
            Ok(None) => break,
            Err(e) => {
                warn!("Error reading debuggee {}: {}", category, e);
                break;
            }
        }
    }
    debug!("Debuggee {} closed", category);
}
