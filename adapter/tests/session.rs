// Session behaviour against a scripted debuggee

use async_trait::async_trait;
use jdwp_wire::types::Location;
use kotlin_debug_adapter::builder::BuildService;
use kotlin_debug_adapter::client::DapClient;
use kotlin_debug_adapter::driver::DebuggeeDriver;
use kotlin_debug_adapter::event_bus::EventBus;
use kotlin_debug_adapter::model::{
    CompletionItem, CompletionKind, DebugEvent, DebuggeeException, FrameRef, Position, ResumeOutcome, Scope,
    Source, StackFrame, StepKind, ThreadId, ThreadInfo, ThreadReason, Variable, VariableRef,
};
use kotlin_debug_adapter::protocol::{Outgoing, Request};
use kotlin_debug_adapter::session::OutputStream;
use kotlin_debug_adapter::{AdapterError, AdapterResult, DebugSession};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Notify};

struct FakeDriver {
    bus: EventBus<DebugEvent>,
    calls: Mutex<Vec<String>>,
    resume_outcome: ResumeOutcome,
}

impl FakeDriver {
    fn new(resume_outcome: ResumeOutcome) -> Arc<Self> {
        Arc::new(Self {
            bus: EventBus::new(),
            calls: Mutex::new(Vec::new()),
            resume_outcome,
        })
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

fn frame_ref(thread: ThreadId) -> FrameRef {
    FrameRef {
        thread,
        frame_id: 100 + thread,
        location: Location {
            type_tag: 1,
            class_id: 7,
            method_id: 8,
            index: 0,
        },
    }
}

#[async_trait]
impl DebuggeeDriver for FakeDriver {
    async fn threads(&self) -> AdapterResult<Vec<ThreadInfo>> {
        Ok(vec![
            ThreadInfo {
                id: 1,
                name: "main".into(),
            },
            ThreadInfo {
                id: 2,
                name: "worker".into(),
            },
        ])
    }

    async fn resume(&self, thread: ThreadId) -> AdapterResult<ResumeOutcome> {
        self.record(format!("resume {}", thread));
        Ok(self.resume_outcome)
    }

    async fn resume_all(&self) -> AdapterResult<()> {
        self.record("resume_all");
        Ok(())
    }

    async fn pause(&self, thread: ThreadId) -> AdapterResult<()> {
        self.record(format!("pause {}", thread));
        Ok(())
    }

    async fn step(&self, thread: ThreadId, kind: StepKind) -> AdapterResult<()> {
        self.record(format!("step {} {:?}", thread, kind));
        Ok(())
    }

    async fn stack_trace(&self, thread: ThreadId) -> AdapterResult<Vec<StackFrame>> {
        Ok(vec![
            StackFrame {
                name: "MainKt.main".into(),
                position: Some(Position {
                    source: Source::from_path("/w/app/Main.kt"),
                    line: 3,
                    column: None,
                }),
                frame: frame_ref(thread),
            },
            StackFrame {
                name: "Thread.run".into(),
                position: None,
                frame: FrameRef {
                    frame_id: 200 + thread,
                    ..frame_ref(thread)
                },
            },
        ])
    }

    async fn scopes(&self, frame: &FrameRef) -> AdapterResult<Vec<Scope>> {
        Ok(vec![Scope {
            name: "Locals".into(),
            variables: VariableRef::Locals(frame.clone()),
        }])
    }

    async fn variables(&self, reference: &VariableRef) -> AdapterResult<Vec<Variable>> {
        Ok(vec![
            Variable {
                name: "count".into(),
                value: "1".into(),
                type_name: Some("int".into()),
                children: None,
            },
            Variable {
                name: "this".into(),
                value: "MainKt (id=9)".into(),
                type_name: Some("com.example.MainKt".into()),
                children: Some(VariableRef::Object {
                    thread: reference.thread(),
                    object: 9,
                }),
            },
        ])
    }

    async fn evaluate(&self, _frame: &FrameRef, expression: &str) -> AdapterResult<Option<Variable>> {
        Ok((expression == "count").then(|| Variable {
            name: "count".into(),
            value: "1".into(),
            type_name: Some("int".into()),
            children: None,
        }))
    }

    async fn completions(&self, _frame: &FrameRef, prefix: &str) -> AdapterResult<Vec<CompletionItem>> {
        Ok(["count", "counter", "name"]
            .iter()
            .filter(|label| label.starts_with(prefix))
            .map(|label| CompletionItem {
                label: label.to_string(),
                kind: CompletionKind::Variable,
            })
            .collect())
    }

    fn events(&self) -> &EventBus<DebugEvent> {
        &self.bus
    }

    async fn disconnect(&self) -> AdapterResult<()> {
        self.record("disconnect");
        Ok(())
    }
}

struct FakeBuild {
    succeed: bool,
    builds: Mutex<Vec<Vec<String>>>,
    /// When set, builds hang until notified
    gate: Option<Arc<Notify>>,
}

#[async_trait]
impl BuildService for FakeBuild {
    async fn build(&self, _root: &Path, targets: &[String], _flags: &[String]) -> AdapterResult<()> {
        self.builds.lock().unwrap().push(targets.to_vec());
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.succeed {
            Ok(())
        } else {
            Err(AdapterError::BuildFailure("compilation failed".into()))
        }
    }

    async fn classpath(&self, _root: &Path, _target: &str, _flags: &[String]) -> AdapterResult<Vec<PathBuf>> {
        Ok(Vec::new())
    }
}

fn fake_build(succeed: bool) -> Arc<FakeBuild> {
    Arc::new(FakeBuild {
        succeed,
        builds: Mutex::new(Vec::new()),
        gate: None,
    })
}

fn request(command: &str, arguments: Value) -> Request {
    Request {
        seq: 1,
        command: command.to_string(),
        arguments: Some(arguments),
    }
}

fn session() -> (Arc<DebugSession>, mpsc::UnboundedReceiver<Outgoing>) {
    let (client, rx) = DapClient::channel();
    (DebugSession::new(client, fake_build(true), None), rx)
}

fn with_driver(outcome: ResumeOutcome) -> (Arc<DebugSession>, mpsc::UnboundedReceiver<Outgoing>, Arc<FakeDriver>) {
    let (session, rx) = session();
    let driver = FakeDriver::new(outcome);
    session.install_debuggee(driver.clone());
    (session, rx, driver)
}

/// Events queued so far, as (name, body)
fn drain_events(rx: &mut mpsc::UnboundedReceiver<Outgoing>) -> Vec<(String, Value)> {
    let mut events = Vec::new();
    while let Ok(message) = rx.try_recv() {
        if let Outgoing::Event(event) = message {
            events.push((event.event, event.body.unwrap_or(Value::Null)));
        }
    }
    events
}

async fn top_frame_id(session: &Arc<DebugSession>, thread: i64) -> i64 {
    let body = session
        .handle(&request("stackTrace", json!({ "threadId": thread })))
        .await
        .unwrap()
        .unwrap();
    body["stackFrames"][0]["id"].as_i64().unwrap()
}

#[tokio::test]
async fn test_continue_invalidates_handles_of_that_thread() {
    let (session, _rx, driver) = with_driver(ResumeOutcome::Resumed);

    let frame_1 = top_frame_id(&session, 1).await;
    let frame_2 = top_frame_id(&session, 2).await;
    let scopes = session
        .handle(&request("scopes", json!({ "frameId": frame_1 })))
        .await
        .unwrap()
        .unwrap();
    let locals = scopes["scopes"][0]["variablesReference"].as_i64().unwrap();
    assert!(locals > 0);

    let body = session
        .handle(&request("continue", json!({ "threadId": 1 })))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(body["allThreadsContinued"], false);
    assert_eq!(driver.calls(), vec!["resume 1"]);

    let stale_frame = session
        .handle(&request("scopes", json!({ "frameId": frame_1 })))
        .await;
    assert!(matches!(stale_frame, Err(AdapterError::NotFound(_))));
    let stale_variables = session
        .handle(&request("variables", json!({ "variablesReference": locals })))
        .await;
    assert!(matches!(stale_variables, Err(AdapterError::NotFound(_))));

    // Thread 2 is still stopped
    assert!(session
        .handle(&request("scopes", json!({ "frameId": frame_2 })))
        .await
        .is_ok());
}

#[tokio::test]
async fn test_continue_falls_back_to_resuming_everything() {
    let (session, _rx, driver) = with_driver(ResumeOutcome::ThreadUnavailable);
    let frame_2 = top_frame_id(&session, 2).await;

    let body = session
        .handle(&request("continue", json!({ "threadId": 1 })))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(body["allThreadsContinued"], true);
    assert_eq!(driver.calls(), vec!["resume 1", "resume_all"]);
    let stale = session
        .handle(&request("scopes", json!({ "frameId": frame_2 })))
        .await;
    assert!(matches!(stale, Err(AdapterError::NotFound(_))));
}

#[tokio::test]
async fn test_steps_release_handles_and_emit_nothing() {
    let (session, mut rx, driver) = with_driver(ResumeOutcome::Resumed);
    let frame = top_frame_id(&session, 1).await;

    for command in ["next", "stepIn", "stepOut"] {
        session
            .handle(&request(command, json!({ "threadId": 1 })))
            .await
            .unwrap();
    }

    assert_eq!(driver.calls(), vec!["step 1 Over", "step 1 Into", "step 1 Out"]);
    assert!(drain_events(&mut rx).is_empty());
    assert!(session
        .handle(&request("scopes", json!({ "frameId": frame })))
        .await
        .is_err());
}

#[tokio::test]
async fn test_variables_evaluate_and_completions() {
    let (session, _rx, _driver) = with_driver(ResumeOutcome::Resumed);
    let frame = top_frame_id(&session, 1).await;

    let scopes = session
        .handle(&request("scopes", json!({ "frameId": frame })))
        .await
        .unwrap()
        .unwrap();
    let locals = scopes["scopes"][0]["variablesReference"].as_i64().unwrap();

    let variables = session
        .handle(&request("variables", json!({ "variablesReference": locals })))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(variables["variables"][0]["name"], "count");
    assert_eq!(variables["variables"][0]["type"], "int");
    assert_eq!(variables["variables"][0]["variablesReference"], 0);
    assert!(variables["variables"][1]["variablesReference"].as_i64().unwrap() > 0);

    let evaluated = session
        .handle(&request("evaluate", json!({ "expression": " count ", "frameId": frame })))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(evaluated["result"], "1");

    let missing = session
        .handle(&request("evaluate", json!({ "expression": "nope", "frameId": frame })))
        .await;
    assert!(matches!(missing, Err(AdapterError::NotFound(_))));

    let completions = session
        .handle(&request(
            "completions",
            json!({ "frameId": frame, "text": "coun + 1", "column": 5 }),
        ))
        .await
        .unwrap()
        .unwrap();
    let labels: Vec<&str> = completions["targets"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["label"].as_str().unwrap())
        .collect();
    assert_eq!(labels, vec!["count", "counter"]);
}

#[tokio::test]
async fn test_stack_trace_paging() {
    let (session, _rx, _driver) = with_driver(ResumeOutcome::Resumed);

    let body = session
        .handle(&request("stackTrace", json!({ "threadId": 1, "startFrame": 1, "levels": 5 })))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(body["totalFrames"], 2);
    assert_eq!(body["stackFrames"].as_array().unwrap().len(), 1);
    assert_eq!(body["stackFrames"][0]["name"], "Thread.run");
}

#[tokio::test]
async fn test_pause_answers_then_reports_stop() {
    let (session, mut rx, driver) = with_driver(ResumeOutcome::Resumed);

    let mut pause = request("pause", json!({ "threadId": 2 }));
    pause.seq = 9;
    session.dispatch(pause);

    let first = rx.recv().await.unwrap();
    match first {
        Outgoing::Response(response) => {
            assert!(response.success);
            assert_eq!(response.request_seq, 9);
        }
        other => panic!("expected the response first, got {:?}", other),
    }
    let second = rx.recv().await.unwrap();
    match second {
        Outgoing::Event(event) => {
            assert_eq!(event.event, "stopped");
            let body = event.body.unwrap();
            assert_eq!(body["reason"], "pause");
            assert_eq!(body["threadId"], 2);
        }
        other => panic!("expected a stopped event, got {:?}", other),
    }
    assert_eq!(driver.calls(), vec!["pause 2"]);
}

#[tokio::test]
async fn test_unsupported_and_unknown_requests_fail() {
    let (session, _rx) = session();

    for command in ["restart", "setVariable", "gotoTargets", "loadedSources"] {
        let result = session.handle(&request(command, json!({}))).await;
        assert!(
            matches!(result, Err(AdapterError::NotImplemented(ref c)) if c == command),
            "{} should be rejected",
            command
        );
    }

    let unknown = session.handle(&request("teleport", json!({}))).await;
    assert!(matches!(unknown, Err(AdapterError::UnrecognizedRequest(_))));
}

#[tokio::test]
async fn test_requests_without_debuggee() {
    let (session, _rx) = session();

    let threads = session.handle(&request("threads", json!({}))).await.unwrap().unwrap();
    assert_eq!(threads["threads"], json!([]));

    let result = session.handle(&request("continue", json!({ "threadId": 1 }))).await;
    assert!(matches!(result, Err(AdapterError::NoDebuggee)));

    let missing_argument = session.handle(&request("continue", json!({}))).await;
    assert!(matches!(missing_argument, Err(AdapterError::ProtocolArgument(_))));
}

#[tokio::test]
async fn test_set_breakpoints_uses_client_numbering() {
    let (session, _rx) = session();
    session
        .handle(&request("initialize", json!({ "linesStartAt1": false })))
        .await
        .unwrap();

    let body = session
        .handle(&request(
            "setBreakpoints",
            json!({
                "source": { "path": "/w/app/Main.kt" },
                "breakpoints": [{ "line": 2 }, { "line": 9, "condition": "x > 1" }]
            }),
        ))
        .await
        .unwrap()
        .unwrap();

    let breakpoints = body["breakpoints"].as_array().unwrap();
    assert_eq!(breakpoints.len(), 2);
    assert_eq!(breakpoints[0]["line"], 2);
    assert_eq!(breakpoints[0]["verified"], false);
    assert_ne!(breakpoints[0]["id"], breakpoints[1]["id"]);

    let again = session
        .handle(&request(
            "setBreakpoints",
            json!({ "source": { "path": "/w/app/Main.kt" }, "breakpoints": [{ "line": 2 }] }),
        ))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(again["breakpoints"][0]["id"], breakpoints[0]["id"]);

    let without_path = session
        .handle(&request("setBreakpoints", json!({ "source": { "name": "Main.kt" } })))
        .await;
    assert!(matches!(without_path, Err(AdapterError::ProtocolArgument(_))));
}

#[tokio::test]
async fn test_debuggee_events_become_notifications() {
    let (session, mut rx, driver) = with_driver(ResumeOutcome::Resumed);

    driver.bus.publish(&DebugEvent::BreakpointHit { thread: 1 });
    driver.bus.publish(&DebugEvent::ThreadChanged {
        thread: 5,
        reason: ThreadReason::Started,
    });
    driver.bus.publish(&DebugEvent::ExceptionThrown {
        thread: 1,
        exception: DebuggeeException::new("java.lang.IllegalStateException", Some("boom".into()), false),
    });
    driver.bus.publish(&DebugEvent::Step { thread: 2 });

    let events = drain_events(&mut rx);
    let summary: Vec<(String, String)> = events
        .iter()
        .map(|(name, body)| {
            let detail = body["reason"].as_str().unwrap_or_default().to_string();
            (name.clone(), detail)
        })
        .collect();
    assert_eq!(
        summary,
        vec![
            ("stopped".to_string(), "breakpoint".to_string()),
            ("thread".to_string(), "started".to_string()),
            ("stopped".to_string(), "exception".to_string()),
            ("stopped".to_string(), "step".to_string()),
        ]
    );

    let info = session
        .handle(&request("exceptionInfo", json!({ "threadId": 1 })))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(info["exceptionId"], "java.lang.IllegalStateException");
    assert_eq!(info["description"], "boom");
    assert_eq!(info["breakMode"], "always");
    assert_eq!(info["details"]["typeName"], "IllegalStateException");

    let unknown = session
        .handle(&request("exceptionInfo", json!({ "threadId": 2 })))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(unknown["description"], "Unknown exception");

    // Resuming the thread forgets its exception
    session
        .handle(&request("continue", json!({ "threadId": 1 })))
        .await
        .unwrap();
    let after = session
        .handle(&request("exceptionInfo", json!({ "threadId": 1 })))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after["description"], "Unknown exception");
}

#[tokio::test]
async fn test_resolved_breakpoint_is_reported_verified() {
    let (session, mut rx) = session();

    // Set before any debuggee exists, so nothing waits for installation
    let body = session
        .handle(&request(
            "setBreakpoints",
            json!({ "source": { "path": "/w/app/Main.kt" }, "breakpoints": [{ "line": 4 }] }),
        ))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(body["breakpoints"][0]["verified"], false);
    let id = body["breakpoints"][0]["id"].as_i64().unwrap();

    let driver = FakeDriver::new(ResumeOutcome::Resumed);
    session.install_debuggee(driver.clone());
    driver.bus.publish(&DebugEvent::BreakpointResolved { breakpoint_id: id, line: 4 });

    let events = drain_events(&mut rx);
    assert_eq!(events.len(), 1);
    let (name, body) = &events[0];
    assert_eq!(name, "breakpoint");
    assert_eq!(body["reason"], "changed");
    assert_eq!(body["breakpoint"]["id"], id);
    assert_eq!(body["breakpoint"]["verified"], true);
}

#[tokio::test]
async fn test_exit_reports_exited_then_terminated() {
    let (_session, mut rx, driver) = with_driver(ResumeOutcome::Resumed);

    driver.bus.publish(&DebugEvent::Exited { code: Some(3) });

    let events = drain_events(&mut rx);
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].0, "exited");
    assert_eq!(events[0].1["exitCode"], 3);
    assert_eq!(events[1].0, "terminated");
}

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let (session, mut rx, driver) = with_driver(ResumeOutcome::Resumed);

    session.handle(&request("disconnect", json!({}))).await.unwrap();
    session.handle(&request("disconnect", json!({}))).await.unwrap();
    assert_eq!(driver.calls(), vec!["disconnect"]);

    // Listeners are gone with the debuggee
    driver.bus.publish(&DebugEvent::BreakpointHit { thread: 1 });
    assert!(drain_events(&mut rx).is_empty());
    assert_eq!(driver.bus.listener_count(), 0);
}

#[tokio::test]
async fn test_configuration_done_waits_for_release() {
    let (session, mut rx) = session();

    session.dispatch(request("configurationDone", json!({})));
    let early = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
    assert!(early.is_err(), "configurationDone must stay unanswered");

    session.dispatch(request("disconnect", json!({})));
    let mut answered = Vec::new();
    for _ in 0..2 {
        if let Some(Outgoing::Response(response)) = rx.recv().await {
            answered.push(response.command);
        }
    }
    answered.sort();
    assert_eq!(answered, vec!["configurationDone", "disconnect"]);
}

#[tokio::test]
async fn test_failed_build_starts_nothing() {
    let (client, _rx) = DapClient::channel();
    let build = fake_build(false);
    let session = DebugSession::new(client, build.clone(), None);

    let result = session
        .handle(&request(
            "launch",
            json!({
                "workspaceRoot": "/w",
                "bazelTarget": "//app:main",
                "mainClass": "com.example.MainKt",
                "buildFlags": []
            }),
        ))
        .await;

    assert!(matches!(result, Err(AdapterError::BuildFailure(_))));
    assert_eq!(build.builds.lock().unwrap().clone(), vec![vec!["//app:main".to_string()]]);
    let threads = session.handle(&request("threads", json!({}))).await.unwrap().unwrap();
    assert_eq!(threads["threads"], json!([]));
}

#[tokio::test]
async fn test_launch_rejects_unknown_log_level() {
    let (session, _rx) = session();

    let result = session
        .handle(&request(
            "launch",
            json!({
                "workspaceRoot": "/w",
                "bazelTarget": "//app:main",
                "mainClass": "com.example.MainKt",
                "buildFlags": [],
                "logLevel": "chatty"
            }),
        ))
        .await;
    assert!(matches!(result, Err(AdapterError::ProtocolArgument(_))));
}

#[tokio::test]
async fn test_attach_to_nothing_fails_within_timeout() {
    let (session, _rx) = session();
    let workspace = tempfile::tempdir().unwrap();
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();

    let started = std::time::Instant::now();
    let result = session
        .handle(&request(
            "attach",
            json!({
                "workspaceRoot": workspace.path(),
                "hostName": "127.0.0.1",
                "port": port,
                "timeout": 1000
            }),
        ))
        .await;

    assert!(matches!(result, Err(AdapterError::ConnectionFailure(_))));
    assert!(started.elapsed() < Duration::from_secs(3));
}

fn launch_request() -> Request {
    request(
        "launch",
        json!({
            "workspaceRoot": "/w",
            "bazelTarget": "//app:main",
            "mainClass": "com.example.MainKt",
            "buildFlags": []
        }),
    )
}

#[tokio::test]
async fn test_slow_launch_does_not_hold_up_other_requests() {
    let (client, mut rx) = DapClient::channel();
    let gate = Arc::new(Notify::new());
    let build = Arc::new(FakeBuild {
        succeed: false,
        builds: Mutex::new(Vec::new()),
        gate: Some(gate.clone()),
    });
    let session = DebugSession::new(client, build.clone(), None);
    session.install_debuggee(FakeDriver::new(ResumeOutcome::Resumed));

    session.dispatch(launch_request());
    let mut threads = request("threads", json!({}));
    threads.seq = 2;
    session.dispatch(threads);
    let mut stack = request("stackTrace", json!({ "threadId": 1 }));
    stack.seq = 3;
    session.dispatch(stack);

    let mut answered = Vec::new();
    while answered.len() < 2 {
        match tokio::time::timeout(Duration::from_secs(1), rx.recv()).await {
            Ok(Some(Outgoing::Response(response))) => {
                assert!(response.success, "{} failed", response.command);
                answered.push(response.command);
            }
            Ok(Some(_)) => {}
            other => panic!("requests behind the launch were not answered: {:?}", other),
        }
    }
    assert_eq!(answered, vec!["threads", "stackTrace"]);
    assert_eq!(build.builds.lock().unwrap().len(), 1);

    // The launch answers once its build finishes
    gate.notify_one();
    let launch = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    match launch {
        Outgoing::Response(response) => {
            assert_eq!(response.command, "launch");
            assert!(!response.success);
        }
        other => panic!("expected the launch response, got {:?}", other),
    }
}

#[tokio::test]
async fn test_debuggee_runs_only_once_configuration_is_pending() {
    let (session, mut rx) = session();
    let driver = FakeDriver::new(ResumeOutcome::Resumed);

    let (mut writer, reader) = tokio::io::duplex(64);
    writer.write_all(b"hello\n").await.unwrap();
    drop(writer);
    let stdout: OutputStream = Box::new(reader);
    session.start_debuggee(driver.clone(), vec![("stdout", stdout)], true);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(driver.calls().is_empty(), "resumed before configurationDone");
    assert!(drain_events(&mut rx).is_empty(), "events sent before configurationDone");

    session.dispatch(request("configurationDone", json!({})));

    let mut configured = false;
    let mut threads_started = 0;
    let mut output = None;
    while !configured || output.is_none() || threads_started < 2 {
        let message = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match message {
            Outgoing::Response(response) => {
                assert_eq!(response.command, "configurationDone");
                configured = true;
            }
            Outgoing::Event(event) if event.event == "thread" => {
                assert_eq!(event.body.unwrap()["reason"], "started");
                threads_started += 1;
            }
            Outgoing::Event(event) if event.event == "output" => {
                let body = event.body.unwrap();
                assert_eq!(body["category"], "stdout");
                output = Some(body["output"].as_str().unwrap().to_string());
            }
            other => panic!("unexpected message {:?}", other),
        }
    }
    assert_eq!(output.as_deref(), Some("hello\n"));

    for _ in 0..50 {
        if !driver.calls().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(driver.calls(), vec!["resume_all"]);
}

#[tokio::test]
async fn test_exited_debuggee_does_not_stall_breakpoints() {
    let (session, mut rx, driver) = with_driver(ResumeOutcome::Resumed);
    driver.bus.publish(&DebugEvent::Exited { code: Some(0) });
    drain_events(&mut rx);

    let body = tokio::time::timeout(
        Duration::from_secs(1),
        session.handle(&request(
            "setBreakpoints",
            json!({ "source": { "path": "/w/app/Main.kt" }, "breakpoints": [{ "line": 4 }] }),
        )),
    )
    .await
    .expect("setBreakpoints waited for a debuggee that is gone")
    .unwrap()
    .unwrap();
    assert_eq!(body["breakpoints"][0]["verified"], false);

    let threads = session.handle(&request("threads", json!({}))).await.unwrap().unwrap();
    assert_eq!(threads["threads"], json!([]));
    session.handle(&request("disconnect", json!({}))).await.unwrap();
    assert!(driver.calls().is_empty());
}

#[tokio::test]
async fn test_launch_and_attach_run_on_any_worker() {
    fn assert_send<F: std::future::Future + Send>(_: F) {}
    let (session, _rx) = session();

    let launch = launch_request();
    let attach = request("attach", json!({ "workspaceRoot": "/w", "port": 5005 }));
    assert_send(session.handle(&launch));
    assert_send(session.handle(&attach));
}
