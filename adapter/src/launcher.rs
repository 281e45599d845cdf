// Starting and attaching to VMs
//
// Both paths end with a connected `JdwpDebuggee` whose breakpoints are in
// place and whose threads are still suspended.

use jdwp_wire::JdwpConnection;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::{ChildStderr, ChildStdout, Command};
use tracing::{debug, info};

use crate::breakpoints::BreakpointManager;
use crate::classpath::SourceMapping;
use crate::debuggee::{JdwpDebuggee, Origin};
use crate::error::{AdapterError, AdapterResult};

/// How long a launched VM gets to open its debug port
pub const LAUNCH_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct LaunchConfig {
    pub workspace_root: PathBuf,
    pub classpath: Vec<PathBuf>,
    pub main_class: String,
    pub vm_arguments: Option<String>,
    pub additional_args: Vec<String>,
}

/// A launched VM together with its output streams
pub struct Launched {
    pub debuggee: JdwpDebuggee,
    pub stdout: Option<ChildStdout>,
    pub stderr: Option<ChildStderr>,
}

/// `$JAVA_HOME/bin/java` when set, `java` from the PATH otherwise
fn java_executable() -> PathBuf {
    std::env::var_os("JAVA_HOME")
        .map(|home| PathBuf::from(home).join("bin").join("java"))
        .unwrap_or_else(|| PathBuf::from("java"))
}

fn free_port() -> AdapterResult<u16> {
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0))
        .map_err(|e| AdapterError::ConnectionFailure(format!("no free port for the debug agent: {}", e)))?;
    Ok(listener.local_addr()?.port())
}

fn join_classpath(classpath: &[PathBuf]) -> AdapterResult<OsString> {
    std::env::join_paths(classpath)
        .map_err(|e| AdapterError::ProtocolArgument(format!("classpath entry cannot be joined: {}", e)))
}

/// Program arguments for a suspended VM listening for a debugger on `port`
fn java_arguments(config: &LaunchConfig, port: u16) -> AdapterResult<Vec<OsString>> {
    let mut args: Vec<OsString> = vec![format!(
        "-agentlib:jdwp=transport=dt_socket,server=y,suspend=y,address=127.0.0.1:{}",
        port
    )
    .into()];

    if let Some(vm_arguments) = &config.vm_arguments {
        args.extend(vm_arguments.split_whitespace().map(OsString::from));
    }

    if !config.classpath.is_empty() {
        args.push("-classpath".into());
        args.push(join_classpath(&config.classpath)?);
    }

    // Module/class form runs a class from a module
    if config.main_class.contains('/') {
        args.push("-m".into());
    }
    args.push(config.main_class.clone().into());
    args.extend(config.additional_args.iter().map(OsString::from));

    Ok(args)
}

/// Start a VM for `config` and connect to it
pub async fn launch(
    config: &LaunchConfig,
    manager: Arc<BreakpointManager>,
    mapping: Arc<dyn SourceMapping>,
) -> AdapterResult<Launched> {
    let port = free_port()?;
    let java = java_executable();
    let args = java_arguments(config, port)?;
    info!("Launching {} on debug port {}", config.main_class, port);
    debug!("{} {:?}", java.display(), args);

    let mut child = Command::new(&java)
        .args(&args)
        .current_dir(&config.workspace_root)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| AdapterError::ConnectionFailure(format!("could not start {}: {}", java.display(), e)))?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let started = Instant::now();
    let connection = loop {
        match JdwpConnection::connect("127.0.0.1", port).await {
            Ok(connection) => break connection,
            Err(e) => {
                if let Some(status) = child.try_wait()? {
                    return Err(AdapterError::ConnectionFailure(format!(
                        "the VM exited before a debugger could attach ({})",
                        status
                    )));
                }
                if started.elapsed() >= LAUNCH_CONNECT_TIMEOUT {
                    child.kill().await.ok();
                    return Err(AdapterError::ConnectionFailure(format!(
                        "no debug agent on port {} after {:?}: {}",
                        port, LAUNCH_CONNECT_TIMEOUT, e
                    )));
                }
                tokio::time::sleep(CONNECT_RETRY_INTERVAL).await;
            }
        }
    };

    let debuggee = JdwpDebuggee::start(
        connection,
        manager,
        mapping,
        config.workspace_root.clone(),
        Origin::Launched(child),
    )
    .await?;

    Ok(Launched {
        debuggee,
        stdout,
        stderr,
    })
}

/// Connect to a VM that is already listening on `host:port`
pub async fn attach(
    host: &str,
    port: u16,
    timeout: Duration,
    workspace_root: &Path,
    manager: Arc<BreakpointManager>,
    mapping: Arc<dyn SourceMapping>,
) -> AdapterResult<JdwpDebuggee> {
    info!("Attaching to {}:{}", host, port);

    let connection = match tokio::time::timeout(timeout, JdwpConnection::connect(host, port)).await {
        Ok(Ok(connection)) => connection,
        Ok(Err(e)) => {
            return Err(AdapterError::ConnectionFailure(format!("{}:{}: {}", host, port, e)));
        }
        Err(_) => {
            return Err(AdapterError::ConnectionFailure(format!(
                "{}:{} did not answer within {:?}",
                host, port, timeout
            )));
        }
    };

    JdwpDebuggee::start(
        connection,
        manager,
        mapping,
        workspace_root.to_path_buf(),
        Origin::Attached,
    )
    .await
}
