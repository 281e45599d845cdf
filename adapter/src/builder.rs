// Build collaborator
//
// Builds the requested targets and resolves a target's runtime classpath.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::error::{AdapterError, AdapterResult};

#[async_trait]
pub trait BuildService: Send + Sync {
    /// Build `targets`; completes once the build has finished
    async fn build(&self, workspace_root: &Path, targets: &[String], flags: &[String]) -> AdapterResult<()>;

    /// Runtime classpath of a binary target, as absolute paths
    async fn classpath(&self, workspace_root: &Path, target: &str, flags: &[String]) -> AdapterResult<Vec<PathBuf>>;
}

/// Starlark expression printing one runtime jar per line
const RUNTIME_JARS_EXPR: &str =
    r#""\n".join([f.path for f in providers(target)["JavaInfo"].transitive_runtime_jars.to_list()])"#;

#[derive(Debug, Clone)]
pub struct BazelBuildService {
    executable: String,
}

impl BazelBuildService {
    /// Uses `$BAZEL` when set, `bazel` otherwise
    pub fn from_env() -> Self {
        Self {
            executable: std::env::var("BAZEL").unwrap_or_else(|_| "bazel".to_string()),
        }
    }

    pub fn with_executable(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
        }
    }
}

#[async_trait]
impl BuildService for BazelBuildService {
    async fn build(&self, workspace_root: &Path, targets: &[String], flags: &[String]) -> AdapterResult<()> {
        info!("Running {} build {} {}", self.executable, targets.join(" "), flags.join(" "));

        let mut child = Command::new(&self.executable)
            .arg("build")
            .args(targets)
            .args(flags)
            .current_dir(workspace_root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AdapterError::BuildFailure(format!("could not run {}: {}", self.executable, e)))?;

        let stdout = child.stdout.take().map(|out| tokio::spawn(log_lines(out, false)));
        let stderr = child.stderr.take().map(|err| tokio::spawn(log_lines(err, true)));

        let status = child.wait().await?;
        for task in [stdout, stderr].into_iter().flatten() {
            task.await.ok();
        }

        if status.success() {
            info!("Build finished");
            Ok(())
        } else {
            Err(AdapterError::BuildFailure(format!(
                "{} build exited with {}",
                self.executable, status
            )))
        }
    }

    async fn classpath(&self, workspace_root: &Path, target: &str, flags: &[String]) -> AdapterResult<Vec<PathBuf>> {
        debug!("Resolving runtime classpath of {}", target);

        let output = Command::new(&self.executable)
            .arg("cquery")
            .arg(target)
            .args(flags)
            .arg("--output=starlark")
            .arg(format!("--starlark:expr={}", RUNTIME_JARS_EXPR))
            .current_dir(workspace_root)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| AdapterError::BuildFailure(format!("could not run {}: {}", self.executable, e)))?;

        if !output.status.success() {
            return Err(AdapterError::BuildFailure(format!(
                "classpath query for {} failed: {}",
                target,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let classpath = parse_classpath(workspace_root, &String::from_utf8_lossy(&output.stdout));
        if classpath.is_empty() {
            warn!("Target {} has an empty runtime classpath", target);
        }
        Ok(classpath)
    }
}

async fn log_lines<R: AsyncRead + Unpin>(reader: R, is_stderr: bool) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if is_stderr => error!("{}", line),
            Ok(Some(line)) => info!("{}", line),
            Ok(None) => break,
            Err(e) => {
                warn!("Error streaming build output: {}", e);
                break;
            }
        }
    }
}

/// Resolve the jar paths printed by the query. Paths under `external/` live
/// in the `bazel-<workspace name>` output link.
fn parse_classpath(workspace_root: &Path, output: &str) -> Vec<PathBuf> {
    let external_root = workspace_root
        .file_name()
        .map(|name| workspace_root.join(format!("bazel-{}", name.to_string_lossy())))
        .unwrap_or_else(|| workspace_root.to_path_buf());

    let mut classpath: Vec<PathBuf> = Vec::new();
    for line in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let path = if line.starts_with("external/") {
            external_root.join(line)
        } else {
            workspace_root.join(line)
        };
        if !classpath.contains(&path) {
            classpath.push(path);
        }
    }
    classpath
}
