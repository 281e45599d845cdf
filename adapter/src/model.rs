// Domain model shared by the session and the debuggee driver
//
// Lines and columns in this module are always 1-based; conversion to the
// client's numbering happens once, in the converter.

use jdwp_wire::types::{FrameId, Location, ObjectId};
use std::path::{Path, PathBuf};

pub use jdwp_wire::types::ThreadId;

/// A source file, identified by its absolute path
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Source {
    pub name: String,
    pub path: PathBuf,
}

impl Source {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self { name, path }
    }

    /// Path relative to `root`, or the path itself when it lies outside
    pub fn relative_to(&self, root: &Path) -> PathBuf {
        self.path
            .strip_prefix(root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| self.path.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Position {
    pub source: Source,
    pub line: u32,
    pub column: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceBreakpoint {
    pub position: Position,
    /// Accepted but not evaluated
    pub condition: Option<String>,
}

/// A source breakpoint with the id reported to the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breakpoint {
    pub id: i64,
    pub position: Position,
    pub condition: Option<String>,
}

impl Breakpoint {
    pub fn line(&self) -> u32 {
        self.position.line
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ExceptionBreakpoint {
    Caught,
    Uncaught,
}

impl ExceptionBreakpoint {
    pub const ALL: [ExceptionBreakpoint; 2] = [ExceptionBreakpoint::Caught, ExceptionBreakpoint::Uncaught];

    pub fn filter_id(&self) -> &'static str {
        match self {
            ExceptionBreakpoint::Caught => "caught",
            ExceptionBreakpoint::Uncaught => "uncaught",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ExceptionBreakpoint::Caught => "Caught Exceptions",
            ExceptionBreakpoint::Uncaught => "Uncaught Exceptions",
        }
    }

    pub fn from_filter_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.filter_id() == id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadInfo {
    pub id: ThreadId,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Over,
    Into,
    Out,
}

/// Result of resuming a single thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeOutcome {
    Resumed,
    /// The thread is unknown to the VM or already gone; nothing was resumed
    ThreadUnavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadReason {
    Started,
    Exited,
}

/// Everything needed to address one frame of a suspended thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameRef {
    pub thread: ThreadId,
    pub frame_id: FrameId,
    pub location: Location,
}

#[derive(Debug, Clone)]
pub struct StackFrame {
    pub name: String,
    pub position: Option<Position>,
    pub frame: FrameRef,
}

#[derive(Debug, Clone)]
pub struct Scope {
    pub name: String,
    pub variables: VariableRef,
}

/// Something with children the client can expand
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VariableRef {
    Locals(FrameRef),
    Object { thread: ThreadId, object: ObjectId },
    Array { thread: ThreadId, array: ObjectId, length: i32 },
}

impl VariableRef {
    /// Thread whose stopped interval this reference belongs to
    pub fn thread(&self) -> ThreadId {
        match self {
            VariableRef::Locals(frame) => frame.thread,
            VariableRef::Object { thread, .. } | VariableRef::Array { thread, .. } => *thread,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Variable {
    pub name: String,
    pub value: String,
    pub type_name: Option<String>,
    pub children: Option<VariableRef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionKind {
    Variable,
    Property,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionItem {
    pub label: String,
    pub kind: CompletionKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebuggeeException {
    pub description: String,
    pub message: Option<String>,
    pub type_name: String,
    pub full_type_name: String,
    pub caught: bool,
}

impl DebuggeeException {
    pub fn new(binary_name: &str, message: Option<String>, caught: bool) -> Self {
        let type_name = binary_name
            .rsplit(|c| c == '.' || c == '$')
            .next()
            .unwrap_or(binary_name)
            .to_string();
        Self {
            description: binary_name.to_string(),
            message,
            type_name,
            full_type_name: binary_name.to_string(),
            caught,
        }
    }
}

/// Events published by the debuggee, in the order the VM reported them
#[derive(Debug, Clone)]
pub enum DebugEvent {
    BreakpointHit { thread: ThreadId },
    Step { thread: ThreadId },
    ExceptionThrown { thread: ThreadId, exception: DebuggeeException },
    ThreadChanged { thread: ThreadId, reason: ThreadReason },
    /// A deferred breakpoint was installed once its class loaded
    BreakpointResolved { breakpoint_id: i64, line: u32 },
    Exited { code: Option<i32> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_relative_path() {
        let source = Source::from_path("/work/app/src/Main.kt");
        assert_eq!(source.name, "Main.kt");
        assert_eq!(
            source.relative_to(Path::new("/work")),
            PathBuf::from("app/src/Main.kt")
        );
        assert_eq!(
            source.relative_to(Path::new("/elsewhere")),
            PathBuf::from("/work/app/src/Main.kt")
        );
    }

    #[test]
    fn test_exception_names() {
        let e = DebuggeeException::new("java.lang.IllegalStateException", Some("boom".into()), false);
        assert_eq!(e.type_name, "IllegalStateException");
        assert_eq!(e.description, "java.lang.IllegalStateException");

        let nested = DebuggeeException::new("com.example.Outer$Failure", None, true);
        assert_eq!(nested.type_name, "Failure");
    }

    #[test]
    fn test_exception_filter_ids() {
        assert_eq!(
            ExceptionBreakpoint::from_filter_id("uncaught"),
            Some(ExceptionBreakpoint::Uncaught)
        );
        assert_eq!(ExceptionBreakpoint::from_filter_id("all"), None);
    }
}
