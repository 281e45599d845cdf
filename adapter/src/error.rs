// Adapter error types
//
// Every failed request is reported to the client with the error's display
// string; the session itself keeps running.

use jdwp_wire::JdwpError;
use thiserror::Error;

pub type AdapterResult<T> = Result<T, AdapterError>;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("Invalid request arguments: {0}")]
    ProtocolArgument(String),

    #[error("Build failed: {0}")]
    BuildFailure(String),

    #[error("Could not connect to the debuggee: {0}")]
    ConnectionFailure(String),

    /// A handle that is not (or no longer) in a reference pool
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("The debuggee disconnected")]
    BackendDisconnected,

    #[error("{0} is not implemented")]
    NotImplemented(String),

    #[error("unrecognized request: {0}")]
    UnrecognizedRequest(String),

    #[error("No debuggee is running")]
    NoDebuggee,

    #[error("JDWP: {0}")]
    Wire(JdwpError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AdapterError {
    pub fn is_disconnect(&self) -> bool {
        match self {
            AdapterError::BackendDisconnected => true,
            AdapterError::Wire(e) => e.is_disconnect(),
            _ => false,
        }
    }

    /// The JDWP error code, when the VM rejected a command
    pub fn wire_code(&self) -> Option<u16> {
        match self {
            AdapterError::Wire(e) => e.code(),
            _ => None,
        }
    }
}

impl From<JdwpError> for AdapterError {
    fn from(e: JdwpError) -> Self {
        if e.is_disconnect() {
            AdapterError::BackendDisconnected
        } else {
            AdapterError::Wire(e)
        }
    }
}
