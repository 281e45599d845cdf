// JDWP client library
//
// Implements the subset of the Java Debug Wire Protocol a source-level
// debugger needs:
// - Connection management and event delivery
// - Breakpoint, step, exception and class-prepare requests
// - Thread, stack and variable inspection
// - Execution control

pub mod array;
pub mod commands;
pub mod connection;
pub mod eventloop;
pub mod eventrequest;
pub mod events;
pub mod method;
pub mod object;
pub mod protocol;
pub mod reader;
pub mod reftype;
pub mod stackframe;
pub mod string;
pub mod thread;
pub mod types;
pub mod vm;
pub mod writer;

pub use connection::JdwpConnection;
pub use eventrequest::SuspendPolicy;
pub use events::{Event, EventKind, EventSet};
pub use protocol::{JdwpError, JdwpResult};
