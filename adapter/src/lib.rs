// Kotlin/JVM debug adapter
//
// Speaks the Debug Adapter Protocol on stdio and drives a JVM through JDWP:
// - Builds the target and launches it under the debug agent, or attaches
// - Places source breakpoints, including in classes that load later
// - Serves stack, variable, evaluate and completion requests while stopped

pub mod breakpoints;
pub mod builder;
pub mod classpath;
pub mod client;
pub mod codec;
pub mod converter;
pub mod debuggee;
pub mod driver;
pub mod error;
pub mod event_bus;
pub mod lanes;
pub mod launcher;
pub mod logging;
pub mod model;
pub mod pool;
pub mod protocol;
pub mod server;
pub mod session;

pub use error::{AdapterError, AdapterResult};
pub use session::DebugSession;
