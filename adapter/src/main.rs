// Kotlin debug adapter - DAP server for Kotlin/JVM programs
//
// Started by the editor; talks DAP over stdin/stdout

use anyhow::Result;
use kotlin_debug_adapter::builder::BazelBuildService;
use kotlin_debug_adapter::{logging, server};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr (and later the client console) - stdout is the protocol
    let logging = logging::init();

    info!("Starting Kotlin debug adapter {}", env!("CARGO_PKG_VERSION"));

    let build = Arc::new(BazelBuildService::from_env());
    server::run(tokio::io::stdin(), tokio::io::stdout(), build, Some(logging)).await?;

    info!("Kotlin debug adapter stopped");
    Ok(())
}
