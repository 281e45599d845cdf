// Stdio server loop
//
// Reads framed requests from the client and hands them to the session. One
// writer task numbers and writes every outgoing message, so stdout carries
// nothing but protocol traffic.

use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use crate::builder::BuildService;
use crate::client::DapClient;
use crate::codec;
use crate::error::AdapterResult;
use crate::logging::LoggingHandle;
use crate::protocol::{Outgoing, Request};
use crate::session::DebugSession;

/// Serve one client until it closes its input
pub async fn run<R, W>(
    input: R,
    output: W,
    build: Arc<dyn BuildService>,
    logging: Option<LoggingHandle>,
) -> AdapterResult<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (client, outgoing) = DapClient::channel();
    tokio::spawn(write_messages(output, outgoing));

    let session = DebugSession::new(client, build, logging);
    let mut reader = BufReader::new(input);

    info!("Debug adapter ready, waiting for requests...");
    while let Some(message) = codec::read_message(&mut reader).await? {
        trace!("Received: {}", message);

        let value: Value = match serde_json::from_str(&message) {
            Ok(value) => value,
            Err(e) => {
                error!("Parse error: {}", e);
                continue;
            }
        };
        if value.get("type").and_then(Value::as_str) != Some("request") {
            debug!("Ignoring non-request message");
            continue;
        }

        match serde_json::from_value::<Request>(value) {
            Ok(request) => session.dispatch(request),
            Err(e) => warn!("Invalid request: {}", e),
        }
    }

    info!("Client disconnected");
    // Do not leave a launched VM behind
    if let Err(e) = session.handle(&disconnect_request()).await {
        warn!("Cleanup after client exit failed: {}", e);
    }
    Ok(())
}

fn disconnect_request() -> Request {
    Request {
        seq: 0,
        command: "disconnect".to_string(),
        arguments: None,
    }
}

async fn write_messages<W: AsyncWrite + Unpin>(mut output: W, mut outgoing: mpsc::UnboundedReceiver<Outgoing>) {
    let mut seq: i64 = 1;
    while let Some(message) = outgoing.recv().await {
        let json = match message.to_json(seq) {
            Ok(json) => json,
            Err(e) => {
                error!("Could not serialize outgoing message: {}", e);
                continue;
            }
        };
        seq += 1;

        trace!("Sending: {}", json);
        if let Err(e) = codec::write_message(&mut output, &json).await {
            error!("Could not write to the client: {}", e);
            break;
        }
    }
}
