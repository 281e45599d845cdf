// Handle for sending responses and events to the client
//
// Messages are queued to the single writer task, which numbers and writes
// them in the order they were queued.

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::AdapterError;
use crate::protocol::{Event, Outgoing, OutputEvent, Request, Response};

#[derive(Debug, Clone)]
pub struct DapClient {
    tx: mpsc::UnboundedSender<Outgoing>,
}

impl DapClient {
    pub fn new(tx: mpsc::UnboundedSender<Outgoing>) -> Self {
        Self { tx }
    }

    /// A client whose messages are collected in the returned receiver
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Outgoing>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    fn send(&self, message: Outgoing) {
        if self.tx.send(message).is_err() {
            debug!("Client writer is gone, dropping message");
        }
    }

    pub fn respond(&self, request: &Request, result: Result<Option<Value>, AdapterError>) {
        let response = match result {
            Ok(body) => Response {
                request_seq: request.seq,
                success: true,
                command: request.command.clone(),
                message: None,
                body,
            },
            Err(e) => {
                warn!("Request {} failed: {}", request.command, e);
                Response {
                    request_seq: request.seq,
                    success: false,
                    command: request.command.clone(),
                    message: Some(e.to_string()),
                    body: None,
                }
            }
        };
        self.send(Outgoing::Response(response));
    }

    pub fn event<B: Serialize>(&self, event: &str, body: B) {
        let body = match serde_json::to_value(body) {
            Ok(Value::Null) => None,
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Could not serialize {} event: {}", event, e);
                return;
            }
        };
        self.send(Outgoing::Event(Event {
            event: event.to_string(),
            body,
        }));
    }

    pub fn output(&self, category: &str, output: String) {
        self.event(
            "output",
            OutputEvent {
                category: category.to_string(),
                output,
            },
        );
    }
}
