// JDWP connection management
//
// Handles TCP connection, handshake, id size negotiation and event loop startup.
// All commands take `&self` so a connection can be shared behind an `Arc`.

use crate::eventloop::{spawn_event_loop, EventLoopHandle};
use crate::events::EventSet;
use crate::protocol::*;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Size in bytes every id kind must have
const SUPPORTED_ID_SIZE: i32 = 8;

#[derive(Debug)]
pub struct JdwpConnection {
    event_loop: EventLoopHandle,
    events: Mutex<Option<mpsc::UnboundedReceiver<EventSet>>>,
    next_id: AtomicU32,
}

impl JdwpConnection {
    /// Connect to a JVM via JDWP
    pub async fn connect(host: &str, port: u16) -> JdwpResult<Self> {
        info!("Connecting to JDWP at {}:{}", host, port);

        let stream = TcpStream::connect((host, port)).await?;
        Self::from_stream(stream).await
    }

    /// Handshake on an already connected stream and start the event loop
    pub async fn from_stream(mut stream: TcpStream) -> JdwpResult<Self> {
        stream.set_nodelay(true).ok();
        Self::handshake(&mut stream).await?;

        let (reader, writer) = stream.into_split();
        let (event_loop, events) = spawn_event_loop(reader, writer);

        let connection = Self {
            event_loop,
            events: Mutex::new(Some(events)),
            next_id: AtomicU32::new(1),
        };

        let sizes = connection.get_id_sizes().await?;
        if !sizes.all_equal_to(SUPPORTED_ID_SIZE) {
            warn!("VM reported unsupported id sizes: {:?}", sizes);
            return Err(JdwpError::UnsupportedIdSizes(format!("{:?}", sizes)));
        }

        Ok(connection)
    }

    /// Perform JDWP handshake
    async fn handshake(stream: &mut TcpStream) -> JdwpResult<()> {
        debug!("Performing JDWP handshake");

        stream.write_all(JDWP_HANDSHAKE).await?;
        stream.flush().await?;

        let mut buf = vec![0u8; JDWP_HANDSHAKE.len()];
        stream.read_exact(&mut buf).await?;

        if buf != JDWP_HANDSHAKE {
            warn!("Invalid handshake response: {:?}", buf);
            return Err(JdwpError::InvalidHandshake);
        }

        info!("JDWP handshake successful");
        Ok(())
    }

    /// Send a command and wait for reply
    pub async fn send_command(&self, packet: CommandPacket) -> JdwpResult<ReplyPacket> {
        trace_command(&packet);
        self.event_loop.send_command(packet).await
    }

    /// Build a command with a fresh id, send it, and fail on an error reply
    pub(crate) async fn request(
        &self,
        command_set: u8,
        command: u8,
        data: Vec<u8>,
    ) -> JdwpResult<ReplyPacket> {
        let mut packet = CommandPacket::new(self.next_id(), command_set, command);
        packet.data = data;

        let reply = self.send_command(packet).await?;
        reply.check_error()?;
        Ok(reply)
    }

    /// Take the event stream. Only the first caller gets it; the stream ends
    /// when the VM disconnects.
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<EventSet>> {
        self.events.lock().ok().and_then(|mut events| events.take())
    }

    pub fn is_closed(&self) -> bool {
        self.event_loop.is_closed()
    }

    /// Generate next packet ID
    pub fn next_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }
}

fn trace_command(packet: &CommandPacket) {
    tracing::trace!(
        "Sending command packet id={} set={} cmd={}",
        packet.id,
        packet.command_set,
        packet.command
    );
}
