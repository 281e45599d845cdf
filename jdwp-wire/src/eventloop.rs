// JDWP event loop
//
// One task owns the read half and routes replies/events, another owns the
// write half and serializes outgoing commands. Keeping reads in their own task
// means a partially read packet is never dropped by a competing select branch.

use crate::events::{parse_event_packet, EventSet};
use crate::protocol::{CommandPacket, JdwpError, JdwpResult, ReplyPacket, HEADER_SIZE, REPLY_FLAG};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, trace, warn};

/// Maximum accepted packet size (10MB)
const MAX_PACKET_SIZE: usize = 10 * 1024 * 1024;

type ReplySender = oneshot::Sender<JdwpResult<ReplyPacket>>;

/// Request to send a command and get its reply
pub struct CommandRequest {
    pub packet: CommandPacket,
    pub reply_tx: ReplySender,
}

/// Replies still owed to callers. Once `closed` is set no new entry is accepted.
#[derive(Default)]
struct PendingReplies {
    closed: bool,
    by_id: HashMap<u32, ReplySender>,
}

/// Handle to the event loop for sending commands
#[derive(Clone)]
pub struct EventLoopHandle {
    command_tx: mpsc::Sender<CommandRequest>,
    pending: Arc<Mutex<PendingReplies>>,
}

impl std::fmt::Debug for EventLoopHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoopHandle")
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl EventLoopHandle {
    /// Send a command and wait for its reply
    pub async fn send_command(&self, packet: CommandPacket) -> JdwpResult<ReplyPacket> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.command_tx
            .send(CommandRequest { packet, reply_tx })
            .await
            .map_err(|_| JdwpError::ConnectionClosed)?;

        reply_rx.await.map_err(|_| JdwpError::ConnectionClosed)?
    }

    pub fn is_closed(&self) -> bool {
        self.pending.lock().map(|p| p.closed).unwrap_or(true)
    }
}

/// Start the reader and writer tasks. Returns the command handle and the
/// stream of parsed event sets; the stream ends when the connection drops.
pub fn spawn_event_loop<R, W>(reader: R, writer: W) -> (EventLoopHandle, mpsc::UnboundedReceiver<EventSet>)
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (command_tx, command_rx) = mpsc::channel(32);
    // Unbounded: events must be delivered in order and never dropped
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let pending = Arc::new(Mutex::new(PendingReplies::default()));

    tokio::spawn(writer_task(writer, command_rx, pending.clone()));
    tokio::spawn(reader_task(reader, event_tx, pending.clone()));

    (EventLoopHandle { command_tx, pending }, event_rx)
}

async fn writer_task<W>(
    mut writer: W,
    mut command_rx: mpsc::Receiver<CommandRequest>,
    pending: Arc<Mutex<PendingReplies>>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(cmd) = command_rx.recv().await {
        let packet_id = cmd.packet.id;

        // Register before writing: the reply can race the write's completion
        {
            let Ok(mut guard) = pending.lock() else {
                cmd.reply_tx.send(Err(JdwpError::ConnectionClosed)).ok();
                continue;
            };
            if guard.closed {
                cmd.reply_tx.send(Err(JdwpError::ConnectionClosed)).ok();
                continue;
            }
            guard.by_id.insert(packet_id, cmd.reply_tx);
        }

        trace!(
            "Sending command id={} set={} cmd={}",
            packet_id,
            cmd.packet.command_set,
            cmd.packet.command
        );

        let encoded = cmd.packet.encode();
        let written = match writer.write_all(&encoded).await {
            Ok(()) => writer.flush().await,
            Err(e) => Err(e),
        };

        if let Err(e) = written {
            error!("Failed to write command id={}: {}", packet_id, e);
            let tx = pending.lock().ok().and_then(|mut p| p.by_id.remove(&packet_id));
            if let Some(tx) = tx {
                tx.send(Err(JdwpError::Io(e))).ok();
            }
        }
    }

    debug!("Command channel closed, writer exiting");
}

async fn reader_task<R>(
    mut reader: R,
    event_tx: mpsc::UnboundedSender<EventSet>,
    pending: Arc<Mutex<PendingReplies>>,
) where
    R: AsyncRead + Unpin,
{
    info!("Event loop started");

    loop {
        let (is_reply, packet_id, data) = match read_packet(&mut reader).await {
            Ok(packet) => packet,
            Err(e) => {
                match &e {
                    JdwpError::Io(io) if io.kind() == std::io::ErrorKind::UnexpectedEof => {
                        info!("VM closed the JDWP connection");
                    }
                    _ => error!("Failed to read packet: {}", e),
                }
                break;
            }
        };

        if is_reply {
            let tx = pending.lock().ok().and_then(|mut p| p.by_id.remove(&packet_id));
            match tx {
                Some(tx) => {
                    tx.send(ReplyPacket::decode(&data)).ok();
                }
                None => warn!("Received reply for unknown command id={}", packet_id),
            }
            continue;
        }

        match parse_event_packet(&data[HEADER_SIZE..]) {
            Ok(event_set) => {
                debug!(
                    "Parsed event set: {} events, suspend_policy={}",
                    event_set.events.len(),
                    event_set.suspend_policy
                );
                if event_tx.send(event_set).is_err() {
                    debug!("Event receiver dropped, discarding event");
                }
            }
            Err(e) => warn!("Failed to parse event packet: {}", e),
        }
    }

    if let Ok(mut guard) = pending.lock() {
        guard.closed = true;
        for (_, tx) in guard.by_id.drain() {
            tx.send(Err(JdwpError::ConnectionClosed)).ok();
        }
    }

    info!("Event loop shutting down");
}

/// Read one packet and report whether it is a reply, its id, and the raw bytes (header included)
async fn read_packet<R>(reader: &mut R) -> JdwpResult<(bool, u32, Vec<u8>)>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header).await?;

    let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
    let packet_id = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
    let flags = header[8];

    if length < HEADER_SIZE {
        return Err(JdwpError::Protocol(format!("Invalid packet length: {}", length)));
    }

    if length > MAX_PACKET_SIZE {
        return Err(JdwpError::Protocol(format!(
            "Packet too large: {} bytes (max: {} bytes)",
            length, MAX_PACKET_SIZE
        )));
    }

    let mut packet = vec![0u8; length];
    packet[..HEADER_SIZE].copy_from_slice(&header);
    reader.read_exact(&mut packet[HEADER_SIZE..]).await?;

    Ok((flags == REPLY_FLAG, packet_id, packet))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{command_sets, event_kinds, event_set_commands, vm_commands};
    use bytes::BufMut;

    fn reply(id: u32, data: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.put_u32((HEADER_SIZE + data.len()) as u32);
        buf.put_u32(id);
        buf.put_u8(REPLY_FLAG);
        buf.put_u16(0);
        buf.put_slice(data);
        buf
    }

    fn thread_start_event(thread: u64) -> Vec<u8> {
        let mut body = Vec::new();
        body.put_u8(0); // suspend policy
        body.put_i32(1);
        body.put_u8(event_kinds::THREAD_START);
        body.put_i32(5);
        body.put_u64(thread);

        let mut buf = Vec::new();
        buf.put_u32((HEADER_SIZE + body.len()) as u32);
        buf.put_u32(1);
        buf.put_u8(0);
        buf.put_u8(command_sets::EVENT);
        buf.put_u8(event_set_commands::COMPOSITE);
        buf.put_slice(&body);
        buf
    }

    #[tokio::test]
    async fn test_routes_replies_and_events() {
        let (client, mut vm) = tokio::io::duplex(4096);
        let (read_half, write_half) = tokio::io::split(client);
        let (handle, mut events) = spawn_event_loop(read_half, write_half);

        let vm_task = tokio::spawn(async move {
            let mut header = [0u8; HEADER_SIZE];
            vm.read_exact(&mut header).await.unwrap();
            let id = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
            assert_eq!(header[9], command_sets::VIRTUAL_MACHINE);
            assert_eq!(header[10], vm_commands::RESUME);

            // An event may arrive before the reply it interleaves with
            vm.write_all(&thread_start_event(0x44)).await.unwrap();
            vm.write_all(&reply(id, &[])).await.unwrap();
            vm
        });

        let packet = CommandPacket::new(9, command_sets::VIRTUAL_MACHINE, vm_commands::RESUME);
        let reply = handle.send_command(packet).await.unwrap();
        assert_eq!(reply.id, 9);
        assert!(!reply.is_error());

        let event_set = events.recv().await.unwrap();
        assert_eq!(event_set.events.len(), 1);

        let vm = vm_task.await.unwrap();
        drop(vm);

        // Connection gone: the event stream ends and new commands fail
        assert!(events.recv().await.is_none());
        let packet = CommandPacket::new(10, command_sets::VIRTUAL_MACHINE, vm_commands::RESUME);
        assert!(matches!(
            handle.send_command(packet).await,
            Err(JdwpError::ConnectionClosed)
        ));
        assert!(handle.is_closed());
    }
}
