// JDWP event handling
//
// Events are sent by the VM as composite packets: a suspend policy followed by
// one or more events that all share it.

use crate::commands::{event_kinds, modifier_kinds};
use crate::protocol::{JdwpError, JdwpResult};
use crate::reader::{read_count, read_i32, read_location, read_string, read_tagged_object, read_u64, read_u8};
use crate::types::*;
use crate::writer::PacketWriter;
use bytes::BufMut;
use serde::{Deserialize, Serialize};

/// Composite event packet (can contain multiple events)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSet {
    pub suspend_policy: u8,
    pub events: Vec<Event>,
}

/// Single event within an event set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub kind: u8,
    pub request_id: RequestId,
    pub details: EventKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventKind {
    VMStart {
        thread: ThreadId,
    },
    VMDeath,
    ThreadStart {
        thread: ThreadId,
    },
    ThreadDeath {
        thread: ThreadId,
    },
    ClassPrepare {
        thread: ThreadId,
        ref_type_tag: u8,
        ref_type: ReferenceTypeId,
        signature: String,
        status: i32,
    },
    Breakpoint {
        thread: ThreadId,
        location: Location,
    },
    Step {
        thread: ThreadId,
        location: Location,
    },
    Exception {
        thread: ThreadId,
        location: Location,
        exception: TaggedObject,
        catch_location: Option<Location>,
    },
    MethodEntry {
        thread: ThreadId,
        location: Location,
    },
    MethodExit {
        thread: ThreadId,
        location: Location,
    },
}

impl EventKind {
    /// The thread the event happened on, for kinds that carry one
    pub fn thread(&self) -> Option<ThreadId> {
        match self {
            EventKind::VMDeath => None,
            EventKind::VMStart { thread }
            | EventKind::ThreadStart { thread }
            | EventKind::ThreadDeath { thread }
            | EventKind::ClassPrepare { thread, .. }
            | EventKind::Breakpoint { thread, .. }
            | EventKind::Step { thread, .. }
            | EventKind::Exception { thread, .. }
            | EventKind::MethodEntry { thread, .. }
            | EventKind::MethodExit { thread, .. } => Some(*thread),
        }
    }
}

/// Event request modifiers
#[derive(Debug, Clone)]
pub enum EventModifier {
    Count(i32),
    ThreadOnly(ThreadId),
    ClassOnly(ReferenceTypeId),
    ClassMatch(String),
    ClassExclude(String),
    LocationOnly(Location),
    /// A zero `ref_type` matches every exception class
    ExceptionOnly {
        ref_type: ReferenceTypeId,
        caught: bool,
        uncaught: bool,
    },
    Step {
        thread: ThreadId,
        size: i32,
        depth: i32,
    },
}

impl EventModifier {
    pub fn write_to(&self, buf: &mut Vec<u8>) {
        match self {
            EventModifier::Count(count) => {
                buf.put_u8(modifier_kinds::COUNT);
                buf.put_i32(*count);
            }
            EventModifier::ThreadOnly(thread) => {
                buf.put_u8(modifier_kinds::THREAD_ONLY);
                buf.put_u64(*thread);
            }
            EventModifier::ClassOnly(class) => {
                buf.put_u8(modifier_kinds::CLASS_ONLY);
                buf.put_u64(*class);
            }
            EventModifier::ClassMatch(pattern) => {
                buf.put_u8(modifier_kinds::CLASS_MATCH);
                buf.put_jdwp_string(pattern);
            }
            EventModifier::ClassExclude(pattern) => {
                buf.put_u8(modifier_kinds::CLASS_EXCLUDE);
                buf.put_jdwp_string(pattern);
            }
            EventModifier::LocationOnly(location) => {
                buf.put_u8(modifier_kinds::LOCATION_ONLY);
                buf.put_location(location);
            }
            EventModifier::ExceptionOnly {
                ref_type,
                caught,
                uncaught,
            } => {
                buf.put_u8(modifier_kinds::EXCEPTION_ONLY);
                buf.put_u64(*ref_type);
                buf.put_u8(*caught as u8);
                buf.put_u8(*uncaught as u8);
            }
            EventModifier::Step { thread, size, depth } => {
                buf.put_u8(modifier_kinds::STEP);
                buf.put_u64(*thread);
                buf.put_i32(*size);
                buf.put_i32(*depth);
            }
        }
    }
}

fn read_catch_location(buf: &mut &[u8]) -> JdwpResult<Option<Location>> {
    let location = read_location(buf)?;
    Ok(if location.is_null() { None } else { Some(location) })
}

/// Parse the body of an Event.Composite packet
pub fn parse_event_packet(data: &[u8]) -> JdwpResult<EventSet> {
    let mut buf = data;

    let suspend_policy = read_u8(&mut buf)?;
    let event_count = read_count(&mut buf)?;

    let mut events = Vec::with_capacity(event_count.min(64));

    for _ in 0..event_count {
        let kind = read_u8(&mut buf)?;
        let request_id = read_i32(&mut buf)?;

        let details = match kind {
            event_kinds::BREAKPOINT => EventKind::Breakpoint {
                thread: read_u64(&mut buf)?,
                location: read_location(&mut buf)?,
            },
            event_kinds::SINGLE_STEP => EventKind::Step {
                thread: read_u64(&mut buf)?,
                location: read_location(&mut buf)?,
            },
            event_kinds::EXCEPTION => EventKind::Exception {
                thread: read_u64(&mut buf)?,
                location: read_location(&mut buf)?,
                exception: read_tagged_object(&mut buf)?,
                catch_location: read_catch_location(&mut buf)?,
            },
            event_kinds::CLASS_PREPARE => EventKind::ClassPrepare {
                thread: read_u64(&mut buf)?,
                ref_type_tag: read_u8(&mut buf)?,
                ref_type: read_u64(&mut buf)?,
                signature: read_string(&mut buf)?,
                status: read_i32(&mut buf)?,
            },
            event_kinds::METHOD_ENTRY => EventKind::MethodEntry {
                thread: read_u64(&mut buf)?,
                location: read_location(&mut buf)?,
            },
            event_kinds::METHOD_EXIT => EventKind::MethodExit {
                thread: read_u64(&mut buf)?,
                location: read_location(&mut buf)?,
            },
            event_kinds::VM_START => EventKind::VMStart {
                thread: read_u64(&mut buf)?,
            },
            event_kinds::VM_DEATH => EventKind::VMDeath,
            event_kinds::THREAD_START => EventKind::ThreadStart {
                thread: read_u64(&mut buf)?,
            },
            event_kinds::THREAD_DEATH => EventKind::ThreadDeath {
                thread: read_u64(&mut buf)?,
            },
            // The body length of an unknown kind is unknown, so the rest of the set is unreadable
            _ => {
                return Err(JdwpError::Protocol(format!(
                    "Unsupported event kind: {}",
                    kind
                )))
            }
        };

        events.push(Event {
            kind,
            request_id,
            details,
        });
    }

    Ok(EventSet {
        suspend_policy,
        events,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::tags;

    fn put_location(buf: &mut Vec<u8>, class_id: u64, method_id: u64, index: u64) {
        buf.put_u8(1);
        buf.put_u64(class_id);
        buf.put_u64(method_id);
        buf.put_u64(index);
    }

    #[test]
    fn test_parse_exception_and_class_prepare() {
        let mut data = Vec::new();
        data.put_u8(1); // event thread
        data.put_i32(2);

        data.put_u8(event_kinds::EXCEPTION);
        data.put_i32(17);
        data.put_u64(0x10);
        put_location(&mut data, 0x20, 0x30, 4);
        data.put_u8(tags::OBJECT);
        data.put_u64(0x40);
        put_location(&mut data, 0, 0, 0);

        data.put_u8(event_kinds::CLASS_PREPARE);
        data.put_i32(18);
        data.put_u64(0x10);
        data.put_u8(1);
        data.put_u64(0x50);
        data.put_jdwp_string("Lcom/example/MainKt;");
        data.put_i32(7);

        let set = parse_event_packet(&data).unwrap();
        assert_eq!(set.suspend_policy, 1);
        assert_eq!(set.events.len(), 2);

        match &set.events[0].details {
            EventKind::Exception {
                thread,
                location,
                exception,
                catch_location,
            } => {
                assert_eq!(*thread, 0x10);
                assert_eq!(location.index, 4);
                assert_eq!(exception.id, 0x40);
                assert!(catch_location.is_none());
            }
            other => panic!("unexpected event {:?}", other),
        }

        match &set.events[1].details {
            EventKind::ClassPrepare { ref_type, signature, .. } => {
                assert_eq!(*ref_type, 0x50);
                assert_eq!(signature, "Lcom/example/MainKt;");
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(set.events[1].request_id, 18);
    }

    #[test]
    fn test_unknown_kind_is_an_error() {
        let mut data = Vec::new();
        data.put_u8(0);
        data.put_i32(1);
        data.put_u8(250);
        data.put_i32(0);
        assert!(parse_event_packet(&data).is_err());
    }

    #[test]
    fn test_modifier_encoding() {
        let mut buf = Vec::new();
        EventModifier::ExceptionOnly {
            ref_type: 0,
            caught: true,
            uncaught: false,
        }
        .write_to(&mut buf);
        assert_eq!(buf[0], modifier_kinds::EXCEPTION_ONLY);
        assert_eq!(&buf[9..], &[1, 0]);

        let mut buf = Vec::new();
        EventModifier::ClassMatch("com.example.*".into()).write_to(&mut buf);
        assert_eq!(buf[0], modifier_kinds::CLASS_MATCH);
        assert_eq!(&buf[1..5], &[0, 0, 0, 13]);
    }
}
