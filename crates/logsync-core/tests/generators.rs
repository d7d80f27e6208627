#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use logsync_core::event::Event;
use logsync_core::model::{Cursor, Level, Message, MessageId, MessageKind, SourceKind, SourceRef};
use proptest::prelude::*;

/// One scripted push-channel change against source `S`.
#[derive(Debug, Clone)]
pub enum Op {
    Add { id: u8, kind: MessageKind },
    Delete { id: u8 },
    /// An add for a source the client has never seen.
    Orphan { id: u8 },
}

pub fn arb_level() -> impl Strategy<Value = Level> + Clone {
    prop_oneof![
        Just(Level::Debug),
        Just(Level::Info),
        Just(Level::Warning),
        Just(Level::Error),
    ]
}

pub fn arb_message_kind() -> impl Strategy<Value = MessageKind> + Clone {
    prop_oneof![
        6 => Just(MessageKind::Log),
        1 => Just(MessageKind::TunnelReady),
        1 => Just(MessageKind::MetroInitializeStarted),
        1 => Just(MessageKind::BuildProgress),
        1 => Just(MessageKind::DeviceConnected),
        1 => Just(MessageKind::Other),
    ]
}

// Ids come from a small pool so scripts revisit messages: duplicate adds,
// deletes that hit, deletes that miss.
pub fn arb_op() -> impl Strategy<Value = Op> + Clone {
    prop_oneof![
        6 => (0u8..12, arb_message_kind()).prop_map(|(id, kind)| Op::Add { id, kind }),
        3 => (0u8..12).prop_map(|id| Op::Delete { id }),
        1 => (0u8..12).prop_map(|id| Op::Orphan { id }),
    ]
}

pub fn arb_script() -> impl Strategy<Value = Vec<Op>> + Clone {
    prop::collection::vec(arb_op(), 0..60)
}

pub fn message(id: &str, source: &str, kind: MessageKind, level: Level) -> Message {
    Message {
        id: MessageId::new(id),
        msg: format!("line {id}"),
        time: Utc
            .timestamp_opt(1_700_000_000, 0)
            .single()
            .expect("valid timestamp"),
        level,
        kind,
        source: SourceRef::new(source, SourceKind::Process),
    }
}

/// Cursor for the `seq`-th event of a script. Zero-padded so tests can
/// recover the sequence number.
pub fn cursor_at(seq: usize) -> Cursor {
    Cursor::new(format!("c{seq:06}"))
}

pub fn seq_of(cursor: &Cursor) -> usize {
    cursor.as_str()[1..].parse().expect("script cursor")
}

pub fn to_event(op: &Op, seq: usize) -> Event {
    let cursor = cursor_at(seq);
    match op {
        Op::Add { id, kind } => Event::added(
            cursor,
            message(&format!("m{id}"), "S", *kind, Level::Info),
        ),
        Op::Delete { id } => Event::deleted(
            cursor,
            message(&format!("m{id}"), "S", MessageKind::Log, Level::Info),
        ),
        Op::Orphan { id } => Event::added(
            cursor,
            message(&format!("o{id}"), "ghost", MessageKind::Log, Level::Info),
        ),
    }
}
