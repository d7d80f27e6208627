//! End-to-end merge scenarios over a visible source `S` holding `m1, m2`
//! with one unread message and last-read cursor `c5`.

use logsync_core::cursor::{LastReadLog, Visibility, VisibilitySignal};
use logsync_core::event::Event;
use logsync_core::merge::{MergeEngine, MergeOutcome, NoTrigger};
use logsync_core::model::{
    Cursor, InitialState, LayoutState, Level, MessageConnection, MessageKind, ProjectSnapshot,
    Source, SourceId, SourceKind,
};
use logsync_core::store::EntityStore;
use std::sync::Arc;

#[path = "generators.rs"]
mod generators;
use generators::message;

fn make_store(nodes: &[&str], unread: usize) -> Arc<EntityStore> {
    let mut source = Source::new("S", SourceKind::Process, "Metro Bundler");
    source.messages = MessageConnection {
        count: nodes.len(),
        unread_count: unread,
        nodes: nodes
            .iter()
            .map(|id| message(id, "S", MessageKind::Log, Level::Info))
            .collect(),
        last_read_cursor: Some(Cursor::new("c5")),
    };
    Arc::new(EntityStore::from_initial(InitialState {
        snapshot: ProjectSnapshot {
            layout: LayoutState {
                selected: Some(SourceId::new("S")),
                sources: vec![SourceId::new("S")],
            },
            ..ProjectSnapshot::default()
        },
        sources: vec![source],
        last_cursor: Some(Cursor::new("c5")),
    }))
}

fn make_engine(store: &Arc<EntityStore>, visibility: Visibility) -> (MergeEngine, Arc<LastReadLog>) {
    let sink = Arc::new(LastReadLog::new());
    let engine = MergeEngine::new(
        Arc::clone(store),
        VisibilitySignal::new(visibility),
        Arc::new(NoTrigger),
        Arc::new(NoTrigger),
    )
    .with_sink(sink.clone());
    (engine, sink)
}

fn read_s(store: &EntityStore) -> MessageConnection {
    store
        .read_source(&SourceId::new("S"), SourceKind::Process)
        .found()
        .expect("S is loaded")
        .source
        .messages
}

fn ids(conn: &MessageConnection) -> Vec<&str> {
    conn.nodes.iter().map(|m| m.id.as_str()).collect()
}

#[test]
fn background_add_is_unread() {
    let store = make_store(&["m1", "m2"], 1);
    let (mut engine, sink) = make_engine(&store, Visibility::Background);

    engine.apply(&Event::added(
        Cursor::new("c6"),
        message("m3", "S", MessageKind::Log, Level::Warning),
    ));

    let conn = read_s(&store);
    assert_eq!(conn.count, 3);
    assert_eq!(conn.unread_count, 2);
    assert_eq!(ids(&conn), ["m1", "m2", "m3"]);
    assert_eq!(conn.last_read_cursor, Some(Cursor::new("c5")));
    assert!(sink.is_empty());
}

#[test]
fn foreground_add_on_visible_source_is_read() {
    let store = make_store(&["m1", "m2"], 1);
    let (mut engine, sink) = make_engine(&store, Visibility::Foreground);

    let outcome = engine.apply(&Event::added(
        Cursor::new("c6"),
        message("m3", "S", MessageKind::Log, Level::Info),
    ));

    assert!(matches!(outcome, MergeOutcome::Appended { read: true, .. }));
    let conn = read_s(&store);
    assert_eq!(conn.count, 3);
    assert_eq!(conn.unread_count, 1);
    assert_eq!(conn.last_read_cursor, Some(Cursor::new("c6")));
    let updates = sink.updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].source_id, SourceId::new("S"));
    assert_eq!(updates[0].source_kind, SourceKind::Process);
    assert_eq!(updates[0].cursor, Cursor::new("c6"));
}

#[test]
fn delete_removes_node_and_keeps_unread() {
    let store = make_store(&["m1", "m2", "m3"], 2);
    let (mut engine, _sink) = make_engine(&store, Visibility::Background);

    engine.apply(&Event::deleted(
        Cursor::new("c7"),
        message("m2", "S", MessageKind::Log, Level::Info),
    ));

    let conn = read_s(&store);
    assert_eq!(ids(&conn), ["m1", "m3"]);
    assert_eq!(conn.count, 2);
    assert_eq!(conn.unread_count, 2);
    assert_eq!(store.resume_cursor(), Some(Cursor::new("c7")));
}
