use chrono::{TimeZone, Utc};
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use logsync_core::cursor::{Visibility, VisibilitySignal};
use logsync_core::event::Event;
use logsync_core::merge::{MergeEngine, NoTrigger};
use logsync_core::model::{
    Cursor, InitialState, LayoutState, Level, Message, MessageId, MessageKind, ProjectSnapshot,
    Source, SourceId, SourceKind, SourceRef,
};
use logsync_core::store::EntityStore;
use std::sync::Arc;

const TIERS: [usize; 3] = [100, 1_000, 5_000];

fn make_events(n: usize) -> Vec<Event> {
    let time = Utc
        .timestamp_opt(1_700_000_000, 0)
        .single()
        .unwrap_or_default();
    (0..n)
        .map(|i| {
            let node = Message {
                id: MessageId::new(format!("m{i}")),
                msg: format!("bundling module {i}"),
                time,
                level: Level::Info,
                kind: MessageKind::Log,
                source: SourceRef::new(if i % 4 == 0 { "d1" } else { "p1" }, SourceKind::Process),
            };
            let cursor = Cursor::new(format!("c{i}"));
            if i % 10 == 9 {
                let mut target = node;
                target.id = MessageId::new(format!("m{}", i - 5));
                Event::deleted(cursor, target)
            } else {
                Event::added(cursor, node)
            }
        })
        .collect()
}

fn make_engine(visibility: Visibility) -> MergeEngine {
    let store = Arc::new(EntityStore::from_initial(InitialState {
        snapshot: ProjectSnapshot {
            layout: LayoutState {
                selected: None,
                sources: vec![SourceId::new("p1")],
            },
            ..ProjectSnapshot::default()
        },
        sources: vec![
            Source::new("p1", SourceKind::Process, "Metro"),
            Source::new("d1", SourceKind::Process, "Device log"),
        ],
        last_cursor: None,
    }));
    MergeEngine::new(
        store,
        VisibilitySignal::new(visibility),
        Arc::new(NoTrigger),
        Arc::new(NoTrigger),
    )
}

fn bench_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge.apply");
    for n in TIERS {
        let events = make_events(n);
        group.throughput(Throughput::Elements(events.len() as u64));
        for (label, visibility) in [
            ("foreground", Visibility::Foreground),
            ("background", Visibility::Background),
        ] {
            group.bench_with_input(BenchmarkId::new(label, n), &events, |b, events| {
                b.iter(|| {
                    let mut engine = make_engine(visibility);
                    for event in events {
                        black_box(engine.apply(event));
                    }
                });
            });
        }
    }
    group.finish();
}

criterion_group!(benches, bench_merge);
criterion_main!(benches);
