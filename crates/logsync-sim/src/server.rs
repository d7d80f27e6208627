use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use logsync_core::event::Event;
use logsync_core::model::{
    Cursor, InitialState, LayoutState, Level, Message, MessageConnection, MessageId, MessageKind,
    ProjectConfig, ProjectSnapshot, Source, SourceId, SourceKind,
};

use crate::rng::DeterministicRng;

const LEVELS: [Level; 4] = [Level::Debug, Level::Info, Level::Warning, Level::Error];
// Sources pinned into the layout; anything created later is off-screen.
const PINNED_SOURCES: usize = 2;

/// Cursor text for server sequence number `seq`.
#[must_use]
pub fn cursor_for(seq: u64) -> Cursor {
    Cursor::new(format!("c{seq:08}"))
}

/// Sequence number encoded in a simulator cursor.
#[must_use]
pub fn seq_of(cursor: &Cursor) -> Option<u64> {
    cursor.as_str().strip_prefix('c')?.parse().ok()
}

/// Relative weights of what the server does next, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Workload {
    /// Start a new source and log its first line.
    pub new_source_percent: u8,
    /// Delete an existing message.
    pub delete_percent: u8,
}

impl Default for Workload {
    fn default() -> Self {
        Self {
            new_source_percent: 5,
            delete_percent: 15,
        }
    }
}

/// Authoritative event log and the state it implies.
///
/// Every event the server emits has already been applied to its own
/// sources, so [`initial_state`](Self::initial_state) is always the exact
/// result of the log so far.
#[derive(Debug, Clone)]
pub struct SimulatedServer {
    sources: Vec<Source>,
    max_sources: usize,
    workload: Workload,
    next_seq: u64,
    next_message: u64,
    next_source: u64,
    epoch: DateTime<Utc>,
}

impl SimulatedServer {
    #[must_use]
    pub fn new(initial_sources: usize, max_sources: usize, workload: Workload) -> Self {
        let mut server = Self {
            sources: Vec::new(),
            max_sources: max_sources.max(initial_sources),
            workload,
            next_seq: 0,
            next_message: 0,
            next_source: 0,
            epoch: Utc
                .timestamp_opt(1_700_000_000, 0)
                .single()
                .unwrap_or_default(),
        };
        for _ in 0..initial_sources {
            server.open_source();
        }
        server
    }

    #[must_use]
    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    /// Sequence number of the newest event, if any was emitted.
    #[must_use]
    pub const fn last_seq(&self) -> Option<u64> {
        self.next_seq.checked_sub(1)
    }

    /// What a full fetch returns right now.
    #[must_use]
    pub fn initial_state(&self) -> InitialState {
        let pinned: Vec<SourceId> = self
            .sources
            .iter()
            .take(PINNED_SOURCES)
            .map(|s| s.id.clone())
            .collect();
        InitialState {
            snapshot: ProjectSnapshot {
                config: ProjectConfig {
                    name: "sim-app".into(),
                    ..ProjectConfig::default()
                },
                layout: LayoutState {
                    selected: pinned.first().cloned(),
                    sources: pinned,
                },
                ..ProjectSnapshot::default()
            },
            sources: self.sources.clone(),
            last_cursor: self.last_seq().map(cursor_for),
        }
    }

    /// Emit the next event and apply it to the server's own state.
    pub fn next_event(&mut self, rng: &mut DeterministicRng) -> Event {
        let roll = rng.next_bounded(100);
        let new_source_cut = u64::from(self.workload.new_source_percent);
        let delete_cut = new_source_cut + u64::from(self.workload.delete_percent);

        let wants_new_source = roll < new_source_cut && self.sources.len() < self.max_sources;
        if wants_new_source || self.sources.is_empty() {
            let slot = self.open_source();
            return self.add_message(slot, rng);
        }
        let deleted = if roll < delete_cut {
            self.delete_message(rng)
        } else {
            None
        };
        if let Some(event) = deleted {
            return event;
        }
        let slot = rng.next_index(self.sources.len());
        self.add_message(slot, rng)
    }

    fn open_source(&mut self) -> usize {
        let n = self.next_source;
        self.next_source += 1;
        let (id, kind, name) = if n % 3 == 2 {
            (format!("d{n}"), SourceKind::Device, format!("Device {n}"))
        } else {
            (format!("p{n}"), SourceKind::Process, format!("Process {n}"))
        };
        self.sources.push(Source::new(id, kind, name));
        self.sources.len() - 1
    }

    fn take_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn add_message(&mut self, slot: usize, rng: &mut DeterministicRng) -> Event {
        let seq = self.take_seq();
        let n = self.next_message;
        self.next_message += 1;

        let source = &mut self.sources[slot];
        let node = Message {
            id: MessageId::new(format!("m{n}")),
            msg: format!("line {n}"),
            time: self.epoch + TimeDelta::seconds(i64::try_from(seq).unwrap_or(i64::MAX)),
            level: rng.pick(&LEVELS).copied().unwrap_or(Level::Info),
            kind: rng.pick(&MessageKind::ALL).copied().unwrap_or_default(),
            source: source.source_ref(),
        };
        let mut nodes = std::mem::take(&mut source.messages.nodes);
        nodes.push(node.clone());
        source.messages = MessageConnection::from_nodes(nodes);
        Event::added(cursor_for(seq), node)
    }

    fn delete_message(&mut self, rng: &mut DeterministicRng) -> Option<Event> {
        let candidates: Vec<usize> = self
            .sources
            .iter()
            .enumerate()
            .filter(|(_, s)| !s.messages.nodes.is_empty())
            .map(|(i, _)| i)
            .collect();
        let slot = *rng.pick(&candidates)?;
        let seq = self.take_seq();

        let source = &mut self.sources[slot];
        let position = rng.next_index(source.messages.nodes.len());
        let mut nodes = std::mem::take(&mut source.messages.nodes);
        let node = nodes.remove(position);
        source.messages = MessageConnection::from_nodes(nodes);
        Some(Event::deleted(cursor_for(seq), node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logsync_core::event::EventKind;

    #[test]
    fn cursor_round_trips_sequence() {
        assert_eq!(cursor_for(42).as_str(), "c00000042");
        assert_eq!(seq_of(&cursor_for(42)), Some(42));
        assert_eq!(seq_of(&Cursor::new("x1")), None);
    }

    #[test]
    fn cursors_are_consecutive() {
        let mut rng = DeterministicRng::new(11);
        let mut server = SimulatedServer::new(2, 4, Workload::default());
        for expected in 0..100 {
            let event = server.next_event(&mut rng);
            assert_eq!(seq_of(&event.cursor), Some(expected));
        }
        assert_eq!(server.last_seq(), Some(99));
    }

    #[test]
    fn state_reflects_emitted_events() {
        let mut rng = DeterministicRng::new(12);
        let mut server = SimulatedServer::new(2, 2, Workload::default());
        let mut live = 0_i64;
        for _ in 0..200 {
            match server.next_event(&mut rng).kind {
                EventKind::Added => live += 1,
                EventKind::Deleted => live -= 1,
            }
        }
        let total: usize = server.sources().iter().map(|s| s.messages.count).sum();
        assert_eq!(i64::try_from(total).expect("fits"), live);
        for source in server.sources() {
            assert!(source.messages.invariant_violation().is_none());
        }
    }

    #[test]
    fn source_count_is_capped() {
        let mut rng = DeterministicRng::new(13);
        let mut server = SimulatedServer::new(
            1,
            3,
            Workload {
                new_source_percent: 100,
                delete_percent: 0,
            },
        );
        for _ in 0..20 {
            let _ = server.next_event(&mut rng);
        }
        assert_eq!(server.sources().len(), 3);
    }

    #[test]
    fn initial_state_pins_first_sources() {
        let server = SimulatedServer::new(4, 4, Workload::default());
        let state = server.initial_state();
        assert_eq!(state.sources.len(), 4);
        assert_eq!(state.snapshot.layout.sources.len(), PINNED_SOURCES);
        assert_eq!(state.last_cursor, None);
    }
}
