//! Invariant checks run against the client after every merge and once at the
//! end of a run.

use std::fmt;

use logsync_core::cursor::Visibility;
use logsync_core::event::{Event, EventKind};
use logsync_core::merge::{MergeOutcome, triggers_refresh};
use logsync_core::model::Source;
use logsync_core::store::EntityStore;
use serde::{Deserialize, Serialize};

use crate::client::Applied;
use crate::server::seq_of;

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OracleResult {
    /// `true` iff no violations were found.
    pub passed: bool,
    pub violations: Vec<InvariantViolation>,
}

/// One broken invariant, with enough context to find it in the trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvariantViolation {
    /// `count != nodes.len()` or `unread_count > count` after a merge.
    Summary {
        cursor: String,
        source: String,
        detail: String,
    },
    /// The resume cursor moved backwards within one load generation.
    CursorRegression {
        generation: u64,
        previous: u64,
        current: u64,
    },
    /// An escalated event still changed the store.
    EscalationWrote {
        cursor: String,
        revision_before: u64,
        revision_after: u64,
    },
    /// The engine escalated although the owning source was cached.
    SpuriousEscalation { cursor: String, source: String },
    /// The owning source was not cached but the engine merged anyway.
    MissedEscalation { cursor: String, source: String },
    /// `requested` on an escalation disagrees with whether a resync was
    /// already pending.
    ResyncFolding {
        cursor: String,
        requested: bool,
        pending_before: bool,
    },
    /// Last-read reporting disagrees with the merge outcome.
    ReadMismatch { cursor: String, detail: String },
    /// A snapshot refresh was requested when it should not have been, or
    /// the reverse.
    RefreshMismatch { cursor: String, expected: bool },
    /// A server source is absent from the client at the end of a run.
    MissingSource { source: String },
    /// A source's message sequence differs from the server's.
    Divergence {
        source: String,
        only_client: Vec<String>,
        only_server: Vec<String>,
    },
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Summary {
                cursor,
                source,
                detail,
            } => write!(f, "Summary: {source} after {cursor}: {detail}"),
            Self::CursorRegression {
                generation,
                previous,
                current,
            } => write!(
                f,
                "CursorRegression: generation {generation} moved from {previous} back to {current}"
            ),
            Self::EscalationWrote {
                cursor,
                revision_before,
                revision_after,
            } => write!(
                f,
                "EscalationWrote: {cursor} escalated but revision went \
                 {revision_before} -> {revision_after}"
            ),
            Self::SpuriousEscalation { cursor, source } => {
                write!(f, "SpuriousEscalation: {cursor} escalated with {source} cached")
            }
            Self::MissedEscalation { cursor, source } => {
                write!(f, "MissedEscalation: {cursor} merged into uncached {source}")
            }
            Self::ResyncFolding {
                cursor,
                requested,
                pending_before,
            } => write!(
                f,
                "ResyncFolding: {cursor} requested={requested} while pending={pending_before}"
            ),
            Self::ReadMismatch { cursor, detail } => {
                write!(f, "ReadMismatch: {cursor}: {detail}")
            }
            Self::RefreshMismatch { cursor, expected } => {
                write!(f, "RefreshMismatch: {cursor} expected refresh={expected}")
            }
            Self::MissingSource { source } => write!(f, "MissingSource: {source}"),
            Self::Divergence {
                source,
                only_client,
                only_server,
            } => write!(
                f,
                "Divergence: {source} (only_client={only_client:?}, only_server={only_server:?})"
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Oracle
// ---------------------------------------------------------------------------

/// Stateful checker fed every merge of one run.
#[derive(Debug, Clone, Default)]
pub struct InvariantOracle {
    check_order: bool,
    // (generation, seq) of the resume cursor after the previous merge.
    last_resume: Option<(u64, u64)>,
    violations: Vec<InvariantViolation>,
}

impl InvariantOracle {
    /// `check_order` enables the cursor-monotonicity check, which only holds
    /// when the link delivers in server order.
    #[must_use]
    pub fn new(check_order: bool) -> Self {
        Self {
            check_order,
            ..Self::default()
        }
    }

    pub fn check_apply(&mut self, event: &Event, applied: &Applied, store: &EntityStore) {
        let cursor = event.cursor.to_string();
        self.check_summaries(&cursor, store);
        self.check_escalation(event, applied, &cursor);
        self.check_reads(event, applied, &cursor);
        self.check_refresh(event, applied, store, &cursor);
        if self.check_order {
            self.check_resume(applied.generation, store);
        }
    }

    fn check_summaries(&mut self, cursor: &str, store: &EntityStore) {
        for source in store.sources() {
            if let Some(detail) = source.messages.invariant_violation() {
                self.violations.push(InvariantViolation::Summary {
                    cursor: cursor.to_string(),
                    source: source.source_ref().to_string(),
                    detail,
                });
            }
        }
    }

    fn check_escalation(&mut self, event: &Event, applied: &Applied, cursor: &str) {
        let source = event.owner().to_string();
        match &applied.outcome {
            MergeOutcome::Escalated { requested, .. } => {
                if applied.revision_before != applied.revision_after {
                    self.violations.push(InvariantViolation::EscalationWrote {
                        cursor: cursor.to_string(),
                        revision_before: applied.revision_before,
                        revision_after: applied.revision_after,
                    });
                }
                if applied.owner_cached {
                    self.violations.push(InvariantViolation::SpuriousEscalation {
                        cursor: cursor.to_string(),
                        source,
                    });
                }
                if *requested == applied.resync_pending_before {
                    self.violations.push(InvariantViolation::ResyncFolding {
                        cursor: cursor.to_string(),
                        requested: *requested,
                        pending_before: applied.resync_pending_before,
                    });
                }
            }
            MergeOutcome::Disposed => {}
            _ if !applied.owner_cached => {
                self.violations.push(InvariantViolation::MissedEscalation {
                    cursor: cursor.to_string(),
                    source,
                });
            }
            _ => {}
        }
    }

    fn check_reads(&mut self, event: &Event, applied: &Applied, cursor: &str) {
        let mismatch = |detail: String| InvariantViolation::ReadMismatch {
            cursor: cursor.to_string(),
            detail,
        };
        match (&applied.outcome, applied.read_updates.as_slice()) {
            (MergeOutcome::Appended { read: true, .. }, [update]) => {
                if applied.visibility != Visibility::Foreground {
                    self.violations
                        .push(mismatch("read advanced while in background".into()));
                }
                if update.cursor != event.cursor || update.source_id != event.owner().id {
                    self.violations.push(mismatch(format!(
                        "reported {}@{} for {}",
                        update.source_id,
                        update.cursor,
                        event.owner()
                    )));
                }
            }
            (MergeOutcome::Appended { read: true, .. }, updates) => {
                self.violations.push(mismatch(format!(
                    "read append reported {} updates",
                    updates.len()
                )));
            }
            (_, []) => {}
            (outcome, updates) => {
                self.violations.push(mismatch(format!(
                    "{} reported {} updates",
                    outcome.label(),
                    updates.len()
                )));
            }
        }
    }

    fn check_refresh(&mut self, event: &Event, applied: &Applied, store: &EntityStore, cursor: &str) {
        if matches!(applied.outcome, MergeOutcome::Disposed) {
            return;
        }
        let host = store
            .read_snapshot()
            .found()
            .map(|s| s.settings.host_type)
            .unwrap_or_default();
        let expected = event.kind == EventKind::Added && triggers_refresh(event.node.kind, host);
        if expected != applied.refresh_requested {
            self.violations.push(InvariantViolation::RefreshMismatch {
                cursor: cursor.to_string(),
                expected,
            });
        }
    }

    fn check_resume(&mut self, generation: u64, store: &EntityStore) {
        let Some(current) = store.resume_cursor().as_ref().and_then(seq_of) else {
            return;
        };
        match self.last_resume {
            Some((last_generation, previous)) if last_generation == generation && current < previous => {
                self.violations.push(InvariantViolation::CursorRegression {
                    generation,
                    previous,
                    current,
                });
            }
            _ => {}
        }
        self.last_resume = Some((generation, current));
    }

    /// Compare every server source with the client's copy.
    pub fn check_convergence(&mut self, server: &[Source], store: &EntityStore) {
        let client = store.sources();
        for expected in server {
            let Some(actual) = client
                .iter()
                .find(|s| s.id == expected.id && s.kind == expected.kind)
            else {
                self.violations.push(InvariantViolation::MissingSource {
                    source: expected.source_ref().to_string(),
                });
                continue;
            };
            let want = node_ids(expected);
            let got = node_ids(actual);
            if want != got {
                self.violations.push(InvariantViolation::Divergence {
                    source: expected.source_ref().to_string(),
                    only_client: got.iter().filter(|id| !want.contains(id)).cloned().collect(),
                    only_server: want.iter().filter(|id| !got.contains(id)).cloned().collect(),
                });
            }
        }
    }

    #[must_use]
    pub fn violations(&self) -> &[InvariantViolation] {
        &self.violations
    }

    #[must_use]
    pub fn finish(self) -> OracleResult {
        OracleResult {
            passed: self.violations.is_empty(),
            violations: self.violations,
        }
    }
}

fn node_ids(source: &Source) -> Vec<String> {
    source
        .messages
        .nodes
        .iter()
        .map(|m| m.id.to_string())
        .collect()
}
