use serde::{Deserialize, Serialize};

use crate::rng::DeterministicRng;

/// Fault injection for the simulated server-to-client link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultConfig {
    /// Maximum delivery delay in rounds.
    pub max_delay_rounds: u8,
    /// Percentage of sends lost outright.
    pub drop_rate_percent: u8,
    /// Percentage of sends delivered twice in a row.
    pub duplicate_rate_percent: u8,
    /// Percentage chance that a round's ready batch is delivered backwards.
    pub reorder_rate_percent: u8,
}

impl FaultConfig {
    /// Faults that keep the stream complete and in order: delays and
    /// back-to-back duplicates only.
    #[must_use]
    pub const fn lossless() -> Self {
        Self {
            max_delay_rounds: 2,
            drop_rate_percent: 0,
            duplicate_rate_percent: 5,
            reorder_rate_percent: 0,
        }
    }

    /// Whether the client is guaranteed to see every event in server order.
    #[must_use]
    pub const fn preserves_stream(&self) -> bool {
        self.drop_rate_percent == 0 && self.reorder_rate_percent == 0
    }
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            max_delay_rounds: 2,
            drop_rate_percent: 5,
            duplicate_rate_percent: 3,
            reorder_rate_percent: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Pending<T> {
    deliver_at_round: u64,
    payload: T,
}

/// Result of a send attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendOutcome {
    pub dropped: bool,
    pub duplicated: bool,
    /// Rounds until delivery, after queueing behind earlier sends.
    pub delay_rounds: u64,
}

/// Everything that became deliverable in one round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliverOutcome<T> {
    pub delivered: Vec<T>,
    pub reordered: bool,
}

/// One-way link modelled as a FIFO queue with fault injection.
///
/// A subscription is an ordered stream, so a delayed send holds back every
/// later send too: delivery rounds never decrease along the queue. Only the
/// explicit reorder fault breaks server order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedNetwork<T> {
    pending: Vec<Pending<T>>,
    fault: FaultConfig,
}

impl<T: Clone> SimulatedNetwork<T> {
    #[must_use]
    pub const fn new(fault: FaultConfig) -> Self {
        Self {
            pending: Vec::new(),
            fault,
        }
    }

    #[must_use]
    pub const fn fault_config(&self) -> FaultConfig {
        self.fault
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn send(&mut self, payload: T, round: u64, rng: &mut DeterministicRng) -> SendOutcome {
        if rng.hit_rate_percent(self.fault.drop_rate_percent) {
            return SendOutcome {
                dropped: true,
                duplicated: false,
                delay_rounds: 0,
            };
        }

        let delay = rng.next_bounded(u64::from(self.fault.max_delay_rounds).saturating_add(1));
        let queued_behind = self.pending.last().map_or(0, |p| p.deliver_at_round);
        let deliver_at_round = round.saturating_add(delay).max(queued_behind);

        let duplicated = rng.hit_rate_percent(self.fault.duplicate_rate_percent);
        if duplicated {
            self.pending.push(Pending {
                deliver_at_round,
                payload: payload.clone(),
            });
        }
        self.pending.push(Pending {
            deliver_at_round,
            payload,
        });

        SendOutcome {
            dropped: false,
            duplicated,
            delay_rounds: deliver_at_round - round,
        }
    }

    /// Take everything due by `round`, in queue order unless the reorder
    /// fault fires.
    pub fn deliver_ready(&mut self, round: u64, rng: &mut DeterministicRng) -> DeliverOutcome<T> {
        let split = self
            .pending
            .iter()
            .position(|p| p.deliver_at_round > round)
            .unwrap_or(self.pending.len());
        let mut delivered: Vec<T> = self.pending.drain(..split).map(|p| p.payload).collect();

        let reordered =
            delivered.len() > 1 && rng.hit_rate_percent(self.fault.reorder_rate_percent);
        if reordered {
            delivered.reverse();
        }
        DeliverOutcome {
            delivered,
            reordered,
        }
    }

    /// Flush the queue in order, ignoring delays.
    pub fn drain_all(&mut self) -> Vec<T> {
        self.pending.drain(..).map(|p| p.payload).collect()
    }

    /// Drop in-flight payloads for which `keep` returns `false`.
    ///
    /// Models re-subscribing from a newer cursor: the new subscription never
    /// replays what the client already has.
    pub fn retain(&mut self, mut keep: impl FnMut(&T) -> bool) -> usize {
        let before = self.pending.len();
        self.pending.retain(|p| keep(&p.payload));
        before - self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet() -> FaultConfig {
        FaultConfig {
            max_delay_rounds: 0,
            drop_rate_percent: 0,
            duplicate_rate_percent: 0,
            reorder_rate_percent: 0,
        }
    }

    #[test]
    fn quiet_link_delivers_same_round_in_order() {
        let mut rng = DeterministicRng::new(1);
        let mut net = SimulatedNetwork::new(quiet());
        for n in 0..5 {
            let outcome = net.send(n, 3, &mut rng);
            assert!(!outcome.dropped);
            assert_eq!(outcome.delay_rounds, 0);
        }
        let out = net.deliver_ready(3, &mut rng);
        assert_eq!(out.delivered, [0, 1, 2, 3, 4]);
        assert!(!out.reordered);
        assert_eq!(net.pending_len(), 0);
    }

    #[test]
    fn delayed_send_holds_back_later_sends() {
        let mut rng = DeterministicRng::new(9);
        let mut net = SimulatedNetwork::new(FaultConfig {
            max_delay_rounds: 4,
            ..quiet()
        });
        let mut last_due = 0;
        for n in 0..50_u64 {
            let outcome = net.send(n, n / 5, &mut rng);
            let due = n / 5 + outcome.delay_rounds;
            assert!(due >= last_due, "send {n} due before its predecessor");
            last_due = due;
        }
        let mut seen = Vec::new();
        for round in 0..=last_due {
            seen.extend(net.deliver_ready(round, &mut rng).delivered);
        }
        assert_eq!(seen, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn full_drop_rate_loses_everything() {
        let mut rng = DeterministicRng::new(2);
        let mut net = SimulatedNetwork::new(FaultConfig {
            drop_rate_percent: 100,
            ..quiet()
        });
        assert!(net.send(1, 0, &mut rng).dropped);
        assert_eq!(net.pending_len(), 0);
    }

    #[test]
    fn duplicates_arrive_back_to_back() {
        let mut rng = DeterministicRng::new(3);
        let mut net = SimulatedNetwork::new(FaultConfig {
            duplicate_rate_percent: 100,
            ..quiet()
        });
        assert!(net.send('a', 0, &mut rng).duplicated);
        assert!(net.send('b', 0, &mut rng).duplicated);
        assert_eq!(net.drain_all(), ['a', 'a', 'b', 'b']);
    }

    #[test]
    fn reorder_reverses_a_ready_batch() {
        let mut rng = DeterministicRng::new(4);
        let mut net = SimulatedNetwork::new(FaultConfig {
            reorder_rate_percent: 100,
            ..quiet()
        });
        for n in 0..3 {
            let _ = net.send(n, 0, &mut rng);
        }
        let out = net.deliver_ready(0, &mut rng);
        assert!(out.reordered);
        assert_eq!(out.delivered, [2, 1, 0]);
    }

    #[test]
    fn retain_discards_superseded_payloads() {
        let mut rng = DeterministicRng::new(5);
        let mut net = SimulatedNetwork::new(quiet());
        for n in 0..6 {
            let _ = net.send(n, 0, &mut rng);
        }
        assert_eq!(net.retain(|n| *n >= 4), 4);
        assert_eq!(net.drain_all(), [4, 5]);
    }
}
