//! Position assignment strategies
//!
//! Fairness is decided when an entry is inserted, not when the scheduler
//! consumes the head: the scheduler always takes the lowest position.

use crate::config::OrderingPolicy;
use rdj_common::QueueEntry;
use std::collections::HashMap;

/// Where a new entry goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub position: i64,
    /// Entries at or after this position move down by one first
    pub shift_from: Option<i64>,
}

impl Placement {
    fn at(position: i64) -> Self {
        Self {
            position,
            shift_from: None,
        }
    }

    fn shifting(position: i64) -> Self {
        Self {
            position,
            shift_from: Some(position),
        }
    }
}

/// Pluggable position assignment
pub trait PositionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Place a new request from `submitter_id` into `queue` (ordered by position)
    fn place(&self, queue: &[QueueEntry], submitter_id: &str) -> Placement;
}

/// Build the strategy selected in configuration
pub fn strategy_for(policy: OrderingPolicy) -> Box<dyn PositionStrategy> {
    match policy {
        OrderingPolicy::Append => Box::new(Append),
        OrderingPolicy::RoundRobin => Box::new(RoundRobin),
    }
}

fn tail_position(queue: &[QueueEntry]) -> i64 {
    queue.iter().map(|e| e.position).max().unwrap_or(0) + 1
}

/// Strict arrival order: `max(position) + 1`
#[derive(Debug, Default, Clone, Copy)]
pub struct Append;

impl PositionStrategy for Append {
    fn name(&self) -> &'static str {
        "append"
    }

    fn place(&self, queue: &[QueueEntry], _submitter_id: &str) -> Placement {
        Placement::at(tail_position(queue))
    }
}

/// Interleave submitters by round
///
/// A submitter's k-th queued request lands after every queued request that is
/// some submitter's k-th or earlier, and before any later-round request.
#[derive(Debug, Default, Clone, Copy)]
pub struct RoundRobin;

impl RoundRobin {
    /// Zero-based round of every entry, in queue order
    fn rounds(queue: &[QueueEntry]) -> Vec<usize> {
        let mut seen: HashMap<&str, usize> = HashMap::new();
        queue
            .iter()
            .map(|e| {
                let count = seen.entry(e.submitter_id.as_str()).or_insert(0);
                let round = *count;
                *count += 1;
                round
            })
            .collect()
    }
}

impl PositionStrategy for RoundRobin {
    fn name(&self) -> &'static str {
        "round_robin"
    }

    fn place(&self, queue: &[QueueEntry], submitter_id: &str) -> Placement {
        let Some(first) = queue.first() else {
            return Placement::at(1);
        };

        let round = queue.iter().filter(|e| e.submitter_id == submitter_id).count();
        let rounds = Self::rounds(queue);

        let Some(last_same_or_earlier) = rounds.iter().rposition(|r| *r <= round) else {
            return Placement::at(first.position - 1);
        };

        let Some(next) = queue.get(last_same_or_earlier + 1) else {
            return Placement::at(tail_position(queue));
        };

        let after = queue[last_same_or_earlier].position + 1;
        if after < next.position {
            Placement::at(after)
        } else {
            Placement::shifting(next.position)
        }
    }
}
