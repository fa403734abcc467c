use crate::ingestor::IngestionResult;
use std::collections::{HashMap, HashSet};

/// Dispatch state of one tracked session.
///
/// `InFlight` marks single ownership: a session is never dispatched twice
/// concurrently, because interleaved cycles could persist a stale checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    InFlight,
    Backoff { until_ms: u64 },
}

/// Registry entry for one session.
#[derive(Debug, Clone)]
pub struct SessionSlot {
    pub state: SlotState,
    pub consecutive_failures: u32,
    pub last_outcome: Option<&'static str>,
    /// True once a cycle returned zero events with nothing more pending.
    pub drained: bool,
}

impl SessionSlot {
    fn new() -> Self {
        Self {
            state: SlotState::Idle,
            consecutive_failures: 0,
            last_outcome: None,
            drained: false,
        }
    }
}

/// Session id -> owning-worker registry.
///
/// Failed sessions are never dropped; they are retried indefinitely on an
/// exponentially slower cadence so a stuck session surfaces as a persistent
/// alert instead of silent data loss.
pub struct SessionRegistry {
    slots: HashMap<String, SessionSlot>,
    error_backoff_base_ms: u64,
    error_backoff_cap_ms: u64,
}

impl SessionRegistry {
    pub fn new(error_backoff_base_ms: u64, error_backoff_cap_ms: u64) -> Self {
        Self {
            slots: HashMap::new(),
            error_backoff_base_ms,
            error_backoff_cap_ms,
        }
    }

    /// Registers any sessions not yet tracked.
    pub fn observe_open(&mut self, session_ids: &[String]) -> usize {
        let mut added = 0;
        for id in session_ids {
            if !self.slots.contains_key(id) {
                self.slots.insert(id.clone(), SessionSlot::new());
                added += 1;
            }
        }
        added
    }

    /// Claims every session due for a cycle, marking each in-flight.
    pub fn claim_due(&mut self, now_ms: u64) -> Vec<String> {
        let mut due: Vec<String> = self
            .slots
            .iter()
            .filter(|(_, slot)| match slot.state {
                SlotState::Idle => true,
                SlotState::Backoff { until_ms } => now_ms >= until_ms,
                SlotState::InFlight => false,
            })
            .map(|(id, _)| id.clone())
            .collect();
        due.sort();
        for id in &due {
            if let Some(slot) = self.slots.get_mut(id) {
                slot.state = SlotState::InFlight;
            }
        }
        due
    }

    /// Claims a single idle session, for immediate requeue after `has_more`.
    pub fn claim(&mut self, session_id: &str) -> bool {
        match self.slots.get_mut(session_id) {
            Some(slot) if slot.state == SlotState::Idle => {
                slot.state = SlotState::InFlight;
                true
            }
            _ => false,
        }
    }

    /// Folds a finished cycle back into the slot.
    pub fn complete(&mut self, result: &IngestionResult, now_ms: u64) {
        let Some(slot) = self.slots.get_mut(&result.session_id) else {
            return;
        };
        slot.last_outcome = Some(result.outcome.label());
        if result.outcome.is_ok() {
            slot.consecutive_failures = 0;
            slot.drained = result.pulled == 0 && !result.has_more;
            slot.state = SlotState::Idle;
        } else {
            slot.consecutive_failures = slot.consecutive_failures.saturating_add(1);
            slot.drained = false;
            let exponent = slot.consecutive_failures.saturating_sub(1).min(32);
            let delay = self
                .error_backoff_base_ms
                .saturating_mul(1u64 << exponent)
                .min(self.error_backoff_cap_ms);
            slot.state = SlotState::Backoff {
                until_ms: now_ms.saturating_add(delay),
            };
        }
    }

    /// Sessions that left the source's open set after draining completely.
    /// These are permanently closed and can be retired.
    pub fn retirable(&self, open: &HashSet<String>) -> Vec<String> {
        let mut ids: Vec<String> = self
            .slots
            .iter()
            .filter(|(id, slot)| {
                !open.contains(*id) && slot.state == SlotState::Idle && slot.drained
            })
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Drops tracking for a retired session.
    pub fn remove(&mut self, session_id: &str) {
        self.slots.remove(session_id);
    }

    pub fn slot(&self, session_id: &str) -> Option<&SessionSlot> {
        self.slots.get(session_id)
    }

    pub fn tracked(&self) -> usize {
        self.slots.len()
    }
}
