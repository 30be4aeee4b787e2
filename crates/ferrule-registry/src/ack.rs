use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::message::RegistryMessage;

/// Default wait for an ACK before a message is sent again.
pub const DEFAULT_ACK_GRACE: Duration = Duration::from_secs(10);

/// Messages sent but not yet acknowledged, keyed by sequence.
#[derive(Debug)]
pub struct AckTracker {
    grace: Duration,
    outstanding: HashMap<u64, (RegistryMessage, Instant)>,
}

impl AckTracker {
    pub fn new(grace: Duration) -> Self {
        Self {
            grace,
            outstanding: HashMap::new(),
        }
    }

    pub fn track(&mut self, message: RegistryMessage, now: Instant) {
        self.outstanding.insert(message.sequence, (message, now));
    }

    /// Returns `false` for an unknown or already acknowledged sequence.
    pub fn on_ack(&mut self, sequence: u64) -> bool {
        self.outstanding.remove(&sequence).is_some()
    }

    /// Messages un-acked for longer than the grace period. Each one is
    /// restamped, so it comes due again only after another full period.
    pub fn due(&mut self, now: Instant) -> Vec<RegistryMessage> {
        let grace = self.grace;
        let mut due: Vec<RegistryMessage> = self
            .outstanding
            .values_mut()
            .filter(|(_, sent)| now.saturating_duration_since(*sent) >= grace)
            .map(|(message, sent)| {
                *sent = now;
                message.clone()
            })
            .collect();
        due.sort_by_key(|m| m.sequence);
        due
    }

    pub fn len(&self) -> usize {
        self.outstanding.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outstanding.is_empty()
    }
}

impl Default for AckTracker {
    fn default() -> Self {
        Self::new(DEFAULT_ACK_GRACE)
    }
}
