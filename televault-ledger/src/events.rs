use std::sync::{Mutex, PoisonError};
use televault_core::request::VaultEvent;

/// Receives the events of successful vault operations
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &VaultEvent);
}

/// Keeps every event in memory, in emission order
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<VaultEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<VaultEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Take the recorded events, leaving the sink empty
    pub fn drain(&self) -> Vec<VaultEvent> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &VaultEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(*event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use televault_core::id::Identity;

    #[test]
    fn test_recording_sink_keeps_order() {
        let sink = RecordingSink::new();
        let first = VaultEvent::AdministrationTransferred {
            previous: Identity::new([1; 20]),
            administrator: Identity::new([2; 20]),
        };
        let second = VaultEvent::AdministrationTransferred {
            previous: Identity::new([2; 20]),
            administrator: Identity::new([3; 20]),
        };
        sink.emit(&first);
        sink.emit(&second);

        assert_eq!(sink.events(), vec![first, second]);
        assert_eq!(sink.drain().len(), 2);
        assert!(sink.events().is_empty());
    }
}
