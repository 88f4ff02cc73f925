//! Common test utilities for hp_counter integration tests
//!
//! - Building controllers over the scripted mock transport
//! - Recording the events a controller raises

#![allow(dead_code)] // Utilities may not all be used by every test file

use hp_counter::adapters::MockConnector;
use hp_counter::instrument::{
    CounterEvent, CounterNotification, HpCounter, IdentityTable, InstrumentIdentity,
};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Read timeout used by test controllers.
pub const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Generous bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(5);

/// Identity table with one bench counter on COM1.
pub fn bench_identities() -> IdentityTable {
    IdentityTable::new([InstrumentIdentity {
        address: "COM1".to_string(),
        manufacturer: "HEWLETT PACKARD".to_string(),
        model: "53131 A".to_string(),
        serial_number: "3736A21306".to_string(),
        firmware_version: String::new(),
    }])
}

/// Controller on COM1 over `connector`.
pub fn counter_on(connector: &MockConnector) -> HpCounter {
    HpCounter::new("COM1", connector.clone(), bench_identities(), READ_TIMEOUT)
}

/// Collects every event a controller raises.
#[derive(Clone, Default)]
pub struct EventRecorder {
    events: Arc<Mutex<Vec<CounterEvent>>>,
}

impl EventRecorder {
    /// Recorder subscribed to `counter`.
    pub fn attach(counter: &HpCounter) -> Self {
        let recorder = Self::default();
        let events = Arc::clone(&recorder.events);
        counter.subscribe(move |n: &CounterNotification| {
            events.lock().unwrap().push(n.event);
        });
        recorder
    }

    pub fn events(&self) -> Vec<CounterEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, event: CounterEvent) -> usize {
        self.events().iter().filter(|e| **e == event).count()
    }
}

/// Channel receiving one message per `Ready` event.
pub fn ready_channel(counter: &HpCounter) -> mpsc::Receiver<()> {
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    counter.subscribe(move |n: &CounterNotification| {
        if n.event == CounterEvent::Ready {
            let _ = tx.lock().unwrap().send(());
        }
    });
    rx
}
