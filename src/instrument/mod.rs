//! Counter driver: measurement controller, polling worker, events and identity.

pub mod events;
pub mod hp_counter;
pub mod identity;
pub mod worker;

pub use events::{BroadcastObserver, CounterEvent, CounterNotification, CounterObserver};
pub use hp_counter::{CounterMode, HpCounter, FAILED_SAMPLE_BACKOFF, UNLIMITED};
pub use identity::{IdentityTable, InstrumentIdentity};
pub use worker::MeasurementWorker;
