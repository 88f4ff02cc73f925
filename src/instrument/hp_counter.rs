//! HP/Agilent 5313x universal counter over RS-232.
//!
//! In talk-only mode the counter prints one reading per gate on its serial
//! port. [`HpCounter`] owns that link, keeps the most recent
//! [`MeasurementRecord`], infers the gate time from the spacing of readings and
//! runs the polling loop that feeds registered observers.
//!
//! ## Configuration
//!
//! ```toml
//! [serial]
//! port = "/dev/ttyUSB0"
//! baud_rate = 9600
//! read_timeout_ms = 20000  # must exceed the longest gate time
//!
//! [acquisition]
//! gate_estimate_samples = 3
//! force_totalize = false
//! ```
//!
//! ## Threading
//!
//! `HpCounter` is a cheap, cloneable handle. All state sits behind locks or
//! atomics, and the current record is swapped as a whole `Arc`, so readers on
//! any thread always see a complete record. The line read is the only blocking
//! call; it holds the transport lock until the line arrives or the transport
//! times out, and neither [`HpCounter::request_stop`] nor
//! [`HpCounter::disconnect`] can cut it short.

use crate::adapters::{Connector, LineTransport, SerialConnector};
use crate::config::Settings;
use crate::instrument::events::{
    CounterEvent, CounterNotification, CounterObserver, ObserverList,
};
use crate::instrument::identity::{IdentityTable, InstrumentIdentity};
use crate::instrument::worker::{LoopClaim, MeasurementWorker};
use crate::error::AppResult;
use crate::measurement::gate_time::{classify_gate_time, mean_interval, GateTime};
use crate::measurement::{MeasureMode, MeasurementMode, MeasurementRecord, UnitSymbol};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Sample limit meaning "run until stopped".
pub const UNLIMITED: u64 = u64::MAX;

/// Smallest sample count used for gate time estimation.
pub const MIN_GATE_SAMPLES: usize = 2;

/// Gate time assumed when a forced duration is not a positive number.
const MIN_GATE_SECONDS: f64 = 0.1;

/// Minimum spacing of failed samples in the polling loop.
pub const FAILED_SAMPLE_BACKOFF: Duration = Duration::from_millis(20);

/// Mode and gate time configuration of the controller.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CounterMode {
    /// Fine-grained counter function
    pub mode: MeasureMode,
    /// Coarse mode, follows `mode` through [`CounterMode::set_mode`]
    pub measurement_mode: MeasurementMode,
    /// Nominal gate time
    pub gate_time: GateTime,
    /// Gate time in seconds, always `gate_time.seconds()`
    pub gate_time_seconds: f64,
}

impl CounterMode {
    fn set_mode(&mut self, mode: MeasureMode) {
        self.mode = mode;
        self.measurement_mode = MeasurementMode::from(mode);
    }

    fn set_gate_time(&mut self, gate_time: GateTime) {
        self.gate_time = gate_time;
        self.gate_time_seconds = gate_time.seconds();
    }
}

struct Inner {
    address: String,
    connector: Box<dyn Connector>,
    identities: IdentityTable,
    read_timeout: Duration,
    init_time: DateTime<Utc>,
    connected: AtomicBool,
    failed_reads: AtomicU64,
    transport: Mutex<Option<Box<dyn LineTransport>>>,
    identity: RwLock<InstrumentIdentity>,
    current: RwLock<Arc<MeasurementRecord>>,
    mode: RwLock<CounterMode>,
    observers: ObserverList,
    worker: MeasurementWorker,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(mut transport) = self.transport.get_mut().take() {
            if let Err(e) = transport.close() {
                warn!("Failed to close counter port '{}': {}", self.address, e);
            }
        }
    }
}

/// Measurement controller for one counter.
#[derive(Clone)]
pub struct HpCounter {
    inner: Arc<Inner>,
}

impl HpCounter {
    /// Controller for the counter at `address`, not yet connected.
    ///
    /// # Arguments
    /// * `address` - Port handed to `connector` (e.g., "/dev/ttyUSB0", "COM3")
    /// * `connector` - Opens the transport
    /// * `identities` - Identity table consulted after connecting
    /// * `read_timeout` - Timeout passed to every line read
    pub fn new<C>(
        address: &str,
        connector: C,
        identities: IdentityTable,
        read_timeout: Duration,
    ) -> Self
    where
        C: Connector + 'static,
    {
        let address = address.trim().to_string();
        let identity = InstrumentIdentity::generic(&address);
        Self {
            inner: Arc::new(Inner {
                address,
                connector: Box::new(connector),
                identities,
                read_timeout,
                init_time: Utc::now(),
                connected: AtomicBool::new(false),
                failed_reads: AtomicU64::new(0),
                transport: Mutex::new(None),
                identity: RwLock::new(identity),
                current: RwLock::new(Arc::new(MeasurementRecord::empty())),
                mode: RwLock::new(CounterMode::default()),
                observers: ObserverList::default(),
                worker: MeasurementWorker::new(),
            }),
        }
    }

    /// Serial controller built from configuration, not yet connected.
    ///
    /// Applies `acquisition.force_totalize` and `acquisition.gate_time`.
    pub fn from_settings(settings: &Settings) -> Self {
        let counter = Self::new(
            &settings.serial.port,
            SerialConnector::new(settings.serial.clone()),
            IdentityTable::new(settings.instruments.iter().cloned()),
            settings.serial.read_timeout(),
        );
        if settings.acquisition.force_totalize {
            counter.force_totalize_mode();
        }
        if let Some(gate) = settings.acquisition.gate_time {
            counter.force_gate_time(gate);
        }
        counter
    }

    // ------------------------------------------------------------------
    // Connection
    // ------------------------------------------------------------------

    /// Open the transport, replacing any previous connection.
    ///
    /// Failures are logged and leave the controller disconnected; the current
    /// record is kept. Returns the resulting connection state.
    pub fn connect(&self) -> bool {
        self.disconnect();
        info!("Connecting to HP counter at {}", self.inner.address);

        let opened = self
            .inner
            .connector
            .open(&self.inner.address)
            .and_then(|mut transport| match transport.discard_pending_input() {
                Ok(()) => Ok(transport),
                Err(e) => {
                    if let Err(close_err) = transport.close() {
                        warn!(
                            "Failed to close counter port '{}': {}",
                            self.inner.address, close_err
                        );
                    }
                    Err(e)
                }
            });

        match opened {
            Ok(transport) => {
                *self.inner.transport.lock() = Some(transport);
                self.inner.connected.store(true, Ordering::SeqCst);
                self.identify();
                info!("Connected to {}", self.instrument_id());
                true
            }
            Err(e) => {
                warn!(
                    "Failed to connect to HP counter at {}: {}",
                    self.inner.address, e
                );
                self.inner.connected.store(false, Ordering::SeqCst);
                false
            }
        }
    }

    /// Close the transport. Does nothing when already disconnected.
    ///
    /// A running loop is asked to stop; a read in progress finishes first.
    pub fn disconnect(&self) {
        if !self.inner.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        self.inner.worker.request_stop();
        if let Some(mut transport) = self.inner.transport.lock().take() {
            if let Err(e) = transport.close() {
                warn!("Failed to close counter port '{}': {}", self.inner.address, e);
            }
        }
        info!("Disconnected from HP counter at {}", self.inner.address);
    }

    /// Whether the transport is open.
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    fn identify(&self) {
        *self.inner.identity.write() = self.inner.identities.lookup(&self.inner.address);
    }

    // ------------------------------------------------------------------
    // State
    // ------------------------------------------------------------------

    /// Port address.
    pub fn address(&self) -> &str {
        &self.inner.address
    }

    /// Identity of the connected instrument.
    pub fn identity(&self) -> InstrumentIdentity {
        self.inner.identity.read().clone()
    }

    /// One-line instrument description.
    pub fn instrument_id(&self) -> String {
        self.inner.identity.read().to_string()
    }

    /// When this controller was created.
    pub fn init_time(&self) -> DateTime<Utc> {
        self.inner.init_time
    }

    /// Most recent record.
    pub fn current_record(&self) -> Arc<MeasurementRecord> {
        Arc::clone(&*self.inner.current.read())
    }

    /// Value of the most recent record, NaN if there is none.
    pub fn last_value(&self) -> f64 {
        self.inner.current.read().value
    }

    /// Unit of the most recent record.
    pub fn unit(&self) -> UnitSymbol {
        self.inner.current.read().unit
    }

    /// Timestamp of the most recent record.
    pub fn sample_time(&self) -> DateTime<Utc> {
        self.inner.current.read().timestamp
    }

    /// Mode and gate time configuration.
    pub fn counter_mode(&self) -> CounterMode {
        *self.inner.mode.read()
    }

    /// Fine-grained mode.
    pub fn mode(&self) -> MeasureMode {
        self.inner.mode.read().mode
    }

    /// Coarse measurement mode.
    pub fn measurement_mode(&self) -> MeasurementMode {
        self.inner.mode.read().measurement_mode
    }

    /// Nominal gate time.
    pub fn gate_time(&self) -> GateTime {
        self.inner.mode.read().gate_time
    }

    /// Gate time in seconds, 0 when unknown.
    pub fn gate_time_seconds(&self) -> f64 {
        self.inner.mode.read().gate_time_seconds
    }

    // ------------------------------------------------------------------
    // Sampling
    // ------------------------------------------------------------------

    /// Read one line into a new current record and return it.
    ///
    /// Disconnected, or on any transport error, the current record becomes an
    /// empty one.
    pub fn sample_once(&self) -> Arc<MeasurementRecord> {
        self.update_current();
        self.current_record()
    }

    /// Replace the current record; returns the seconds since the previous
    /// record when a line was read.
    fn update_current(&self) -> Option<f64> {
        if !self.is_connected() {
            self.replace_current(MeasurementRecord::empty());
            return None;
        }

        let previous = self.current_record();
        let line = {
            let mut transport = self.inner.transport.lock();
            match transport.as_mut() {
                Some(transport) => transport.read_line(self.inner.read_timeout),
                None => Err(crate::error::CounterError::SerialPortNotConnected),
            }
        };

        match line {
            Ok(line) => {
                let failed = self.inner.failed_reads.swap(0, Ordering::SeqCst);
                if failed > 1 {
                    info!(
                        "[{}] Receiving again after {} failed reads",
                        self.inner.address, failed
                    );
                }
                debug!("[{}] {}", self.inner.address, line);
                let record = MeasurementRecord::parse(&line);
                let interval = record.seconds_since(&previous);
                self.replace_current(record);
                Some(interval)
            }
            Err(e) => {
                // First failure of a run warns, the rest go to debug
                if self.inner.failed_reads.fetch_add(1, Ordering::SeqCst) == 0 {
                    warn!("[{}] No sample: {}", self.inner.address, e);
                } else {
                    debug!("[{}] No sample: {}", self.inner.address, e);
                }
                self.replace_current(MeasurementRecord::empty());
                None
            }
        }
    }

    fn replace_current(&self, record: MeasurementRecord) {
        *self.inner.current.write() = Arc::new(record);
    }

    /// Take a sample and notify observers.
    ///
    /// Raises `Timeout` if the sample has no value, then always `Updated`.
    pub fn get_value(&self) -> f64 {
        let value = self.sample_once().value;
        if value.is_nan() {
            self.notify(CounterEvent::Timeout);
        }
        self.notify(CounterEvent::Updated);
        value
    }

    /// Rewrite the current totalize count as a frequency over the gate time.
    ///
    /// See [`MeasurementRecord::derive_frequency`]. Returns NaN while the gate
    /// time is unknown.
    pub fn convert_totalize_to_frequency(&self) -> f64 {
        let gate_seconds = self.gate_time_seconds();
        let mut current = self.inner.current.write();
        let mut record = (**current).clone();
        let value = record.derive_frequency(gate_seconds);
        if record.is_frequency_derived() && !current.is_frequency_derived() {
            *current = Arc::new(record);
        }
        value
    }

    // ------------------------------------------------------------------
    // Polling loop
    // ------------------------------------------------------------------

    /// Poll on the calling thread until `sample_limit` valid samples were
    /// taken or a stop was requested, then raise `Ready`.
    ///
    /// Returns the number of valid samples, or `None` without sampling when
    /// the controller is disconnected or another loop is running.
    pub fn run_foreground(&self, sample_limit: u64) -> Option<u64> {
        if !self.is_connected() {
            warn!("Measurement loop not started: {} is not connected", self.inner.address);
            return None;
        }
        let claim = self.inner.worker.claim()?;
        Some(self.run_loop(claim, sample_limit))
    }

    /// Poll on a background thread; see [`Self::run_foreground`].
    ///
    /// Returns false without starting anything when disconnected or when a
    /// loop is already running.
    pub fn run_background(&self, sample_limit: u64) -> bool {
        if !self.is_connected() {
            warn!("Measurement loop not started: {} is not connected", self.inner.address);
            return false;
        }
        let counter = self.clone();
        match self
            .inner
            .worker
            .start(move |claim| {
                counter.run_loop(claim, sample_limit);
            }) {
            Ok(started) => started,
            Err(e) => {
                warn!("Failed to start measurement worker: {}", e);
                false
            }
        }
    }

    fn run_loop(&self, claim: LoopClaim, sample_limit: u64) -> u64 {
        info!(
            "Measurement loop started on {} (limit {})",
            self.inner.address,
            if sample_limit == UNLIMITED {
                "none".to_string()
            } else {
                sample_limit.to_string()
            }
        );
        if let Some(transport) = self.inner.transport.lock().as_mut() {
            if let Err(e) = transport.discard_pending_input() {
                warn!("[{}] Could not discard input: {}", self.inner.address, e);
            }
        }

        let mut valid = 0;
        while !claim.stop_requested() && valid < sample_limit {
            let started = Instant::now();
            if !self.get_value().is_nan() {
                valid += 1;
            } else if let Some(rest) = FAILED_SAMPLE_BACKOFF.checked_sub(started.elapsed()) {
                // A dead link fails instantly
                std::thread::sleep(rest);
            }
        }

        drop(claim);
        info!(
            "Measurement loop on {} finished after {} samples",
            self.inner.address, valid
        );
        self.notify(CounterEvent::Ready);
        valid
    }

    /// Ask the running loop to exit once its current sample completes.
    pub fn request_stop(&self) {
        self.inner.worker.request_stop();
    }

    /// Whether a polling loop is active.
    pub fn is_running(&self) -> bool {
        self.inner.worker.is_running()
    }

    /// Wait for the background loop to exit.
    pub fn join(&self) -> AppResult<()> {
        self.inner.worker.join()
    }

    // ------------------------------------------------------------------
    // Mode and gate time
    // ------------------------------------------------------------------

    /// Set the measurement mode and gate time explicitly.
    pub fn setup_measurement_mode(&self, measurement_mode: MeasurementMode, gate_time: GateTime) {
        let mut mode = self.inner.mode.write();
        mode.measurement_mode = measurement_mode;
        mode.set_gate_time(gate_time);
    }

    /// Estimate the gate time from the spacing of `sample_count` readings.
    ///
    /// One reading is taken and discarded first. `sample_count` is raised to
    /// at least [`MIN_GATE_SAMPLES`]. Readings that fail do not contribute; if
    /// none succeed the gate time becomes `Unknown`.
    pub fn estimate_gate_time(&self, sample_count: usize) -> GateTime {
        if sample_count < MIN_GATE_SAMPLES {
            warn!(
                "Gate time estimate needs at least {} samples, got {}",
                MIN_GATE_SAMPLES, sample_count
            );
        }
        let sample_count = sample_count.max(MIN_GATE_SAMPLES);

        self.update_current();
        let intervals: Vec<f64> = (0..sample_count)
            .filter_map(|_| self.update_current())
            .collect();

        let mean = mean_interval(&intervals);
        let gate_time = classify_gate_time(mean);
        info!(
            "Estimated gate time {:?} from {} intervals (mean {:?} s)",
            gate_time,
            intervals.len(),
            mean
        );
        self.inner.mode.write().set_gate_time(gate_time);
        gate_time
    }

    /// Set the gate time from a known duration in seconds.
    ///
    /// Non-positive or non-finite durations are raised to 0.1 s.
    pub fn force_gate_time(&self, seconds: f64) -> GateTime {
        let seconds = if seconds.is_finite() && seconds > 0.0 {
            seconds
        } else {
            warn!("Invalid gate time {} s, using {} s", seconds, MIN_GATE_SECONDS);
            MIN_GATE_SECONDS
        };
        let gate_time = classify_gate_time(Some(seconds));
        self.inner.mode.write().set_gate_time(gate_time);
        gate_time
    }

    /// Switch to totalize mode unless a mode is already known.
    pub fn force_totalize_mode(&self) {
        let mut mode = self.inner.mode.write();
        if mode.mode == MeasureMode::Unknown {
            mode.set_mode(MeasureMode::Totalize);
        }
    }

    // ------------------------------------------------------------------
    // Observers
    // ------------------------------------------------------------------

    /// Register an observer. See [`crate::instrument::events`] for the
    /// execution context.
    pub fn subscribe<O>(&self, observer: O)
    where
        O: CounterObserver + 'static,
    {
        self.inner.observers.subscribe(Arc::new(observer));
    }

    /// Remove all observers.
    pub fn clear_observers(&self) {
        self.inner.observers.clear();
    }

    fn notify(&self, event: CounterEvent) {
        let notification = CounterNotification {
            event,
            record: self.current_record(),
            init_time: self.inner.init_time,
        };
        self.inner.observers.notify(&notification);
    }
}
