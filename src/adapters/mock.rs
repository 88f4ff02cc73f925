//! Scripted transport for tests and dry runs.
//!
//! A [`MockScript`] is a shared queue of steps that every [`MockAdapter`]
//! opened by a [`MockConnector`] reads from. Steps can be pushed while a
//! measurement loop is running. A [`ReadGate`] holds a read open until the
//! test releases it, which is how an in-flight blocking read is simulated.

use super::{Connector, LineTransport};
use crate::error::{AppResult, CounterError};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Pause applied when the script runs dry, so polling loops do not spin.
const IDLE_DELAY: Duration = Duration::from_millis(5);

/// One scripted read outcome.
#[derive(Clone, Debug)]
pub enum MockStep {
    /// Deliver a line.
    Line(String),
    /// Fail the read with a timeout.
    Timeout,
    /// Fail the read as if the device vanished.
    Disconnect,
    /// Block until the gate opens, then deliver the line.
    Gated(ReadGate, String),
}

#[derive(Debug, Default)]
struct GateState {
    open: bool,
    waiting: usize,
}

/// Blocks a scripted read until released.
#[derive(Clone, Debug, Default)]
pub struct ReadGate {
    inner: Arc<(Mutex<GateState>, Condvar)>,
}

impl ReadGate {
    /// A closed gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Let blocked and future reads through.
    pub fn release(&self) {
        let (state, cvar) = &*self.inner;
        state.lock().open = true;
        cvar.notify_all();
    }

    /// Wait until a reader is blocked on this gate, or `timeout` elapsed.
    ///
    /// Returns true if a reader is waiting.
    pub fn wait_for_reader(&self, timeout: Duration) -> bool {
        let (state, cvar) = &*self.inner;
        let mut guard = state.lock();
        if guard.waiting == 0 {
            let _ = cvar.wait_while_for(&mut guard, |s| s.waiting == 0, timeout);
        }
        guard.waiting > 0
    }

    fn pass(&self) {
        let (state, cvar) = &*self.inner;
        let mut guard = state.lock();
        guard.waiting += 1;
        cvar.notify_all();
        cvar.wait_while(&mut guard, |s| !s.open);
        guard.waiting -= 1;
    }
}

/// Shared queue of scripted reads.
#[derive(Clone, Debug, Default)]
pub struct MockScript {
    steps: Arc<Mutex<VecDeque<MockStep>>>,
}

impl MockScript {
    /// An empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// A script delivering `lines` in order.
    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let script = Self::new();
        for line in lines {
            script.push_line(line);
        }
        script
    }

    /// Queue a line.
    pub fn push_line(&self, line: impl Into<String>) {
        self.push(MockStep::Line(line.into()));
    }

    /// Queue a read timeout.
    pub fn push_timeout(&self) {
        self.push(MockStep::Timeout);
    }

    /// Queue a line that is only delivered once `gate` is released.
    pub fn push_gated(&self, gate: &ReadGate, line: impl Into<String>) {
        self.push(MockStep::Gated(gate.clone(), line.into()));
    }

    /// Queue any step.
    pub fn push(&self, step: MockStep) {
        self.steps.lock().push_back(step);
    }

    /// Steps not consumed yet.
    pub fn remaining(&self) -> usize {
        self.steps.lock().len()
    }

    fn next(&self) -> Option<MockStep> {
        self.steps.lock().pop_front()
    }
}

#[derive(Debug, Default)]
struct MockStats {
    opened: AtomicUsize,
    discarded: AtomicUsize,
    closed: AtomicUsize,
}

/// Transport replaying a [`MockScript`].
pub struct MockAdapter {
    script: MockScript,
    line_delay: Duration,
    fail_discard: bool,
    stats: Arc<MockStats>,
    open: bool,
}

impl MockAdapter {
    /// Adapter reading from `script`, delivering lines immediately.
    pub fn new(script: MockScript) -> Self {
        Self {
            script,
            line_delay: Duration::ZERO,
            fail_discard: false,
            stats: Arc::default(),
            open: true,
        }
    }

    /// Sleep this long before every delivered line, like a counter gate.
    pub fn with_line_delay(mut self, delay: Duration) -> Self {
        self.line_delay = delay;
        self
    }
}

impl LineTransport for MockAdapter {
    fn read_line(&mut self, timeout: Duration) -> AppResult<String> {
        if !self.open {
            return Err(CounterError::SerialPortNotConnected);
        }
        match self.script.next() {
            Some(MockStep::Line(line)) => {
                std::thread::sleep(self.line_delay);
                Ok(line)
            }
            Some(MockStep::Gated(gate, line)) => {
                gate.pass();
                Ok(line)
            }
            Some(MockStep::Timeout) => Err(CounterError::ReadTimeout(timeout)),
            Some(MockStep::Disconnect) => Err(CounterError::SerialUnexpectedEof),
            None => {
                std::thread::sleep(IDLE_DELAY.min(timeout));
                Err(CounterError::ReadTimeout(timeout))
            }
        }
    }

    fn discard_pending_input(&mut self) -> AppResult<()> {
        self.stats.discarded.fetch_add(1, Ordering::SeqCst);
        if self.fail_discard {
            return Err(CounterError::SerialUnexpectedEof);
        }
        Ok(())
    }

    fn close(&mut self) -> AppResult<()> {
        if self.open {
            self.open = false;
            self.stats.closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Opens [`MockAdapter`]s over a shared script.
#[derive(Clone, Debug)]
pub struct MockConnector {
    script: MockScript,
    line_delay: Duration,
    fail_open: bool,
    fail_discard: bool,
    stats: Arc<MockStats>,
}

impl MockConnector {
    /// Connector whose adapters replay `script`.
    pub fn new(script: MockScript) -> Self {
        Self {
            script,
            line_delay: Duration::ZERO,
            fail_open: false,
            fail_discard: false,
            stats: Arc::default(),
        }
    }

    /// Connector whose `open` always fails.
    pub fn unreachable() -> Self {
        Self {
            fail_open: true,
            ..Self::new(MockScript::new())
        }
    }

    /// Connector whose adapters open but fail to discard input.
    pub fn failing_discard(script: MockScript) -> Self {
        Self {
            fail_discard: true,
            ..Self::new(script)
        }
    }

    /// Delay every delivered line by `delay`.
    pub fn with_line_delay(mut self, delay: Duration) -> Self {
        self.line_delay = delay;
        self
    }

    /// The shared script.
    pub fn script(&self) -> &MockScript {
        &self.script
    }

    /// Successful `open` calls.
    pub fn open_count(&self) -> usize {
        self.stats.opened.load(Ordering::SeqCst)
    }

    /// `discard_pending_input` calls across all adapters.
    pub fn discard_count(&self) -> usize {
        self.stats.discarded.load(Ordering::SeqCst)
    }

    /// `close` calls across all adapters.
    pub fn close_count(&self) -> usize {
        self.stats.closed.load(Ordering::SeqCst)
    }
}

impl Connector for MockConnector {
    fn open(&self, address: &str) -> AppResult<Box<dyn LineTransport>> {
        if self.fail_open {
            return Err(CounterError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no device at '{address}'"),
            )));
        }
        self.stats.opened.fetch_add(1, Ordering::SeqCst);
        let mut adapter = MockAdapter::new(self.script.clone()).with_line_delay(self.line_delay);
        adapter.fail_discard = self.fail_discard;
        adapter.stats = Arc::clone(&self.stats);
        Ok(Box::new(adapter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replays_script() {
        let script = MockScript::from_lines(["1 Hz", "2 Hz"]);
        script.push_timeout();
        let mut adapter = MockAdapter::new(script.clone());
        let timeout = Duration::from_millis(10);

        assert_eq!(adapter.read_line(timeout).unwrap(), "1 Hz");
        assert_eq!(adapter.read_line(timeout).unwrap(), "2 Hz");
        assert!(matches!(
            adapter.read_line(timeout),
            Err(CounterError::ReadTimeout(_))
        ));
        // dry script reads as a timeout too
        assert!(adapter.read_line(timeout).is_err());
        assert_eq!(script.remaining(), 0);
    }

    #[test]
    fn test_closed_adapter_refuses_reads() {
        let script = MockScript::from_lines(["1 Hz"]);
        let mut adapter = MockAdapter::new(script);
        adapter.close().unwrap();
        assert!(matches!(
            adapter.read_line(Duration::from_millis(10)),
            Err(CounterError::SerialPortNotConnected)
        ));
    }

    #[test]
    fn test_gate_blocks_until_released() {
        let gate = ReadGate::new();
        let script = MockScript::new();
        script.push_gated(&gate, "7 Hz");
        let mut adapter = MockAdapter::new(script);

        let reader = std::thread::spawn(move || adapter.read_line(Duration::from_secs(1)));
        assert!(gate.wait_for_reader(Duration::from_secs(2)));
        assert!(!reader.is_finished());
        gate.release();
        assert_eq!(reader.join().unwrap().unwrap(), "7 Hz");
    }

    #[test]
    fn test_connector_counts() {
        let connector = MockConnector::new(MockScript::new());
        let mut transport = connector.open("COM1").unwrap();
        transport.discard_pending_input().unwrap();
        transport.close().unwrap();
        transport.close().unwrap();
        assert_eq!(connector.open_count(), 1);
        assert_eq!(connector.discard_count(), 1);
        assert_eq!(connector.close_count(), 1);

        assert!(MockConnector::unreachable().open("COM1").is_err());
    }
}
