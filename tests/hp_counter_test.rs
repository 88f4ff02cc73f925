//! Controller tests over the scripted transport: connection, sampling,
//! events and gate time handling.

mod common;

use common::{counter_on, EventRecorder, READ_TIMEOUT};
use hp_counter::adapters::{MockConnector, MockScript};
use hp_counter::config::Settings;
use hp_counter::instrument::{BroadcastObserver, CounterEvent, HpCounter, IdentityTable};
use hp_counter::measurement::{GateTime, MeasureMode, MeasurementMode, UnitSymbol};
use std::time::Duration;

#[test]
fn test_connect_failure_leaves_disconnected() {
    let connector = MockConnector::unreachable();
    let counter = counter_on(&connector);
    assert!(!counter.connect());
    assert!(!counter.is_connected());
    assert_eq!(connector.open_count(), 0);
}

#[test]
fn test_connect_closes_port_when_discard_fails() {
    let connector = MockConnector::failing_discard(MockScript::new());
    let counter = counter_on(&connector);
    assert!(!counter.connect());
    assert!(!counter.is_connected());
    assert_eq!(connector.open_count(), 1);
    assert_eq!(connector.close_count(), 1);
}

#[test]
fn test_connect_identifies_and_discards() {
    let connector = MockConnector::new(MockScript::new());
    let counter = counter_on(&connector);
    assert!(counter.connect());
    assert!(counter.is_connected());
    assert_eq!(connector.discard_count(), 1);
    assert_eq!(
        counter.instrument_id(),
        "HEWLETT PACKARD 53131 A SN:3736A21306  @ COM1"
    );
}

#[test]
fn test_unlisted_port_gets_generic_identity() {
    let connector = MockConnector::new(MockScript::new());
    let counter = HpCounter::new("COM9", connector, IdentityTable::default(), READ_TIMEOUT);
    assert!(counter.connect());
    let identity = counter.identity();
    assert_eq!(identity.manufacturer, "HEWLETT PACKARD / AGILENT");
    assert_eq!(identity.serial_number, "<unknown>");
    assert!(counter.instrument_id().ends_with("@ COM9"));
}

#[test]
fn test_disconnect_is_idempotent() {
    let connector = MockConnector::new(MockScript::new());
    let counter = counter_on(&connector);
    assert!(counter.connect());
    counter.disconnect();
    counter.disconnect();
    assert!(!counter.is_connected());
    assert_eq!(connector.close_count(), 1);
}

#[test]
fn test_reconnect_replaces_transport() {
    let connector = MockConnector::new(MockScript::new());
    let counter = counter_on(&connector);
    assert!(counter.connect());
    assert!(counter.connect());
    assert_eq!(connector.open_count(), 2);
    assert_eq!(connector.close_count(), 1);
}

#[test]
fn test_sample_parses_line() {
    let connector = MockConnector::new(MockScript::from_lines(["+12.5 MHz"]));
    let counter = counter_on(&connector);
    assert!(counter.connect());

    let record = counter.sample_once();
    assert_eq!(record.unit, UnitSymbol::MHz);
    assert_eq!(record.mode, MeasureMode::Frequency);
    assert!((record.value - 12.5e6).abs() < 1e-3);
    assert_eq!(counter.unit(), UnitSymbol::MHz);
    assert_eq!(counter.sample_time(), record.timestamp);
}

#[test]
fn test_get_value_raises_events() {
    let script = MockScript::from_lines(["5 Hz"]);
    script.push_timeout();
    let connector = MockConnector::new(script);
    let counter = counter_on(&connector);
    let recorder = EventRecorder::attach(&counter);
    assert!(counter.connect());

    assert_eq!(counter.get_value(), 5.0);
    assert!(counter.get_value().is_nan());
    assert_eq!(
        recorder.events(),
        vec![
            CounterEvent::Updated,
            CounterEvent::Timeout,
            CounterEvent::Updated
        ]
    );
}

#[test]
fn test_timeout_replaces_record() {
    let script = MockScript::from_lines(["5 Hz"]);
    script.push_timeout();
    let connector = MockConnector::new(script);
    let counter = counter_on(&connector);
    assert!(counter.connect());

    counter.get_value();
    let before = counter.current_record();
    counter.get_value();
    let after = counter.current_record();
    assert!(after.value.is_nan());
    assert_eq!(after.unit, UnitSymbol::Unknown);
    assert!(after.raw_text.is_empty());
    assert!(after.timestamp >= before.timestamp);
}

#[test]
fn test_broadcast_observer_receives_updates() {
    let connector = MockConnector::new(MockScript::from_lines(["1 Hz"]));
    let counter = counter_on(&connector);
    let observer = BroadcastObserver::new(16);
    let mut rx = observer.subscribe();
    counter.subscribe(observer);
    assert!(counter.connect());

    counter.get_value();
    let notification = rx.try_recv().unwrap();
    assert_eq!(notification.event, CounterEvent::Updated);
    assert_eq!(notification.record.value, 1.0);
    assert!(notification.seconds_since_init() >= 0.0);
}

#[test]
fn test_estimate_gate_time_from_fast_readings() {
    let script = MockScript::from_lines(["1 Hz", "1 Hz", "1 Hz", "1 Hz"]);
    let connector = MockConnector::new(script).with_line_delay(Duration::from_millis(20));
    let counter = counter_on(&connector);
    assert!(counter.connect());

    assert_eq!(counter.estimate_gate_time(3), GateTime::ZeroPointOne);
    assert_eq!(counter.gate_time(), GateTime::ZeroPointOne);
    assert_eq!(counter.gate_time_seconds(), 0.1);
    assert_eq!(connector.script().remaining(), 0);
}

#[test]
fn test_estimate_gate_time_without_data() {
    let connector = MockConnector::new(MockScript::new());
    let counter = counter_on(&connector);
    assert!(counter.connect());
    counter.force_gate_time(1.0);

    assert_eq!(counter.estimate_gate_time(3), GateTime::Unknown);
    assert_eq!(counter.gate_time_seconds(), 0.0);
}

#[test]
fn test_estimate_gate_time_raises_sample_count() {
    let script = MockScript::from_lines(["1 Hz", "1 Hz", "1 Hz", "1 Hz", "1 Hz"]);
    let connector = MockConnector::new(script);
    let counter = counter_on(&connector);
    assert!(counter.connect());

    counter.estimate_gate_time(0);
    // one warm-up read plus two samples
    assert_eq!(connector.script().remaining(), 2);
}

#[test]
fn test_totalize_reading_converted_to_frequency() {
    let connector = MockConnector::new(MockScript::from_lines(["1,000,000"]));
    let counter = counter_on(&connector);
    counter.force_totalize_mode();
    counter.setup_measurement_mode(MeasurementMode::Totalize, GateTime::Ten);
    assert!(counter.connect());

    counter.get_value();
    assert_eq!(counter.measurement_mode(), MeasurementMode::Totalize);
    let f = counter.convert_totalize_to_frequency();
    assert!((f - 100_000.0).abs() < 1e-6);
    assert_eq!(counter.unit(), UnitSymbol::Hz);
    assert_eq!(counter.current_record().mode, MeasureMode::Totalize);
}

#[test]
fn test_from_settings_applies_acquisition() {
    let settings = Settings::from_toml_str(
        r#"
        [serial]
        port = "/dev/hp-counter-missing"

        [acquisition]
        gate_time = 10.0
        force_totalize = true
        "#,
    )
    .unwrap();

    let counter = HpCounter::from_settings(&settings);
    assert_eq!(counter.address(), "/dev/hp-counter-missing");
    assert_eq!(counter.gate_time(), GateTime::Ten);
    assert_eq!(counter.mode(), MeasureMode::Totalize);
    assert!(!counter.connect());
}
