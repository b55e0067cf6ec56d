use std::cell::Cell;
use std::rc::Rc;
use std::vec::Vec;

use consts::{PIPE_HISTORY_DAILY_TX_ACK, PIPE_HISTORY_HOURLY_TX_ACK, PIPE_HISTORY_MINUTELY_TX_ACK};
use host_protocol::HISTORY_END_MARKER;

use super::*;
use crate::registry::VOLTAGE_PIPE;

const MINUTELY: PipeId = PIPE_HISTORY_MINUTELY_TX_ACK;
const HOURLY: PipeId = PIPE_HISTORY_HOURLY_TX_ACK;
const DAILY: PipeId = PIPE_HISTORY_DAILY_TX_ACK;

#[derive(Default)]
struct MockTransport {
    sent: Vec<(PipeId, Vec<u8>)>,
    timings: Vec<TimingParams>,
    advertising: usize,
    disconnects: usize,
    failure: Option<TransportError>,
}

impl MockTransport {
    fn sent_on(&self, pipe: PipeId) -> Vec<Vec<u8>> {
        self.sent
            .iter()
            .filter(|(p, _)| *p == pipe)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    fn check(&self) -> Result<(), TransportError> {
        match self.failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl crate::Transport for MockTransport {
    fn send(&mut self, pipe: PipeId, payload: &[u8]) -> Result<(), TransportError> {
        self.check()?;
        self.sent.push((pipe, payload.to_vec()));
        Ok(())
    }

    fn apply_timing(&mut self, timing: &TimingParams) -> Result<(), TransportError> {
        self.check()?;
        self.timings.push(*timing);
        Ok(())
    }

    fn start_advertising(&mut self) -> Result<(), TransportError> {
        self.check()?;
        self.advertising += 1;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        self.check()?;
        self.disconnects += 1;
        Ok(())
    }
}

struct ManualClock(Rc<Cell<u32>>);

impl crate::Clock for ManualClock {
    fn now(&self) -> u32 {
        self.0.get()
    }
}

type TestMonitor = Monitor<MockTransport, ManualClock>;

fn new_monitor() -> (TestMonitor, Rc<Cell<u32>>) {
    let time = Rc::new(Cell::new(0));
    let monitor = Monitor::new(MockTransport::default(), ManualClock(time.clone()));
    (monitor, time)
}

fn connect(monitor: &mut TestMonitor) {
    monitor.execute(Command::StartAdvertising).unwrap();
    monitor.handle_event(Event::LinkEstablished).unwrap();
    assert_eq!(monitor.session().state(), ConnectionState::Connected);
}

fn mv(millivolts: i16) -> Vec<u8> {
    millivolts.to_le_bytes().to_vec()
}

fn marker() -> Vec<u8> {
    HISTORY_END_MARKER.to_vec()
}

/// Three samples inside the first hour: 3000, 3001, 3002 mV.
fn ingest_three(monitor: &mut TestMonitor) {
    for (i, millivolts) in [3000, 3001, 3002].into_iter().enumerate() {
        monitor.ingest_sample(VoltageSample::new(60 * (i as u32 + 1), millivolts));
    }
}

fn timing_frame(conn_interval_ms: u16, slave_latency: u16, timeout_ms: u16) -> Vec<u8> {
    let mut buf = [0u8; host_protocol::MAX_FRAME_SIZE];
    Command::ChangeTiming(TimingParams {
        conn_interval_ms,
        slave_latency,
        timeout_ms,
    })
    .to_frame(&mut buf)
    .unwrap()
    .to_vec()
}

#[test]
fn inconsistent_timing_is_rejected() {
    let (mut monitor, _) = new_monitor();
    connect(&mut monitor);

    let frame = timing_frame(100, 4, 600);
    assert_eq!(
        monitor.dispatch(CommandToken::ChangeTiming, &frame[1..]),
        Err(Error::InvalidTimingParameters)
    );
    assert!(monitor.transport().timings.is_empty());
    assert_eq!(monitor.session().timing(), None);
    assert_eq!(monitor.session().state(), ConnectionState::Connected);
}

#[test]
fn consistent_timing_is_applied_when_connected() {
    let (mut monitor, _) = new_monitor();
    connect(&mut monitor);

    let expected = TimingParams {
        conn_interval_ms: 100,
        slave_latency: 4,
        timeout_ms: 1200,
    };
    monitor.dispatch_frame(&timing_frame(100, 4, 1200)).unwrap();
    assert_eq!(monitor.transport().timings, [expected]);
    assert_eq!(monitor.session().timing(), Some(expected));
    assert_eq!(monitor.session().state(), ConnectionState::Connected);
}

#[test]
fn timing_outside_radio_limits_is_rejected() {
    let (mut monitor, _) = new_monitor();
    connect(&mut monitor);

    // Consistent, but the interval is below what the radio supports
    assert_eq!(
        monitor.dispatch_frame(&timing_frame(5, 0, 1000)),
        Err(Error::InvalidTimingParameters)
    );
    assert_eq!(
        monitor.dispatch_frame(&timing_frame(100, 0, 40000)),
        Err(Error::InvalidTimingParameters)
    );
    assert!(monitor.transport().timings.is_empty());
}

#[test]
fn timing_needs_a_connection() {
    let (mut monitor, _) = new_monitor();
    assert_eq!(
        monitor.dispatch_frame(&timing_frame(100, 4, 1200)),
        Err(Error::IllegalStateTransition)
    );

    monitor.execute(Command::StartAdvertising).unwrap();
    assert_eq!(
        monitor.dispatch_frame(&timing_frame(100, 4, 1200)),
        Err(Error::IllegalStateTransition)
    );
    assert!(monitor.transport().timings.is_empty());
    assert_eq!(monitor.session().state(), ConnectionState::Advertising);
}

#[test]
fn start_advertising_while_connected() {
    let (mut monitor, _) = new_monitor();
    connect(&mut monitor);

    assert_eq!(monitor.dispatch(CommandToken::StartAdvertising, &[]), Err(Error::AlreadyConnected));
    assert_eq!(monitor.session().state(), ConnectionState::Connected);
    assert_eq!(monitor.transport().advertising, 1);
}

#[test]
fn start_advertising_twice() {
    let (mut monitor, _) = new_monitor();
    monitor.execute(Command::StartAdvertising).unwrap();
    assert_eq!(
        monitor.execute(Command::StartAdvertising),
        Err(Error::IllegalStateTransition)
    );
    assert_eq!(monitor.session().state(), ConnectionState::Advertising);
    assert_eq!(monitor.transport().advertising, 1);
}

#[test]
fn link_established_requires_advertising() {
    let (mut monitor, _) = new_monitor();
    assert_eq!(
        monitor.handle_event(Event::LinkEstablished),
        Err(Error::IllegalStateTransition)
    );
    assert_eq!(monitor.session().state(), ConnectionState::Idle);
}

#[test]
fn failed_transport_request_leaves_state_alone() {
    let (mut monitor, _) = new_monitor();
    monitor.transport_mut().failure = Some(TransportError(0x13));
    assert_eq!(
        monitor.execute(Command::StartAdvertising),
        Err(Error::Transport(TransportError(0x13)))
    );
    assert_eq!(monitor.session().state(), ConnectionState::Idle);
}

#[test]
fn disconnect_while_idle_is_a_no_op() {
    let (mut monitor, _) = new_monitor();
    monitor.dispatch(CommandToken::Disconnect, &[]).unwrap();
    assert_eq!(monitor.session().state(), ConnectionState::Idle);
    assert_eq!(monitor.transport().disconnects, 0);
}

#[test]
fn disconnect_stops_advertising() {
    let (mut monitor, _) = new_monitor();
    monitor.execute(Command::StartAdvertising).unwrap();
    monitor.execute(Command::Disconnect).unwrap();
    assert_eq!(monitor.session().state(), ConnectionState::Idle);
    assert_eq!(monitor.transport().disconnects, 1);
}

#[test]
fn disconnect_resets_cursors() {
    let (mut monitor, _) = new_monitor();
    ingest_three(&mut monitor);
    connect(&mut monitor);

    monitor.publish_tick().unwrap();
    monitor.handle_event(Event::Acknowledged(MINUTELY)).unwrap();
    monitor.publish_tick().unwrap();
    assert_eq!(monitor.transport().sent_on(MINUTELY), [mv(3000), mv(3001)]);

    monitor.execute(Command::Disconnect).unwrap();
    assert_eq!(monitor.session().state(), ConnectionState::Idle);
    assert_eq!(monitor.session().timing(), None);
    assert!(monitor.publisher().pending_voltage().is_none());

    // Acknowledgement of the old link's in flight entry
    monitor.handle_event(Event::Acknowledged(MINUTELY)).unwrap();

    monitor.transport_mut().sent.clear();
    connect(&mut monitor);
    monitor.publish_tick().unwrap();
    assert_eq!(monitor.transport().sent_on(MINUTELY), [mv(3000)]);
    assert_eq!(monitor.transport().sent_on(HOURLY), [marker()]);
    assert_eq!(monitor.transport().sent_on(DAILY), [marker()]);
}

#[test]
fn link_loss_resets_cursors() {
    let (mut monitor, _) = new_monitor();
    ingest_three(&mut monitor);
    connect(&mut monitor);
    monitor.publish_tick().unwrap();
    monitor.handle_event(Event::Acknowledged(MINUTELY)).unwrap();

    monitor.handle_event(Event::LinkLost).unwrap();
    assert_eq!(monitor.session().state(), ConnectionState::Idle);
    assert_eq!(monitor.transport().disconnects, 0);

    monitor.transport_mut().sent.clear();
    connect(&mut monitor);
    monitor.publish_tick().unwrap();
    assert_eq!(monitor.transport().sent_on(MINUTELY), [mv(3000)]);
}

#[test]
fn connecting_primes_latest_voltage() {
    let (mut monitor, _) = new_monitor();
    ingest_three(&mut monitor);
    connect(&mut monitor);
    monitor.publish_tick().unwrap();

    monitor.handle_event(Event::LinkLost).unwrap();
    monitor.transport_mut().sent.clear();
    connect(&mut monitor);

    assert_eq!(monitor.publish_tick(), Ok(4));
    assert_eq!(monitor.transport().sent_on(VOLTAGE_PIPE), [mv(3002)]);
}

#[test]
fn first_tick_sends_one_payload_per_pipe() {
    let (mut monitor, _) = new_monitor();
    ingest_three(&mut monitor);
    connect(&mut monitor);

    assert_eq!(monitor.publish_tick(), Ok(4));
    let sent = &monitor.transport().sent;
    assert_eq!(
        *sent,
        [
            (VOLTAGE_PIPE, mv(3002)),
            (MINUTELY, mv(3000)),
            (HOURLY, marker()),
            (DAILY, marker()),
        ]
    );

    // Nothing acknowledged yet and the voltage is already out
    assert_eq!(monitor.publish_tick(), Ok(0));
}

#[test]
fn publishing_requires_a_connection() {
    let (mut monitor, _) = new_monitor();
    ingest_three(&mut monitor);
    assert_eq!(monitor.publish_tick(), Err(Error::NotConnected));

    monitor.execute(Command::StartAdvertising).unwrap();
    assert_eq!(monitor.publish_tick(), Err(Error::NotConnected));
    assert!(monitor.transport().sent.is_empty());

    monitor.handle_event(Event::LinkEstablished).unwrap();
    assert_eq!(monitor.publish_tick(), Ok(4));
}

#[test]
fn history_ends_with_marker() {
    let (mut monitor, _) = new_monitor();
    monitor.ingest_sample(VoltageSample::new(60, 3000));
    monitor.ingest_sample(VoltageSample::new(120, 3001));
    connect(&mut monitor);

    for _ in 0..5 {
        monitor.publish_tick().unwrap();
        monitor.handle_event(Event::Acknowledged(MINUTELY)).unwrap();
    }
    assert_eq!(monitor.transport().sent_on(MINUTELY), [mv(3000), mv(3001), marker()]);

    monitor.ingest_sample(VoltageSample::new(180, 3002));
    for _ in 0..5 {
        monitor.publish_tick().unwrap();
        monitor.handle_event(Event::Acknowledged(MINUTELY)).unwrap();
    }
    assert_eq!(
        monitor.transport().sent_on(MINUTELY),
        [mv(3000), mv(3001), marker(), mv(3002), marker()]
    );
}

#[test]
fn congestion_defers_without_loss() {
    let (mut monitor, _) = new_monitor();
    ingest_three(&mut monitor);
    connect(&mut monitor);

    monitor.publish_tick().unwrap();
    monitor.handle_event(Event::Congested(MINUTELY)).unwrap();
    monitor.handle_event(Event::Acknowledged(MINUTELY)).unwrap();

    monitor.ingest_sample(VoltageSample::new(240, 3003));
    for _ in 0..3 {
        monitor.publish_tick().unwrap();
    }
    assert_eq!(monitor.transport().sent_on(MINUTELY), [mv(3000)]);

    monitor.handle_event(Event::Cleared(MINUTELY)).unwrap();
    monitor.publish_tick().unwrap();
    assert_eq!(monitor.transport().sent_on(MINUTELY), [mv(3000), mv(3001)]);
}

#[test]
fn congested_voltage_is_coalesced() {
    let (mut monitor, _) = new_monitor();
    connect(&mut monitor);
    monitor.handle_event(Event::Congested(VOLTAGE_PIPE)).unwrap();

    monitor.ingest_sample(VoltageSample::new(60, 3000));
    monitor.publish_tick().unwrap();
    monitor.ingest_sample(VoltageSample::new(120, 3100));
    monitor.publish_tick().unwrap();
    assert!(monitor.transport().sent_on(VOLTAGE_PIPE).is_empty());

    monitor.handle_event(Event::Cleared(VOLTAGE_PIPE)).unwrap();
    monitor.publish_tick().unwrap();
    monitor.publish_tick().unwrap();
    assert_eq!(monitor.transport().sent_on(VOLTAGE_PIPE), [mv(3100)]);
}

#[test]
fn send_failure_is_retried() {
    let (mut monitor, _) = new_monitor();
    ingest_three(&mut monitor);
    connect(&mut monitor);

    monitor.transport_mut().failure = Some(TransportError(0x8E));
    assert_eq!(monitor.publish_tick(), Ok(0));
    assert_eq!(monitor.publisher().pending_voltage().map(|p| p.payload.to_vec()), Some(mv(3002)));

    monitor.transport_mut().failure = None;
    assert_eq!(monitor.publish_tick(), Ok(4));
    assert_eq!(monitor.transport().sent_on(VOLTAGE_PIPE), [mv(3002)]);
    assert_eq!(monitor.transport().sent_on(MINUTELY), [mv(3000)]);
}

#[test]
fn evicted_entries_are_skipped() {
    let (mut monitor, _) = new_monitor();
    monitor.ingest_sample(VoltageSample::new(0, 3000));
    connect(&mut monitor);
    monitor.publish_tick().unwrap();
    monitor.handle_event(Event::Acknowledged(MINUTELY)).unwrap();

    // Push the second entry out before it can be sent
    for minute in 1..=(consts::MINUTELY_CAPACITY as u32 + 1) {
        monitor.ingest_sample(VoltageSample::new(minute * 60, 3000 + minute as u16));
    }
    monitor.publish_tick().unwrap();
    let oldest = monitor.history().view(Granularity::Minutely).iter().next().unwrap();
    assert_eq!(
        monitor.transport().sent_on(MINUTELY),
        [mv(3000), mv(oldest.millivolts as i16)]
    );
}

#[test]
fn hourly_pipe_carries_rollups() {
    let (mut monitor, _) = new_monitor();
    for minute in 1..=120u32 {
        monitor.ingest_sample(VoltageSample::new(minute * 60, 3700));
    }
    connect(&mut monitor);
    for _ in 0..4 {
        monitor.publish_tick().unwrap();
        monitor.handle_event(Event::Acknowledged(HOURLY)).unwrap();
    }
    assert_eq!(monitor.transport().sent_on(HOURLY), [mv(3700), mv(3700), marker()]);
}

#[test]
fn set_data_voltage_records_at_clock_time() {
    let (mut monitor, time) = new_monitor();
    time.set(7_200);
    monitor.dispatch(CommandToken::SetDataVoltage, &[0xF4, 0x1C]).unwrap();

    assert_eq!(
        monitor.history().latest(Granularity::Minutely),
        Some(VoltageSample::new(7_200, 3700))
    );
    assert_eq!(monitor.publisher().pending_voltage().map(|p| p.payload.to_vec()), Some(mv(3700)));
    assert_eq!(monitor.session().state(), ConnectionState::Idle);
}

#[test]
fn stale_voltage_override_is_not_published() {
    let (mut monitor, time) = new_monitor();
    monitor.ingest_sample(VoltageSample::new(120, 3700));
    time.set(60);
    monitor.dispatch(CommandToken::SetDataVoltage, &[0x90, 0x1C]).unwrap();

    assert_eq!(monitor.history().snapshot(Granularity::Minutely).as_slice(), &[VoltageSample::new(120, 3700)]);
    assert_eq!(monitor.publisher().pending_voltage().map(|p| p.payload.to_vec()), Some(mv(3700)));
}

#[test]
fn stale_sample_is_not_offered() {
    let (mut monitor, _) = new_monitor();
    connect(&mut monitor);
    monitor.ingest_sample(VoltageSample::new(120, 3700));
    monitor.publish_tick().unwrap();
    assert_eq!(monitor.transport().sent_on(VOLTAGE_PIPE), vec![mv(3700)]);

    monitor.ingest_sample(VoltageSample::new(60, 3500));
    assert!(monitor.publisher().pending_voltage().is_none());
    monitor.publish_tick().unwrap();
    assert_eq!(monitor.transport().sent_on(VOLTAGE_PIPE), vec![mv(3700)]);
}

#[test]
fn clock_is_shared_with_the_event_loop() {
    let (monitor, time) = new_monitor();
    time.set(42);
    assert_eq!(monitor.clock().now(), 42);
}

#[test]
fn malformed_commands_change_nothing() {
    let (mut monitor, _) = new_monitor();
    assert_eq!(monitor.dispatch(CommandToken::SetDataVoltage, &[]), Err(Error::MalformedPayload));
    assert_eq!(monitor.dispatch(CommandToken::StartAdvertising, &[1]), Err(Error::MalformedPayload));
    assert_eq!(monitor.dispatch(CommandToken::ChangeTiming, &[100]), Err(Error::MalformedPayload));
    assert_eq!(monitor.dispatch_frame(&[7]), Err(Error::MalformedPayload));
    assert_eq!(monitor.dispatch_frame(&[]), Err(Error::MalformedPayload));

    assert_eq!(monitor.session().state(), ConnectionState::Idle);
    assert!(monitor.history().latest(Granularity::Minutely).is_none());
    assert_eq!(monitor.transport().advertising, 0);
}

#[test]
fn events_on_unknown_pipes() {
    let (mut monitor, _) = new_monitor();
    connect(&mut monitor);
    assert_eq!(monitor.handle_event(Event::Acknowledged(9)), Err(Error::UnknownPipe(9)));
    assert_eq!(monitor.handle_event(Event::Congested(0)), Err(Error::UnknownPipe(0)));
    assert_eq!(monitor.handle_event(Event::Cleared(6)), Err(Error::UnknownPipe(6)));
}
