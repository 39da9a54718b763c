use std::cell::RefCell;
use std::collections::VecDeque;

use embassy_futures::block_on;
use embassy_time::Instant;
use haldex_core::bridge::{ChassisPipeline, Forward, HaldexPipeline, Pipeline, Shared, pump};
use haldex_core::bus::{Bus, BusDriver, CanPort, Direction, ReadySet, SendError};
use haldex_core::diag::{DiagnosticSink, FrameCache};
use haldex_core::frame::CanFrame;
use haldex_core::ids;
use haldex_core::mapped::{Input, MappedInputs};
use haldex_core::state::{ControlState, FixedRatio, Generation, Mode, Telemetry};

struct Fixture {
    state: ControlState,
    telemetry: Telemetry,
    mapped: MappedInputs,
}

impl Fixture {
    fn new(mode: Mode, generation: Generation) -> Self {
        let f = Self { state: ControlState::new(), telemetry: Telemetry::new(), mapped: MappedInputs::new() };
        f.state.set_mode(mode);
        f.state.set_generation(Some(generation));
        f
    }

    fn shared(&self) -> Shared<'_> {
        Shared { state: &self.state, telemetry: &self.telemetry, mapped: &self.mapped }
    }
}

struct LogPort<'a> {
    rx: VecDeque<CanFrame>,
    sent: &'a RefCell<Vec<CanFrame>>,
}

impl CanPort for LogPort<'_> {
    fn try_receive(&mut self) -> Option<CanFrame> {
        self.rx.pop_front()
    }

    async fn transmit(&mut self, frame: &CanFrame) -> Result<(), SendError> {
        self.sent.borrow_mut().push(*frame);
        Ok(())
    }

    async fn recover(&mut self) -> bool {
        true
    }
}

fn at(ms: u64) -> Instant {
    Instant::from_millis(ms)
}

#[test]
fn gen1_fixed_split_rewrites_motor1() {
    let f = Fixture::new(Mode::Fixed(FixedRatio::R50_50), Generation::Gen1);
    let mut pipeline = ChassisPipeline::new();
    let frame = CanFrame::standard(ids::MOTOR1 as u16, [0x00, 0x10, 0x40, 0x1F, 0x00, 0x80, 0x00, 0x00]);
    let out = pipeline.process(f.shared(), frame, at(100)).unwrap();
    assert_eq!(out.frame.data, [0x00, 0xFE, 0x21, 0x4E, 0xFE, 0xFE, 0x16, 0x00]);
    assert!(out.generated);
    assert_eq!(f.telemetry.requested_lock(), 100.0);
}

#[test]
fn gen4_motor1_open_and_locked() {
    let frame = CanFrame::standard(ids::MOTOR1 as u16, [0x5A, 1, 2, 3, 4, 5, 6, 7]);

    let open = Fixture::new(Mode::Forward, Generation::Gen4);
    let out = ChassisPipeline::new().process(open.shared(), frame, at(10)).unwrap();
    assert_eq!(out.frame.data, [0x5A, 0, 0, 0, 0, 0, 0, 0]);

    let locked = Fixture::new(Mode::Fixed(FixedRatio::R50_50), Generation::Gen4);
    let out = ChassisPipeline::new().process(locked.shared(), frame, at(10)).unwrap();
    assert_eq!(out.frame.data, [0x5A, 0xFE, 0x20, 0x4E, 0xFE, 0xFE, 0x16, 0xFE]);
}

#[test]
fn gen4_brakes4_carries_its_checksum() {
    let f = Fixture::new(Mode::Fixed(FixedRatio::R50_50), Generation::Gen4);
    let mut pipeline = ChassisPipeline::new();
    let frame = CanFrame::standard(ids::BRAKES4 as u16, [0; 8]);
    for expected in [0x00, 0x10, 0x20] {
        let out = pipeline.process(f.shared(), frame, at(10)).unwrap().frame;
        assert_eq!(out.data[6], expected);
        assert_eq!(out.data[7], out.data[..7].iter().fold(0, |acc, b| acc ^ b));
    }
}

#[test]
fn mapped_speed_expires_after_one_second() {
    let f = Fixture::new(Mode::Stock, Generation::Gen1);
    block_on(f.mapped.set_key(Input::Speed, "chassis|0x4A0|wheel speed fl|km/h")).unwrap();
    let mut pipeline = ChassisPipeline::new();
    pipeline.bindings.refresh(&f.mapped);
    assert!(pipeline.bindings.speed.is_ready());

    // 88.00 km/h at start bit 1
    let wheels: u64 = 8800 << 1;
    pipeline.process(f.shared(), CanFrame::standard(ids::BRAKES3 as u16, wheels.to_le_bytes()), at(0));
    assert_eq!(f.telemetry.speed_kmh(), 88);

    // ABS aggregate speed of 40 km/h
    let abs: u64 = 4000 << 17;
    let brakes1 = CanFrame::standard(ids::BRAKES1 as u16, abs.to_le_bytes());
    pipeline.process(f.shared(), brakes1, at(999));
    assert_eq!(f.telemetry.speed_kmh(), 88);
    pipeline.process(f.shared(), brakes1, at(1001));
    assert_eq!(f.telemetry.speed_kmh(), 40);
}

#[test]
fn engine_speed_only_when_abs_is_stale() {
    let f = Fixture::new(Mode::Stock, Generation::Gen1);
    let mut pipeline = ChassisPipeline::new();
    let abs: u64 = 5000 << 17;
    pipeline.process(f.shared(), CanFrame::standard(ids::BRAKES1 as u16, abs.to_le_bytes()), at(0));
    assert_eq!(f.telemetry.speed_kmh(), 50);

    let motor2 = CanFrame::standard(ids::MOTOR2 as u16, [0, 0, 0, 100, 0, 0, 0, 0]);
    pipeline.process(f.shared(), motor2, at(500));
    assert_eq!(f.telemetry.speed_kmh(), 50);
    pipeline.process(f.shared(), motor2, at(501));
    assert_eq!(f.telemetry.speed_kmh(), 128);
}

#[test]
fn standalone_forwards_only_diagnostics() {
    let f = Fixture::new(Mode::Fixed(FixedRatio::R50_50), Generation::Gen2);
    f.state.set_standalone(true);
    let mut pipeline = ChassisPipeline::new();
    for id in ids::DIAGNOSTICS {
        let frame = CanFrame::standard(id as u16, [0x11; 8]);
        assert_eq!(pipeline.process(f.shared(), frame, at(1)), Some(Forward { frame, generated: false }));
    }
    let motor1 = CanFrame::standard(ids::MOTOR1 as u16, [0, 0, 0x40, 0x1F, 0, 0x80, 0, 0]);
    assert_eq!(pipeline.process(f.shared(), motor1, at(1)), None);
    assert_eq!(f.telemetry.rpm(), 0);
}

#[test]
fn pump_forwards_both_ways_and_reports_to_the_sink() {
    let f = Fixture::new(Mode::Fixed(FixedRatio::R50_50), Generation::Gen1);
    let to_chassis = RefCell::new(Vec::new());
    let to_haldex = RefCell::new(Vec::new());
    let motor1 = CanFrame::standard(ids::MOTOR1 as u16, [0; 8]);
    let unknown = CanFrame::standard(0x123, [9; 8]);
    let status = CanFrame::standard(ids::HALDEX as u16, [0x08, 198, 0, 0, 0, 0, 0, 0]);
    let chassis = LogPort { rx: VecDeque::from([motor1, unknown]), sent: &to_chassis };
    let haldex = LogPort { rx: VecDeque::from([status]), sent: &to_haldex };
    let driver = BusDriver::new(chassis, haldex, ReadySet { chassis: true, haldex: true });
    let cache = FrameCache::<16>::new();

    block_on(async {
        assert_eq!(pump(&mut ChassisPipeline::new(), &driver, f.shared(), &cache).await, 2);
        assert_eq!(pump(&mut HaldexPipeline::new(), &driver, f.shared(), &cache).await, 1);
        assert_eq!(pump(&mut HaldexPipeline::new(), &driver, f.shared(), &cache).await, 0);
    });

    let to_haldex = to_haldex.borrow();
    assert_eq!(to_haldex.len(), 2);
    assert_eq!(to_haldex[0].data[6], 0x16);
    assert_eq!(to_haldex[1], unknown);
    assert_eq!(*to_chassis.borrow(), [status]);

    assert!(cache.get(Bus::Haldex, ids::MOTOR1).unwrap().generated);
    assert!(!cache.get(Bus::Haldex, 0x123).unwrap().generated);
    let seen = cache.get(Bus::Chassis, ids::HALDEX).unwrap();
    assert!(seen.last_rx.is_none() && seen.last_tx.is_some());
    assert_eq!(f.telemetry.engagement_pct(), 100);
    assert!(f.telemetry.last_rx(Bus::Chassis).is_some());
}

#[test]
fn sink_sees_every_direction() {
    struct Count(RefCell<[u32; 2]>);
    impl DiagnosticSink for Count {
        fn observe(&self, _: Bus, direction: Direction, _: bool, _: &CanFrame, _: Instant) {
            let i = match direction {
                Direction::Rx => 0,
                Direction::Tx => 1,
            };
            self.0.borrow_mut()[i] += 1;
        }
    }

    let f = Fixture::new(Mode::Stock, Generation::Gen1);
    let sent = RefCell::new(Vec::new());
    let frames = VecDeque::from([CanFrame::standard(0x100, [0; 8]); 70]);
    let driver = BusDriver::new(
        LogPort { rx: frames, sent: &sent },
        LogPort { rx: VecDeque::new(), sent: &sent },
        ReadySet { chassis: true, haldex: true },
    );
    let sink = Count(RefCell::new([0; 2]));
    let mut pipeline = ChassisPipeline::new();
    let drained = block_on(pump(&mut pipeline, &driver, f.shared(), &sink));
    // a single pass stops after one burst
    assert_eq!(drained, 64);
    assert_eq!(*sink.0.borrow(), [64, 64]);
    assert_eq!(block_on(pump(&mut pipeline, &driver, f.shared(), &sink)), 6);
}
