//! The two forwarding pipelines.
//!
//! Each direction owns its mapped-input bindings and drains its receive
//! queue in bursts. Chassis frames update telemetry, drive the lock engine
//! and pass through the generation encoder before going out on the Haldex
//! bus. Haldex frames update the coupling status and are forwarded back
//! untouched.
//!
//! Nothing in here returns an error to the caller. A frame that fails to
//! decode or send is dropped and the loop moves on to the next one.

use embassy_futures::yield_now;
use embassy_time::{Duration, Instant, Timer};

use crate::bus::{Bus, BusDriver, CanPort, Direction};
use crate::dbc::{self, vw_pq};
use crate::diag::DiagnosticSink;
use crate::encoder::{self, Counters, EncodeContext};
use crate::engine::LockEngine;
use crate::frame::CanFrame;
use crate::ids;
use crate::mapped::{Bindings, Input, MappedInputs};
use crate::state::{ControlState, Generation, Mode, Telemetry};

/// per frame transmit timeout
pub const SEND_TIMEOUT: Duration = Duration::from_millis(10);

/// frames handled before yielding to other tasks
pub const BURST: usize = 64;

/// sleep when the receive queue is empty
pub const IDLE: Duration = Duration::from_millis(1);

/// the engine status speed is only used once ABS speed is this old
pub const ABS_SPEED_WINDOW: Duration = Duration::from_millis(500);

/// handles to the state every task shares
#[derive(Clone, Copy)]
pub struct Shared<'a> {
    pub state: &'a ControlState,
    pub telemetry: &'a Telemetry,
    pub mapped: &'a MappedInputs,
}

/// a frame ready to go out on the other bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Forward {
    pub frame: CanFrame,
    /// the bridge changed at least one byte on the wire
    pub generated: bool,
}

impl Forward {
    fn unchanged(frame: CanFrame) -> Self {
        Self { frame, generated: false }
    }
}

/// one receive direction
pub trait Pipeline {
    const SOURCE: Bus;

    fn bindings(&mut self) -> &mut Bindings;

    /// handle one received frame, returning what to send on the other bus
    fn process(&mut self, shared: Shared<'_>, frame: CanFrame, now: Instant) -> Option<Forward>;
}

fn round_to_u16(value: f32) -> u16 {
    (value + 0.5) as u16
}

/// feed recent mapped values into telemetry, negatives clamp to zero
fn apply_mapped(bindings: &Bindings, bus: Bus, shared: Shared<'_>, frame: &CanFrame, now: Instant) {
    for input in Input::ALL {
        let Some(value) = bindings.get(input).apply(bus, frame) else {
            continue;
        };
        let value = value.max(0.0);
        match input {
            Input::Speed => shared.telemetry.set_speed_kmh(round_to_u16(value)),
            Input::Throttle => shared.telemetry.set_pedal_pct(value),
            Input::Rpm => shared.telemetry.set_rpm(round_to_u16(value)),
        }
        shared.mapped.mark_applied(input, now);
    }
}

fn boost_signal() -> Option<&'static dbc::DbcSignal> {
    dbc::find_signal(&vw_pq::SIGNALS, ids::MOTOR5, "Boost_Pressure", "hPa")
}

/// built-in decoding of the few frames the engine needs
fn extract(shared: Shared<'_>, frame: &CanFrame, now: Instant) {
    if frame.extended || frame.remote {
        return;
    }
    let Shared { telemetry, mapped, .. } = shared;
    let d = &frame.data;
    match frame.id {
        ids::MOTOR1 => {
            if !mapped.is_recent(Input::Throttle, now) {
                telemetry.set_pedal_pct(d[5] as f32 * 0.4);
            }
            if !mapped.is_recent(Input::Rpm, now) {
                // quarter rpm, truncated
                telemetry.set_rpm(u16::from_le_bytes([d[2], d[3]]) / 4);
            }
            telemetry.set_applied_torque(d[6]);
        }
        ids::BRAKES1 => {
            if !mapped.is_recent(Input::Speed, now) {
                let raw = dbc::extract_raw(d, 17, 15, true);
                telemetry.set_speed_kmh(((raw + 50) / 100) as u16);
                telemetry.mark_abs_speed(now);
            }
        }
        ids::MOTOR2 => {
            let abs_fresh = telemetry
                .last_abs_speed()
                .is_some_and(|at| now.saturating_duration_since(at) <= ABS_SPEED_WINDOW);
            if !mapped.is_recent(Input::Speed, now) && !abs_fresh {
                telemetry.set_speed_kmh(d[3] as u16 * 128 / 100);
            }
        }
        ids::MOTOR5 => {
            if let Some(signal) = boost_signal()
                && dbc::mux_matches(&vw_pq::SIGNALS, signal, d)
            {
                let value = dbc::decode(signal, d);
                if value.is_finite() {
                    telemetry.set_boost(round_to_u16(value.max(0.0)));
                }
            }
        }
        ids::EXTERNAL_CONTROL => trace!("external control frame ignored"),
        _ => {}
    }
}

/// chassis to Haldex
#[derive(Default)]
pub struct ChassisPipeline {
    pub bindings: Bindings,
    pub engine: LockEngine,
    pub counters: Counters,
}

impl ChassisPipeline {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Pipeline for ChassisPipeline {
    const SOURCE: Bus = Bus::Chassis;

    fn bindings(&mut self) -> &mut Bindings {
        &mut self.bindings
    }

    fn process(&mut self, shared: Shared<'_>, frame: CanFrame, now: Instant) -> Option<Forward> {
        apply_mapped(&self.bindings, Bus::Chassis, shared, &frame, now);

        let state = shared.state;
        if state.standalone() {
            // only the gateway diagnostics cross while frames are synthesized
            return (!frame.extended && ids::DIAGNOSTICS.contains(&frame.id)).then(|| Forward::unchanged(frame));
        }

        extract(shared, &frame, now);

        let mode = state.mode();
        if mode == Mode::Stock {
            self.engine.reset();
            shared.telemetry.set_requested_lock(0.0);
            return Some(Forward::unchanged(frame));
        }
        let Some(generation) = state.generation() else {
            return Some(Forward::unchanged(frame));
        };

        let request = self.engine.evaluate(state, shared.telemetry, now);
        let ctx = EncodeContext { request, mode, applied_torque: shared.telemetry.applied_torque() };
        let mut out = frame;
        encoder::encode(generation, &mut out, &ctx, &mut self.counters);
        let generated = !out.same_wire_content(&frame);
        if generated {
            trace!("rewrote {=u32:#x}", out.id);
        }
        Some(Forward { frame: out, generated })
    }
}

/// map `raw` from `[lo, hi]` onto 0..=100
fn scale_engagement(raw: u8, lo: u8, hi: u8) -> u8 {
    if raw <= lo {
        return 0;
    }
    ((raw - lo) as u16 * 100 / (hi - lo) as u16).min(100) as u8
}

/// raw engagement and its percentage, laid out differently per generation
pub fn engagement(generation: Generation, data: &[u8; 8]) -> (u8, u8) {
    match generation {
        Generation::Gen1 => (data[1], scale_engagement(data[1], 128, 198)),
        Generation::Gen2 => {
            let raw = data[1].wrapping_add(data[4]);
            (raw, scale_engagement(raw, 128, 255))
        }
        Generation::Gen4 => (data[1], scale_engagement(data[1], 128, 255)),
    }
}

/// Haldex to chassis, never modified
#[derive(Default)]
pub struct HaldexPipeline {
    pub bindings: Bindings,
}

impl HaldexPipeline {
    pub const fn new() -> Self {
        Self { bindings: Bindings::new() }
    }
}

impl Pipeline for HaldexPipeline {
    const SOURCE: Bus = Bus::Haldex;

    fn bindings(&mut self) -> &mut Bindings {
        &mut self.bindings
    }

    fn process(&mut self, shared: Shared<'_>, frame: CanFrame, now: Instant) -> Option<Forward> {
        apply_mapped(&self.bindings, Bus::Haldex, shared, &frame, now);

        if frame.id == ids::HALDEX && !frame.extended && !frame.remote {
            let telemetry = shared.telemetry;
            let (raw, pct) = match shared.state.generation() {
                Some(generation) => engagement(generation, &frame.data),
                None => (telemetry.engagement_raw(), telemetry.engagement_pct()),
            };
            telemetry.set_haldex(frame.data[0], raw, pct);
        }
        Some(Forward::unchanged(frame))
    }
}

/// record a received frame, clearing a failure flag on the first one after
fn note_rx(telemetry: &Telemetry, bus: Bus, now: Instant) {
    telemetry.mark_rx(bus, now);
    if telemetry.failed(bus) && telemetry.set_failed(bus, false) {
        info!("{} bus recovered", bus);
    }
}

/// drain one burst from the source bus, returning how many frames were read
pub async fn pump<P: Pipeline, C: CanPort, H: CanPort>(
    pipeline: &mut P,
    driver: &BusDriver<C, H>,
    shared: Shared<'_>,
    sink: &impl DiagnosticSink,
) -> usize {
    pipeline.bindings().refresh(shared.mapped);
    let mut drained = 0;
    while drained < BURST {
        let Some(frame) = driver.receive(P::SOURCE) else {
            break;
        };
        drained += 1;
        let now = Instant::now();
        note_rx(shared.telemetry, P::SOURCE, now);
        sink.observe(P::SOURCE, Direction::Rx, false, &frame, now);

        let Some(forward) = pipeline.process(shared, frame, now) else {
            continue;
        };
        let target = P::SOURCE.other();
        if driver.send(target, &forward.frame, SEND_TIMEOUT).await.is_ok() {
            sink.observe(target, Direction::Tx, forward.generated, &forward.frame, Instant::now());
        }
    }
    drained
}

/// run a pipeline forever
pub async fn run<P: Pipeline, C: CanPort, H: CanPort>(
    mut pipeline: P,
    driver: &BusDriver<C, H>,
    shared: Shared<'_>,
    sink: &impl DiagnosticSink,
) -> ! {
    loop {
        if pump(&mut pipeline, driver, shared, sink).await == 0 {
            Timer::after(IDLE).await;
        } else {
            yield_now().await;
        }
    }
}
