//! Per generation frame shaping.
//!
//! Each coupling generation expects its own set of chassis frames with some
//! bytes driven by the lock request and others held at fixed values or
//! rolling counters. The bytes are what the controllers are known to accept;
//! they are reproduced exactly, including the places where they look
//! inconsistent.
//!
//! Bridge mode looks the (generation, identifier) pair up in [`SHAPERS`] and
//! rewrites the forwarded frame in place. Standalone mode builds complete
//! frames per cadence with [`synthesize`].

pub mod gen1;
pub mod gen2;
pub mod gen4;

use embassy_time::Duration;
use heapless::Vec;

use crate::engine::LockRequest;
use crate::frame::CanFrame;
use crate::ids;
use crate::state::{Generation, Mode};

/// inputs every shaper may read
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EncodeContext {
    pub request: LockRequest,
    pub mode: Mode,
    /// last torque byte seen from the engine, reused when the mode has no
    /// override of its own
    pub applied_torque: u8,
}

impl EncodeContext {
    pub(crate) fn adj(&self, value: u8) -> u8 {
        self.request.adjust(value, false)
    }
}

/// rolling counters, one set per generation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Counters {
    pub gen1: gen1::Counters,
    pub gen2: gen2::Counters,
    pub gen4: gen4::Counters,
}

pub type Shaper = fn(&mut [u8; 8], &EncodeContext, &mut Counters);

pub struct ShaperEntry {
    pub generation: Generation,
    pub id: u32,
    pub shape: Shaper,
}

const fn entry(generation: Generation, id: u32, shape: Shaper) -> ShaperEntry {
    ShaperEntry { generation, id, shape }
}

/// every chassis frame the bridge rewrites, per generation
pub static SHAPERS: [ShaperEntry; 16] = [
    entry(Generation::Gen1, ids::MOTOR1, gen1::motor1),
    entry(Generation::Gen1, ids::MOTOR3, gen1::motor3),
    entry(Generation::Gen1, ids::BRAKES1, gen1::brakes1),
    entry(Generation::Gen1, ids::BRAKES3, gen1::brakes3),
    entry(Generation::Gen2, ids::MOTOR1, gen2::motor1),
    entry(Generation::Gen2, ids::MOTOR3, gen2::motor3),
    entry(Generation::Gen2, ids::BRAKES1, gen2::brakes1),
    entry(Generation::Gen2, ids::BRAKES2, gen2::brakes2),
    entry(Generation::Gen2, ids::BRAKES3, gen2::brakes3),
    entry(Generation::Gen2, ids::MOTOR6, noop),
    entry(Generation::Gen4, ids::LW1, gen4::lw1),
    entry(Generation::Gen4, ids::MOTOR1, gen4::motor1),
    entry(Generation::Gen4, ids::BRAKES1, gen4::brakes1),
    entry(Generation::Gen4, ids::BRAKES2, gen4::brakes2),
    entry(Generation::Gen4, ids::BRAKES3, gen4::brakes3),
    entry(Generation::Gen4, ids::BRAKES4, gen4::brakes4),
];

// Gen2 motor 6 is routed through the table but left as received
fn noop(_: &mut [u8; 8], _: &EncodeContext, _: &mut Counters) {}

pub fn shaper(generation: Generation, id: u32) -> Option<Shaper> {
    SHAPERS.iter().find(|e| e.generation == generation && e.id == id).map(|e| e.shape)
}

/// rewrite a forwarded frame, returning whether a shaper handled it
pub fn encode(generation: Generation, frame: &mut CanFrame, ctx: &EncodeContext, counters: &mut Counters) -> bool {
    if frame.extended || frame.remote {
        return false;
    }
    match shaper(generation, frame.id) {
        Some(shape) => {
            shape(&mut frame.data, ctx, counters);
            true
        }
        None => false,
    }
}

/// standalone transmit cadences
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Cadence {
    Ms10,
    Ms20,
    Ms25,
    Ms100,
    Ms200,
    Ms1000,
}

impl Cadence {
    /// fastest first, the order frames of one tick go out in
    pub const ALL: [Cadence; 6] =
        [Cadence::Ms10, Cadence::Ms20, Cadence::Ms25, Cadence::Ms100, Cadence::Ms200, Cadence::Ms1000];

    pub fn period(self) -> Duration {
        Duration::from_millis(match self {
            Cadence::Ms10 => 10,
            Cadence::Ms20 => 20,
            Cadence::Ms25 => 25,
            Cadence::Ms100 => 100,
            Cadence::Ms200 => 200,
            Cadence::Ms1000 => 1000,
        })
    }
}

pub type Synthesized = Vec<CanFrame, 8>;

/// frames due for one cadence of standalone operation
pub fn synthesize(generation: Generation, cadence: Cadence, ctx: &EncodeContext, counters: &mut Counters) -> Synthesized {
    let mut out = Synthesized::new();
    match generation {
        Generation::Gen1 => gen1::synthesize(cadence, ctx, &mut counters.gen1, &mut out),
        Generation::Gen2 => gen2::synthesize(cadence, ctx, &mut counters.gen2, &mut out),
        Generation::Gen4 => gen4::synthesize(cadence, ctx, &mut counters.gen4, &mut out),
    }
    out
}

pub(crate) fn push(out: &mut Synthesized, frame: CanFrame) {
    // every cadence emits fewer frames than the capacity
    let _ = out.push(frame);
}
