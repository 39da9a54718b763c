//! Frame synthesis when no chassis bus is connected.
//!
//! The coupling controller expects a full set of chassis frames at fixed
//! rates. [`Scheduler`] works out which cadences are due on each 5 ms tick
//! and builds their frames, fastest cadence first. The lock request is
//! recomputed from telemetry on the 100 ms cadence and reused in between.

use embassy_time::{Duration, Instant, Ticker};
use heapless::Vec;

use crate::bridge::{SEND_TIMEOUT, Shared};
use crate::bus::{Bus, BusDriver, CanPort, Direction};
use crate::diag::DiagnosticSink;
use crate::encoder::{self, Cadence, Counters, EncodeContext};
use crate::engine::{LockEngine, LockRequest};
use crate::frame::CanFrame;
use crate::state::Generation;

pub const TICK: Duration = Duration::from_millis(5);

pub type TickFrames = Vec<CanFrame, 32>;

#[derive(Debug, Default)]
pub struct Scheduler {
    counters: Counters,
    engine: LockEngine,
    request: Option<LockRequest>,
    next: [Option<Instant>; 6],
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) -> LockRequest {
        self.request.unwrap_or(LockRequest::OPEN)
    }

    /// start over on the next tick, counters keep running
    pub fn reset(&mut self) {
        self.next = [None; 6];
        self.request = None;
        self.engine.reset();
    }

    /// cadences due at `now`, fastest first
    pub fn due(&mut self, now: Instant) -> Vec<Cadence, 6> {
        let mut due = Vec::new();
        for (slot, cadence) in self.next.iter_mut().zip(Cadence::ALL) {
            let ready = slot.is_none_or(|at| now >= at);
            if !ready {
                continue;
            }
            let mut next = slot.unwrap_or(now) + cadence.period();
            if next <= now {
                // fell behind, skip the missed slots
                next = now + cadence.period();
            }
            *slot = Some(next);
            let _ = due.push(cadence);
        }
        due
    }

    /// every frame due at `now`
    pub fn tick(&mut self, shared: Shared<'_>, generation: Generation, now: Instant) -> TickFrames {
        let due = self.due(now);
        if due.contains(&Cadence::Ms100) {
            self.request = Some(self.engine.evaluate(shared.state, shared.telemetry, now));
        }
        let ctx = EncodeContext {
            request: self.request(),
            mode: shared.state.mode(),
            applied_torque: shared.telemetry.applied_torque(),
        };
        let mut frames = TickFrames::new();
        for cadence in due {
            for frame in encoder::synthesize(generation, cadence, &ctx, &mut self.counters) {
                if frames.push(frame).is_err() {
                    warn!("standalone frame buffer full");
                    return frames;
                }
            }
        }
        frames
    }
}

pub async fn run<C: CanPort, H: CanPort>(driver: &BusDriver<C, H>, shared: Shared<'_>, sink: &impl DiagnosticSink) -> ! {
    let mut scheduler = Scheduler::new();
    let mut active = false;
    let mut ticker = Ticker::every(TICK);
    loop {
        ticker.next().await;
        let generation = shared.state.generation().filter(|_| shared.state.standalone());
        let Some(generation) = generation else {
            if active {
                info!("standalone frames stopped");
                scheduler.reset();
                active = false;
            }
            continue;
        };
        if !active {
            info!("standalone frames for {}", generation);
            active = true;
        }
        let now = Instant::now();
        for frame in scheduler.tick(shared, generation, now) {
            if driver.send(Bus::Haldex, &frame, SEND_TIMEOUT).await.is_ok() {
                sink.observe(Bus::Haldex, Direction::Tx, true, &frame, now);
            }
        }
    }
}
