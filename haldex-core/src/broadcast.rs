//! Periodic status frame on the chassis bus.

use embassy_time::{Duration, Instant, Ticker};

use crate::bridge::{SEND_TIMEOUT, Shared};
use crate::bus::{Bus, BusDriver, CanPort, Direction};
use crate::diag::DiagnosticSink;
use crate::frame::CanFrame;
use crate::ids;

pub const BROADCAST_PERIOD: Duration = Duration::from_millis(200);

/// reserved for an external controller, nothing sets it yet
const MODE_OVERRIDE: u8 = 0;

/// `[0, standalone, engagement raw, lock, speed, override, mode, pedal]`
pub fn status_frame(shared: Shared<'_>) -> CanFrame {
    let Shared { state, telemetry, .. } = shared;
    CanFrame::standard(
        ids::BROADCAST as u16,
        [
            0,
            state.standalone() as u8,
            telemetry.engagement_raw(),
            telemetry.requested_lock() as u8,
            telemetry.speed_kmh().min(u8::MAX as u16) as u8,
            MODE_OVERRIDE,
            state.mode().index(),
            telemetry.pedal_pct() as u8,
        ],
    )
}

pub async fn run<C: CanPort, H: CanPort>(driver: &BusDriver<C, H>, shared: Shared<'_>, sink: &impl DiagnosticSink) -> ! {
    let mut ticker = Ticker::every(BROADCAST_PERIOD);
    loop {
        if shared.state.broadcast() {
            let frame = status_frame(shared);
            if driver.send(Bus::Chassis, &frame, SEND_TIMEOUT).await.is_ok() {
                sink.observe(Bus::Chassis, Direction::Tx, true, &frame, Instant::now());
            }
        }
        ticker.next().await;
    }
}
