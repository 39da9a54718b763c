use super::{Cadence, Counters as AllCounters, EncodeContext, Synthesized, push};
use crate::frame::CanFrame;
use crate::ids;
use crate::state::{FixedRatio, Mode};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Counters {
    pub brakes1: u8,
}

/// torque request byte for modes that override it
pub fn applied_torque(ctx: &EncodeContext) -> Option<u8> {
    match ctx.mode {
        Mode::Forward => Some(ctx.request.adjust(0xFE, true)),
        Mode::Fixed(FixedRatio::R50_50) => Some(ctx.adj(0x16)),
        Mode::Fixed(FixedRatio::R60_40) => Some(ctx.adj(0x22)),
        Mode::Fixed(FixedRatio::R70_30 | FixedRatio::R80_20 | FixedRatio::R90_10) => Some(ctx.adj(0x50)),
        _ => None,
    }
}

fn motor1_bytes(ctx: &EncodeContext, torque: u8) -> [u8; 8] {
    [0x00, ctx.adj(0xFE), 0x21, ctx.adj(0x4E), ctx.adj(0xFE), ctx.adj(0xFE), torque, 0x00]
}

fn brakes3_bytes(ctx: &EncodeContext) -> [u8; 8] {
    [ctx.adj(0xFE), 0x0A, ctx.adj(0xFE), 0x0A, 0x00, 0x0A, 0x00, 0x0A]
}

pub fn motor1(data: &mut [u8; 8], ctx: &EncodeContext, _: &mut AllCounters) {
    let torque = applied_torque(ctx).unwrap_or(data[6]);
    *data = motor1_bytes(ctx, torque);
}

pub fn motor3(data: &mut [u8; 8], ctx: &EncodeContext, _: &mut AllCounters) {
    data[2] = ctx.adj(0xFE);
    data[7] = ctx.adj(0xFE);
}

pub fn brakes1(data: &mut [u8; 8], ctx: &EncodeContext, _: &mut AllCounters) {
    data[1] = ctx.adj(0x00);
    data[2] = 0x00;
    data[3] = ctx.adj(0x0A);
}

pub fn brakes3(data: &mut [u8; 8], ctx: &EncodeContext, _: &mut AllCounters) {
    *data = brakes3_bytes(ctx);
}

pub(super) fn synthesize(cadence: Cadence, ctx: &EncodeContext, counters: &mut Counters, out: &mut Synthesized) {
    if cadence != Cadence::Ms20 {
        return;
    }
    let torque = applied_torque(ctx).unwrap_or(ctx.applied_torque);
    push(out, CanFrame::standard(ids::MOTOR1 as u16, motor1_bytes(ctx, torque)));
    push(out, CanFrame::standard(ids::MOTOR3 as u16, [0x00, 0x50, 0x00, 0x00, 0x00, 0x00, 0x00, 0xFE]));

    let c = counters.brakes1;
    counters.brakes1 = if c + 1 > 0x0F { 0 } else { c + 1 };
    push(out, CanFrame::standard(ids::BRAKES1 as u16, [0x80, ctx.adj(0x00), 0x00, 0x0A, 0xFE, 0xFE, 0x00, c]));

    push(out, CanFrame::standard(ids::BRAKES3 as u16, brakes3_bytes(ctx)));
}
