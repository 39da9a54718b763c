use super::{Cadence, Counters as AllCounters, EncodeContext, Synthesized, push};
use crate::frame::CanFrame;
use crate::ids;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Counters {
    pub lw1_row: u8,
    pub brakes1: u8,
    pub brakes2: u8,
    pub brakes4: u8,
    pub brakes9: u8,
    pub brakes9b: u8,
    pub diagnose: u8,
}

const fn steering_row(i: u8) -> [u8; 8] {
    let rolling = i << 4;
    [0x20, 0x00, 0x00, 0x00, 0x80, rolling, 0x00, 0xFFu8.wrapping_sub(0x20u8.wrapping_add(rolling))]
}

const fn steering_table() -> [[u8; 8]; 16] {
    let mut table = [[0; 8]; 16];
    let mut i = 0;
    while i < 16 {
        table[i] = steering_row(i as u8);
        i += 1;
    }
    table
}

/// steering angle frames cycled through in order
///
/// The row contents are inferred, not captured: a centred wheel with the
/// rolling nibble in byte 5 and the same `0xFF - sum` check byte the Gen2
/// sensor frame carries. Only the 16 row cycle is known to be what the
/// controller sees. Replace the rows with a bus capture when one exists.
pub static LW1_ROWS: [[u8; 8]; 16] = steering_table();

fn next_lw1(c: &mut Counters) -> [u8; 8] {
    let row = LW1_ROWS[c.lw1_row as usize & 0x0F];
    c.lw1_row = if c.lw1_row + 1 > 15 { 0 } else { c.lw1_row + 1 };
    row
}

fn motor1_bytes(d0: u8, ctx: &EncodeContext) -> [u8; 8] {
    [d0, ctx.adj(0xFE), ctx.adj(0x20), ctx.adj(0x4E), ctx.adj(0xFE), ctx.adj(0xFE), ctx.adj(0x16), ctx.adj(0xFE)]
}

fn brakes3_bytes(ctx: &EncodeContext) -> [u8; 8] {
    [ctx.adj(0xB6), 0x07, ctx.adj(0xCC), 0x07, ctx.adj(0xD2), 0x07, ctx.adj(0xD2), 0x07]
}

/// byte 7 is the xor of the other seven
fn brakes4_bytes(ctx: &EncodeContext, c: &mut Counters) -> [u8; 8] {
    let counter = c.brakes4;
    let next = counter.wrapping_add(16);
    c.brakes4 = if next > 0xF0 { 0 } else { next };
    let mut data = [ctx.adj(0xFE), 0x00, 0x00, 0x64, 0x00, 0x00, counter, 0x00];
    data[7] = data[..7].iter().fold(0, |acc, b| acc ^ b);
    data
}

pub fn lw1(data: &mut [u8; 8], _: &EncodeContext, counters: &mut AllCounters) {
    *data = next_lw1(&mut counters.gen4);
}

pub fn motor1(data: &mut [u8; 8], ctx: &EncodeContext, _: &mut AllCounters) {
    *data = motor1_bytes(data[0], ctx);
}

pub fn brakes1(data: &mut [u8; 8], ctx: &EncodeContext, _: &mut AllCounters) {
    data[0] = 0x20;
    data[1] = 0x40;
    data[4] = ctx.adj(0xFE);
    data[5] = ctx.adj(0xFE);
}

pub fn brakes2(data: &mut [u8; 8], ctx: &EncodeContext, _: &mut AllCounters) {
    data[4] = ctx.adj(0x7F);
}

pub fn brakes3(data: &mut [u8; 8], ctx: &EncodeContext, _: &mut AllCounters) {
    *data = brakes3_bytes(ctx);
}

pub fn brakes4(data: &mut [u8; 8], ctx: &EncodeContext, counters: &mut AllCounters) {
    *data = brakes4_bytes(ctx, &mut counters.gen4);
}

fn frames_10ms(ctx: &EncodeContext, c: &mut Counters, out: &mut Synthesized) {
    push(out, CanFrame::standard(ids::LW1 as u16, next_lw1(c)));

    let brakes1 = c.brakes1;
    c.brakes1 = if brakes1 + 1 > 0x1F { 10 } else { brakes1 + 1 };
    push(out, CanFrame::standard(ids::BRAKES1 as u16, [0x20, 0x40, 0xF0, 0x07, ctx.adj(0xFE), ctx.adj(0xFE), 0x00, brakes1]));

    push(out, CanFrame::standard(ids::BRAKES3 as u16, brakes3_bytes(ctx)));
    push(out, CanFrame::standard(ids::BRAKES4 as u16, brakes4_bytes(ctx, c)));

    let brakes9 = c.brakes9;
    let next = brakes9.wrapping_add(16);
    c.brakes9 = if next > 0xF3 { 3 } else { next };
    let brakes9b = c.brakes9b;
    let next = brakes9b.wrapping_add(16);
    c.brakes9b = if next > 0xF0 { 0 } else { next };
    push(out, CanFrame::standard(ids::BRAKES9 as u16, [brakes9, brakes9b, 0, 0, 0, 0, 0x03, 0x00]));

    push(out, CanFrame::standard(ids::MOTOR1 as u16, motor1_bytes(0x00, ctx)));
}

fn frames_20ms(ctx: &EncodeContext, c: &mut Counters, out: &mut Synthesized) {
    let brakes2 = c.brakes2;
    let next = brakes2.wrapping_add(16);
    c.brakes2 = if next > 0xF0 { 0 } else { next };
    push(out, CanFrame::standard(ids::BRAKES2 as u16, [0x80, 0x7A, 0x05, brakes2, ctx.adj(0x7F), 0xCA, 0x1B, 0xAB]));
}

fn frames_25ms(out: &mut Synthesized) {
    push(out, CanFrame::standard(ids::KOMBI1 as u16, [0x24, 0x00, 0x1D, 0xB9, 0x07, 0x42, 0x09, 0x81]));
    push(out, CanFrame::standard(ids::KOMBI3 as u16, [0x60, 0x43, 0x01, 0x10, 0x66, 0xF1, 0x03, 0x02]));
}

fn frames_100ms(out: &mut Synthesized) {
    push(out, CanFrame::standard(ids::GATE_KOMF1 as u16, [0x03, 0x11, 0x58, 0x00, 0x40, 0x00, 0x01, 0x08]));
    push(out, CanFrame::standard(ids::GATE_KOMF2 as u16, [0x09, 0x01, 0x00, 0xA1, 0x00, 0x00, 0x00, 0x00]));
    push(
        out,
        CanFrame::standard(ids::SYSTEMINFO1 as u16, [0xC0, 0x03, 0x50, 0xBF, 0x37, 0x56, 0xC0, 0x00]).with_len(6),
    );
    push(out, CanFrame::standard(ids::SOLL_VERBAULISTE as u16, [0xF7, 0x42, 0x70, 0x3F, 0x1C, 0x08, 0x00, 0xC8]));
    push(out, CanFrame::standard(ids::BRAKES11 as u16, [0x00, 0xC0, 0, 0, 0, 0, 0, 0]));
}

fn frames_200ms(out: &mut Synthesized) {
    push(out, CanFrame::standard(ids::KOMBI2 as u16, [0x4C, 0x86, 0x85, 0x00, 0x00, 0x30, 0xFF, 0x04]));
    push(out, CanFrame::standard(ids::KOMBI3 as u16, [0xA6, 0x87, 0x01, 0x10, 0x66, 0xF2, 0x03, 0x02]));
    push(out, CanFrame::standard(ids::NMH_GATEWAY as u16, [0x04, 0x03, 0x01, 0x00, 0x02, 0x00, 0x00, 0x00]).with_len(7));
}

fn frames_1000ms(c: &mut Counters, out: &mut Synthesized) {
    let diagnose = c.diagnose;
    c.diagnose = if diagnose + 1 > 0x1F { 0 } else { diagnose + 1 };
    push(out, CanFrame::standard(ids::DIAGNOSE1 as u16, [0x26, 0xF2, 0x03, 0x12, 0x70, 0x19, 0x25, diagnose]));
}

pub(super) fn synthesize(cadence: Cadence, ctx: &EncodeContext, counters: &mut Counters, out: &mut Synthesized) {
    match cadence {
        Cadence::Ms10 => frames_10ms(ctx, counters, out),
        Cadence::Ms20 => frames_20ms(ctx, counters, out),
        Cadence::Ms25 => frames_25ms(out),
        Cadence::Ms100 => frames_100ms(out),
        Cadence::Ms200 => frames_200ms(out),
        Cadence::Ms1000 => frames_1000ms(counters, out),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::LockRequest;
    use crate::state::Mode;

    fn ctx(lock: f32) -> EncodeContext {
        EncodeContext { request: LockRequest::new(lock, true), mode: Mode::Speed, applied_torque: 0 }
    }

    #[test]
    fn motor1_scales_with_lock() {
        let mut all = AllCounters::default();
        let mut data = [0x42, 1, 2, 3, 4, 5, 6, 7];
        motor1(&mut data, &ctx(0.0), &mut all);
        assert_eq!(data, [0x42, 0, 0, 0, 0, 0, 0, 0]);
        let mut data = [0x42, 1, 2, 3, 4, 5, 6, 7];
        motor1(&mut data, &ctx(100.0), &mut all);
        assert_eq!(data, [0x42, 0xFE, 0x20, 0x4E, 0xFE, 0xFE, 0x16, 0xFE]);
    }

    #[test]
    fn brakes4_checksum_and_counter() {
        let mut all = AllCounters::default();
        let mut data = [0; 8];
        brakes4(&mut data, &ctx(100.0), &mut all);
        assert_eq!(data, [0xFE, 0, 0, 0x64, 0, 0, 0x00, 0xFE ^ 0x64]);
        brakes4(&mut data, &ctx(100.0), &mut all);
        assert_eq!(data[6], 0x10);
        assert_eq!(data[7], 0xFE ^ 0x64 ^ 0x10);
        all.gen4.brakes4 = 0xF0;
        brakes4(&mut data, &ctx(100.0), &mut all);
        assert_eq!(data[6], 0xF0);
        assert_eq!(all.gen4.brakes4, 0);
    }

    #[test]
    fn steering_rows_cycle_through_all_sixteen() {
        let mut all = AllCounters::default();
        let mut data = [0; 8];
        for i in 0..16u8 {
            lw1(&mut data, &ctx(0.0), &mut all);
            assert_eq!(data[5], i << 4);
            let sum = data[..7].iter().fold(0u8, |acc, b| acc.wrapping_add(*b)).wrapping_sub(0x80);
            assert_eq!(data[7], 0xFFu8.wrapping_sub(sum));
        }
        lw1(&mut data, &ctx(0.0), &mut all);
        assert_eq!(data, LW1_ROWS[0]);
    }

    #[test]
    fn brakes1_counter_restarts_at_ten() {
        let mut counters = Counters { brakes1: 0x1F, ..Default::default() };
        let mut out = Synthesized::new();
        synthesize(Cadence::Ms10, &ctx(100.0), &mut counters, &mut out);
        let frame = out.iter().find(|f| f.id == ids::BRAKES1).unwrap();
        assert_eq!(frame.data[7], 0x1F);
        assert_eq!(counters.brakes1, 10);
    }

    #[test]
    fn sixteen_step_counters() {
        let mut counters = Counters { brakes9: 0xE3, brakes9b: 0xF0, ..Default::default() };
        let mut out = Synthesized::new();
        synthesize(Cadence::Ms10, &ctx(0.0), &mut counters, &mut out);
        assert_eq!(&out.iter().find(|f| f.id == ids::BRAKES9).unwrap().data[..2], &[0xE3, 0xF0]);
        assert_eq!((counters.brakes9, counters.brakes9b), (0xF3, 0));
        synthesize(Cadence::Ms10, &ctx(0.0), &mut counters, &mut Synthesized::new());
        // 0xF3 + 16 wraps the byte to 0x03
        assert_eq!(counters.brakes9, 0x03);

        counters.brakes2 = 0xF0;
        let mut out = Synthesized::new();
        synthesize(Cadence::Ms20, &ctx(0.0), &mut counters, &mut out);
        assert_eq!(out[0].data[3], 0xF0);
        assert_eq!(counters.brakes2, 0);
    }

    #[test]
    fn short_frames_keep_their_length() {
        let mut counters = Counters::default();
        let mut out = Synthesized::new();
        synthesize(Cadence::Ms100, &ctx(0.0), &mut counters, &mut out);
        assert_eq!(out.iter().find(|f| f.id == ids::SYSTEMINFO1).unwrap().len, 6);
        let mut out = Synthesized::new();
        synthesize(Cadence::Ms200, &ctx(0.0), &mut counters, &mut out);
        assert_eq!(out.iter().find(|f| f.id == ids::NMH_GATEWAY).unwrap().len, 7);
    }

    #[test]
    fn diagnose_counter_wraps() {
        let mut counters = Counters { diagnose: 0x1F, ..Default::default() };
        let mut out = Synthesized::new();
        synthesize(Cadence::Ms1000, &ctx(0.0), &mut counters, &mut out);
        assert_eq!(out[0].data[7], 0x1F);
        assert_eq!(counters.diagnose, 0);
    }
}
