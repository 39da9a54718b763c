use super::{Cadence, Counters as AllCounters, EncodeContext, Synthesized, push};
use crate::frame::CanFrame;
use crate::ids;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Counters {
    pub brakes1: u8,
    pub brakes2: u8,
    pub brakes4: u8,
    pub brakes5: u8,
    pub brakes5b: u8,
    pub brakes9: u8,
    pub brakes9b: u8,
    pub brakes10: u8,
    pub lw1: u8,
    /// never advanced, motor 5 bumps `brakes1` instead
    pub motor5: u8,
}

/// step a counter by `step`, restarting at `reset` once it passes `limit`
fn roll(counter: &mut u8, step: u8, limit: u8, reset: u8) -> u8 {
    let current = *counter;
    let next = current.wrapping_add(step);
    *counter = if next > limit { reset } else { next };
    current
}

pub fn motor1(data: &mut [u8; 8], ctx: &EncodeContext, _: &mut AllCounters) {
    data[1] = ctx.adj(0xFE);
    data[2] = 0x21;
    data[3] = ctx.adj(0x4E);
    data[6] = ctx.adj(0xFE);
}

pub fn motor3(data: &mut [u8; 8], ctx: &EncodeContext, _: &mut AllCounters) {
    data[2] = ctx.adj(0xFE);
    data[7] = ctx.adj(0x01);
}

pub fn brakes1(data: &mut [u8; 8], ctx: &EncodeContext, _: &mut AllCounters) {
    data[0] = ctx.adj(0x80);
    data[1] = ctx.adj(0x41);
    data[2] = ctx.adj(0xFE);
    data[3] = 0x0A;
}

pub fn brakes2(data: &mut [u8; 8], ctx: &EncodeContext, _: &mut AllCounters) {
    data[4] = ctx.adj(0x7F);
    data[5] = ctx.adj(0xFE);
}

pub fn brakes3(data: &mut [u8; 8], ctx: &EncodeContext, _: &mut AllCounters) {
    *data = [ctx.adj(0xFE), 0x0A, ctx.adj(0xFE), 0x0A, 0x00, 0x0A, 0x00, 0x0A];
}

fn frames_10ms(ctx: &EncodeContext, c: &mut Counters, out: &mut Synthesized) {
    let brakes1 = roll(&mut c.brakes1, 1, 0x0F, 0);
    push(out, CanFrame::standard(ids::BRAKES1 as u16, [0x00, 0x41, 0x00, 0xFE, 0xFE, 0xFE, 0x00, brakes1]));

    let brakes2 = roll(&mut c.brakes2, 10, 0xF7, 7);
    push(
        out,
        CanFrame::standard(ids::BRAKES2 as u16, [0x7F, 0xAE, 0x3D, brakes2, ctx.adj(0x7F), ctx.adj(0xFE), 0x5E, 0x2B]),
    );

    let mut brakes3 = [0; 8];
    self::brakes3(&mut brakes3, ctx, &mut AllCounters::default());
    push(out, CanFrame::standard(ids::BRAKES3 as u16, brakes3));

    let brakes4 = roll(&mut c.brakes4, 10, 0xF0, 0);
    push(out, CanFrame::standard(ids::BRAKES4 as u16, [0, 0, 0, 0, 0, 0, brakes4, brakes4]));

    let brakes5 = roll(&mut c.brakes5, 10, 0xF0, 0);
    let brakes5b = roll(&mut c.brakes5b, 10, 0xF3, 3);
    push(out, CanFrame::standard(ids::BRAKES5 as u16, [0xFE, 0x7F, 0x03, 0, 0, 0, brakes5, brakes5b]));

    let brakes9 = roll(&mut c.brakes9, 10, 0xF1, 0x11);
    let brakes9b = roll(&mut c.brakes9b, 10, 0xF0, 0);
    push(out, CanFrame::standard(ids::BRAKES9 as u16, [brakes9, brakes9b, 0, 0, 0, 0, 0x02, 0x00]));

    let lw1 = c.lw1;
    c.lw1 = if lw1.wrapping_add(16) >= 0xF0 { 0 } else { lw1.wrapping_add(16) };
    let mut steering = [0x20, 0x00, 0x00, 0x00, 0x80, lw1, 0x00, 0x00];
    let sum = steering[0].wrapping_add(steering[1]).wrapping_add(steering[2]).wrapping_add(steering[3]).wrapping_add(steering[5]);
    steering[7] = 0xFFu8.wrapping_sub(sum);
    push(out, CanFrame::standard(ids::LW1 as u16, steering));
}

fn frames_20ms(ctx: &EncodeContext, c: &mut Counters, out: &mut Synthesized) {
    push(
        out,
        CanFrame::standard(ids::MOTOR1 as u16, [0x08, 0xFA, 0x20, ctx.adj(0x4E), 0xFA, 0xFA, ctx.adj(0x20), 0xFA]),
    );
    push(out, CanFrame::standard(ids::MOTOR2 as u16, [0x00, 0x30, 0x00, 0x0A, 0x0A, 0x10, 0xFE, 0xFE]));

    push(out, CanFrame::standard(ids::MOTOR5 as u16, [0xFE, 0, 0, 0, 0, 0, 0, c.motor5]));
    c.brakes1 = c.brakes1.wrapping_add(1);

    let brakes10 = roll(&mut c.brakes10, 1, 0x0F, 0);
    push(out, CanFrame::standard(ids::BRAKES10 as u16, [0xA6, brakes10, 0x75, 0xD4, 0x51, 0x47, 0x1D, 0x0F]));
}

pub(super) fn synthesize(cadence: Cadence, ctx: &EncodeContext, counters: &mut Counters, out: &mut Synthesized) {
    match cadence {
        Cadence::Ms10 => frames_10ms(ctx, counters, out),
        Cadence::Ms20 => frames_20ms(ctx, counters, out),
        Cadence::Ms25 => push(out, CanFrame::standard(ids::KOMBI1 as u16, [0x00, 0x02, 0x00, 0x00, 0x36, 0x00, 0x00, 0x00])),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::LockRequest;
    use crate::state::Mode;

    fn ctx(lock: f32) -> EncodeContext {
        EncodeContext { request: LockRequest::new(lock, true), mode: Mode::Map, applied_torque: 0 }
    }

    fn run(cadence: Cadence, counters: &mut Counters) -> Synthesized {
        let mut out = Synthesized::new();
        synthesize(cadence, &ctx(100.0), counters, &mut out);
        out
    }

    fn find(out: &Synthesized, id: u32) -> CanFrame {
        *out.iter().find(|f| f.id == id).unwrap()
    }

    #[test]
    fn bridge_bytes_at_full_lock() {
        let ctx = ctx(100.0);
        let mut all = AllCounters::default();
        let mut data = [0x11; 8];
        motor1(&mut data, &ctx, &mut all);
        assert_eq!(data, [0x11, 0xFE, 0x21, 0x4E, 0x11, 0x11, 0xFE, 0x11]);
        let mut data = [0x11; 8];
        motor3(&mut data, &ctx, &mut all);
        assert_eq!(data, [0x11, 0x11, 0xFE, 0x11, 0x11, 0x11, 0x11, 0x01]);
        let mut data = [0x11; 8];
        brakes1(&mut data, &ctx, &mut all);
        assert_eq!(data, [0x80, 0x41, 0xFE, 0x0A, 0x11, 0x11, 0x11, 0x11]);
        let mut data = [0x11; 8];
        brakes2(&mut data, &ctx, &mut all);
        assert_eq!(data, [0x11, 0x11, 0x11, 0x11, 0x7F, 0xFE, 0x11, 0x11]);
    }

    #[test]
    fn brakes2_counter_restarts_at_seven() {
        let mut counters = Counters::default();
        let mut seen = std::vec::Vec::new();
        for _ in 0..27 {
            seen.push(find(&run(Cadence::Ms10, &mut counters), ids::BRAKES2).data[3]);
        }
        assert_eq!(&seen[..3], &[0, 10, 20]);
        // 240 + 10 passes 0xF7
        assert_eq!(seen[24], 240);
        assert_eq!(seen[25], 7);
        assert_eq!(seen[26], 17);
    }

    #[test]
    fn steering_checksum() {
        let mut counters = Counters::default();
        let first = find(&run(Cadence::Ms10, &mut counters), ids::LW1);
        assert_eq!(first.data, [0x20, 0, 0, 0, 0x80, 0x00, 0, 0xDF]);
        let second = find(&run(Cadence::Ms10, &mut counters), ids::LW1);
        assert_eq!(second.data[5], 0x10);
        assert_eq!(second.data[7], 0xCF);
        for _ in 0..13 {
            run(Cadence::Ms10, &mut counters);
        }
        // 0xE0 + 16 reaches 0xF0 and restarts
        assert_eq!(counters.lw1, 0);
    }

    #[test]
    fn motor5_advances_the_brakes1_counter() {
        let mut counters = Counters::default();
        run(Cadence::Ms10, &mut counters);
        assert_eq!(counters.brakes1, 1);
        let out = run(Cadence::Ms20, &mut counters);
        assert_eq!(find(&out, ids::MOTOR5).data[7], 0);
        assert_eq!(counters.brakes1, 2);
        assert_eq!(find(&run(Cadence::Ms10, &mut counters), ids::BRAKES1).data[7], 2);
    }

    #[test]
    fn ten_step_counters_restart_at_zero() {
        let mut counters = Counters { brakes4: 0xF0, brakes5: 0xF0, brakes9b: 0xF0, brakes10: 0x0F, ..Default::default() };
        let out = run(Cadence::Ms10, &mut counters);
        assert_eq!(&find(&out, ids::BRAKES4).data[6..], &[0xF0, 0xF0]);
        assert_eq!(find(&out, ids::BRAKES5).data[6], 0xF0);
        assert_eq!(find(&out, ids::BRAKES9).data[1], 0xF0);
        assert_eq!((counters.brakes4, counters.brakes5, counters.brakes9b), (0, 0, 0));

        let out = run(Cadence::Ms20, &mut counters);
        assert_eq!(find(&out, ids::BRAKES10).data[1], 0x0F);
        assert_eq!(counters.brakes10, 0);
        // 0xE6 + 10 stays below the limit
        counters.brakes4 = 0xE6;
        run(Cadence::Ms10, &mut counters);
        assert_eq!(counters.brakes4, 0xF0);
    }

    #[test]
    fn brakes9_pair() {
        let mut counters = Counters::default();
        let out = run(Cadence::Ms10, &mut counters);
        assert_eq!(&find(&out, ids::BRAKES9).data[..2], &[0, 0]);
        let out = run(Cadence::Ms10, &mut counters);
        assert_eq!(&find(&out, ids::BRAKES9).data[..2], &[10, 10]);
        counters.brakes9 = 0xF0;
        counters.brakes5b = 0xF0;
        run(Cadence::Ms10, &mut counters);
        assert_eq!(counters.brakes9, 0x11);
        assert_eq!(counters.brakes5b, 0x03);
    }
}
