//! Lock target computation.
//!
//! [`raw_target`] turns the selected mode and live telemetry into a lock
//! percentage. [`LockEngine`] then rate limits releases of that target and
//! hands out the [`LockRequest`] every encoder shapes its bytes from.

use embassy_time::{Duration, Instant};

use crate::config::{CurveTable, MapTable};
use crate::state::{ControlState, Mode, Tables, Telemetry};

/// gaps longer than this snap the smoothed value instead of ramping
pub const STALE_GAP: Duration = Duration::from_millis(5000);

/// smallest release step per evaluation
pub const MIN_RELEASE_STEP: f32 = 0.1;

/// full throttle bypasses the dynamic disengage floor
pub const LAUNCH_PEDAL_PCT: f32 = 99.0;

/// everything the target computation reads, captured once per evaluation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineInput {
    pub mode: Mode,
    pub pedal_pct: f32,
    pub speed_kmh: u16,
    pub rpm: u16,
    pub pedal_threshold: u8,
    pub disable_speed: u16,
    pub disengage_speed: u16,
}

impl EngineInput {
    pub fn capture(state: &ControlState, telemetry: &Telemetry) -> Self {
        let mode = state.mode();
        Self {
            mode,
            pedal_pct: telemetry.pedal_pct(),
            speed_kmh: telemetry.speed_kmh(),
            rpm: telemetry.rpm(),
            pedal_threshold: state.pedal_threshold(),
            disable_speed: state.disable_speed(),
            disengage_speed: state.disengage_speed(mode),
        }
    }
}

/// whether the mode may lock at all under the current pedal and speed
pub fn lock_enabled(input: &EngineInput) -> bool {
    if input.mode.is_dynamic() {
        return true;
    }
    let throttle_ok = input.pedal_threshold == 0 || input.pedal_pct as i32 >= input.pedal_threshold as i32;
    let speed_ok = input.disable_speed == 0 || input.speed_kmh <= input.disable_speed;
    throttle_ok && speed_ok
}

/// keeps dynamic modes open below their floor, unless at full throttle
pub fn disengage_allows(input: &EngineInput) -> bool {
    input.disengage_speed == 0 || input.speed_kmh >= input.disengage_speed || input.pedal_pct >= LAUNCH_PEDAL_PCT
}

/// piecewise linear lookup, clamped to the end points
pub fn interpolate(curve: &CurveTable, x: f32) -> f32 {
    let bins = curve.bins();
    let lock = curve.lock();
    let n = bins.len();
    if n == 0 {
        return 0.0;
    }
    if n == 1 || x <= bins[0] as f32 {
        return lock[0] as f32;
    }
    for i in 0..n - 1 {
        let hi = bins[i + 1] as f32;
        if x <= hi {
            let lo = bins[i] as f32;
            let ratio = if hi > lo { (x - lo) / (hi - lo) } else { 0.0 };
            return lock[i] as f32 + (lock[i + 1] as f32 - lock[i] as f32) * ratio;
        }
    }
    lock[n - 1] as f32
}

/// bracketing bins and the ratio between them
fn bracket(bins: &[u16], value: f32) -> (usize, usize, f32) {
    let last = bins.len() - 1;
    if value >= bins[last] as f32 {
        return (last, last, 0.0);
    }
    for i in 0..last {
        let hi = bins[i + 1] as f32;
        if value <= hi {
            let lo = bins[i] as f32;
            let ratio = if hi > lo { (value - lo) / (hi - lo) } else { 0.0 };
            return (i, i + 1, ratio);
        }
    }
    (last, last, 0.0)
}

/// bilinear lookup over throttle rows and speed columns
pub fn interpolate_map(map: &MapTable, pedal_pct: f32, speed_kmh: f32) -> f32 {
    let throttle = if pedal_pct.is_nan() { 0.0 } else { pedal_pct.clamp(0.0, 100.0) };
    let speed = if speed_kmh.is_nan() { 0.0 } else { speed_kmh.max(0.0) };
    let (t0, t1, t_ratio) = bracket(map.throttle_bins(), throttle);
    let (s0, s1, s_ratio) = bracket(map.speed_bins(), speed);

    let v00 = map.at(t0, s0) as f32;
    let v01 = map.at(t0, s1) as f32;
    let v10 = map.at(t1, s0) as f32;
    let v11 = map.at(t1, s1) as f32;

    let v0 = v00 + (v01 - v00) * s_ratio;
    let v1 = v10 + (v11 - v10) * s_ratio;
    (v0 + (v1 - v0) * t_ratio).clamp(0.0, 100.0)
}

/// unsmoothed lock target for the current mode
pub fn raw_target(input: &EngineInput, tables: &Tables) -> f32 {
    match input.mode {
        Mode::Stock | Mode::Forward => 0.0,
        Mode::Fixed(ratio) => {
            if lock_enabled(input) {
                ratio.target()
            } else {
                0.0
            }
        }
        mode => {
            if !lock_enabled(input) || !disengage_allows(input) {
                return 0.0;
            }
            match mode {
                Mode::Speed => interpolate(&tables.speed, input.speed_kmh as f32),
                Mode::Throttle => interpolate(&tables.throttle, input.pedal_pct),
                Mode::Rpm => interpolate(&tables.rpm, input.rpm as f32),
                Mode::Map => interpolate_map(&tables.map, input.pedal_pct, input.speed_kmh as f32),
                _ => 0.0,
            }
        }
    }
}

/// smoothed lock plus the gate it was computed under
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LockRequest {
    pub lock: f32,
    pub enabled: bool,
}

impl LockRequest {
    pub const OPEN: Self = Self { lock: 0.0, enabled: false };

    pub const fn new(lock: f32, enabled: bool) -> Self {
        Self { lock, enabled }
    }

    fn effective_lock(&self) -> f32 {
        if !(self.lock > 0.0) {
            return 0.0;
        }
        if self.lock >= 99.5 { 100.0 } else { self.lock.min(100.0) }
    }

    /// scale one template byte by the requested lock
    ///
    /// Full lock passes `value` through, no lock yields 0x00. In between the
    /// byte is scaled by `lock / 2 + 20` percent, the curve the controller
    /// itself applies. `invert` mirrors the result around 0xFE.
    pub fn adjust(&self, value: u8, invert: bool) -> u8 {
        let lock = self.effective_lock();
        let out = if lock <= 0.0 || !self.enabled {
            0
        } else if lock >= 100.0 {
            value
        } else {
            let correction = lock / 2.0 + 20.0;
            (value as f32 * (correction / 100.0)) as u8
        };
        if invert { 0xFEu8.wrapping_sub(out) } else { out }
    }
}

/// release rate limiter holding the one piece of engine state
#[derive(Debug, Default)]
pub struct LockEngine {
    smoothed: f32,
    last: Option<Instant>,
}

impl LockEngine {
    pub const fn new() -> Self {
        Self { smoothed: 0.0, last: None }
    }

    pub fn smoothed(&self) -> f32 {
        self.smoothed
    }

    /// forget history, the next call snaps to its input
    pub fn reset(&mut self) {
        self.smoothed = 0.0;
        self.last = None;
    }

    /// advance the filter to `now` towards `raw`
    pub fn smooth(&mut self, raw: f32, release_rate_pct_per_sec: f32, now: Instant) -> f32 {
        let Some(last) = self.last.replace(now) else {
            self.smoothed = raw;
            return raw;
        };
        let elapsed = now.saturating_duration_since(last);
        if elapsed > STALE_GAP || raw >= self.smoothed || release_rate_pct_per_sec <= 0.0 {
            self.smoothed = raw;
            return raw;
        }
        let dt = elapsed.as_micros() as f32 / 1_000_000.0;
        let step = (release_rate_pct_per_sec * dt).max(MIN_RELEASE_STEP);
        self.smoothed = (self.smoothed - step).max(raw);
        self.smoothed
    }

    /// compute, smooth and publish the lock request for this tick
    pub fn evaluate(&mut self, state: &ControlState, telemetry: &Telemetry, now: Instant) -> LockRequest {
        let input = EngineInput::capture(state, telemetry);
        if input.mode == Mode::Stock {
            self.reset();
            telemetry.set_requested_lock(0.0);
            return LockRequest::OPEN;
        }
        let raw = raw_target(&input, &state.tables());
        let lock = self.smooth(raw, state.release_rate(), now);
        telemetry.set_requested_lock(lock);
        trace!("lock raw {} smoothed {}", raw, lock);
        LockRequest::new(lock, lock_enabled(&input))
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::state::FixedRatio;

    fn input(mode: Mode) -> EngineInput {
        EngineInput {
            mode,
            pedal_pct: 0.0,
            speed_kmh: 0,
            rpm: 0,
            pedal_threshold: 0,
            disable_speed: 0,
            disengage_speed: 0,
        }
    }

    #[test]
    fn fixed_ratio_gate() {
        let mut i = input(Mode::Fixed(FixedRatio::R60_40));
        assert_eq!(raw_target(&i, &Tables::DEFAULT), 40.0);
        i.pedal_threshold = 20;
        i.pedal_pct = 19.9;
        assert_eq!(raw_target(&i, &Tables::DEFAULT), 0.0);
        i.pedal_pct = 20.0;
        assert_eq!(raw_target(&i, &Tables::DEFAULT), 40.0);
        i.disable_speed = 100;
        i.speed_kmh = 101;
        assert_eq!(raw_target(&i, &Tables::DEFAULT), 0.0);
    }

    #[test]
    fn stock_and_forward_are_open() {
        let mut i = input(Mode::Stock);
        i.pedal_pct = 100.0;
        assert_eq!(raw_target(&i, &Tables::DEFAULT), 0.0);
        i.mode = Mode::Forward;
        assert_eq!(raw_target(&i, &Tables::DEFAULT), 0.0);
    }

    #[test]
    fn disengage_floor_and_launch_override() {
        let mut i = input(Mode::Speed);
        i.disengage_speed = 10;
        i.speed_kmh = 5;
        assert_eq!(raw_target(&i, &Tables::DEFAULT), 0.0);
        i.pedal_pct = 99.0;
        assert_eq!(raw_target(&i, &Tables::DEFAULT), interpolate(&CurveTable::DEFAULT_SPEED, 5.0));
        i.pedal_pct = 0.0;
        i.speed_kmh = 10;
        assert!(raw_target(&i, &Tables::DEFAULT) > 0.0);
    }

    #[test]
    fn curve_edges() {
        let curve = CurveTable::DEFAULT_SPEED;
        assert_eq!(interpolate(&curve, -5.0), 50.0);
        assert_eq!(interpolate(&curve, 30.0), 40.0);
        assert_eq!(interpolate(&curve, 500.0), 0.0);
        let single = CurveTable::new(&[(40, 70)]).unwrap();
        assert_eq!(interpolate(&single, 0.0), 70.0);
        assert_eq!(interpolate(&single, 400.0), 70.0);
    }

    #[test]
    fn map_corners_and_midpoints() {
        let map = MapTable::DEFAULT;
        assert_eq!(interpolate_map(&map, 80.0, 20.0), 60.0);
        assert_eq!(interpolate_map(&map, 150.0, 500.0), 20.0);
        assert_eq!(interpolate_map(&map, -10.0, 0.0), 0.0);
        // halfway between throttle rows 40 and 60 at speed bin 40
        assert_eq!(interpolate_map(&map, 50.0, 40.0), 32.5);
        // halfway between speed bins 10 and 20 on throttle row 80
        assert_eq!(interpolate_map(&map, 80.0, 15.0), 52.5);
    }

    #[test]
    fn engagement_is_immediate() {
        let mut engine = LockEngine::new();
        let t0 = Instant::from_millis(1_000);
        assert_eq!(engine.smooth(0.0, 60.0, t0), 0.0);
        assert_eq!(engine.smooth(100.0, 60.0, t0 + Duration::from_millis(10)), 100.0);
    }

    #[test]
    fn release_is_rate_limited() {
        let mut engine = LockEngine::new();
        let mut now = Instant::from_millis(1_000);
        engine.smooth(100.0, 60.0, now);
        for _ in 0..50 {
            now += Duration::from_millis(10);
            engine.smooth(0.0, 60.0, now);
        }
        assert!((engine.smoothed() - 70.0).abs() <= 1.0, "{}", engine.smoothed());

        let mut single = LockEngine::new();
        single.smooth(100.0, 60.0, Instant::from_millis(0));
        let value = single.smooth(0.0, 60.0, Instant::from_millis(500));
        assert!((value - 70.0).abs() <= 1.0);
    }

    #[test]
    fn release_step_has_a_floor_and_never_overshoots() {
        let mut engine = LockEngine::new();
        let t0 = Instant::from_millis(0);
        engine.smooth(10.0, 1.0, t0);
        assert!((engine.smooth(0.0, 1.0, t0 + Duration::from_millis(1)) - 9.9).abs() < 1e-4);
        let mut engine = LockEngine::new();
        engine.smooth(10.0, 1000.0, t0);
        assert_eq!(engine.smooth(5.0, 1000.0, t0 + Duration::from_millis(100)), 5.0);
    }

    #[test]
    fn zero_rate_and_stale_gap_snap() {
        let mut engine = LockEngine::new();
        let t0 = Instant::from_millis(0);
        engine.smooth(80.0, 0.0, t0);
        assert_eq!(engine.smooth(0.0, 0.0, t0 + Duration::from_millis(10)), 0.0);
        let mut engine = LockEngine::new();
        engine.smooth(80.0, 10.0, t0);
        assert_eq!(engine.smooth(0.0, 10.0, t0 + Duration::from_millis(5001)), 0.0);
    }

    #[test]
    fn stock_resets_request() {
        let state = ControlState::new();
        let telemetry = Telemetry::new();
        let mut engine = LockEngine::new();
        state.set_mode(Mode::Fixed(FixedRatio::R50_50));
        let now = Instant::from_millis(100);
        assert_eq!(engine.evaluate(&state, &telemetry, now), LockRequest::new(100.0, true));
        assert_eq!(telemetry.requested_lock(), 100.0);
        state.set_mode(Mode::Stock);
        assert_eq!(engine.evaluate(&state, &telemetry, now), LockRequest::OPEN);
        assert_eq!(telemetry.requested_lock(), 0.0);
    }

    #[test]
    fn adjust_templates() {
        let full = LockRequest::new(100.0, true);
        assert_eq!(full.adjust(0x4E, false), 0x4E);
        assert_eq!(full.adjust(0x16, true), 0xE8);
        let open = LockRequest::new(0.0, true);
        assert_eq!(open.adjust(0x4E, false), 0x00);
        assert_eq!(open.adjust(0x4E, true), 0xFE);
        let gated = LockRequest::new(100.0, false);
        assert_eq!(gated.adjust(0x4E, false), 0x00);
        assert_eq!(gated.adjust(0x4E, true), 0xFE);
        // 40 % lock: factor 0.4
        assert_eq!(LockRequest::new(40.0, true).adjust(0xFE, false), 101);
        assert_eq!(LockRequest::new(99.6, true).adjust(0x20, false), 0x20);
    }

    fn ascending_curve() -> impl Strategy<Value = CurveTable> {
        prop::collection::btree_map(0u16..10_000, 0u8..=100, 2..=12).prop_map(|points| {
            let points: std::vec::Vec<(u16, u8)> = points.into_iter().collect();
            CurveTable::new(&points).unwrap()
        })
    }

    proptest! {
        #[test]
        fn curve_hits_every_bin(curve in ascending_curve()) {
            for (bin, lock) in curve.bins().iter().zip(curve.lock()) {
                prop_assert_eq!(interpolate(&curve, *bin as f32), *lock as f32);
            }
        }

        #[test]
        fn curve_is_monotonic_between_bins(curve in ascending_curve(), steps in 2usize..20) {
            for i in 0..curve.len() - 1 {
                let (lo, hi) = (curve.bins()[i] as f32, curve.bins()[i + 1] as f32);
                let rising = curve.lock()[i + 1] >= curve.lock()[i];
                let mut prev = interpolate(&curve, lo);
                for s in 1..=steps {
                    let x = lo + (hi - lo) * s as f32 / steps as f32;
                    let y = interpolate(&curve, x);
                    if rising {
                        prop_assert!(y >= prev - 1e-3);
                    } else {
                        prop_assert!(y <= prev + 1e-3);
                    }
                    prev = y;
                }
            }
        }

        #[test]
        fn adjust_is_monotonic_in_lock(value in any::<u8>(), a in 0.0f32..=100.0, b in 0.0f32..=100.0) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(LockRequest::new(lo, true).adjust(value, false) <= LockRequest::new(hi, true).adjust(value, false));
        }

        #[test]
        fn inverted_adjust_mirrors(value in 0u8..=0xFE, lock in 0.0f32..=100.0) {
            let request = LockRequest::new(lock, true);
            prop_assert_eq!(request.adjust(value, true), 0xFE - request.adjust(value, false));
        }
    }
}
