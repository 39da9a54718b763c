//! Shared control state and live telemetry.
//!
//! Both are plain structs of atomics handed to every task by reference at
//! start-up. Each field is written independently; readers re-read on every
//! tick, so there is no cross-field transaction to protect. The curve and map
//! tables are the only multi-word values and sit behind a blocking mutex that
//! is held just long enough to copy them.

use core::cell::Cell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::{Duration, Instant};
use portable_atomic::{AtomicBool, AtomicF32, AtomicU8, AtomicU16, AtomicU64, Ordering};

use crate::bus::Bus;
use crate::config::{ConfigError, CurveTable, DisengageSpeeds, MapTable, Settings, validate_pedal_threshold};

/// fixed front/rear split selections
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FixedRatio {
    R50_50,
    R60_40,
    R70_30,
    R80_20,
    R90_10,
}

impl FixedRatio {
    /// lock request that produces this split on the controller
    pub fn target(self) -> f32 {
        match self {
            FixedRatio::R50_50 => 100.0,
            FixedRatio::R60_40 => 40.0,
            FixedRatio::R70_30 => 30.0,
            FixedRatio::R80_20 => 20.0,
            FixedRatio::R90_10 => 10.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    /// passthrough, frames are never touched
    Stock,
    /// coupling held open
    Forward,
    Fixed(FixedRatio),
    Speed,
    Throttle,
    Map,
    Rpm,
}

impl Mode {
    pub const ALL: [Mode; 11] = [
        Mode::Stock,
        Mode::Forward,
        Mode::Fixed(FixedRatio::R50_50),
        Mode::Fixed(FixedRatio::R60_40),
        Mode::Fixed(FixedRatio::R70_30),
        Mode::Fixed(FixedRatio::R80_20),
        Mode::Fixed(FixedRatio::R90_10),
        Mode::Speed,
        Mode::Throttle,
        Mode::Map,
        Mode::Rpm,
    ];

    pub fn index(self) -> u8 {
        match self {
            Mode::Stock => 0,
            Mode::Forward => 1,
            Mode::Fixed(FixedRatio::R50_50) => 2,
            Mode::Fixed(FixedRatio::R60_40) => 3,
            Mode::Fixed(FixedRatio::R70_30) => 4,
            Mode::Fixed(FixedRatio::R80_20) => 5,
            Mode::Fixed(FixedRatio::R90_10) => 6,
            Mode::Speed => 7,
            Mode::Throttle => 8,
            Mode::Map => 9,
            Mode::Rpm => 10,
        }
    }

    pub fn from_index(raw: u8) -> Option<Mode> {
        Self::ALL.get(raw as usize).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            Mode::Stock => "STOCK",
            Mode::Forward => "FWD",
            Mode::Fixed(FixedRatio::R50_50) => "5050",
            Mode::Fixed(FixedRatio::R60_40) => "6040",
            Mode::Fixed(FixedRatio::R70_30) => "7030",
            Mode::Fixed(FixedRatio::R80_20) => "8020",
            Mode::Fixed(FixedRatio::R90_10) => "9010",
            Mode::Speed => "SPEED",
            Mode::Throttle => "THROTTLE",
            Mode::Map => "MAP",
            Mode::Rpm => "RPM",
        }
    }

    /// parse a mode name, accepting the legacy "CUSTOM" and "7525" aliases
    pub fn from_name(name: &str) -> Option<Mode> {
        let name = name.trim();
        if name.eq_ignore_ascii_case("CUSTOM") {
            return Some(Mode::Speed);
        }
        if name == "7525" {
            return Some(Mode::Fixed(FixedRatio::R70_30));
        }
        Self::ALL.iter().copied().find(|m| m.name().eq_ignore_ascii_case(name))
    }

    /// modes whose lock comes from a curve or the map
    pub fn is_dynamic(self) -> bool {
        matches!(self, Mode::Speed | Mode::Throttle | Mode::Map | Mode::Rpm)
    }
}

/// coupling controller family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Generation {
    Gen1,
    Gen2,
    Gen4,
}

impl Generation {
    pub fn raw(self) -> u8 {
        match self {
            Generation::Gen1 => 1,
            Generation::Gen2 => 2,
            Generation::Gen4 => 4,
        }
    }

    pub fn from_raw(raw: u8) -> Option<Generation> {
        match raw {
            1 => Some(Generation::Gen1),
            2 => Some(Generation::Gen2),
            4 => Some(Generation::Gen4),
            _ => None,
        }
    }
}

/// curve and map tables, copied out as a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tables {
    pub speed: CurveTable,
    pub throttle: CurveTable,
    pub rpm: CurveTable,
    pub map: MapTable,
}

impl Tables {
    pub const DEFAULT: Self = Self {
        speed: CurveTable::DEFAULT_SPEED,
        throttle: CurveTable::DEFAULT_THROTTLE,
        rpm: CurveTable::DEFAULT_RPM,
        map: MapTable::DEFAULT,
    };
}

const DISENGAGE_SPEED: usize = 0;
const DISENGAGE_THROTTLE: usize = 1;
const DISENGAGE_RPM: usize = 2;
const DISENGAGE_MAP: usize = 3;

/// driver selected configuration
pub struct ControlState {
    mode: AtomicU8,
    pedal_threshold: AtomicU8,
    disable_speed: AtomicU16,
    disengage: [AtomicU16; 4],
    release_rate: AtomicF32,
    generation: AtomicU8,
    standalone: AtomicBool,
    broadcast: AtomicBool,
    tables: Mutex<CriticalSectionRawMutex, Cell<Tables>>,
    dirty: AtomicBool,
}

impl Default for ControlState {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlState {
    /// factory defaults, not dirty
    pub const fn new() -> Self {
        Self {
            mode: AtomicU8::new(0),
            pedal_threshold: AtomicU8::new(0),
            disable_speed: AtomicU16::new(0),
            disengage: [AtomicU16::new(0), AtomicU16::new(0), AtomicU16::new(0), AtomicU16::new(0)],
            release_rate: AtomicF32::new(120.0),
            generation: AtomicU8::new(1),
            standalone: AtomicBool::new(false),
            broadcast: AtomicBool::new(true),
            tables: Mutex::new(Cell::new(Tables::DEFAULT)),
            dirty: AtomicBool::new(false),
        }
    }

    pub fn mode(&self) -> Mode {
        // only valid indices are ever stored
        Mode::from_index(self.mode.load(Ordering::Relaxed)).unwrap_or(Mode::Stock)
    }

    pub fn set_mode(&self, mode: Mode) {
        let old = self.mode.swap(mode.index(), Ordering::Relaxed);
        if old != mode.index() {
            info!("mode {}", mode.name());
        }
        self.mark_dirty();
    }

    pub fn set_mode_index(&self, raw: u8) -> Result<(), ConfigError> {
        let mode = Mode::from_index(raw).ok_or(ConfigError::InvalidMode)?;
        self.set_mode(mode);
        Ok(())
    }

    pub fn pedal_threshold(&self) -> u8 {
        self.pedal_threshold.load(Ordering::Relaxed)
    }

    pub fn set_pedal_threshold(&self, value: u8) -> Result<(), ConfigError> {
        self.pedal_threshold.store(validate_pedal_threshold(value)?, Ordering::Relaxed);
        self.mark_dirty();
        Ok(())
    }

    pub fn disable_speed(&self) -> u16 {
        self.disable_speed.load(Ordering::Relaxed)
    }

    pub fn set_disable_speed(&self, kmh: u16) {
        self.disable_speed.store(kmh, Ordering::Relaxed);
        self.mark_dirty();
    }

    fn disengage_slot(mode: Mode) -> Option<usize> {
        match mode {
            Mode::Speed => Some(DISENGAGE_SPEED),
            Mode::Throttle => Some(DISENGAGE_THROTTLE),
            Mode::Rpm => Some(DISENGAGE_RPM),
            Mode::Map => Some(DISENGAGE_MAP),
            _ => None,
        }
    }

    /// dynamic disengage floor of `mode`, 0 for modes that have none
    pub fn disengage_speed(&self, mode: Mode) -> u16 {
        Self::disengage_slot(mode).map_or(0, |slot| self.disengage[slot].load(Ordering::Relaxed))
    }

    pub fn set_disengage_speed(&self, mode: Mode, kmh: u16) -> Result<(), ConfigError> {
        let slot = Self::disengage_slot(mode).ok_or(ConfigError::InvalidMode)?;
        self.disengage[slot].store(kmh, Ordering::Relaxed);
        self.mark_dirty();
        Ok(())
    }

    pub fn release_rate(&self) -> f32 {
        self.release_rate.load(Ordering::Relaxed)
    }

    pub fn set_release_rate(&self, pct_per_sec: f32) -> Result<(), ConfigError> {
        if !pct_per_sec.is_finite() || pct_per_sec < 0.0 {
            return Err(ConfigError::RateOutOfRange);
        }
        self.release_rate.store(pct_per_sec, Ordering::Relaxed);
        self.mark_dirty();
        Ok(())
    }

    /// `None` leaves every frame untouched
    pub fn generation(&self) -> Option<Generation> {
        Generation::from_raw(self.generation.load(Ordering::Relaxed))
    }

    pub fn set_generation(&self, generation: Option<Generation>) {
        self.generation.store(generation.map_or(0, Generation::raw), Ordering::Relaxed);
        self.mark_dirty();
    }

    pub fn set_generation_raw(&self, raw: u8) -> Result<(), ConfigError> {
        let generation = Generation::from_raw(raw).ok_or(ConfigError::InvalidGeneration)?;
        self.set_generation(Some(generation));
        Ok(())
    }

    pub fn standalone(&self) -> bool {
        self.standalone.load(Ordering::Relaxed)
    }

    pub fn set_standalone(&self, on: bool) {
        self.standalone.store(on, Ordering::Relaxed);
        self.mark_dirty();
    }

    pub fn broadcast(&self) -> bool {
        self.broadcast.load(Ordering::Relaxed)
    }

    pub fn set_broadcast(&self, on: bool) {
        self.broadcast.store(on, Ordering::Relaxed);
        self.mark_dirty();
    }

    pub fn tables(&self) -> Tables {
        self.tables.lock(|t| t.get())
    }

    fn update_tables(&self, f: impl FnOnce(&mut Tables)) {
        self.tables.lock(|cell| {
            let mut tables = cell.get();
            f(&mut tables);
            cell.set(tables);
        });
        self.mark_dirty();
    }

    pub fn set_speed_curve(&self, curve: CurveTable) {
        self.update_tables(|t| t.speed = curve);
    }

    pub fn set_throttle_curve(&self, curve: CurveTable) {
        self.update_tables(|t| t.throttle = curve);
    }

    pub fn set_rpm_curve(&self, curve: CurveTable) {
        self.update_tables(|t| t.rpm = curve);
    }

    pub fn set_map(&self, map: MapTable) {
        self.update_tables(|t| t.map = map);
    }

    /// write every field from a validated snapshot
    pub fn apply(&self, settings: &Settings) -> Result<(), ConfigError> {
        validate_pedal_threshold(settings.pedal_threshold)?;
        if !settings.release_rate_pct_per_sec.is_finite() || settings.release_rate_pct_per_sec < 0.0 {
            return Err(ConfigError::RateOutOfRange);
        }
        self.set_mode(settings.mode);
        self.pedal_threshold.store(settings.pedal_threshold, Ordering::Relaxed);
        self.disable_speed.store(settings.disable_speed, Ordering::Relaxed);
        let d = settings.disengage_speed;
        for (slot, kmh) in [(DISENGAGE_SPEED, d.speed), (DISENGAGE_THROTTLE, d.throttle), (DISENGAGE_RPM, d.rpm), (DISENGAGE_MAP, d.map)] {
            self.disengage[slot].store(kmh, Ordering::Relaxed);
        }
        self.release_rate.store(settings.release_rate_pct_per_sec, Ordering::Relaxed);
        self.set_generation(settings.generation);
        self.standalone.store(settings.standalone, Ordering::Relaxed);
        self.broadcast.store(settings.broadcast, Ordering::Relaxed);
        self.update_tables(|t| {
            *t = Tables {
                speed: settings.speed_curve,
                throttle: settings.throttle_curve,
                rpm: settings.rpm_curve,
                map: settings.map,
            }
        });
        Ok(())
    }

    pub fn snapshot(&self) -> Settings {
        let tables = self.tables();
        Settings {
            mode: self.mode(),
            pedal_threshold: self.pedal_threshold(),
            disable_speed: self.disable_speed(),
            disengage_speed: DisengageSpeeds {
                speed: self.disengage_speed(Mode::Speed),
                throttle: self.disengage_speed(Mode::Throttle),
                rpm: self.disengage_speed(Mode::Rpm),
                map: self.disengage_speed(Mode::Map),
            },
            release_rate_pct_per_sec: self.release_rate(),
            speed_curve: tables.speed,
            throttle_curve: tables.throttle,
            rpm_curve: tables.rpm,
            map: tables.map,
            generation: self.generation(),
            standalone: self.standalone(),
            broadcast: self.broadcast(),
        }
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Relaxed);
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Relaxed)
    }

    /// clear the dirty flag, returning whether it was set
    pub fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::Relaxed)
    }
}

/// state byte bits reported by the coupling controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HaldexStatus {
    pub clutch1_report: bool,
    pub temp_protection: bool,
    pub clutch2_report: bool,
    pub coupling_open: bool,
    pub reserved: bool,
    pub speed_limit: bool,
}

impl HaldexStatus {
    pub fn from_byte(state: u8) -> Self {
        Self {
            clutch1_report: state & (1 << 0) != 0,
            temp_protection: state & (1 << 1) != 0,
            clutch2_report: state & (1 << 2) != 0,
            coupling_open: state & (1 << 3) != 0,
            reserved: state & (1 << 4) != 0,
            speed_limit: state & (1 << 6) != 0,
        }
    }
}

/// no timestamp recorded yet
pub(crate) const NEVER: u64 = u64::MAX;

/// how long a bus may stay quiet and still count as alive
pub const BUS_ALIVE_WINDOW: Duration = Duration::from_millis(500);

/// values decoded from live traffic, written by the bridge pipelines only
pub struct Telemetry {
    speed_kmh: AtomicU16,
    rpm: AtomicU16,
    pedal_pct: AtomicF32,
    boost: AtomicU16,
    haldex_state: AtomicU8,
    engagement_pct: AtomicU8,
    engagement_raw: AtomicU8,
    requested_lock: AtomicF32,
    applied_torque: AtomicU8,
    last_chassis_rx: AtomicU64,
    last_haldex_rx: AtomicU64,
    last_abs_speed: AtomicU64,
    chassis_failed: AtomicBool,
    haldex_failed: AtomicBool,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl Telemetry {
    pub const fn new() -> Self {
        Self {
            speed_kmh: AtomicU16::new(0),
            rpm: AtomicU16::new(0),
            pedal_pct: AtomicF32::new(0.0),
            boost: AtomicU16::new(0),
            haldex_state: AtomicU8::new(0),
            engagement_pct: AtomicU8::new(0),
            engagement_raw: AtomicU8::new(0),
            requested_lock: AtomicF32::new(0.0),
            applied_torque: AtomicU8::new(0),
            last_chassis_rx: AtomicU64::new(NEVER),
            last_haldex_rx: AtomicU64::new(NEVER),
            last_abs_speed: AtomicU64::new(NEVER),
            chassis_failed: AtomicBool::new(false),
            haldex_failed: AtomicBool::new(false),
        }
    }

    pub fn speed_kmh(&self) -> u16 {
        self.speed_kmh.load(Ordering::Relaxed)
    }

    pub fn set_speed_kmh(&self, kmh: u16) {
        self.speed_kmh.store(kmh, Ordering::Relaxed);
    }

    pub fn rpm(&self) -> u16 {
        self.rpm.load(Ordering::Relaxed)
    }

    pub fn set_rpm(&self, rpm: u16) {
        self.rpm.store(rpm, Ordering::Relaxed);
    }

    pub fn pedal_pct(&self) -> f32 {
        self.pedal_pct.load(Ordering::Relaxed)
    }

    pub fn set_pedal_pct(&self, pct: f32) {
        self.pedal_pct.store(pct, Ordering::Relaxed);
    }

    /// boost pressure in hPa
    pub fn boost(&self) -> u16 {
        self.boost.load(Ordering::Relaxed)
    }

    pub fn set_boost(&self, hpa: u16) {
        self.boost.store(hpa, Ordering::Relaxed);
    }

    pub fn haldex_state(&self) -> u8 {
        self.haldex_state.load(Ordering::Relaxed)
    }

    pub fn haldex_status(&self) -> HaldexStatus {
        HaldexStatus::from_byte(self.haldex_state())
    }

    pub fn engagement_pct(&self) -> u8 {
        self.engagement_pct.load(Ordering::Relaxed)
    }

    pub fn engagement_raw(&self) -> u8 {
        self.engagement_raw.load(Ordering::Relaxed)
    }

    pub fn set_haldex(&self, state: u8, engagement_raw: u8, engagement_pct: u8) {
        self.haldex_state.store(state, Ordering::Relaxed);
        self.engagement_raw.store(engagement_raw, Ordering::Relaxed);
        self.engagement_pct.store(engagement_pct, Ordering::Relaxed);
    }

    /// smoothed lock currently requested from the coupling
    pub fn requested_lock(&self) -> f32 {
        self.requested_lock.load(Ordering::Relaxed)
    }

    pub fn set_requested_lock(&self, pct: f32) {
        self.requested_lock.store(pct, Ordering::Relaxed);
    }

    /// last torque byte seen on a Gen1 motor frame
    pub fn applied_torque(&self) -> u8 {
        self.applied_torque.load(Ordering::Relaxed)
    }

    pub fn set_applied_torque(&self, value: u8) {
        self.applied_torque.store(value, Ordering::Relaxed);
    }

    fn last_rx_slot(&self, bus: Bus) -> &AtomicU64 {
        match bus {
            Bus::Chassis => &self.last_chassis_rx,
            Bus::Haldex => &self.last_haldex_rx,
        }
    }

    pub fn mark_rx(&self, bus: Bus, now: Instant) {
        self.last_rx_slot(bus).store(now.as_millis(), Ordering::Relaxed);
    }

    pub fn last_rx(&self, bus: Bus) -> Option<Instant> {
        match self.last_rx_slot(bus).load(Ordering::Relaxed) {
            NEVER => None,
            ms => Some(Instant::from_millis(ms)),
        }
    }

    /// a frame arrived on `bus` within the alive window
    pub fn is_alive(&self, bus: Bus, now: Instant) -> bool {
        self.last_rx(bus).is_some_and(|at| now.saturating_duration_since(at) <= BUS_ALIVE_WINDOW)
    }

    pub fn mark_abs_speed(&self, now: Instant) {
        self.last_abs_speed.store(now.as_millis(), Ordering::Relaxed);
    }

    pub fn last_abs_speed(&self) -> Option<Instant> {
        match self.last_abs_speed.load(Ordering::Relaxed) {
            NEVER => None,
            ms => Some(Instant::from_millis(ms)),
        }
    }

    pub fn failed(&self, bus: Bus) -> bool {
        match bus {
            Bus::Chassis => self.chassis_failed.load(Ordering::Relaxed),
            Bus::Haldex => self.haldex_failed.load(Ordering::Relaxed),
        }
    }

    /// set the failure flag, returning the previous value
    pub fn set_failed(&self, bus: Bus, failed: bool) -> bool {
        match bus {
            Bus::Chassis => self.chassis_failed.swap(failed, Ordering::Relaxed),
            Bus::Haldex => self.haldex_failed.swap(failed, Ordering::Relaxed),
        }
    }
}
