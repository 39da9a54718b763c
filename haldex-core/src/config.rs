//! Configuration values and the validation that guards them.
//!
//! Everything the control engine reads from configuration passes through the
//! constructors here first. Invalid input is rejected with a [`ConfigError`]
//! and never reaches [`crate::state::ControlState`].

use crate::state::{FixedRatio, Generation, Mode};

pub const MAX_CURVE_POINTS: usize = 12;
pub const MAP_SPEED_BINS: usize = 9;
pub const MAP_THROTTLE_BINS: usize = 7;

/// current layout version of [`PersistedSettings`]
pub const SCHEMA_VERSION: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    TooFewPoints,
    TooManyPoints,
    BinsNotAscending,
    BinsDecreasing,
    LockOutOfRange,
    ThresholdOutOfRange,
    RateOutOfRange,
    InvalidMode,
    InvalidGeneration,
    KeyTooLong,
    MalformedKey,
}

/// lock curve over one telemetry value, bins strictly ascending
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurveTable {
    bins: [u16; MAX_CURVE_POINTS],
    lock: [u8; MAX_CURVE_POINTS],
    len: u8,
}

impl CurveTable {
    pub fn new(points: &[(u16, u8)]) -> Result<Self, ConfigError> {
        if points.is_empty() {
            return Err(ConfigError::TooFewPoints);
        }
        if points.len() > MAX_CURVE_POINTS {
            return Err(ConfigError::TooManyPoints);
        }
        if points.windows(2).any(|w| w[1].0 <= w[0].0) {
            return Err(ConfigError::BinsNotAscending);
        }
        if points.iter().any(|&(_, lock)| lock > 100) {
            return Err(ConfigError::LockOutOfRange);
        }
        let mut table = Self { bins: [0; MAX_CURVE_POINTS], lock: [0; MAX_CURVE_POINTS], len: points.len() as u8 };
        for (i, &(bin, lock)) in points.iter().enumerate() {
            table.bins[i] = bin;
            table.lock[i] = lock;
        }
        Ok(table)
    }

    // only for the compiled-in defaults, which are known to be valid
    const fn from_parts<const N: usize>(bins: [u16; N], lock: [u8; N]) -> Self {
        let mut table = Self { bins: [0; MAX_CURVE_POINTS], lock: [0; MAX_CURVE_POINTS], len: N as u8 };
        let mut i = 0;
        while i < N {
            table.bins[i] = bins[i];
            table.lock[i] = lock[i];
            i += 1;
        }
        table
    }

    pub fn bins(&self) -> &[u16] {
        &self.bins[..self.len as usize]
    }

    pub fn lock(&self) -> &[u8] {
        &self.lock[..self.len as usize]
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub const DEFAULT_SPEED: Self = Self::from_parts([0, 20, 40, 80, 140], [50, 45, 35, 20, 0]);
    pub const DEFAULT_THROTTLE: Self = Self::from_parts([0, 10, 25, 50, 80], [0, 10, 25, 55, 80]);
    pub const DEFAULT_RPM: Self = Self::from_parts([0, 1000, 2000, 3500, 5000, 6500], [0, 10, 30, 55, 80, 100]);
}

/// 2-D lock map, rows indexed by throttle bin, columns by speed bin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapTable {
    speed_bins: [u16; MAP_SPEED_BINS],
    throttle_bins: [u16; MAP_THROTTLE_BINS],
    lock: [[u8; MAP_SPEED_BINS]; MAP_THROTTLE_BINS],
}

impl MapTable {
    pub fn new(
        speed_bins: [u16; MAP_SPEED_BINS],
        throttle_bins: [u16; MAP_THROTTLE_BINS],
        lock: [[u8; MAP_SPEED_BINS]; MAP_THROTTLE_BINS],
    ) -> Result<Self, ConfigError> {
        if speed_bins.windows(2).any(|w| w[1] < w[0]) || throttle_bins.windows(2).any(|w| w[1] < w[0]) {
            return Err(ConfigError::BinsDecreasing);
        }
        if lock.iter().flatten().any(|&v| v > 100) {
            return Err(ConfigError::LockOutOfRange);
        }
        Ok(Self { speed_bins, throttle_bins, lock })
    }

    pub fn speed_bins(&self) -> &[u16; MAP_SPEED_BINS] {
        &self.speed_bins
    }

    pub fn throttle_bins(&self) -> &[u16; MAP_THROTTLE_BINS] {
        &self.throttle_bins
    }

    /// lock at throttle row `t`, speed column `s`
    pub fn at(&self, t: usize, s: usize) -> u8 {
        self.lock[t][s]
    }

    pub const DEFAULT: Self = Self {
        speed_bins: [0, 5, 10, 20, 40, 60, 80, 100, 140],
        throttle_bins: [0, 5, 10, 20, 40, 60, 80],
        lock: [
            [0, 0, 0, 0, 0, 0, 0, 0, 0],
            [0, 0, 0, 0, 0, 0, 0, 0, 0],
            [0, 0, 5, 5, 5, 5, 0, 0, 0],
            [0, 5, 10, 15, 15, 10, 5, 0, 0],
            [5, 10, 20, 25, 25, 20, 15, 10, 5],
            [10, 20, 30, 40, 40, 30, 25, 20, 15],
            [20, 30, 45, 60, 60, 50, 40, 30, 20],
        ],
    };
}

/// every persisted control value in one copyable snapshot
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Settings {
    pub mode: Mode,
    pub pedal_threshold: u8,
    /// fixed ratio modes stay open above this speed, 0 disables the check
    pub disable_speed: u16,
    /// per dynamic mode floor below which the coupling stays open
    pub disengage_speed: DisengageSpeeds,
    pub release_rate_pct_per_sec: f32,
    pub speed_curve: CurveTable,
    pub throttle_curve: CurveTable,
    pub rpm_curve: CurveTable,
    pub map: MapTable,
    pub generation: Option<Generation>,
    pub standalone: bool,
    pub broadcast: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DisengageSpeeds {
    pub speed: u16,
    pub throttle: u16,
    pub rpm: u16,
    pub map: u16,
}

impl DisengageSpeeds {
    /// floor for `mode`, `None` for modes without a dynamic floor
    pub fn for_mode(&self, mode: Mode) -> Option<u16> {
        match mode {
            Mode::Speed => Some(self.speed),
            Mode::Throttle => Some(self.throttle),
            Mode::Rpm => Some(self.rpm),
            Mode::Map => Some(self.map),
            _ => None,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mode: Mode::Stock,
            pedal_threshold: 0,
            disable_speed: 0,
            disengage_speed: DisengageSpeeds::default(),
            release_rate_pct_per_sec: 120.0,
            speed_curve: CurveTable::DEFAULT_SPEED,
            throttle_curve: CurveTable::DEFAULT_THROTTLE,
            rpm_curve: CurveTable::DEFAULT_RPM,
            map: MapTable::DEFAULT,
            generation: Some(Generation::Gen1),
            standalone: false,
            broadcast: true,
        }
    }
}

pub fn validate_pedal_threshold(value: u8) -> Result<u8, ConfigError> {
    if value > 100 { Err(ConfigError::ThresholdOutOfRange) } else { Ok(value) }
}

/// map a persisted mode value to the current enum
///
/// Schema 1 stored a short list that predates the extra fixed ratios; its
/// "custom" entry became the speed curve and "75/25" became 70/30. Anything
/// unrecognised falls back to stock.
pub fn migrate_mode(schema: u8, raw: u8) -> Mode {
    match schema {
        1 => match raw {
            0 => Mode::Stock,
            1 => Mode::Forward,
            2 => Mode::Fixed(FixedRatio::R50_50),
            3 => Mode::Fixed(FixedRatio::R70_30),
            4 => Mode::Speed,
            _ => Mode::Stock,
        },
        SCHEMA_VERSION => Mode::from_index(raw).unwrap_or(Mode::Stock),
        _ => Mode::Stock,
    }
}

/// settings as the storage backend keeps them
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PersistedSettings {
    pub schema: u8,
    pub mode_raw: u8,
    pub generation_raw: u8,
    /// remaining values; its `mode` and `generation` are ignored on load
    pub settings: Settings,
}

impl PersistedSettings {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            schema: SCHEMA_VERSION,
            mode_raw: settings.mode.index(),
            generation_raw: settings.generation.map_or(0, Generation::raw),
            settings: *settings,
        }
    }

    pub fn into_settings(self) -> Settings {
        Settings {
            mode: migrate_mode(self.schema, self.mode_raw),
            generation: Generation::from_raw(self.generation_raw),
            ..self.settings
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StoreError {
    Io,
    Full,
}

/// persistence backend for settings
pub trait SettingsStore {
    fn load(&mut self) -> Option<PersistedSettings>;
    fn save(&mut self, settings: &PersistedSettings) -> Result<(), StoreError>;
}

/// keeps the last saved settings in RAM only
#[derive(Debug, Default)]
pub struct MemoryStore {
    saved: Option<PersistedSettings>,
    saves: u32,
}

impl MemoryStore {
    pub const fn new() -> Self {
        Self { saved: None, saves: 0 }
    }

    pub fn with(settings: PersistedSettings) -> Self {
        Self { saved: Some(settings), saves: 0 }
    }

    /// number of successful saves since creation
    pub fn saves(&self) -> u32 {
        self.saves
    }
}

impl SettingsStore for MemoryStore {
    fn load(&mut self) -> Option<PersistedSettings> {
        self.saved
    }

    fn save(&mut self, settings: &PersistedSettings) -> Result<(), StoreError> {
        self.saved = Some(*settings);
        self.saves += 1;
        Ok(())
    }
}
