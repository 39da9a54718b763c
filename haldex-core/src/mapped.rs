//! User configured signal overrides for speed, throttle and rpm.
//!
//! A key has the form `bus|frame_id|signal_name|unit`. The three keys are
//! written from request handlers and read by both pipelines on every loop,
//! so they live behind an async mutex: readers only ever `try_lock` and skip
//! the override for that pass, writers wait a bounded time and report
//! [`BindingError::Busy`] instead of stalling.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embassy_time::{Duration, Instant, with_timeout};
use heapless::String;
use portable_atomic::{AtomicU64, Ordering};

use crate::bus::Bus;
use crate::config::ConfigError;
use crate::dbc::{self, DbcSignal};
use crate::frame::CanFrame;
use crate::state::NEVER;

pub const KEY_CAPACITY: usize = 63;

/// how long a writer waits for the keys before giving up
pub const WRITE_TIMEOUT: Duration = Duration::from_millis(50);

/// an override stays in charge this long after it last produced a value
pub const FRESHNESS_WINDOW: Duration = Duration::from_millis(1000);

pub type Key = String<KEY_CAPACITY>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Input {
    Speed,
    Throttle,
    Rpm,
}

impl Input {
    pub const ALL: [Input; 3] = [Input::Speed, Input::Throttle, Input::Rpm];

    fn index(self) -> usize {
        match self {
            Input::Speed => 0,
            Input::Throttle => 1,
            Input::Rpm => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BindingError {
    /// another writer held the keys for the whole write timeout
    Busy,
    Invalid(ConfigError),
}

impl From<ConfigError> for BindingError {
    fn from(e: ConfigError) -> Self {
        BindingError::Invalid(e)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusFilter {
    Any,
    Chassis,
    Haldex,
}

impl BusFilter {
    pub fn matches(self, bus: Bus) -> bool {
        match self {
            BusFilter::Any => true,
            BusFilter::Chassis => bus == Bus::Chassis,
            BusFilter::Haldex => bus == Bus::Haldex,
        }
    }
}

/// a parsed key, borrowing its text fields from the key string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappedKey<'a> {
    pub bus: BusFilter,
    pub frame_id: u32,
    pub signal: &'a str,
    pub unit: &'a str,
}

fn parse_frame_id(text: &str) -> Option<u32> {
    let id = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok()?,
        None => text.parse::<u32>().ok()?,
    };
    (id <= 0x1FFF_FFFF).then_some(id)
}

impl<'a> MappedKey<'a> {
    pub fn parse(key: &'a str) -> Result<Self, ConfigError> {
        if key.len() > KEY_CAPACITY {
            return Err(ConfigError::KeyTooLong);
        }
        let mut parts = key.splitn(4, '|').map(str::trim);
        let (Some(bus), Some(frame), Some(signal), Some(unit)) = (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(ConfigError::MalformedKey);
        };
        let bus = if bus.is_empty() || bus.eq_ignore_ascii_case("all") {
            BusFilter::Any
        } else if bus.eq_ignore_ascii_case("chassis") || bus.eq_ignore_ascii_case("chs") {
            BusFilter::Chassis
        } else if bus.eq_ignore_ascii_case("haldex") || bus.eq_ignore_ascii_case("hdx") {
            BusFilter::Haldex
        } else {
            return Err(ConfigError::MalformedKey);
        };
        let frame_id = parse_frame_id(frame).ok_or(ConfigError::MalformedKey)?;
        if signal.is_empty() {
            return Err(ConfigError::MalformedKey);
        }
        Ok(Self { bus, frame_id, signal, unit })
    }
}

/// the three configured key strings, empty meaning "no override"
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MappedKeys {
    pub speed: Key,
    pub throttle: Key,
    pub rpm: Key,
}

impl MappedKeys {
    pub fn get(&self, input: Input) -> &Key {
        match input {
            Input::Speed => &self.speed,
            Input::Throttle => &self.throttle,
            Input::Rpm => &self.rpm,
        }
    }

    fn get_mut(&mut self, input: Input) -> &mut Key {
        match input {
            Input::Speed => &mut self.speed,
            Input::Throttle => &mut self.throttle,
            Input::Rpm => &mut self.rpm,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for input in Input::ALL {
            let key = self.get(input);
            if !key.trim().is_empty() {
                MappedKey::parse(key)?;
            }
        }
        Ok(())
    }
}

/// build a key, rejecting text that does not fit
pub fn key(text: &str) -> Result<Key, ConfigError> {
    Key::try_from(text).map_err(|_| ConfigError::KeyTooLong)
}

/// shared key strings plus the time each override last produced a value
pub struct MappedInputs {
    keys: Mutex<CriticalSectionRawMutex, MappedKeys>,
    applied: [AtomicU64; 3],
}

impl Default for MappedInputs {
    fn default() -> Self {
        Self::new()
    }
}

impl MappedInputs {
    pub const fn new() -> Self {
        Self {
            keys: Mutex::new(MappedKeys { speed: String::new(), throttle: String::new(), rpm: String::new() }),
            applied: [AtomicU64::new(NEVER), AtomicU64::new(NEVER), AtomicU64::new(NEVER)],
        }
    }

    /// copy of the current keys, `None` while a writer holds them
    pub fn try_keys(&self) -> Option<MappedKeys> {
        self.keys.try_lock().ok().map(|keys| keys.clone())
    }

    /// replace all three keys after validating them
    pub async fn set_keys(&self, keys: MappedKeys) -> Result<(), BindingError> {
        keys.validate()?;
        let mut guard = with_timeout(WRITE_TIMEOUT, self.keys.lock()).await.map_err(|_| BindingError::Busy)?;
        for input in Input::ALL {
            if guard.get(input) != keys.get(input) {
                self.applied[input.index()].store(NEVER, Ordering::Relaxed);
            }
        }
        *guard = keys;
        debug!("mapped inputs updated");
        Ok(())
    }

    /// replace one key after validating it
    pub async fn set_key(&self, input: Input, text: &str) -> Result<(), BindingError> {
        let new = key(text)?;
        if !new.trim().is_empty() {
            MappedKey::parse(&new)?;
        }
        let mut guard = with_timeout(WRITE_TIMEOUT, self.keys.lock()).await.map_err(|_| BindingError::Busy)?;
        if *guard.get(input) != new {
            self.applied[input.index()].store(NEVER, Ordering::Relaxed);
        }
        *guard.get_mut(input) = new;
        Ok(())
    }

    pub fn mark_applied(&self, input: Input, now: Instant) {
        self.applied[input.index()].store(now.as_millis(), Ordering::Relaxed);
    }

    /// the override of `input` produced a value within the freshness window
    pub fn is_recent(&self, input: Input, now: Instant) -> bool {
        match self.applied[input.index()].load(Ordering::Relaxed) {
            NEVER => false,
            at => now.as_millis().saturating_sub(at) <= FRESHNESS_WINDOW.as_millis(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Resolved {
    bus: BusFilter,
    frame_id: u32,
    signal: &'static DbcSignal,
}

/// a key resolved against the signal table, cached per pipeline
#[derive(Debug, Clone, Default)]
pub struct Binding {
    key: Key,
    resolved: Option<Resolved>,
}

fn normalize(text: &str) -> Key {
    let mut out = Key::new();
    for c in text.trim().chars() {
        // input is bounded by KEY_CAPACITY and lowercasing ASCII keeps the length
        let _ = out.push(c.to_ascii_lowercase());
    }
    out
}

impl Binding {
    pub const fn new() -> Self {
        Self { key: String::new(), resolved: None }
    }

    /// re-resolve only when the key text changed
    pub fn refresh(&mut self, text: &str) {
        let key = normalize(text);
        if key == self.key {
            return;
        }
        self.key = key;
        self.resolved = None;
        if self.key.is_empty() {
            return;
        }
        let Ok(parsed) = MappedKey::parse(&self.key) else {
            return;
        };
        self.resolved = dbc::find_signal(&dbc::vw_pq::SIGNALS, parsed.frame_id, parsed.signal, parsed.unit)
            .map(|signal| Resolved { bus: parsed.bus, frame_id: parsed.frame_id, signal });
        if self.resolved.is_none() {
            debug!("mapped key does not name a known signal");
        }
    }

    pub fn is_ready(&self) -> bool {
        self.resolved.is_some()
    }

    pub fn is_configured(&self) -> bool {
        !self.key.is_empty()
    }

    /// decoded value if this frame carries the bound signal
    pub fn apply(&self, bus: Bus, frame: &CanFrame) -> Option<f32> {
        let resolved = self.resolved.as_ref()?;
        if !resolved.bus.matches(bus) || frame.id & 0x1FFF_FFFF != resolved.frame_id {
            return None;
        }
        if !dbc::mux_matches(&dbc::vw_pq::SIGNALS, resolved.signal, &frame.data) {
            return None;
        }
        let value = dbc::decode(resolved.signal, &frame.data);
        value.is_finite().then_some(value)
    }
}

/// one binding per overridable input
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    pub speed: Binding,
    pub throttle: Binding,
    pub rpm: Binding,
}

impl Bindings {
    pub const fn new() -> Self {
        Self { speed: Binding::new(), throttle: Binding::new(), rpm: Binding::new() }
    }

    pub fn get(&self, input: Input) -> &Binding {
        match input {
            Input::Speed => &self.speed,
            Input::Throttle => &self.throttle,
            Input::Rpm => &self.rpm,
        }
    }

    /// pick up new keys, keeping the old bindings when the keys are busy
    pub fn refresh(&mut self, inputs: &MappedInputs) {
        if let Some(keys) = inputs.try_keys() {
            self.speed.refresh(&keys.speed);
            self.throttle.refresh(&keys.throttle);
            self.rpm.refresh(&keys.rpm);
        }
    }
}
