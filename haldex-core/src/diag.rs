//! Observation hook for every frame the bridge sees or sends.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::Instant;
use heapless::Vec;

use crate::bus::{Bus, Direction};
use crate::frame::CanFrame;

/// receives one call per observed or transmitted frame
///
/// Implementations must not block; a failing sink never affects bridging.
pub trait DiagnosticSink {
    fn observe(&self, bus: Bus, direction: Direction, generated: bool, frame: &CanFrame, now: Instant);
}

pub struct NoopSink;

impl DiagnosticSink for NoopSink {
    fn observe(&self, _: Bus, _: Direction, _: bool, _: &CanFrame, _: Instant) {}
}

impl<T: DiagnosticSink + ?Sized> DiagnosticSink for &T {
    fn observe(&self, bus: Bus, direction: Direction, generated: bool, frame: &CanFrame, now: Instant) {
        (**self).observe(bus, direction, generated, frame, now)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CacheEntry {
    pub bus: Bus,
    pub frame: CanFrame,
    pub count: u32,
    pub generated: bool,
    pub last_rx: Option<Instant>,
    pub last_tx: Option<Instant>,
    pub last_seen: Instant,
}

/// last frame per (bus, identifier), least recently seen evicted first
pub struct FrameCache<const N: usize> {
    entries: Mutex<CriticalSectionRawMutex, RefCell<Vec<CacheEntry, N>>>,
}

impl<const N: usize> Default for FrameCache<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> FrameCache<N> {
    pub const fn new() -> Self {
        Self { entries: Mutex::new(RefCell::new(Vec::new())) }
    }

    pub fn get(&self, bus: Bus, id: u32) -> Option<CacheEntry> {
        self.entries.lock(|entries| entries.borrow().iter().find(|e| e.bus == bus && e.frame.id == id).copied())
    }

    pub fn len(&self) -> usize {
        self.entries.lock(|entries| entries.borrow().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock(|entries| entries.borrow_mut().clear());
    }

    /// visit every entry while holding the cache
    pub fn for_each(&self, mut f: impl FnMut(&CacheEntry)) {
        self.entries.lock(|entries| entries.borrow().iter().for_each(&mut f));
    }
}

impl<const N: usize> DiagnosticSink for FrameCache<N> {
    fn observe(&self, bus: Bus, direction: Direction, generated: bool, frame: &CanFrame, now: Instant) {
        self.entries.lock(|entries| {
            let mut entries = entries.borrow_mut();
            let entry = match entries.iter_mut().position(|e| e.bus == bus && e.frame.id == frame.id) {
                Some(i) => &mut entries[i],
                None => {
                    if entries.is_full() {
                        let oldest = entries.iter().enumerate().min_by_key(|(_, e)| e.last_seen).map(|(i, _)| i);
                        if let Some(i) = oldest {
                            entries.swap_remove(i);
                        }
                    }
                    let fresh = CacheEntry {
                        bus,
                        frame: *frame,
                        count: 0,
                        generated,
                        last_rx: None,
                        last_tx: None,
                        last_seen: now,
                    };
                    if entries.push(fresh).is_err() {
                        return;
                    }
                    let last = entries.len() - 1;
                    &mut entries[last]
                }
            };
            entry.frame = *frame;
            entry.count = entry.count.saturating_add(1);
            entry.generated = generated;
            entry.last_seen = now;
            match direction {
                Direction::Rx => entry.last_rx = Some(now),
                Direction::Tx => entry.last_tx = Some(now),
            }
        });
    }
}
