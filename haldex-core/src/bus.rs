//! Transport seam between the pipelines and the two CAN controllers.
//!
//! Each physical controller implements [`CanPort`]. [`BusDriver`] owns both
//! ports, serialises access to each one, and keeps the per-direction send
//! failure bookkeeping so a bus-off condition produces one log line per
//! second instead of one per frame.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embassy_time::{Duration, Instant, with_timeout};
use portable_atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use crate::frame::CanFrame;
use crate::state::NEVER;

/// the two buses the bridge sits between
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Bus {
    Chassis,
    Haldex,
}

impl Bus {
    pub fn index(self) -> usize {
        match self {
            Bus::Chassis => 0,
            Bus::Haldex => 1,
        }
    }

    /// bus frames from this one are forwarded to
    pub fn other(self) -> Bus {
        match self {
            Bus::Chassis => Bus::Haldex,
            Bus::Haldex => Bus::Chassis,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    Rx,
    Tx,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SendError {
    /// not accepted by the controller within the send timeout
    Timeout,
    /// controller reported an error or is bus-off
    Bus,
    /// controller never came up
    NotReady,
}

/// controllers that finished initialisation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ReadySet {
    pub chassis: bool,
    pub haldex: bool,
}

impl ReadySet {
    pub fn contains(&self, bus: Bus) -> bool {
        match bus {
            Bus::Chassis => self.chassis,
            Bus::Haldex => self.haldex,
        }
    }
}

/// one physical CAN controller
#[allow(async_fn_in_trait)]
pub trait CanPort {
    /// next queued frame, never waits
    fn try_receive(&mut self) -> Option<CanFrame>;
    /// queue a frame for transmission
    async fn transmit(&mut self, frame: &CanFrame) -> Result<(), SendError>;
    /// bring the controller back after bus-off, returning whether it is usable
    async fn recover(&mut self) -> bool;
}

/// lets one event through per interval
pub struct LogRateLimiter {
    last: AtomicU64,
    interval: Duration,
}

impl LogRateLimiter {
    pub const fn new(interval: Duration) -> Self {
        Self { last: AtomicU64::new(NEVER), interval }
    }

    pub fn allow(&self, now: Instant) -> bool {
        let last = self.last.load(Ordering::Relaxed);
        if last != NEVER && now.as_millis().saturating_sub(last) < self.interval.as_millis() {
            return false;
        }
        self.last.store(now.as_millis(), Ordering::Relaxed);
        true
    }
}

struct Channel<P> {
    port: Mutex<CriticalSectionRawMutex, P>,
    ready: AtomicBool,
    failures: AtomicU32,
    limiter: LogRateLimiter,
}

impl<P> Channel<P> {
    fn new(port: P, ready: bool) -> Self {
        Self {
            port: Mutex::new(port),
            ready: AtomicBool::new(ready),
            failures: AtomicU32::new(0),
            limiter: LogRateLimiter::new(Duration::from_secs(1)),
        }
    }
}

/// owner of both controllers
pub struct BusDriver<C, H> {
    chassis: Channel<C>,
    haldex: Channel<H>,
}

impl<C: CanPort, H: CanPort> BusDriver<C, H> {
    pub fn new(chassis: C, haldex: H, ready: ReadySet) -> Self {
        if !ready.chassis {
            error!("chassis controller not ready");
        }
        if !ready.haldex {
            error!("haldex controller not ready");
        }
        Self { chassis: Channel::new(chassis, ready.chassis), haldex: Channel::new(haldex, ready.haldex) }
    }

    pub fn ready(&self) -> ReadySet {
        ReadySet {
            chassis: self.chassis.ready.load(Ordering::Relaxed),
            haldex: self.haldex.ready.load(Ordering::Relaxed),
        }
    }

    /// next frame from `bus`
    ///
    /// Returns `None` when the queue is empty, the controller is down, or a
    /// send currently holds the port.
    pub fn receive(&self, bus: Bus) -> Option<CanFrame> {
        match bus {
            Bus::Chassis => Self::receive_on(&self.chassis),
            Bus::Haldex => Self::receive_on(&self.haldex),
        }
    }

    fn receive_on<P: CanPort>(channel: &Channel<P>) -> Option<CanFrame> {
        if !channel.ready.load(Ordering::Relaxed) {
            return None;
        }
        // yields to an in-flight transmit, the frame stays queued in the controller
        channel.port.try_lock().ok()?.try_receive()
    }

    /// transmit on `bus`, giving up after `timeout`
    pub async fn send(&self, bus: Bus, frame: &CanFrame, timeout: Duration) -> Result<(), SendError> {
        let result = match bus {
            Bus::Chassis => Self::send_on(&self.chassis, frame, timeout).await,
            Bus::Haldex => Self::send_on(&self.haldex, frame, timeout).await,
        };
        if let Err(e) = result {
            let limiter = match bus {
                Bus::Chassis => &self.chassis.limiter,
                Bus::Haldex => &self.haldex.limiter,
            };
            if limiter.allow(Instant::now()) {
                warn!("send to {} failed: {} (id {=u32:#x})", bus, e, frame.id);
            }
        }
        result
    }

    async fn send_on<P: CanPort>(channel: &Channel<P>, frame: &CanFrame, timeout: Duration) -> Result<(), SendError> {
        if !channel.ready.load(Ordering::Relaxed) {
            return Err(SendError::NotReady);
        }
        let result = match with_timeout(timeout, async { channel.port.lock().await.transmit(frame).await }).await {
            Ok(result) => result,
            Err(_) => Err(SendError::Timeout),
        };
        match result {
            Ok(()) => channel.failures.store(0, Ordering::Relaxed),
            Err(_) => {
                channel.failures.fetch_add(1, Ordering::Relaxed);
            }
        }
        result
    }

    /// consecutive failed sends on `bus` since the last success
    pub fn send_failures(&self, bus: Bus) -> u32 {
        match bus {
            Bus::Chassis => self.chassis.failures.load(Ordering::Relaxed),
            Bus::Haldex => self.haldex.failures.load(Ordering::Relaxed),
        }
    }

    /// the send path of `bus` is currently failing
    pub fn bus_failure(&self, bus: Bus) -> bool {
        self.send_failures(bus) > 0 || !self.ready().contains(bus)
    }

    /// reinitialise the controller of `bus`
    pub async fn recover(&self, bus: Bus) -> bool {
        match bus {
            Bus::Chassis => Self::recover_on(&self.chassis).await,
            Bus::Haldex => Self::recover_on(&self.haldex).await,
        }
    }

    async fn recover_on<P: CanPort>(channel: &Channel<P>) -> bool {
        let ok = channel.port.lock().await.recover().await;
        channel.ready.store(ok, Ordering::Relaxed);
        if ok {
            channel.failures.store(0, Ordering::Relaxed);
        }
        ok
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::vec::Vec;

    use embassy_futures::block_on;

    use super::*;

    #[derive(Default)]
    struct FakePort {
        rx: VecDeque<CanFrame>,
        sent: Vec<CanFrame>,
        fail: bool,
        recovers: u32,
    }

    impl CanPort for FakePort {
        fn try_receive(&mut self) -> Option<CanFrame> {
            self.rx.pop_front()
        }

        async fn transmit(&mut self, frame: &CanFrame) -> Result<(), SendError> {
            if self.fail {
                return Err(SendError::Bus);
            }
            self.sent.push(*frame);
            Ok(())
        }

        async fn recover(&mut self) -> bool {
            self.recovers += 1;
            self.fail = false;
            true
        }
    }

    const ALL_READY: ReadySet = ReadySet { chassis: true, haldex: true };

    #[test]
    fn rate_limiter_allows_once_per_interval() {
        let limiter = LogRateLimiter::new(Duration::from_secs(1));
        let t0 = Instant::from_millis(5_000);
        assert!(limiter.allow(t0));
        assert!(!limiter.allow(t0 + Duration::from_millis(999)));
        assert!(limiter.allow(t0 + Duration::from_millis(1000)));
    }

    #[test]
    fn failures_count_until_recovery() {
        let haldex = FakePort { fail: true, ..FakePort::default() };
        let driver = BusDriver::new(FakePort::default(), haldex, ALL_READY);
        let frame = CanFrame::standard(0x280, [0; 8]);
        for _ in 0..3 {
            assert_eq!(block_on(driver.send(Bus::Haldex, &frame, Duration::from_millis(10))), Err(SendError::Bus));
        }
        assert_eq!(driver.send_failures(Bus::Haldex), 3);
        assert!(driver.bus_failure(Bus::Haldex));
        assert!(!driver.bus_failure(Bus::Chassis));
        assert!(block_on(driver.recover(Bus::Haldex)));
        assert!(!driver.bus_failure(Bus::Haldex));
        assert_eq!(block_on(driver.send(Bus::Haldex, &frame, Duration::from_millis(10))), Ok(()));
    }

    #[test]
    fn receive_waits_out_a_held_port() {
        let mut chassis = FakePort::default();
        chassis.rx.push_back(CanFrame::standard(0x280, [1; 8]));
        let driver = BusDriver::new(chassis, FakePort::default(), ALL_READY);
        let held = driver.chassis.port.try_lock().unwrap();
        assert_eq!(driver.receive(Bus::Chassis), None);
        drop(held);
        assert_eq!(driver.receive(Bus::Chassis), Some(CanFrame::standard(0x280, [1; 8])));
        assert_eq!(driver.receive(Bus::Chassis), None);
    }

    #[test]
    fn unready_bus_neither_sends_nor_receives() {
        let mut chassis = FakePort::default();
        chassis.rx.push_back(CanFrame::standard(0x1A0, [0; 8]));
        let driver = BusDriver::new(chassis, FakePort::default(), ReadySet { chassis: false, haldex: true });
        assert_eq!(driver.receive(Bus::Chassis), None);
        let frame = CanFrame::standard(0x6B0, [0; 8]);
        assert_eq!(block_on(driver.send(Bus::Chassis, &frame, Duration::from_millis(10))), Err(SendError::NotReady));
        assert!(block_on(driver.recover(Bus::Chassis)));
        assert!(driver.receive(Bus::Chassis).is_some());
    }
}
