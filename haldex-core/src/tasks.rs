//! Low rate housekeeping loops.

use embassy_time::{Duration, Instant, Ticker, Timer};

use crate::bridge::Shared;
use crate::bus::{Bus, BusDriver, CanPort};
use crate::config::{PersistedSettings, SettingsStore, StoreError};
use crate::state::{ControlState, Telemetry};

pub const RECOVERY_PERIOD: Duration = Duration::from_millis(500);
pub const FLUSH_DELAY: Duration = Duration::from_secs(15);
pub const FLUSH_PERIOD: Duration = Duration::from_millis(2000);
pub const STATUS_PERIOD: Duration = Duration::from_secs(1);

/// flag quiet buses whose send path fails and try to restart them
///
/// A flagged bus is cleared by its pipeline on the first frame it receives.
pub async fn poll_recovery<C: CanPort, H: CanPort>(driver: &BusDriver<C, H>, telemetry: &Telemetry, now: Instant) {
    for bus in [Bus::Chassis, Bus::Haldex] {
        if !telemetry.is_alive(bus, now) && driver.bus_failure(bus) && !telemetry.set_failed(bus, true) {
            warn!("{} bus failure", bus);
        }
        if telemetry.failed(bus) && driver.recover(bus).await {
            debug!("{} controller restarted", bus);
        }
    }
}

pub async fn recovery<C: CanPort, H: CanPort>(driver: &BusDriver<C, H>, telemetry: &Telemetry) -> ! {
    let mut ticker = Ticker::every(RECOVERY_PERIOD);
    loop {
        ticker.next().await;
        poll_recovery(driver, telemetry, Instant::now()).await;
    }
}

/// load persisted settings, keeping the defaults when there are none or
/// they fail validation
pub fn restore(state: &ControlState, store: &mut impl SettingsStore) {
    let Some(persisted) = store.load() else {
        info!("no stored settings, using defaults");
        return;
    };
    match state.apply(&persisted.into_settings()) {
        Ok(()) => info!("settings restored"),
        Err(e) => warn!("stored settings rejected: {}", e),
    }
    state.take_dirty();
}

/// save a snapshot if anything changed, returning whether one was written
pub fn flush(state: &ControlState, store: &mut impl SettingsStore) -> Result<bool, StoreError> {
    if !state.take_dirty() {
        return Ok(false);
    }
    let persisted = PersistedSettings::from_settings(&state.snapshot());
    if let Err(e) = store.save(&persisted) {
        state.mark_dirty();
        return Err(e);
    }
    Ok(true)
}

pub async fn persistence(state: &ControlState, store: &mut impl SettingsStore) -> ! {
    Timer::after(FLUSH_DELAY).await;
    let mut ticker = Ticker::every(FLUSH_PERIOD);
    loop {
        match flush(state, store) {
            Ok(true) => debug!("settings saved"),
            Ok(false) => {}
            Err(e) => warn!("settings save failed: {}", e),
        }
        ticker.next().await;
    }
}

pub async fn status_log(shared: Shared<'_>) -> ! {
    let mut ticker = Ticker::every(STATUS_PERIOD);
    loop {
        ticker.next().await;
        let Shared { state, telemetry, .. } = shared;
        debug!(
            "mode {} lock {} engagement {} speed {}",
            state.mode().name(),
            telemetry.requested_lock(),
            telemetry.engagement_pct(),
            telemetry.speed_kmh()
        );
    }
}
