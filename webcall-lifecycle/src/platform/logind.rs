//! logind and UPower power signals
//!
//! Feeds [`RawPowerEvent`]s into a [`PowerSuspendMonitor`](crate::suspend::PowerSuspendMonitor):
//! `PrepareForSleep(true/false)` around suspend, the manager's `IdleHint`
//! property and UPower's `OnBattery` property.

use crate::suspend::RawPowerEvent;
use crate::Result;
use futures::stream::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use zbus::{proxy, Connection};

#[proxy(
    interface = "org.freedesktop.login1.Manager",
    default_service = "org.freedesktop.login1",
    default_path = "/org/freedesktop/login1"
)]
trait LoginManager {
    /// Emitted with `true` before suspend and `false` after resume
    #[zbus(signal)]
    fn prepare_for_sleep(&self, start: bool) -> zbus::Result<()>;

    #[zbus(property)]
    fn idle_hint(&self) -> zbus::Result<bool>;
}

#[proxy(
    interface = "org.freedesktop.UPower",
    default_service = "org.freedesktop.UPower",
    default_path = "/org/freedesktop/UPower"
)]
trait UPower {
    #[zbus(property)]
    fn on_battery(&self) -> zbus::Result<bool>;
}

/// Subscribe to power signals on the system bus and forward them to `tx`
///
/// The current `OnBattery` value is sent first as a baseline. A missing
/// UPower service only disables charger events.
pub async fn spawn_power_signals(tx: mpsc::Sender<RawPowerEvent>) -> Result<JoinHandle<()>> {
    let connection = Connection::system().await?;
    let login = LoginManagerProxy::new(&connection).await?;
    let upower = UPowerProxy::new(&connection).await?;

    let mut sleep_stream = login.receive_prepare_for_sleep().await?;
    let mut idle_stream = login.receive_idle_hint_changed().await;
    let mut battery_stream = upower.receive_on_battery_changed().await;

    match upower.on_battery().await {
        Ok(on_battery) => {
            let _ = tx.send(RawPowerEvent::OnBattery(on_battery)).await;
        }
        Err(e) => warn!("UPower not available, charger events disabled: {}", e),
    }

    info!("Watching logind and UPower power signals");

    Ok(tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                Some(signal) = sleep_stream.next() => match signal.args() {
                    Ok(args) => RawPowerEvent::PrepareForSleep(*args.start()),
                    Err(e) => {
                        debug!("Unreadable PrepareForSleep signal: {}", e);
                        continue;
                    }
                },
                Some(changed) = idle_stream.next() => match changed.get().await {
                    Ok(idle) => RawPowerEvent::IdleHint(idle),
                    Err(_) => continue,
                },
                Some(changed) = battery_stream.next() => match changed.get().await {
                    Ok(on_battery) => RawPowerEvent::OnBattery(on_battery),
                    Err(_) => continue,
                },
                else => break,
            };

            if tx.send(event).await.is_err() {
                break;
            }
        }
        debug!("Power signal forwarding stopped");
    }))
}
