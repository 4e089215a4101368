//! Linux platform collaborators over D-Bus
//!
//! systemd-logind provides the wake resources and suspend signals, UPower
//! the charger state and NetworkManager the connectivity type.

pub mod inhibitor;
pub mod logind;
pub mod networkmanager;

pub use inhibitor::{InhibitMode, InhibitType, LogindInhibitor};
pub use logind::spawn_power_signals;
pub use networkmanager::NetworkManagerSource;
