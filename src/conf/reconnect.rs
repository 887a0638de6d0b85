//! Reconnection settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

/// Reconnection settings.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize, SmartDefault)]
#[serde(default)]
pub struct Reconnect {
    /// Maximum duration of a connectivity loss after which a fast reconnect
    /// is still attempted. Longer losses lead to a full reconnect.
    /// Defaults to `3s`.
    #[default(Duration::from_secs(3))]
    #[serde(with = "humantime_serde")]
    pub fast_reconnect_window: Duration,

    /// Delay between restarting the transport on a fast reconnect and
    /// inspecting the peer connections' states. Defaults to `4s`.
    #[default(Duration::from_secs(4))]
    #[serde(with = "humantime_serde")]
    pub settle_delay: Duration,

    /// Maximum number of consecutive full reconnect attempts before the call
    /// is considered lost. Defaults to `30`.
    #[default(30)]
    pub max_full_reconnect_attempts: u32,
}
