//! Call lifecycle settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

/// Call lifecycle settings.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize, SmartDefault)]
#[serde(default)]
pub struct Call {
    /// Maximum duration of joining a call, including the media session
    /// connection. Defaults to `30s`.
    #[default(Duration::from_secs(30))]
    #[serde(with = "humantime_serde")]
    pub join_timeout: Duration,

    /// Maximum duration of accepting an incoming call. Defaults to `10s`.
    #[default(Duration::from_secs(10))]
    #[serde(with = "humantime_serde")]
    pub accept_timeout: Duration,

    /// Maximum duration of rejecting an incoming call. Defaults to `10s`.
    #[default(Duration::from_secs(10))]
    #[serde(with = "humantime_serde")]
    pub reject_timeout: Duration,

    /// Number of times a failed join is retried before the call moves to
    /// the error state. Defaults to `3`.
    #[default(3)]
    pub join_retries: u32,

    /// Number of participants starting from which remote tracks are not
    /// activated until explicitly requested. Defaults to `10`.
    #[default(10)]
    pub participants_threshold: usize,
}

#[cfg(test)]
mod call_conf_specs {
    use std::time::Duration;

    use serial_test::serial;

    use crate::{conf::Conf, overrided_by_env_conf};

    #[test]
    #[serial]
    fn overrides_defaults() {
        let default_conf = Conf::default();
        let env_conf = overrided_by_env_conf!(
            "TANDEM_CALL__JOIN_TIMEOUT" => "1m",
            "TANDEM_CALL__PARTICIPANTS_THRESHOLD" => "25",
        );

        assert_ne!(default_conf.call.join_timeout, env_conf.call.join_timeout);
        assert_eq!(env_conf.call.join_timeout, Duration::from_secs(60));
        assert_eq!(env_conf.call.participants_threshold, 25);
        assert_eq!(env_conf.call.accept_timeout, Duration::from_secs(10));
    }
}
