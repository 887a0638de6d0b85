//! SFU socket settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

/// SFU socket settings.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize, SmartDefault)]
#[serde(default)]
pub struct Rpc {
    /// Interval between health check pings sent to the SFU.
    /// Defaults to `10s`.
    #[default(Duration::from_secs(10))]
    #[serde(with = "humantime_serde")]
    pub ping_interval: Duration,

    /// Duration, after which the SFU socket is considered lost if no message
    /// is received. Defaults to `30s`.
    #[default(Duration::from_secs(30))]
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,

    /// Maximum duration of establishing the SFU socket. Defaults to `10s`.
    #[default(Duration::from_secs(10))]
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
}

#[cfg(test)]
mod rpc_conf_specs {
    use std::time::Duration;

    use serial_test::serial;

    use crate::{conf::Conf, overrided_by_env_conf};

    #[test]
    #[serial]
    fn overrides_defaults() {
        let default_conf = Conf::default();
        let env_conf = overrided_by_env_conf!(
            "TANDEM_RPC__IDLE_TIMEOUT" => "20s",
            "TANDEM_RPC__PING_INTERVAL" => "3s",
        );

        assert_ne!(default_conf.rpc.idle_timeout, env_conf.rpc.idle_timeout);
        assert_eq!(env_conf.rpc.idle_timeout, Duration::from_secs(20));
        assert_eq!(env_conf.rpc.ping_interval, Duration::from_secs(3));
    }
}
