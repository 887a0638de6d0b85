//! Retry policies of the signal service calls.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

/// Retry policies of the signal service calls.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize, SmartDefault)]
#[serde(default)]
pub struct Retry {
    /// Short policy for idempotent informational calls (ICE trickle, answer
    /// submission, publisher negotiation).
    #[default(RetryPolicy {
        max_retries: 3,
        initial_delay: Duration::from_millis(500),
        multiplier: 1.0,
        max_delay: Duration::from_millis(500),
        randomization_factor: 0.5,
    })]
    pub fast: RetryPolicy,

    /// Long policy for calls whose effect must eventually land or be
    /// superseded (mute states, subscriptions).
    #[default(RetryPolicy {
        max_retries: 30,
        initial_delay: Duration::from_millis(250),
        multiplier: 2.0,
        max_delay: Duration::from_secs(5),
        randomization_factor: 0.5,
    })]
    pub persistent: RetryPolicy,
}

/// Single retry policy.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize, SmartDefault)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first failed attempt.
    #[default(3)]
    pub max_retries: u32,

    /// Delay before the first retry.
    #[default(Duration::from_millis(500))]
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,

    /// Multiplier applied to the delay after each retry.
    #[default(1.0)]
    pub multiplier: f64,

    /// Upper bound of the delay between retries.
    #[default(Duration::from_secs(5))]
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,

    /// Jitter applied to each delay: the actual delay is picked from
    /// `[delay * (1 - factor), delay * (1 + factor)]`.
    #[default(0.5)]
    pub randomization_factor: f64,
}

#[cfg(test)]
mod retry_conf_specs {
    use std::time::Duration;

    use serial_test::serial;

    use crate::{conf::Conf, overrided_by_env_conf};

    #[test]
    #[serial]
    fn overrides_nested_policy() {
        let default_conf = Conf::default();
        let env_conf = overrided_by_env_conf!(
            "TANDEM_RETRY__PERSISTENT__MAX_RETRIES" => "100",
            "TANDEM_RETRY__PERSISTENT__MAX_DELAY" => "10s",
        );

        assert_eq!(env_conf.retry.persistent.max_retries, 100);
        assert_eq!(
            env_conf.retry.persistent.max_delay,
            Duration::from_secs(10),
        );
        assert_eq!(env_conf.retry.fast, default_conf.retry.fast);
    }
}
