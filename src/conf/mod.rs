//! Provides configuration options of the call session orchestrator.
//!
//! Options are applied from the following sources, each overriding the
//! previous one:
//! - default values;
//! - configuration file, the name of which is given as a command line
//!   parameter or environment variable;
//! - environment variables.

pub mod call;
pub mod log;
pub mod media;
pub mod reconnect;
pub mod retry;
pub mod rpc;

use std::env;

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

#[doc(inline)]
pub use self::{
    call::Call,
    log::Log,
    media::Media,
    reconnect::Reconnect,
    retry::{Retry, RetryPolicy},
    rpc::Rpc,
};

/// CLI argument that is responsible for holding application configuration
/// file path.
static APP_CONF_PATH_CMD_ARG_NAME: &str = "--conf";

/// Environment variable that is responsible for holding application
/// configuration file path.
static APP_CONF_PATH_ENV_VAR_NAME: &str = "TANDEM_CONF";

/// Holds all the configuration options of the orchestrator.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct Conf {
    /// Call lifecycle settings.
    pub call: Call,

    /// Local media publishing settings.
    pub media: Media,

    /// Reconnection settings.
    pub reconnect: Reconnect,

    /// Retry policies of the signal service calls.
    pub retry: Retry,

    /// SFU socket settings.
    pub rpc: Rpc,

    /// Logging settings.
    pub log: Log,
}

impl Conf {
    /// Creates new [`Conf`] and applies values from such sources
    /// and in that order:
    /// - default values;
    /// - configuration file, the name of which is given as a command line
    ///   parameter or environment variable;
    /// - environment variables.
    ///
    /// # Errors
    ///
    /// Errors if parsing fails.
    pub fn parse() -> Result<Self, ConfigError> {
        let mut cfg = Config::new();

        if let Some(path) = get_conf_file_name(
            env::var(APP_CONF_PATH_ENV_VAR_NAME),
            env::args(),
        ) {
            cfg.merge(File::with_name(&path))?;
        }

        cfg.merge(Environment::with_prefix("TANDEM").separator("__"))?;

        cfg.try_into()
    }
}

/// Returns the path to the configuration file, if it's set via CLI `args`
/// or environment variable.
fn get_conf_file_name<T>(
    env_var: Result<String, env::VarError>,
    cmd_args: T,
) -> Option<String>
where
    T: IntoIterator<Item = String>,
{
    if let Ok(path) = env_var {
        return Some(path);
    }
    let mut args = cmd_args
        .into_iter()
        .skip_while(|x| x != APP_CONF_PATH_CMD_ARG_NAME);
    args.next().and_then(|_| args.next())
}
