//! Local media publishing settings.

use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

/// Local media publishing settings.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize, SmartDefault)]
#[serde(default)]
pub struct Media {
    /// Enables discontinuous transmission of the published audio.
    /// Defaults to `true`.
    #[default(true)]
    pub dtx: bool,

    /// Makes redundant audio coding preferred for the published audio.
    /// Defaults to `true`.
    #[default(true)]
    pub red: bool,

    /// Publishes camera video in `f`/`h`/`q` simulcast layers.
    /// Defaults to `true`.
    #[default(true)]
    pub simulcast: bool,
}
