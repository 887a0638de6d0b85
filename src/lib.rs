//! Client-side orchestrator of calls held over an SFU.
//!
//! A [`Client`] hands out [`Call`]s. Each [`Call`] tracks its lifecycle and
//! state, and keeps a media session with the SFU assigned by the coordinator:
//! publishing local tracks, subscribing to remote ones, and recovering from
//! network loss and SFU migrations.

// TODO: Remove `clippy::must_use_candidate` once the issue below is resolved:
//       https://github.com/rust-lang/rust-clippy/issues/4779
#![allow(clippy::module_name_repetitions, clippy::must_use_candidate)]

pub mod utils;
pub mod call;
pub mod client;
pub mod conf;
pub mod coordinator;
pub mod log;
pub mod media;
pub mod peer;
pub mod platform;
pub mod rpc;
pub mod session;

#[doc(inline)]
pub use self::{
    call::Call,
    client::{Client, Context},
    conf::Conf,
};
