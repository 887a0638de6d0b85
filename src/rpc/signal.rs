//! Unary signal service of an SFU.

use std::sync::Arc;

use async_trait::async_trait;
use derive_more::Display;
use tandem_sfu_proto::{
    signal::{
        IceRestartRequest, SendAnswerRequest, SetPublisherRequest,
        SetPublisherResponse, UpdateMuteStatesRequest,
        UpdateSubscriptionsRequest,
    },
    IceTrickle, PeerType, SfuError, TrackInfo, TrackMuteState,
    TrackSubscriptionDetails,
};
use tracerr::Traced;

use crate::{
    conf,
    utils::{retry, Categorized, ErrorKind, Retryable},
};

use super::SfuServer;

/// Errors of a [`SignalService`] call.
#[derive(Clone, Debug, Display)]
pub enum SignalError {
    /// Request couldn't be delivered or its response couldn't be received.
    #[display(fmt = "Signal transport error: {}", _0)]
    Transport(String),

    /// SFU has processed the request and reported an error.
    #[display(fmt = "SFU error {}: {}", "_0.code", "_0.message")]
    Sfu(SfuError),

    /// Response couldn't be decoded.
    #[display(fmt = "Failed to decode signal response: {}", _0)]
    Decode(String),
}

impl Categorized for SignalError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(_) | Self::Sfu(_) => ErrorKind::Transport,
            Self::Decode(_) => ErrorKind::Protocol,
        }
    }
}

impl Retryable for SignalError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Sfu(e) => e.should_retry,
            Self::Decode(_) => false,
        }
    }
}

/// Unary request/response service of an SFU.
///
/// Errors reported by the SFU inside successful responses are returned as
/// [`SignalError::Sfu`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SignalService: Send + Sync {
    /// Sends a publisher offer, returning the SFU answer.
    async fn set_publisher(
        &self,
        req: SetPublisherRequest,
    ) -> Result<SetPublisherResponse, Traced<SignalError>>;

    /// Sends an answer to a subscriber offer.
    async fn send_answer(
        &self,
        req: SendAnswerRequest,
    ) -> Result<(), Traced<SignalError>>;

    /// Sends a locally discovered ICE candidate.
    async fn ice_trickle(
        &self,
        req: IceTrickle,
    ) -> Result<(), Traced<SignalError>>;

    /// Replaces the whole set of remote track subscriptions.
    async fn update_subscriptions(
        &self,
        req: UpdateSubscriptionsRequest,
    ) -> Result<(), Traced<SignalError>>;

    /// Informs the SFU about mute states of published tracks.
    async fn update_mute_states(
        &self,
        req: UpdateMuteStatesRequest,
    ) -> Result<(), Traced<SignalError>>;

    /// Requests an ICE restart of a peer on the SFU side.
    async fn ice_restart(
        &self,
        req: IceRestartRequest,
    ) -> Result<(), Traced<SignalError>>;
}

/// Factory of [`SignalService`]s.
pub trait SignalServiceFactory: Send + Sync {
    /// Creates a new [`SignalService`] talking to the provided [`SfuServer`]
    /// on behalf of the session authorized by the provided `token`.
    fn create(&self, server: &SfuServer, token: &str) -> Arc<dyn SignalService>;
}

/// [`SignalService`] bound to a single session on a single SFU, retrying
/// its calls according to the configured [`conf::Retry`] policies.
///
/// Every call accepts a precondition, checked before each retry: once it
/// doesn't hold, the call gives up with the last error.
pub struct SignalServer {
    service: Arc<dyn SignalService>,
    server: SfuServer,
    session_id: String,
    retry: conf::Retry,
}

impl SignalServer {
    /// Creates a new [`SignalServer`].
    #[must_use]
    pub fn new(
        service: Arc<dyn SignalService>,
        server: SfuServer,
        session_id: String,
        retry: conf::Retry,
    ) -> Self {
        Self {
            service,
            server,
            session_id,
            retry,
        }
    }

    /// Name of the SFU edge this [`SignalServer`] talks to.
    #[inline]
    #[must_use]
    pub fn edge_name(&self) -> &str {
        &self.server.edge_name
    }

    /// [`SfuServer`] this [`SignalServer`] talks to.
    #[inline]
    #[must_use]
    pub fn server(&self) -> &SfuServer {
        &self.server
    }

    /// ID of the session this [`SignalServer`] acts for.
    #[inline]
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Negotiates the publisher with the provided offer.
    ///
    /// # Errors
    ///
    /// With the last [`SignalError`] once the fast policy is exhausted.
    pub async fn set_publisher<P>(
        &self,
        sdp: String,
        tracks: Vec<TrackInfo>,
        precondition: P,
    ) -> Result<SetPublisherResponse, Traced<SignalError>>
    where
        P: FnMut() -> bool + Send,
    {
        let req = SetPublisherRequest {
            sdp,
            session_id: self.session_id.clone(),
            tracks,
        };
        retry::execute(&self.retry.fast, precondition, || {
            self.service.set_publisher(req.clone())
        })
        .await
    }

    /// Submits an answer to a subscriber offer.
    ///
    /// # Errors
    ///
    /// With the last [`SignalError`] once the fast policy is exhausted.
    pub async fn send_answer<P>(
        &self,
        peer_type: PeerType,
        sdp: String,
        precondition: P,
    ) -> Result<(), Traced<SignalError>>
    where
        P: FnMut() -> bool + Send,
    {
        let req = SendAnswerRequest {
            peer_type,
            sdp,
            session_id: self.session_id.clone(),
        };
        retry::execute(&self.retry.fast, precondition, || {
            self.service.send_answer(req.clone())
        })
        .await
    }

    /// Sends a locally discovered ICE candidate of the provided peer.
    ///
    /// # Errors
    ///
    /// With the last [`SignalError`] once the fast policy is exhausted.
    pub async fn ice_trickle<P>(
        &self,
        peer_type: PeerType,
        ice_candidate: String,
        precondition: P,
    ) -> Result<(), Traced<SignalError>>
    where
        P: FnMut() -> bool + Send,
    {
        let req = IceTrickle {
            peer_type,
            ice_candidate,
            session_id: self.session_id.clone(),
        };
        retry::execute(&self.retry.fast, precondition, || {
            self.service.ice_trickle(req.clone())
        })
        .await
    }

    /// Replaces the remote track subscriptions.
    ///
    /// # Errors
    ///
    /// With the last [`SignalError`] once the persistent policy is
    /// exhausted or the subscriptions are superseded.
    pub async fn update_subscriptions<P>(
        &self,
        tracks: Vec<TrackSubscriptionDetails>,
        precondition: P,
    ) -> Result<(), Traced<SignalError>>
    where
        P: FnMut() -> bool + Send,
    {
        let req = UpdateSubscriptionsRequest {
            session_id: self.session_id.clone(),
            tracks,
        };
        retry::execute(&self.retry.persistent, precondition, || {
            self.service.update_subscriptions(req.clone())
        })
        .await
    }

    /// Informs the SFU about mute states of the published tracks.
    ///
    /// # Errors
    ///
    /// With the last [`SignalError`] once the persistent policy is
    /// exhausted or the mute state diverged.
    pub async fn update_mute_states<P>(
        &self,
        mute_states: Vec<TrackMuteState>,
        precondition: P,
    ) -> Result<(), Traced<SignalError>>
    where
        P: FnMut() -> bool + Send,
    {
        let req = UpdateMuteStatesRequest {
            session_id: self.session_id.clone(),
            mute_states,
        };
        retry::execute(&self.retry.persistent, precondition, || {
            self.service.update_mute_states(req.clone())
        })
        .await
    }

    /// Requests an ICE restart of the provided peer on the SFU side.
    ///
    /// # Errors
    ///
    /// With the last [`SignalError`] once the fast policy is exhausted.
    pub async fn ice_restart<P>(
        &self,
        peer_type: PeerType,
        precondition: P,
    ) -> Result<(), Traced<SignalError>>
    where
        P: FnMut() -> bool + Send,
    {
        let req = IceRestartRequest {
            session_id: self.session_id.clone(),
            peer_type,
        };
        retry::execute(&self.retry.fast, precondition, || {
            self.service.ice_restart(req.clone())
        })
        .await
    }
}
