//! [`SignalService`] over HTTP with JSON bodies.

use std::sync::Arc;

use async_trait::async_trait;
use tandem_sfu_proto::{
    signal::{
        IceRestartRequest, SendAnswerRequest, SetPublisherRequest,
        SetPublisherResponse, SignalMethod, SignalResponse as _,
        UpdateMuteStatesRequest, UpdateSubscriptionsRequest,
    },
    IceTrickle,
};
use tracerr::Traced;
use url::Url;

use super::{SfuServer, SignalError, SignalService, SignalServiceFactory};

/// [`SignalService`] posting JSON requests to `{url}/{method}` of an SFU.
#[derive(Clone, Debug)]
pub struct HttpSignalService {
    client: reqwest::Client,
    base: Url,
    token: String,
}

impl HttpSignalService {
    /// Creates a new [`HttpSignalService`] talking to the provided `base`
    /// [`Url`] with the provided authorization `token`.
    #[must_use]
    pub fn new(client: reqwest::Client, base: Url, token: String) -> Self {
        Self {
            client,
            base,
            token,
        }
    }

    /// Returns the endpoint of the provided [`SignalMethod`].
    fn endpoint<M: SignalMethod>(&self) -> String {
        format!("{}/{}", self.base.as_str().trim_end_matches('/'), M::NAME)
    }

    /// Performs the provided [`SignalMethod`] call.
    async fn call<M>(&self, req: &M) -> Result<M::Response, Traced<SignalError>>
    where
        M: SignalMethod + Sync,
    {
        let resp = self
            .client
            .post(self.endpoint::<M>())
            .bearer_auth(&self.token)
            .json(req)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| {
                tracerr::new!(SignalError::Transport(e.to_string()))
            })?;
        let resp: M::Response = resp.json().await.map_err(|e| {
            if e.is_decode() {
                tracerr::new!(SignalError::Decode(e.to_string()))
            } else {
                tracerr::new!(SignalError::Transport(e.to_string()))
            }
        })?;

        if let Some(e) = resp.error() {
            return Err(tracerr::new!(SignalError::Sfu(e.clone())));
        }
        Ok(resp)
    }
}

#[async_trait]
impl SignalService for HttpSignalService {
    async fn set_publisher(
        &self,
        req: SetPublisherRequest,
    ) -> Result<SetPublisherResponse, Traced<SignalError>> {
        self.call(&req).await.map_err(tracerr::wrap!())
    }

    async fn send_answer(
        &self,
        req: SendAnswerRequest,
    ) -> Result<(), Traced<SignalError>> {
        self.call(&req).await.map(drop).map_err(tracerr::wrap!())
    }

    async fn ice_trickle(
        &self,
        req: IceTrickle,
    ) -> Result<(), Traced<SignalError>> {
        self.call(&req).await.map(drop).map_err(tracerr::wrap!())
    }

    async fn update_subscriptions(
        &self,
        req: UpdateSubscriptionsRequest,
    ) -> Result<(), Traced<SignalError>> {
        self.call(&req).await.map(drop).map_err(tracerr::wrap!())
    }

    async fn update_mute_states(
        &self,
        req: UpdateMuteStatesRequest,
    ) -> Result<(), Traced<SignalError>> {
        self.call(&req).await.map(drop).map_err(tracerr::wrap!())
    }

    async fn ice_restart(
        &self,
        req: IceRestartRequest,
    ) -> Result<(), Traced<SignalError>> {
        self.call(&req).await.map(drop).map_err(tracerr::wrap!())
    }
}

/// [`SignalServiceFactory`] of [`HttpSignalService`]s sharing a single
/// [`reqwest::Client`].
#[derive(Clone, Debug, Default)]
pub struct HttpSignalServiceFactory {
    client: reqwest::Client,
}

impl HttpSignalServiceFactory {
    /// Creates a new [`HttpSignalServiceFactory`] using the provided
    /// [`reqwest::Client`].
    #[inline]
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl SignalServiceFactory for HttpSignalServiceFactory {
    fn create(
        &self,
        server: &SfuServer,
        token: &str,
    ) -> Arc<dyn SignalService> {
        Arc::new(HttpSignalService::new(
            self.client.clone(),
            server.url.clone(),
            token.to_owned(),
        ))
    }
}

#[cfg(test)]
mod spec {
    use tandem_sfu_proto::{
        signal::{SetPublisherRequest, UpdateSubscriptionsRequest},
        IceTrickle,
    };

    use super::HttpSignalService;

    #[test]
    fn builds_method_endpoints() {
        let service = HttpSignalService::new(
            reqwest::Client::new(),
            "https://sfu-1.example.com/twirp/".parse().unwrap(),
            "token".into(),
        );

        assert_eq!(
            service.endpoint::<SetPublisherRequest>(),
            "https://sfu-1.example.com/twirp/SetPublisher",
        );
        assert_eq!(
            service.endpoint::<UpdateSubscriptionsRequest>(),
            "https://sfu-1.example.com/twirp/UpdateSubscriptions",
        );
        assert_eq!(
            service.endpoint::<IceTrickle>(),
            "https://sfu-1.example.com/twirp/IceTrickle",
        );
    }
}
