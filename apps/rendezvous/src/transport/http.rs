use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use url::Url;

use super::{SignalTransport, TransportError};

/// Polling transport against a rendezvous server exposing `/data/{peer_id}`.
#[derive(Clone, Debug)]
pub struct HttpSignalTransport {
    client: Client,
    base: Url,
}

impl HttpSignalTransport {
    pub fn new(base: Url) -> Self {
        Self::with_client(Client::new(), base)
    }

    pub fn with_client(client: Client, mut base: Url) -> Self {
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Self { client, base }
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, peer_id: &str) -> Result<Url, TransportError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| TransportError::Endpoint(format!("{} cannot be a base", self.base)))?
            .pop_if_empty()
            .extend(["data", peer_id]);
        Ok(url)
    }
}

#[async_trait]
impl SignalTransport for HttpSignalTransport {
    async fn post(&self, peer_id: &str, body: String) -> Result<(), TransportError> {
        let url = self.endpoint(peer_id)?;
        tracing::trace!(
            target: "rendezvous::poller",
            phase = "post",
            %url,
            await = "client.send",
            state = "start"
        );
        let send_attempt = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await;
        tracing::trace!(
            target: "rendezvous::poller",
            phase = "post",
            await = "client.send",
            state = "end",
            result = ?send_attempt.as_ref().map(reqwest::Response::status)
        );
        let response = send_attempt.map_err(http_error)?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(TransportError::Status {
                status: response.status().as_u16(),
            })
        }
    }

    async fn get(&self, peer_id: &str) -> Result<Option<String>, TransportError> {
        let url = self.endpoint(peer_id)?;
        tracing::trace!(
            target: "rendezvous::poller",
            phase = "get",
            %url,
            await = "client.send",
            state = "start"
        );
        let send_attempt = self.client.get(url).send().await;
        tracing::trace!(
            target: "rendezvous::poller",
            phase = "get",
            await = "client.send",
            state = "end",
            result = ?send_attempt.as_ref().map(reqwest::Response::status)
        );
        let response = send_attempt.map_err(http_error)?;

        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::NO_CONTENT => Ok(None),
            status if status.is_success() => {
                let body = response.text().await.map_err(http_error)?;
                if body.trim().is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(body))
                }
            }
            status => Err(TransportError::Status {
                status: status.as_u16(),
            }),
        }
    }
}

fn http_error(err: reqwest::Error) -> TransportError {
    TransportError::Http(err.to_string())
}
