use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{check_name, Channel, LedgerGateway, LedgerSession};
use crate::config::{ConnectionProfile, Settings, TlsCaCerts};
use crate::error::{LendKitError, LendKitResult};
use crate::http_request::{Request, TransportError, TransportErrorKind};
use crate::identity::Identity;
use crate::signing::request_token;

const DISCOVERY_PATH: &str = "/api/v1/discovery";
const MSP_HEADER: &str = "X-Msp-Id";
const SUBMIT: &str = "submit";
const EVALUATE: &str = "evaluate";

/// Ledger gateway reached over HTTPS.
///
/// Every request is signed by the session identity (see [`request_token`]).
pub struct RestGateway {
    base_url: String,
    trusted_roots: Vec<String>,
    timeout: Duration,
    read_retries: u32,
    require_https: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct Discovery {
    channels: BTreeMap<String, ChannelTopology>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChannelTopology {
    #[serde(default)]
    peers: Vec<String>,
    #[serde(default)]
    contracts: Vec<String>,
}

#[derive(Serialize)]
struct InvokeBody<'a> {
    function: &'a str,
    args: &'a [String],
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InvokeResponse {
    #[serde(default)]
    transaction_id: Option<String>,
    #[serde(default)]
    result: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

impl RestGateway {
    /// Builds a gateway client from the profile's `gateway` entry.
    ///
    /// # Errors
    ///
    /// Returns [`LendKitError::InvalidInput`] if the profile has no gateway.
    pub fn new(profile: &ConnectionProfile, settings: &Settings) -> LendKitResult<Self> {
        let entry = profile.gateway()?;
        let trusted_roots = entry
            .tls_ca_certs
            .as_ref()
            .map(TlsCaCerts::pems)
            .unwrap_or_default()
            .into_iter()
            .map(ToString::to_string)
            .collect();
        Ok(Self {
            base_url: entry.url.trim_end_matches('/').to_string(),
            trusted_roots,
            timeout: settings.ledger_timeout,
            read_retries: settings.read_retries,
            require_https: settings.require_https,
        })
    }

    fn http(&self) -> LendKitResult<Request> {
        let roots: Vec<&str> = self.trusted_roots.iter().map(String::as_str).collect();
        Request::new(self.timeout, self.read_retries, self.require_https, &roots)
    }
}

#[async_trait]
impl LedgerGateway for RestGateway {
    async fn open(&self, identity: &Identity) -> LendKitResult<Box<dyn LedgerSession>> {
        let session = RestSession {
            base_url: self.base_url.clone(),
            identity: identity.clone(),
            topology: BTreeMap::new(),
            http: Mutex::new(Some(self.http()?)),
        };

        let http = session.client()?;
        let request = session.signed(&http, Method::GET, DISCOVERY_PATH, Vec::new())?;
        let response = http
            .send_idempotent(request)
            .await
            .map_err(|err| discovery_transport_error(&err))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LendKitError::DiscoveryFailed {
                channel: "*".to_string(),
                reason: format!("discovery answered {status}"),
            });
        }
        let discovery: Discovery =
            response
                .json()
                .await
                .map_err(|e| LendKitError::DiscoveryFailed {
                    channel: "*".to_string(),
                    reason: format!("malformed topology: {e}"),
                })?;

        info!(
            identity = identity.id(),
            channels = discovery.channels.len(),
            "ledger session opened"
        );
        Ok(Box::new(RestSession {
            topology: discovery.channels,
            ..session
        }))
    }
}

fn discovery_transport_error(err: &TransportError) -> LendKitError {
    warn!(url = %err.url, error = %err.error, "ledger discovery failed");
    match (err.kind, err.status) {
        (TransportErrorKind::Status, Some(status)) if !matches!(status, 502..=504) => {
            LendKitError::DiscoveryFailed {
                channel: "*".to_string(),
                reason: format!("discovery answered {status}"),
            }
        }
        _ => LendKitError::NetworkUnreachable {
            url: err.url.clone(),
            error: err.error.clone(),
        },
    }
}

struct RestSession {
    base_url: String,
    identity: Identity,
    topology: BTreeMap<String, ChannelTopology>,
    // Dropped on close, releasing the connection pool.
    http: Mutex<Option<Request>>,
}

impl RestSession {
    fn client(&self) -> LendKitResult<Request> {
        self.http
            .lock()
            .ok()
            .and_then(|slot| slot.clone())
            .ok_or_else(|| LendKitError::NetworkUnreachable {
                url: self.base_url.clone(),
                error: "session is closed".to_string(),
            })
    }

    fn signed(
        &self,
        http: &Request,
        method: Method,
        path: &str,
        body: Vec<u8>,
    ) -> LendKitResult<RequestBuilder> {
        let token = request_token(&self.identity, method.as_str(), path, &body)?;
        Ok(http
            .req(method, &format!("{}{path}", self.base_url))?
            .header(AUTHORIZATION, token)
            .header(MSP_HEADER, self.identity.msp_id())
            .header(CONTENT_TYPE, "application/json")
            .body(body))
    }

    fn invoke_request(
        &self,
        http: &Request,
        channel: &Channel,
        contract: &str,
        mode: &str,
        function: &str,
        args: &[String],
    ) -> LendKitResult<RequestBuilder> {
        check_name("contract", contract)?;
        let path = format!(
            "/api/v1/channels/{}/contracts/{contract}/{mode}",
            channel.name()
        );
        let body = serde_json::to_vec(&InvokeBody { function, args })?;
        self.signed(http, Method::POST, &path, body)
    }

    async fn read_result(
        &self,
        mode: &str,
        function: &str,
        response: Response,
    ) -> LendKitResult<Vec<u8>> {
        let status = response.status();
        let text = response.text().await.map_err(|e| {
            warn!(function, mode, error = %e, "failed to read ledger response body");
            // A submit that was answered has been dispatched; its effect is unknown.
            if mode == SUBMIT {
                LendKitError::OutcomeUnknown {
                    operation: function.to_string(),
                }
            } else {
                LendKitError::NetworkUnreachable {
                    url: self.base_url.clone(),
                    error: format!("failed to read response body: {e}"),
                }
            }
        })?;

        if !status.is_success() {
            let reason = serde_json::from_str::<ErrorBody>(&text)
                .ok()
                .map(|body| body.error.message);
            info!(function, %status, reason = reason.as_deref().unwrap_or(""), "ledger rejected invocation");
            return Err(LendKitError::TransactionRejected { reason });
        }

        let parsed: InvokeResponse = serde_json::from_str(&text)?;
        if let Some(tx_id) = &parsed.transaction_id {
            debug!(function, tx_id, "transaction committed");
        }
        match parsed.result.as_deref() {
            None | Some("") => Ok(Vec::new()),
            Some(encoded) => STANDARD
                .decode(encoded)
                .map_err(|e| LendKitError::SerializationError {
                    error: format!("result is not base64: {e}"),
                }),
        }
    }
}

#[async_trait]
impl LedgerSession for RestSession {
    fn network(&self, channel: &str) -> LendKitResult<Channel> {
        check_name("channel", channel)?;
        let topology = self
            .topology
            .get(channel)
            .ok_or_else(|| LendKitError::DiscoveryFailed {
                channel: channel.to_string(),
                reason: "channel not found in discovered topology".to_string(),
            })?;
        if topology.peers.is_empty() {
            return Err(LendKitError::DiscoveryFailed {
                channel: channel.to_string(),
                reason: "no peers serve the channel".to_string(),
            });
        }
        Ok(Channel::new(
            channel.to_string(),
            topology.peers.clone(),
            topology.contracts.clone(),
        ))
    }

    async fn submit(
        &self,
        channel: &Channel,
        contract: &str,
        function: &str,
        args: &[String],
    ) -> LendKitResult<Vec<u8>> {
        let http = self.client()?;
        let request = self.invoke_request(&http, channel, contract, SUBMIT, function, args)?;
        let response = http.send_once(request).await.map_err(|err| {
            warn!(url = %err.url, error = %err.error, function, "submit transport failure");
            if err.kind == TransportErrorKind::Timeout {
                LendKitError::OutcomeUnknown {
                    operation: function.to_string(),
                }
            } else {
                LendKitError::NetworkUnreachable {
                    url: err.url,
                    error: err.error,
                }
            }
        })?;

        match response.status() {
            StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE => {
                Err(LendKitError::NetworkUnreachable {
                    url: response.url().to_string(),
                    error: format!("gateway answered {}", response.status()),
                })
            }
            status if status.is_server_error() => {
                warn!(function, %status, "submit outcome unknown");
                Err(LendKitError::OutcomeUnknown {
                    operation: function.to_string(),
                })
            }
            _ => self.read_result(SUBMIT, function, response).await,
        }
    }

    async fn evaluate(
        &self,
        channel: &Channel,
        contract: &str,
        function: &str,
        args: &[String],
    ) -> LendKitResult<Vec<u8>> {
        let http = self.client()?;
        let request = self.invoke_request(&http, channel, contract, EVALUATE, function, args)?;
        let response = http.send_idempotent(request).await.map_err(|err| {
            warn!(url = %err.url, error = %err.error, function, "evaluate transport failure");
            LendKitError::NetworkUnreachable {
                url: err.url,
                error: err.error,
            }
        })?;
        self.read_result(EVALUATE, function, response).await
    }

    async fn close(&self) -> LendKitResult<()> {
        let released = self
            .http
            .lock()
            .map_err(|_| LendKitError::NetworkUnreachable {
                url: self.base_url.clone(),
                error: "session lock poisoned".to_string(),
            })?
            .take();
        if released.is_some() {
            debug!(identity = self.identity.id(), "ledger session closed");
        }
        Ok(())
    }
}

#[cfg(test)]
impl RestGateway {
    fn with_base_url(base_url: &str, timeout: Duration) -> Self {
        Self {
            base_url: base_url.to_string(),
            trusted_roots: Vec::new(),
            timeout,
            read_retries: 2,
            require_https: false,
        }
    }
}
