use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use reqwest::{Certificate, Method, RequestBuilder, Response};

use crate::error::{LendKitError, LendKitResult};

/// A thin wrapper on an HTTP client. Sets timeouts, user-agent, trusted roots
/// and HTTPS enforcement, and retries idempotent requests on transient failures.
///
/// Non-idempotent requests go through [`Request::send_once`] and are never retried.
#[derive(Clone)]
pub(crate) struct Request {
    client: reqwest::Client,
    timeout: Duration,
    max_retries: u32,
    require_https: bool,
}

impl Request {
    /// Builds a client trusting the given PEM roots in addition to the system store.
    pub(crate) fn new(
        timeout: Duration,
        max_retries: u32,
        require_https: bool,
        trusted_roots: &[&str],
    ) -> LendKitResult<Self> {
        let mut builder = reqwest::Client::builder()
            .user_agent(format!("lendkit-core/{}", env!("CARGO_PKG_VERSION")))
            .https_only(require_https);
        for pem in trusted_roots {
            let certs = Certificate::from_pem_bundle(pem.as_bytes()).map_err(|e| {
                LendKitError::invalid_input("tlsCACerts", format!("invalid PEM bundle: {e}"))
            })?;
            for cert in certs {
                builder = builder.add_root_certificate(cert);
            }
        }
        let client = builder.build().map_err(|e| {
            LendKitError::invalid_input("http_client", format!("cannot build client: {e}"))
        })?;
        Ok(Self {
            client,
            timeout,
            max_retries,
            require_https,
        })
    }

    /// Creates a request builder with defaults applied.
    pub(crate) fn req(&self, method: Method, url: &str) -> LendKitResult<RequestBuilder> {
        if self.require_https && !url.starts_with("https://") {
            return Err(LendKitError::invalid_input(
                "url",
                format!("{url} is not an https endpoint"),
            ));
        }
        Ok(self.client.request(method, url).timeout(self.timeout))
    }

    /// Creates a GET request builder with defaults applied.
    #[allow(dead_code)]
    pub(crate) fn get(&self, url: &str) -> LendKitResult<RequestBuilder> {
        self.req(Method::GET, url)
    }

    /// Creates a POST request builder with defaults applied.
    pub(crate) fn post(&self, url: &str) -> LendKitResult<RequestBuilder> {
        self.req(Method::POST, url)
    }

    /// Sends a request exactly once. Any HTTP status is returned as a response.
    pub(crate) async fn send_once(
        &self,
        request_builder: RequestBuilder,
    ) -> Result<Response, TransportError> {
        let (client, request) = request_builder.build_split();
        let request = request.map_err(|err| TransportError::from_reqwest(&err, "<unknown>"))?;
        let url = request.url().to_string();
        client
            .execute(request)
            .await
            .map_err(|err| TransportError::from_reqwest(&err, &url))
    }

    /// Sends an idempotent request, retrying connect failures, timeouts, 429 and 5xx.
    pub(crate) async fn send_idempotent(
        &self,
        request_builder: RequestBuilder,
    ) -> Result<Response, TransportError> {
        let Some(template) = request_builder.try_clone() else {
            return self.send_once(request_builder).await;
        };

        let backoff = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(200))
            .with_max_delay(Duration::from_secs(2))
            .with_max_times(self.max_retries as usize);

        (|| async {
            let request_builder = template.try_clone().ok_or_else(|| TransportError {
                url: "<unknown>".to_string(),
                status: None,
                error: "request cannot be retried because it is not cloneable".to_string(),
                kind: TransportErrorKind::Other,
            })?;
            let response = self.send_once(request_builder).await?;
            let status = response.status().as_u16();
            if status == 429 || (500..600).contains(&status) {
                return Err(TransportError {
                    url: response.url().to_string(),
                    status: Some(status),
                    error: format!("request error with bad status code {status}"),
                    kind: TransportErrorKind::Status,
                });
            }
            Ok(response)
        })
        .retry(backoff)
        .when(TransportError::is_retryable)
        .await
    }
}

/// Where a transport failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransportErrorKind {
    /// Nothing reached the server.
    Connect,
    /// The request was sent but no answer arrived in time.
    Timeout,
    /// The server answered with a retryable status.
    Status,
    /// Anything else (malformed request, broken body, TLS policy).
    Other,
}

#[derive(Debug)]
pub(crate) struct TransportError {
    pub(crate) url: String,
    pub(crate) status: Option<u16>,
    pub(crate) error: String,
    pub(crate) kind: TransportErrorKind,
}

impl TransportError {
    fn from_reqwest(err: &reqwest::Error, url: &str) -> Self {
        let kind = if err.is_connect() {
            TransportErrorKind::Connect
        } else if err.is_timeout() {
            TransportErrorKind::Timeout
        } else {
            TransportErrorKind::Other
        };
        Self {
            url: err
                .url()
                .map_or_else(|| url.to_string(), ToString::to_string),
            status: err.status().map(|s| s.as_u16()),
            error: format!("request failed: {err}"),
            kind,
        }
    }

    fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            TransportErrorKind::Connect | TransportErrorKind::Timeout | TransportErrorKind::Status
        )
    }
}
