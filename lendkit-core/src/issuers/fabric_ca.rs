use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{CredentialIssuer, Enrollment, RegistrationRequest};
use crate::config::{ConnectionProfile, Settings};
use crate::error::{LendKitError, LendKitResult};
use crate::http_request::{Request, TransportError};
use crate::identity::Identity;
use crate::signing::{request_token, KeyPair};

const ENROLL_PATH: &str = "/api/v1/enroll";
const REGISTER_PATH: &str = "/api/v1/register";

// Authority error codes.
const CODE_AUTHENTICATION_FAILURE: i64 = 20;
const CODE_ALREADY_REGISTERED: i64 = 74;

/// REST client for a Fabric-style certificate authority.
pub struct FabricCaClient {
    base_url: String,
    ca_name: Option<String>,
    admin_id: String,
    http: Request,
}

#[derive(Serialize)]
struct EnrollBody<'a> {
    certificate_request: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    caname: Option<&'a str>,
}

#[derive(Serialize)]
struct RegisterBody<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    role: String,
    affiliation: &'a str,
    max_enrollments: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    caname: Option<&'a str>,
}

/// Envelope every authority response is wrapped in.
#[derive(Deserialize, Debug)]
struct CaResponse<T> {
    #[serde(default)]
    success: bool,
    result: Option<T>,
    #[serde(default)]
    errors: Vec<CaMessage>,
}

#[derive(Deserialize, Debug)]
struct CaMessage {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize, Debug)]
struct EnrollResult {
    #[serde(rename = "Cert")]
    cert: String,
}

#[derive(Deserialize, Debug)]
struct RegisterResult {
    secret: String,
}

impl FabricCaClient {
    /// Builds a client for the authority named by `settings.certificate_authority`.
    ///
    /// # Errors
    ///
    /// Returns [`LendKitError::InvalidInput`] if the profile lacks the authority or
    /// its trusted roots are malformed.
    pub fn new(profile: &ConnectionProfile, settings: &Settings) -> LendKitResult<Self> {
        let entry = profile.certificate_authority(&settings.certificate_authority)?;
        let roots = entry
            .tls_ca_certs
            .as_ref()
            .map(crate::config::TlsCaCerts::pems)
            .unwrap_or_default();
        let http = Request::new(
            settings.authority_timeout,
            0,
            settings.require_https,
            &roots,
        )?;
        Ok(Self {
            base_url: entry.url.trim_end_matches('/').to_string(),
            ca_name: entry.ca_name.clone(),
            admin_id: settings.admin_id.clone(),
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn unreachable(err: TransportError) -> LendKitError {
        warn!(url = %err.url, error = %err.error, "certificate authority unreachable");
        LendKitError::AuthorityUnreachable {
            url: err.url,
            error: err.error,
        }
    }

    async fn read_envelope<T: DeserializeOwned>(
        &self,
        path: &str,
        response: reqwest::Response,
    ) -> LendKitResult<(StatusCode, CaResponse<T>)> {
        let status = response.status();
        let text = response.text().await.map_err(|e| LendKitError::AuthorityUnreachable {
            url: self.url(path),
            error: format!("failed to read response body: {e}"),
        })?;
        match serde_json::from_str::<CaResponse<T>>(&text) {
            Ok(envelope) => Ok((status, envelope)),
            Err(_) if !status.is_success() => Ok((
                status,
                CaResponse {
                    success: false,
                    result: None,
                    errors: vec![CaMessage {
                        code: 0,
                        message: text,
                    }],
                },
            )),
            Err(e) => Err(LendKitError::SerializationError {
                error: format!("Failed to parse authority response: {e}"),
            }),
        }
    }
}

fn joined_messages(errors: &[CaMessage]) -> String {
    errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

#[async_trait]
impl CredentialIssuer for FabricCaClient {
    async fn enroll(&self, id: &str, secret: &SecretString) -> LendKitResult<Enrollment> {
        let key = KeyPair::generate()?;
        let csr = key.certificate_request(id)?;
        let body = EnrollBody {
            certificate_request: &csr,
            caname: self.ca_name.as_deref(),
        };

        let request = self
            .http
            .post(&self.url(ENROLL_PATH))?
            .basic_auth(id, Some(secret.expose_secret()))
            .json(&body);
        let response = self
            .http
            .send_once(request)
            .await
            .map_err(Self::unreachable)?;
        let (status, envelope) = self
            .read_envelope::<EnrollResult>(ENROLL_PATH, response)
            .await?;

        let auth_failed = matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN)
            || envelope
                .errors
                .iter()
                .any(|e| e.code == CODE_AUTHENTICATION_FAILURE);
        if auth_failed {
            info!(identity = id, "authority rejected enrollment secret");
            return Err(LendKitError::InvalidSecret { id: id.to_string() });
        }
        if status.is_server_error() {
            return Err(LendKitError::AuthorityUnreachable {
                url: self.url(ENROLL_PATH),
                error: format!("status {status}: {}", joined_messages(&envelope.errors)),
            });
        }
        let result = match envelope.result {
            Some(result) if status.is_success() && envelope.success => result,
            _ => {
                return Err(LendKitError::invalid_input(
                    "enrollment",
                    joined_messages(&envelope.errors),
                ))
            }
        };

        let certificate = STANDARD.decode(result.cert.as_bytes()).map_err(|e| {
            LendKitError::SerializationError {
                error: format!("certificate is not base64: {e}"),
            }
        })?;
        let certificate =
            String::from_utf8(certificate).map_err(|e| LendKitError::SerializationError {
                error: format!("certificate is not PEM text: {e}"),
            })?;

        debug!(identity = id, "enrollment certificate issued");
        Ok(Enrollment {
            certificate,
            private_key: key.private_key_pem()?,
        })
    }

    async fn register(
        &self,
        registrar: &Identity,
        request: &RegistrationRequest<'_>,
    ) -> LendKitResult<SecretString> {
        if registrar.id() != self.admin_id {
            return Err(LendKitError::UnauthorizedRegistrar {
                id: registrar.id().to_string(),
            });
        }

        let body = serde_json::to_vec(&RegisterBody {
            id: request.id,
            role: request.role.to_string(),
            affiliation: request.affiliation,
            max_enrollments: 1,
            caname: self.ca_name.as_deref(),
        })?;
        let token = request_token(registrar, "POST", REGISTER_PATH, &body)?;

        let http_request = self
            .http
            .post(&self.url(REGISTER_PATH))?
            .header(AUTHORIZATION, token)
            .header(CONTENT_TYPE, "application/json")
            .body(body);
        let response = self
            .http
            .send_once(http_request)
            .await
            .map_err(Self::unreachable)?;
        let (status, envelope) = self
            .read_envelope::<RegisterResult>(REGISTER_PATH, response)
            .await?;

        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Err(LendKitError::UnauthorizedRegistrar {
                id: registrar.id().to_string(),
            });
        }
        let duplicate = envelope.errors.iter().any(|e| {
            e.code == CODE_ALREADY_REGISTERED || e.message.contains("already registered")
        });
        if duplicate {
            return Err(LendKitError::DuplicateRegistration {
                id: request.id.to_string(),
            });
        }
        if status.is_server_error() {
            return Err(LendKitError::AuthorityUnreachable {
                url: self.url(REGISTER_PATH),
                error: format!("status {status}: {}", joined_messages(&envelope.errors)),
            });
        }
        match envelope.result {
            Some(result) if status.is_success() && envelope.success => {
                info!(identity = request.id, role = %request.role, "registered identity with authority");
                Ok(SecretString::from(result.secret))
            }
            _ => Err(LendKitError::invalid_input(
                "registration",
                joined_messages(&envelope.errors),
            )),
        }
    }
}

#[cfg(test)]
impl FabricCaClient {
    /// Creates a client against a plain-HTTP base URL (for testing).
    fn with_base_url(base_url: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            ca_name: Some("ca-org1".to_string()),
            admin_id: "admin".to_string(),
            http: Request::new(std::time::Duration::from_secs(2), 0, false, &[])
                .expect("client builds"),
        }
    }
}
