//! GraphQL over HTTP.
//!
//! Each query or mutation is one `POST` of the standard JSON envelope to the
//! API URL. The response `data` is returned as-is; GraphQL `errors` are
//! logged and turned into [`TransportError::GraphQl`].

use std::time::Duration;

use serde_json::Value;

use taskdeck_proto::operation::{GraphQlRequest, GraphQlResponse};

use super::{RequestChannel, TransportError, log_graphql_errors};

/// Default whole-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Request/response channel over HTTP `POST`.
#[derive(Debug, Clone)]
pub struct HttpChannel {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpChannel {
    /// Creates a channel posting to `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Network`] if the HTTP client cannot be built.
    pub fn new(
        endpoint: impl Into<String>,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .user_agent(concat!("taskdeck/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::Network(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    /// The URL requests are posted to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn map_send_error(&self, e: &reqwest::Error) -> TransportError {
        if e.is_timeout() {
            tracing::warn!(url = %self.endpoint, "request timed out");
            TransportError::Timeout
        } else if e.is_connect() {
            tracing::warn!(url = %self.endpoint, err = %e, "API unreachable");
            TransportError::Unreachable(self.endpoint.clone())
        } else {
            tracing::warn!(url = %self.endpoint, err = %e, "request failed");
            TransportError::Network(e.to_string())
        }
    }
}

impl RequestChannel for HttpChannel {
    async fn execute(
        &self,
        request: &GraphQlRequest,
        token: Option<&str>,
    ) -> Result<Value, TransportError> {
        let mut builder = self.client.post(&self.endpoint).json(request);
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await.map_err(|e| self.map_send_error(&e))?;
        let status = response.status();
        let body = response.bytes().await.map_err(|e| self.map_send_error(&e))?;

        // GraphQL servers may answer errors with 4xx and a JSON body; prefer
        // the body when it parses.
        let parsed: Result<GraphQlResponse, _> = serde_json::from_slice(&body);
        let envelope = match parsed {
            Ok(envelope) => envelope,
            Err(_) if !status.is_success() => {
                tracing::warn!(op = request.name(), status = status.as_u16(), "HTTP error");
                return Err(TransportError::Http {
                    status: status.as_u16(),
                });
            }
            Err(e) => {
                tracing::warn!(op = request.name(), err = %e, "malformed response body");
                return Err(TransportError::Codec(e.into()));
            }
        };

        if !envelope.errors.is_empty() {
            log_graphql_errors(request.name(), &envelope.errors);
            return Err(TransportError::GraphQl(envelope.errors));
        }
        if !status.is_success() {
            tracing::warn!(op = request.name(), status = status.as_u16(), "HTTP error");
            return Err(TransportError::Http {
                status: status.as_u16(),
            });
        }
        envelope.data.ok_or_else(|| {
            tracing::warn!(op = request.name(), "response has neither data nor errors");
            TransportError::Codec(taskdeck_proto::codec::CodecError::MissingField("data"))
        })
    }
}
