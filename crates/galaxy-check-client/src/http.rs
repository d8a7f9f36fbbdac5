use crate::{ClientError, ServiceEndpoint, Transport};
use base64::Engine;
use serde_json::Value;
use std::fmt;
use std::io::Write;
use std::time::Duration;
use tracing::{debug, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Method::Get => "GET",
            Method::Post => "POST",
        };
        f.write_str(name)
    }
}

/// Decoded response body: either JSON the service produced, or text that was
/// not JSON (including the message of a transport failure).
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(Value),
    Opaque(String),
}

/// Outcome of one HTTP exchange. `status == 0` means no HTTP response arrived.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestResult {
    pub status: u16,
    pub body: ResponseBody,
}

impl RequestResult {
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            body: ResponseBody::Json(body),
        }
    }

    pub fn transport_failure(message: impl Into<String>) -> Self {
        Self {
            status: 0,
            body: ResponseBody::Opaque(message.into()),
        }
    }

    /// Decode raw response bytes. Empty bodies decode to JSON `null`.
    pub fn decode(status: u16, bytes: &[u8]) -> Self {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Self::json(status, Value::Null);
        }
        match serde_json::from_slice(bytes) {
            Ok(value) => Self::json(status, value),
            Err(_) => Self {
                status,
                body: ResponseBody::Opaque(String::from_utf8_lossy(bytes).trim().to_owned()),
            },
        }
    }

    pub fn is_transport_failure(&self) -> bool {
        self.status == 0
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn body_json(&self) -> Option<&Value> {
        match &self.body {
            ResponseBody::Json(v) => Some(v),
            ResponseBody::Opaque(_) => None,
        }
    }

    /// Look up a top-level field of a JSON object body.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.body_json().and_then(|v| v.get(key))
    }

    /// Best human-readable description of a failed exchange.
    ///
    /// Checks, in order: an `error` string, the first `errors[].detail`, a
    /// `detail` string, the opaque text, and finally the bare status code.
    pub fn error_message(&self) -> String {
        match &self.body {
            ResponseBody::Json(v) => {
                if let Some(msg) = v.get("error").and_then(Value::as_str) {
                    return msg.to_owned();
                }
                if let Some(msg) = v
                    .get("errors")
                    .and_then(Value::as_array)
                    .and_then(|errs| errs.first())
                    .and_then(|e| e.get("detail"))
                    .and_then(Value::as_str)
                {
                    return msg.to_owned();
                }
                if let Some(msg) = v.get("detail").and_then(Value::as_str) {
                    return msg.to_owned();
                }
            }
            ResponseBody::Opaque(text) if !text.is_empty() => return text.clone(),
            ResponseBody::Opaque(_) => {}
        }
        format!("HTTP {}", self.status)
    }

    /// The body as JSON, wrapping opaque text as `{"error": text}`.
    pub fn to_value(&self) -> Value {
        match &self.body {
            ResponseBody::Json(v) => v.clone(),
            ResponseBody::Opaque(text) => serde_json::json!({ "error": text }),
        }
    }
}

/// `Authorization` header value for HTTP Basic auth.
pub fn basic_auth(username: &str, password: &str) -> String {
    let token = base64::engine::general_purpose::STANDARD.encode(format!("{username}:{password}"));
    format!("Basic {token}")
}

/// Blocking ureq session bound to one service endpoint.
///
/// The agent owns the cookie jar, so any session cookie the service sets is
/// replayed on every later call made through the same transport.
pub struct HttpTransport {
    agent: ureq::Agent,
    authorization: String,
}

impl HttpTransport {
    pub fn new(endpoint: &ServiceEndpoint) -> Self {
        if !endpoint.validate_certs {
            warn!("TLS certificate validation disabled for {}", endpoint.url);
        }
        let tls = ureq::tls::TlsConfig::builder()
            .disable_verification(!endpoint.validate_certs)
            .build();
        let config = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .tls_config(tls)
            .timeout_global(Some(REQUEST_TIMEOUT))
            .build();
        Self {
            agent: ureq::Agent::new_with_config(config),
            authorization: basic_auth(&endpoint.username, &endpoint.password),
        }
    }

    fn finish(
        url: &str,
        outcome: Result<ureq::http::Response<ureq::Body>, ureq::Error>,
    ) -> RequestResult {
        let mut resp = match outcome {
            Ok(r) => r,
            Err(e) => {
                warn!("request to {url} failed: {e}");
                return RequestResult::transport_failure(e.to_string());
            }
        };

        let status = resp.status().as_u16();
        debug!("{url} -> HTTP {status}");
        match resp.body_mut().read_to_vec() {
            Ok(bytes) => RequestResult::decode(status, &bytes),
            Err(e) => RequestResult {
                status,
                body: ResponseBody::Opaque(format!("failed to read response body: {e}")),
            },
        }
    }
}

impl Transport for HttpTransport {
    fn request(&self, method: Method, url: &str, body: Option<&Value>) -> RequestResult {
        debug!("{method} {url}");
        let outcome = match method {
            Method::Get => self
                .agent
                .get(url)
                .header("Authorization", &self.authorization)
                .call(),
            Method::Post => {
                let mut req = self
                    .agent
                    .post(url)
                    .header("Authorization", &self.authorization);
                let payload = match body {
                    Some(value) => {
                        req = req.header("Content-Type", "application/json");
                        match serde_json::to_vec(value) {
                            Ok(bytes) => bytes,
                            Err(e) => {
                                return RequestResult::transport_failure(format!(
                                    "cannot encode request body: {e}"
                                ));
                            }
                        }
                    }
                    None => Vec::new(),
                };
                req.send(&payload[..])
            }
        };
        Self::finish(url, outcome)
    }

    fn send_bytes(&self, url: &str, content_type: &str, body: &[u8]) -> RequestResult {
        debug!("POST {url} ({} bytes, {content_type})", body.len());
        let outcome = self
            .agent
            .post(url)
            .header("Authorization", &self.authorization)
            .header("Content-Type", content_type)
            .send(body);
        Self::finish(url, outcome)
    }

    fn fetch_to(&self, url: &str, sink: &mut dyn Write) -> Result<u64, ClientError> {
        debug!("GET {url} (stream)");
        let resp = self
            .agent
            .get(url)
            .header("Authorization", &self.authorization)
            .call()
            .map_err(|e| ClientError::Http(e.to_string()))?;

        let code = resp.status().as_u16();
        if !(200..300).contains(&code) {
            return Err(ClientError::Http(format!("HTTP {code} for {url}")));
        }

        let mut reader = resp.into_body().into_reader();
        let written = std::io::copy(&mut reader, sink)?;
        Ok(written)
    }
}
