//! Client side of a Galaxy service certification run.
//!
//! This crate talks to a deployed Ansible Galaxy (Pulp) instance over its REST
//! API: it probes health, authenticates with Basic auth, packages and uploads a
//! throwaway collection, polls the resulting import task, and resolves and
//! downloads collection versions. [`GalaxyService`] composes those pieces into
//! the `validate`, `upload`, `download` and `test` flows.

pub mod api;
pub mod config;
pub mod download;
pub mod health;
pub mod http;
pub mod package;
pub mod poller;
pub mod service;
pub mod upload;

#[cfg(test)]
pub(crate) mod fake;

pub use config::{PollSettings, ServiceEndpoint};
pub use download::{DownloadResult, VersionRecord};
pub use health::HealthReport;
pub use http::{HttpTransport, Method, RequestResult, ResponseBody};
pub use package::ArtifactDescriptor;
pub use poller::{ImportPoller, ImportState};
pub use service::{Action, ActionParams, GalaxyService, Outcome};
pub use upload::UploadResult;

use std::io::Write;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("{0}")]
    Auth(String),
    #[error("config error: {0}")]
    Config(String),
}

/// The request surface the flows need from an HTTP session.
///
/// Implementations attach credentials to every call and keep whatever session
/// state (cookies) the service hands out. Service-side failures are reported in
/// the returned [`RequestResult`], never as a panic or an `Err`.
pub trait Transport {
    /// Send a request, optionally with a JSON body, and decode the response.
    fn request(&self, method: Method, url: &str, body: Option<&serde_json::Value>)
        -> RequestResult;

    /// POST a raw, pre-encoded body with the given content type.
    fn send_bytes(&self, url: &str, content_type: &str, body: &[u8]) -> RequestResult;

    /// GET `url` and stream a successful body into `sink`. Returns bytes written.
    fn fetch_to(&self, url: &str, sink: &mut dyn Write) -> Result<u64, ClientError>;
}

/// Current Unix time in whole seconds.
pub(crate) fn epoch_seconds() -> i64 {
    chrono::Utc::now().timestamp()
}
