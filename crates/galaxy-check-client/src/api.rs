//! URL construction for the Galaxy REST surface.
//!
//! All paths hang off `{base_url}/{api_prefix}/`:
//! - `GET  pulp/api/v3/status/`                          health
//! - `GET  v3/collections/`                              list collections
//! - `POST v3/collections/`                              multipart upload
//! - `GET  v3/imports/tasks/{task_id}/`                  import task state
//! - `GET  v3/collections/{namespace}/{name}/versions/`  version listing

use crate::ServiceEndpoint;

#[derive(Debug, Clone)]
pub struct ApiPaths {
    base_url: String,
    root: String,
}

impl ApiPaths {
    pub fn new(endpoint: &ServiceEndpoint) -> Self {
        let base_url = endpoint.url.trim_end_matches('/').to_owned();
        let prefix = endpoint.api_prefix.trim_matches('/');
        let root = if prefix.is_empty() {
            base_url.clone()
        } else {
            format!("{base_url}/{prefix}")
        };
        Self { base_url, root }
    }

    pub fn status(&self) -> String {
        format!("{}/pulp/api/v3/status/", self.root)
    }

    pub fn collections(&self) -> String {
        format!("{}/v3/collections/", self.root)
    }

    pub fn import_task(&self, task_id: &str) -> String {
        format!("{}/v3/imports/tasks/{task_id}/", self.root)
    }

    pub fn versions(&self, namespace: &str, name: &str) -> String {
        format!("{}/v3/collections/{namespace}/{name}/versions/", self.root)
    }

    /// Resolve a `download_url` from a version listing against the base URL.
    /// Absolute URLs pass through untouched.
    pub fn resolve(&self, href: &str) -> String {
        if href.starts_with("http://") || href.starts_with("https://") {
            href.to_owned()
        } else if href.starts_with('/') {
            format!("{}{href}", self.base_url)
        } else {
            format!("{}/{href}", self.base_url)
        }
    }
}
