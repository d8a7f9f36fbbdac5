use crate::api::ApiPaths;
use crate::config::PollSettings;
use crate::download::{self, DownloadResult};
use crate::health::{self, HealthReport};
use crate::upload::{self, UploadResult};
use crate::{ClientError, HttpTransport, Method, ServiceEndpoint, Transport};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Validate,
    Upload,
    Download,
    Test,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::Validate => "validate",
            Action::Upload => "upload",
            Action::Download => "download",
            Action::Test => "test",
        };
        f.write_str(name)
    }
}

/// Per-action inputs. Only `download` requires anything.
#[derive(Debug, Clone, Default)]
pub struct ActionParams {
    pub collection_name: Option<String>,
    pub collection_version: Option<String>,
    pub src: Option<PathBuf>,
    pub dest: Option<PathBuf>,
}

/// Result of one flow: a verdict, a message, and whatever was gathered.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Outcome {
    pub ok: bool,
    pub changed: bool,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_connected: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redis_connected: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub components: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collections_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_result: Option<UploadResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_result: Option<DownloadResult>,
}

impl Outcome {
    fn failed(msg: impl Into<String>) -> Self {
        Self {
            msg: msg.into(),
            ..Self::default()
        }
    }

    fn succeed(mut self, msg: impl Into<String>) -> Self {
        self.ok = true;
        self.msg = msg.into();
        self
    }

    fn fail(mut self, msg: impl Into<String>) -> Self {
        self.ok = false;
        self.msg = msg.into();
        self
    }

    /// Copy the probe fields. The collection count is reported by `validate` only.
    fn record_health(&mut self, report: HealthReport) {
        self.api_status = Some(report.api_status);
        self.database_connected = Some(report.database_connected);
        self.redis_connected = Some(report.redis_connected);
        self.components = Some(report.components);
    }
}

/// Reject parameter combinations before touching the network.
pub fn validate_params(action: Action, params: &ActionParams) -> Result<(), ClientError> {
    if action == Action::Download {
        let name = params.collection_name.as_deref().ok_or_else(|| {
            ClientError::InvalidInput("collection name is required for download".to_owned())
        })?;
        download::parse_collection_name(name)?;
    }
    Ok(())
}

/// One certification session against one service endpoint.
pub struct GalaxyService<T: Transport = HttpTransport> {
    transport: T,
    paths: ApiPaths,
    poll: PollSettings,
    auth_message: Option<String>,
}

impl GalaxyService<HttpTransport> {
    pub fn connect(endpoint: &ServiceEndpoint, poll: PollSettings) -> Self {
        Self::with_transport(HttpTransport::new(endpoint), endpoint, poll)
    }
}

impl<T: Transport> GalaxyService<T> {
    pub fn with_transport(transport: T, endpoint: &ServiceEndpoint, poll: PollSettings) -> Self {
        Self {
            transport,
            paths: ApiPaths::new(endpoint),
            poll,
            auth_message: None,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn paths(&self) -> &ApiPaths {
        &self.paths
    }

    /// Verify the credentials against the collection listing. Runs at most
    /// once per session; later calls return the first success.
    pub fn authenticate(&mut self) -> Result<&str, ClientError> {
        if self.auth_message.is_none() {
            let result = self
                .transport
                .request(Method::Get, &self.paths.collections(), None);
            let message = match result.status {
                200 => "Authentication successful (Basic Auth)".to_owned(),
                0 => {
                    return Err(ClientError::Auth(format!(
                        "Authentication failed: {}",
                        result.error_message()
                    )))
                }
                code => {
                    return Err(ClientError::Auth(format!(
                        "Authentication failed: HTTP {code}"
                    )))
                }
            };
            info!("{message}");
            self.auth_message = Some(message);
        }
        Ok(self.auth_message.as_deref().unwrap_or_default())
    }

    pub fn check_status(&self) -> HealthReport {
        health::check_status(&self.transport, &self.paths)
    }

    pub fn upload(&self, src: Option<&Path>) -> Result<UploadResult, ClientError> {
        upload::upload(&self.transport, &self.paths, src, self.poll)
    }

    pub fn download(
        &self,
        name: &str,
        version: Option<&str>,
        dest: Option<&Path>,
    ) -> DownloadResult {
        download::download(&self.transport, &self.paths, name, version, dest)
    }

    /// Validate parameters, authenticate, then run `action` to completion.
    pub fn run(&mut self, action: Action, params: &ActionParams) -> Outcome {
        if let Err(e) = validate_params(action, params) {
            return Outcome::failed(e.to_string());
        }
        if let Err(e) = self.authenticate() {
            return Outcome::failed(e.to_string());
        }

        info!("running {action}");
        match action {
            Action::Validate => self.run_validate(),
            Action::Upload => self.run_upload(params.src.as_deref()),
            Action::Download => self.run_download(params),
            Action::Test => self.run_test(),
        }
    }

    fn run_validate(&self) -> Outcome {
        let report = self.check_status();
        let (status, database) = (report.api_status, report.database_connected);
        let mut outcome = Outcome {
            collections_count: Some(report.collections_count),
            ..Outcome::default()
        };
        outcome.record_health(report);

        if status != 200 {
            outcome.fail(format!("Galaxy API returned status: {status}"))
        } else if database {
            outcome.succeed("Galaxy service is healthy")
        } else {
            outcome.fail("Galaxy service has issues - database not connected")
        }
    }

    fn run_upload(&self, src: Option<&Path>) -> Outcome {
        let mut outcome = Outcome {
            changed: true,
            ..Outcome::default()
        };
        let result = match self.upload(src) {
            Ok(r) => r,
            Err(e) => return outcome.fail(format!("Upload failed: {e}")),
        };

        let verdict = if let Some(error) = &result.error {
            Err(format!("Upload failed: {error}"))
        } else if result.imported() {
            Ok("Collection uploaded and imported successfully".to_owned())
        } else {
            Ok(format!(
                "Collection uploaded (import status: {})",
                result.import_status_str()
            ))
        };
        outcome.upload_result = Some(result);
        match verdict {
            Ok(msg) => outcome.succeed(msg),
            Err(msg) => outcome.fail(msg),
        }
    }

    fn run_download(&self, params: &ActionParams) -> Outcome {
        let mut outcome = Outcome {
            changed: true,
            ..Outcome::default()
        };
        let result = self.download(
            params.collection_name.as_deref().unwrap_or_default(),
            params.collection_version.as_deref(),
            params.dest.as_deref(),
        );
        let error = result.error.clone();
        outcome.download_result = Some(result);
        match error {
            Some(e) => outcome.fail(format!("Download failed: {e}")),
            None => outcome.succeed("Collection downloaded successfully"),
        }
    }

    fn run_test(&self) -> Outcome {
        let report = self.check_status();
        let (status, database) = (report.api_status, report.database_connected);
        let mut outcome = Outcome::default();
        outcome.record_health(report);
        if status != 200 {
            return outcome.fail("API status check failed");
        }

        let result = match self.upload(None) {
            Ok(r) => r,
            Err(e) => return outcome.fail(format!("Upload failed: {e}")),
        };
        let error = result.error.clone();
        let imported = result.imported();
        outcome.upload_result = Some(result);
        if let Some(e) = error {
            return outcome.fail(format!("Upload failed: {e}"));
        }

        if database && imported {
            outcome.succeed("Galaxy service validation complete")
        } else {
            outcome.fail("Validation issues detected")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::ScriptedTransport;
    use crate::{ImportState, RequestResult};
    use serde_json::{json, Value};
    use std::time::Duration;

    fn endpoint() -> ServiceEndpoint {
        ServiceEndpoint::new("http://galaxy.test", "admin", "admin")
    }

    fn paths() -> ApiPaths {
        ApiPaths::new(&endpoint())
    }

    fn fast() -> PollSettings {
        PollSettings {
            interval: Duration::from_millis(10),
            timeout: Duration::from_millis(500),
        }
    }

    fn status_body(database: bool) -> Value {
        json!({
            "database_connection": {"connected": database},
            "redis_connection": {"connected": true},
            "versions": [{"component": "galaxy", "version": "4.9.0"}]
        })
    }

    fn service(t: ScriptedTransport) -> GalaxyService<ScriptedTransport> {
        GalaxyService::with_transport(t, &endpoint(), fast())
    }

    fn healthy(database: bool) -> ScriptedTransport {
        let p = paths();
        ScriptedTransport::new()
            .reply(&p.collections(), 200, json!({"results": [{}, {}]}))
            .reply(&p.status(), 200, status_body(database))
    }

    #[test]
    fn validate_healthy_service() {
        let mut svc = service(healthy(true));
        let outcome = svc.run(Action::Validate, &ActionParams::default());
        assert!(outcome.ok, "{}", outcome.msg);
        assert_eq!(outcome.msg, "Galaxy service is healthy");
        assert_eq!(outcome.api_status, Some(200));
        assert_eq!(outcome.database_connected, Some(true));
        assert_eq!(outcome.redis_connected, Some(true));
        assert_eq!(outcome.collections_count, Some(2));
        assert_eq!(outcome.components.unwrap()["galaxy"], "4.9.0");
        assert!(!outcome.changed);
    }

    #[test]
    fn validate_fails_without_database() {
        let mut svc = service(healthy(false));
        let outcome = svc.run(Action::Validate, &ActionParams::default());
        assert!(!outcome.ok);
        assert_eq!(
            outcome.msg,
            "Galaxy service has issues - database not connected"
        );
        assert_eq!(outcome.api_status, Some(200));
    }

    #[test]
    fn validate_fails_on_bad_status() {
        let p = paths();
        let t = ScriptedTransport::new()
            .reply(&p.collections(), 200, json!({"results": []}))
            .reply(&p.status(), 503, json!({}));
        let outcome = service(t).run(Action::Validate, &ActionParams::default());
        assert!(!outcome.ok);
        assert_eq!(outcome.msg, "Galaxy API returned status: 503");
        assert_eq!(outcome.collections_count, Some(0));
    }

    #[test]
    fn rejected_credentials_stop_the_flow() {
        let p = paths();
        let t = ScriptedTransport::new()
            .reply(&p.collections(), 401, json!({"detail": "Invalid username/password."}));
        let mut svc = service(t);
        let outcome = svc.run(Action::Validate, &ActionParams::default());
        assert!(!outcome.ok);
        assert_eq!(outcome.msg, "Authentication failed: HTTP 401");
        assert_eq!(svc.transport().calls().len(), 1);
        assert!(outcome.api_status.is_none());
    }

    #[test]
    fn unreachable_service_fails_authentication() {
        let p = paths();
        let t = ScriptedTransport::new().push(
            &p.collections(),
            RequestResult::transport_failure("Connection refused"),
        );
        let outcome = service(t).run(Action::Test, &ActionParams::default());
        assert!(!outcome.ok);
        assert_eq!(outcome.msg, "Authentication failed: Connection refused");
    }

    #[test]
    fn authenticate_runs_once() {
        let p = paths();
        let mut svc = service(healthy(true));
        assert_eq!(
            svc.authenticate().unwrap(),
            "Authentication successful (Basic Auth)"
        );
        svc.authenticate().unwrap();
        assert_eq!(svc.transport().calls_to(&p.collections()), 1);
    }

    #[test]
    fn download_without_name_never_touches_network() {
        let mut svc = service(healthy(true));
        let outcome = svc.run(Action::Download, &ActionParams::default());
        assert!(!outcome.ok);
        assert!(outcome.msg.contains("collection name is required"));
        assert!(svc.transport().calls().is_empty());

        let params = ActionParams {
            collection_name: Some("not-qualified".to_owned()),
            ..ActionParams::default()
        };
        let outcome = svc.run(Action::Download, &params);
        assert!(outcome.msg.contains("namespace.name"));
        assert!(svc.transport().calls().is_empty());
    }

    #[test]
    fn download_reports_missing_version() {
        let p = paths();
        let t = healthy(true).reply(
            &p.versions("community", "zabbix"),
            200,
            json!({"results": [{"version": "2.0.0", "download_url": "/d/x.tar.gz"}]}),
        );
        let params = ActionParams {
            collection_name: Some("community.zabbix".to_owned()),
            collection_version: Some("9.9.9".to_owned()),
            ..ActionParams::default()
        };
        let outcome = service(t).run(Action::Download, &params);
        assert!(!outcome.ok);
        assert!(outcome.changed);
        assert_eq!(outcome.msg, "Download failed: Version 9.9.9 not found");
        assert!(outcome.download_result.is_some());
    }

    #[test]
    fn upload_flow_reports_import_status() {
        let p = paths();
        let t = ScriptedTransport::new()
            .reply(&p.collections(), 200, json!({"results": []}))
            .push(&p.collections(), RequestResult::json(202, json!({"task": "t-1"})))
            .reply(&p.import_task("t-1"), 200, json!({"state": "failed"}));
        let outcome = service(t).run(Action::Upload, &ActionParams::default());
        assert!(outcome.ok, "accepted upload is reported even if import failed");
        assert!(outcome.changed);
        assert_eq!(outcome.msg, "Collection uploaded (import status: failed)");
        assert_eq!(
            outcome.upload_result.unwrap().import_status,
            Some(ImportState::Failed)
        );
    }

    #[test]
    fn upload_flow_fails_on_service_error() {
        let p = paths();
        let t = ScriptedTransport::new()
            .reply(&p.collections(), 200, json!({"results": []}))
            .reply(&p.collections(), 413, json!({"error": "too large"}));
        let outcome = service(t).run(Action::Upload, &ActionParams::default());
        assert!(!outcome.ok);
        assert_eq!(outcome.msg, "Upload failed: too large");
    }

    #[test]
    fn upload_flow_fails_on_missing_source() {
        let t = healthy(true);
        let params = ActionParams {
            src: Some(PathBuf::from("/definitely/not/here.tar.gz")),
            ..ActionParams::default()
        };
        let outcome = service(t).run(Action::Upload, &params);
        assert!(!outcome.ok);
        assert!(outcome.msg.starts_with("Upload failed: I/O error"));
    }

    #[test]
    fn test_flow_succeeds_end_to_end() {
        let p = paths();
        let t = ScriptedTransport::new()
            .reply(&p.collections(), 200, json!({"results": []}))
            .reply(&p.collections(), 200, json!({"results": []}))
            .push(&p.collections(), RequestResult::json(202, json!({"task": "abc"})))
            .reply(&p.status(), 200, status_body(true))
            .reply(&p.import_task("abc"), 200, json!({"state": "waiting"}))
            .reply(&p.import_task("abc"), 200, json!({"state": "success"}));
        let outcome = service(t).run(Action::Test, &ActionParams::default());
        assert!(outcome.ok, "{}", outcome.msg);
        assert_eq!(outcome.msg, "Galaxy service validation complete");
        let upload = outcome.upload_result.unwrap();
        assert_eq!(upload.import_status, Some(ImportState::Success));
        assert!(upload.collection.starts_with("validate_test_"));
        assert_eq!(outcome.api_status, Some(200));
        assert_eq!(outcome.database_connected, Some(true));
        assert_eq!(outcome.collections_count, None);
    }

    #[test]
    fn test_flow_flags_import_timeout() {
        let p = paths();
        let t = ScriptedTransport::new()
            .reply(&p.collections(), 200, json!({"results": []}))
            .reply(&p.collections(), 200, json!({"results": []}))
            .push(&p.collections(), RequestResult::json(202, json!({"task": "abc"})))
            .reply(&p.status(), 200, status_body(true))
            .reply(&p.import_task("abc"), 200, json!({"state": "running"}));
        let outcome = service(t).run(Action::Test, &ActionParams::default());
        assert!(!outcome.ok);
        assert_eq!(outcome.msg, "Validation issues detected");
        assert_eq!(
            outcome.upload_result.unwrap().import_status,
            Some(ImportState::Timeout)
        );
    }

    #[test]
    fn test_flow_aborts_on_status_failure() {
        let p = paths();
        let t = ScriptedTransport::new()
            .reply(&p.collections(), 200, json!({"results": []}))
            .reply(&p.status(), 500, json!({}));
        let mut svc = service(t);
        let outcome = svc.run(Action::Test, &ActionParams::default());
        assert!(!outcome.ok);
        assert_eq!(outcome.msg, "API status check failed");
        assert!(outcome.upload_result.is_none());
        assert!(svc.transport().uploads().is_empty());
    }

    #[test]
    fn outcome_json_omits_absent_sections() {
        let outcome = Outcome::failed("nope");
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value, json!({"ok": false, "changed": false, "msg": "nope"}));
    }

    #[test]
    fn action_names() {
        assert_eq!(Action::Download.to_string(), "download");
        assert_eq!(
            serde_json::from_value::<Action>(json!("test")).unwrap(),
            Action::Test
        );
    }
}
