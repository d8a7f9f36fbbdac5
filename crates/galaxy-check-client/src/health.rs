use crate::api::ApiPaths;
use crate::{Method, Transport};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Snapshot of service health as reported by the Pulp status endpoint.
///
/// Only `api_status` is meaningful when it is not 200; every other field then
/// keeps its empty default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub api_status: u16,
    pub database_connected: bool,
    pub redis_connected: bool,
    pub components: BTreeMap<String, String>,
    pub collections_count: usize,
}

impl HealthReport {
    pub fn is_ok(&self) -> bool {
        self.api_status == 200
    }
}

fn connected(status: &Value, key: &str) -> bool {
    status
        .get(key)
        .and_then(|c| c.get("connected"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Probe the status endpoint, then count visible collections (best effort).
pub fn check_status(transport: &dyn Transport, paths: &ApiPaths) -> HealthReport {
    let result = transport.request(Method::Get, &paths.status(), None);
    let mut report = HealthReport {
        api_status: result.status,
        ..HealthReport::default()
    };
    if result.status != 200 {
        info!("status endpoint answered HTTP {}", result.status);
        return report;
    }

    let status = result.body_json().cloned().unwrap_or(Value::Null);
    report.database_connected = connected(&status, "database_connection");
    report.redis_connected = connected(&status, "redis_connection");

    if let Some(versions) = status.get("versions").and_then(Value::as_array) {
        for entry in versions {
            let component = entry.get("component").and_then(Value::as_str);
            let version = entry.get("version").and_then(Value::as_str);
            if let (Some(component), Some(version)) = (component, version) {
                report
                    .components
                    .insert(component.to_owned(), version.to_owned());
            }
        }
    }

    let listing = transport.request(Method::Get, &paths.collections(), None);
    if listing.status == 200 {
        report.collections_count = listing
            .field("results")
            .and_then(Value::as_array)
            .map_or(0, Vec::len);
    } else {
        debug!("collection listing answered HTTP {}; count left at 0", listing.status);
    }

    info!(
        "health: database={} redis={} components={} collections={}",
        report.database_connected,
        report.redis_connected,
        report.components.len(),
        report.collections_count
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::ScriptedTransport;
    use crate::{RequestResult, ServiceEndpoint};
    use serde_json::json;

    fn paths() -> ApiPaths {
        ApiPaths::new(&ServiceEndpoint::new("http://galaxy.test", "u", "p"))
    }

    fn healthy_status() -> Value {
        json!({
            "database_connection": {"connected": true},
            "redis_connection": {"connected": false},
            "versions": [
                {"component": "core", "version": "3.49.1", "package": "pulpcore"},
                {"component": "galaxy", "version": "4.9.0", "package": "galaxy-ng"}
            ]
        })
    }

    #[test]
    fn healthy_probe_reads_all_fields() {
        let p = paths();
        let t = ScriptedTransport::new()
            .reply(&p.status(), 200, healthy_status())
            .reply(
                &p.collections(),
                200,
                json!({"meta": {"count": 3}, "results": [{}, {}, {}]}),
            );

        let report = check_status(&t, &p);
        assert_eq!(report.api_status, 200);
        assert!(report.database_connected);
        assert!(!report.redis_connected);
        assert_eq!(report.components.len(), 2);
        assert_eq!(report.components["core"], "3.49.1");
        assert_eq!(report.components["galaxy"], "4.9.0");
        assert_eq!(report.collections_count, 3);
    }

    #[test]
    fn unhealthy_probe_leaves_defaults() {
        let p = paths();
        let t = ScriptedTransport::new()
            .reply(&p.status(), 503, json!({"detail": "maintenance"}))
            .reply(&p.collections(), 200, json!({"results": [{}]}));

        let report = check_status(&t, &p);
        assert_eq!(report.api_status, 503);
        assert!(!report.database_connected);
        assert!(!report.redis_connected);
        assert!(report.components.is_empty());
        assert_eq!(report.collections_count, 0);
        assert_eq!(t.calls_to(&p.collections()), 0, "no listing after a failed probe");
    }

    #[test]
    fn unreachable_service_reports_status_zero() {
        let p = paths();
        let t = ScriptedTransport::new().push(
            &p.status(),
            RequestResult::transport_failure("connection refused"),
        );
        let report = check_status(&t, &p);
        assert_eq!(report.api_status, 0);
        assert!(!report.is_ok());
    }

    #[test]
    fn listing_failure_does_not_fail_probe() {
        let p = paths();
        let t = ScriptedTransport::new()
            .reply(&p.status(), 200, healthy_status())
            .reply(&p.collections(), 500, json!({"error": "db timeout"}));

        let report = check_status(&t, &p);
        assert!(report.is_ok());
        assert!(report.database_connected);
        assert_eq!(report.collections_count, 0);
    }

    #[test]
    fn duplicate_components_last_write_wins() {
        let p = paths();
        let t = ScriptedTransport::new()
            .reply(
                &p.status(),
                200,
                json!({
                    "versions": [
                        {"component": "core", "version": "1.0"},
                        {"component": "core", "version": "2.0"}
                    ]
                }),
            )
            .reply(&p.collections(), 200, json!({"results": []}));

        let report = check_status(&t, &p);
        assert_eq!(report.components.len(), 1);
        assert_eq!(report.components["core"], "2.0");
        assert!(!report.database_connected, "missing section means disconnected");
    }
}
