//! In-memory stand-in for a Galaxy service.
//!
//! Serves the part of the Galaxy v3 and Pulp status API that `galaxy-check`
//! talks to: the status probe, the collection listing and multipart upload,
//! import task polling, per-collection version listings and artifact
//! downloads. Every request must carry the configured Basic credentials.
//! Authorized requests without a session get a `sessionid` cookie, and the
//! `Authorization` and `Cookie` headers of every request are recorded so tests
//! can check what the client sent.
//!
//! The [`TestServer`] helper starts a stub on a random port for integration
//! testing.

use base64::Engine as _;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::ffi::OsStr;
use std::io::Read;
use std::sync::{Arc, Mutex, MutexGuard};
use tiny_http::{Header, Method, Response, Server, StatusCode};
use tracing::{debug, info, warn};

/// How uploaded collections move through the import pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportBehaviour {
    /// Report `completed` from the Nth poll on and publish the collection.
    SucceedAfter(u32),
    /// Report `failed` from the Nth poll on.
    FailAfter(u32),
    /// Stay `running` forever.
    Never,
    /// Answer the upload with 201 and publish immediately, no task.
    Synchronous,
}

#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Status code of the status endpoint. Anything but 200 hides the body.
    pub status: u16,
    pub database: bool,
    pub redis: bool,
    pub components: Vec<(String, String)>,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            status: 200,
            database: true,
            redis: true,
            components: [("galaxy", "4.9.0"), ("core", "3.49.0"), ("ansible", "0.21.0")]
                .into_iter()
                .map(|(c, v)| (c.to_owned(), v.to_owned()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StubConfig {
    pub username: String,
    pub password: String,
    pub api_prefix: String,
    pub health: HealthConfig,
    pub import: ImportBehaviour,
}

impl Default for StubConfig {
    fn default() -> Self {
        Self {
            username: "admin".to_owned(),
            password: "admin".to_owned(),
            api_prefix: "api/galaxy".to_owned(),
            health: HealthConfig::default(),
            import: ImportBehaviour::SucceedAfter(2),
        }
    }
}

impl StubConfig {
    pub fn with_import(mut self, import: ImportBehaviour) -> Self {
        self.import = import;
        self
    }

    pub fn with_health(mut self, health: HealthConfig) -> Self {
        self.health = health;
        self
    }

    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.username = username.to_owned();
        self.password = password.to_owned();
        self
    }
}

/// Headers of one received request, as recorded by the stub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeenRequest {
    pub method: String,
    pub path: String,
    pub authorization: Option<String>,
    pub cookie: Option<String>,
}

/// `namespace`, `name` and `version` from a collection's `galaxy.yml`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub namespace: String,
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone)]
struct Artifact {
    manifest: Manifest,
    data: Vec<u8>,
}

impl Artifact {
    fn file_name(&self) -> String {
        let m = &self.manifest;
        format!("{}-{}-{}.tar.gz", m.namespace, m.name, m.version)
    }

    fn is(&self, namespace: &str, name: &str) -> bool {
        self.manifest.namespace == namespace && self.manifest.name == name
    }
}

struct Task {
    polls: u32,
    pending: Option<Artifact>,
}

#[derive(Default)]
struct State {
    /// In upload order.
    published: Vec<Artifact>,
    tasks: HashMap<String, Task>,
    next_task: u64,
    next_session: u64,
    seen: Vec<SeenRequest>,
}

/// A request reduced to what the stub looks at.
pub struct StubRequest<'a> {
    pub method: Method,
    pub url: &'a str,
    pub authorization: Option<&'a str>,
    pub cookie: Option<&'a str>,
    pub content_type: Option<&'a str>,
    pub body: &'a [u8],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
    pub set_cookie: Option<String>,
}

impl Reply {
    fn json(status: u16, value: &Value) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: value.to_string().into_bytes(),
            set_cookie: None,
        }
    }

    /// Galaxy-style error body: `{"errors": [{"status", "detail"}]}`.
    fn error(status: u16, detail: &str) -> Self {
        Self::json(
            status,
            &json!({"errors": [{"status": status.to_string(), "detail": detail}]}),
        )
    }

    fn archive(data: Vec<u8>) -> Self {
        Self {
            status: 200,
            content_type: "application/gzip",
            body: data,
            set_cookie: None,
        }
    }

    pub fn json_body(&self) -> Option<Value> {
        serde_json::from_slice(&self.body).ok()
    }
}

/// Routes below the API prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route<'a> {
    Status,
    Collections,
    ImportTask(&'a str),
    Versions(&'a str, &'a str),
    Artifact(&'a str),
}

fn single_segment(s: &str) -> Option<&str> {
    (!s.is_empty() && !s.contains('/')).then_some(s)
}

/// Parse a path relative to the API prefix, e.g. `v3/collections/`.
pub fn parse_route(rest: &str) -> Option<Route<'_>> {
    match rest {
        "pulp/api/v3/status/" => return Some(Route::Status),
        "v3/collections/" => return Some(Route::Collections),
        _ => {}
    }
    if let Some(task) = rest.strip_prefix("v3/imports/tasks/") {
        return single_segment(task.strip_suffix('/')?).map(Route::ImportTask);
    }
    if let Some(file) = rest.strip_prefix("v3/artifacts/collections/") {
        return single_segment(file).map(Route::Artifact);
    }
    let pair = rest
        .strip_prefix("v3/collections/")?
        .strip_suffix("/versions/")?;
    let (namespace, name) = pair.split_once('/')?;
    Some(Route::Versions(single_segment(namespace)?, single_segment(name)?))
}

/// The `boundary` parameter of a `multipart/form-data` content type.
pub fn multipart_boundary(content_type: &str) -> Option<&str> {
    let (mime, params) = content_type.split_once(';')?;
    if !mime.trim().eq_ignore_ascii_case("multipart/form-data") {
        return None;
    }
    params
        .split(';')
        .find_map(|p| p.trim().strip_prefix("boundary="))
        .map(|b| b.trim_matches('"'))
        .filter(|b| !b.is_empty())
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Content of the form part named `file`.
pub fn extract_file_part(body: &[u8], boundary: &str) -> Option<Vec<u8>> {
    let delimiter = format!("--{boundary}");
    let closing = format!("\r\n--{boundary}");
    let mut rest = body;
    loop {
        let start = find(rest, delimiter.as_bytes())?;
        rest = &rest[start + delimiter.len()..];
        if rest.starts_with(b"--") {
            return None;
        }
        let header_end = find(rest, b"\r\n\r\n")?;
        let headers = String::from_utf8_lossy(&rest[..header_end]);
        let content = &rest[header_end + 4..];
        let end = find(content, closing.as_bytes())?;
        if headers.contains("name=\"file\"") {
            return Some(content[..end].to_vec());
        }
        rest = &content[end + 2..];
    }
}

/// Read the top-level `key: value` pairs of a `galaxy.yml`.
pub fn parse_manifest(text: &str) -> Result<Manifest, String> {
    let mut fields: HashMap<&str, &str> = HashMap::new();
    for line in text.lines() {
        if line.starts_with([' ', '\t', '#', '-']) {
            continue;
        }
        if let Some((key, value)) = line.split_once(':') {
            fields.insert(key.trim(), value.trim().trim_matches(['"', '\'']));
        }
    }
    let field = |key: &str| {
        fields
            .get(key)
            .filter(|v| !v.is_empty())
            .map(|v| (*v).to_owned())
            .ok_or_else(|| format!("galaxy.yml is missing '{key}'"))
    };
    Ok(Manifest {
        namespace: field("namespace")?,
        name: field("name")?,
        version: field("version")?,
    })
}

/// Find and parse `galaxy.yml` at the top of a gzipped collection tarball.
pub fn read_manifest(archive: &[u8]) -> Result<Manifest, String> {
    let invalid = |e: std::io::Error| format!("Invalid collection archive: {e}");
    let mut tar = tar::Archive::new(GzDecoder::new(archive));
    for entry in tar.entries().map_err(invalid)? {
        let mut entry = entry.map_err(invalid)?;
        let is_manifest = entry.path().is_ok_and(|p| {
            p.file_name() == Some(OsStr::new("galaxy.yml")) && p.components().count() <= 2
        });
        if is_manifest {
            let mut text = String::new();
            entry.read_to_string(&mut text).map_err(invalid)?;
            return parse_manifest(&text);
        }
    }
    Err("galaxy.yml not found in archive".to_owned())
}

/// Build a minimal collection tarball holding only `<name>/galaxy.yml`.
pub fn build_archive(namespace: &str, name: &str, version: &str) -> std::io::Result<Vec<u8>> {
    let manifest = format!("namespace: {namespace}\nname: {name}\nversion: {version}\n");
    let mut header = tar::Header::new_gnu();
    header.set_size(manifest.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();

    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    builder.append_data(&mut header, format!("{name}/galaxy.yml"), manifest.as_bytes())?;
    builder.into_inner()?.finish()
}

/// Stub service state shared between the server thread and tests.
pub struct Stub {
    config: StubConfig,
    prefix: String,
    expected_auth: String,
    state: Mutex<State>,
}

impl Stub {
    pub fn new(config: StubConfig) -> Self {
        let credentials = format!("{}:{}", config.username, config.password);
        let expected_auth = format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode(credentials)
        );
        let prefix = format!("/{}/", config.api_prefix.trim_matches('/'));
        Self {
            config,
            prefix,
            expected_auth,
            state: Mutex::new(State::default()),
        }
    }

    pub fn config(&self) -> &StubConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("stub state lock poisoned")
    }

    /// Every request received so far, in arrival order.
    pub fn seen(&self) -> Vec<SeenRequest> {
        self.lock().seen.clone()
    }

    /// Publish a collection version directly, bypassing upload and import.
    pub fn seed_collection(&self, namespace: &str, name: &str, version: &str, data: Vec<u8>) {
        let manifest = Manifest {
            namespace: namespace.to_owned(),
            name: name.to_owned(),
            version: version.to_owned(),
        };
        self.lock().published.push(Artifact { manifest, data });
    }

    /// Published versions of a collection, newest upload first.
    pub fn published_versions(&self, namespace: &str, name: &str) -> Vec<String> {
        self.lock()
            .published
            .iter()
            .rev()
            .filter(|a| a.is(namespace, name))
            .map(|a| a.manifest.version.clone())
            .collect()
    }

    pub fn task_polls(&self, task_id: &str) -> Option<u32> {
        self.lock().tasks.get(task_id).map(|t| t.polls)
    }

    /// Answer one request.
    pub fn handle(&self, req: &StubRequest<'_>) -> Reply {
        let path = req.url.split('?').next().unwrap_or_default();
        let mut state = self.lock();
        state.seen.push(SeenRequest {
            method: req.method.as_str().to_owned(),
            path: path.to_owned(),
            authorization: req.authorization.map(str::to_owned),
            cookie: req.cookie.map(str::to_owned),
        });

        if req.authorization != Some(self.expected_auth.as_str()) {
            debug!("{} {path}: rejected credentials", req.method);
            return Reply::json(401, &json!({"detail": "Invalid username/password."}));
        }

        let mut reply = match path.strip_prefix(&self.prefix).and_then(parse_route) {
            Some(route) => self.dispatch(&mut state, route, req),
            None => Reply::error(404, "Not found."),
        };
        if !req.cookie.is_some_and(|c| c.contains("sessionid=")) {
            state.next_session += 1;
            reply.set_cookie = Some(format!(
                "sessionid=stub-{}; Path=/; HttpOnly",
                state.next_session
            ));
        }
        debug!("{} {path} -> {}", req.method, reply.status);
        reply
    }

    fn dispatch(&self, state: &mut State, route: Route<'_>, req: &StubRequest<'_>) -> Reply {
        match (&req.method, route) {
            (Method::Get, Route::Status) => self.status(),
            (Method::Get, Route::Collections) => list_collections(state),
            (Method::Post, Route::Collections) => self.accept_upload(state, req),
            (Method::Get, Route::ImportTask(id)) => self.poll_task(state, id),
            (Method::Get, Route::Versions(namespace, name)) => {
                self.list_versions(state, namespace, name)
            }
            (Method::Get, Route::Artifact(file)) => state
                .published
                .iter()
                .find(|a| a.file_name() == file)
                .map_or_else(|| Reply::error(404, "Not found."), |a| Reply::archive(a.data.clone())),
            _ => Reply::error(405, "Method not allowed."),
        }
    }

    fn status(&self) -> Reply {
        let health = &self.config.health;
        if health.status != 200 {
            return Reply::json(health.status, &json!({"detail": "Service unavailable"}));
        }
        let versions: Vec<Value> = health
            .components
            .iter()
            .map(|(component, version)| {
                json!({"component": component, "version": version, "package": format!("{component}-stub")})
            })
            .collect();
        Reply::json(
            200,
            &json!({
                "versions": versions,
                "online_workers": [],
                "database_connection": {"connected": health.database},
                "redis_connection": {"connected": health.redis},
            }),
        )
    }

    fn accept_upload(&self, state: &mut State, req: &StubRequest<'_>) -> Reply {
        let Some(boundary) = req.content_type.and_then(multipart_boundary) else {
            return Reply::error(400, "Expected a multipart/form-data upload");
        };
        let Some(data) = extract_file_part(req.body, boundary) else {
            return Reply::error(400, "Missing 'file' form field");
        };
        let manifest = match read_manifest(&data) {
            Ok(m) => m,
            Err(detail) => return Reply::error(400, &detail),
        };
        let taken = state.published.iter().any(|a| a.manifest == manifest)
            || state
                .tasks
                .values()
                .filter_map(|t| t.pending.as_ref())
                .any(|a| a.manifest == manifest);
        if taken {
            return Reply::error(
                400,
                &format!(
                    "Collection {}.{} version {} already exists",
                    manifest.namespace, manifest.name, manifest.version
                ),
            );
        }

        info!(
            "received {}.{} {} ({} bytes)",
            manifest.namespace,
            manifest.name,
            manifest.version,
            data.len()
        );
        let artifact = Artifact { manifest, data };
        if self.config.import == ImportBehaviour::Synchronous {
            let body = json!({
                "namespace": artifact.manifest.namespace,
                "name": artifact.manifest.name,
                "version": artifact.manifest.version,
            });
            state.published.push(artifact);
            return Reply::json(201, &body);
        }

        state.next_task += 1;
        let task_id = format!("{:04}-import", state.next_task);
        state.tasks.insert(
            task_id.clone(),
            Task {
                polls: 0,
                pending: Some(artifact),
            },
        );
        Reply::json(
            202,
            &json!({"task": format!("{}v3/imports/tasks/{task_id}/", self.prefix)}),
        )
    }

    fn poll_task(&self, state: &mut State, task_id: &str) -> Reply {
        let Some(task) = state.tasks.get_mut(task_id) else {
            return Reply::error(404, "Not found.");
        };
        task.polls += 1;
        let word = match self.config.import {
            ImportBehaviour::SucceedAfter(n) if task.polls >= n => "completed",
            ImportBehaviour::FailAfter(n) if task.polls >= n => "failed",
            _ => "running",
        };
        let published = match word {
            "completed" => task.pending.take(),
            "failed" => {
                task.pending = None;
                None
            }
            _ => None,
        };
        if let Some(artifact) = published {
            info!("import {task_id} completed: {}", artifact.file_name());
            state.published.push(artifact);
        }
        Reply::json(200, &json!({"id": task_id, "state": word, "messages": []}))
    }

    fn list_versions(&self, state: &State, namespace: &str, name: &str) -> Reply {
        let results: Vec<Value> = state
            .published
            .iter()
            .rev()
            .filter(|a| a.is(namespace, name))
            .map(|a| {
                let version = &a.manifest.version;
                json!({
                    "version": version,
                    "href": format!("{}v3/collections/{namespace}/{name}/versions/{version}/", self.prefix),
                    "download_url": format!("{}v3/artifacts/collections/{}", self.prefix, a.file_name()),
                })
            })
            .collect();
        if results.is_empty() {
            return Reply::error(404, "Not found.");
        }
        Reply::json(
            200,
            &json!({"meta": {"count": results.len()}, "results": results}),
        )
    }
}

fn list_collections(state: &State) -> Reply {
    let mut latest: Vec<&Artifact> = Vec::new();
    for artifact in &state.published {
        let m = &artifact.manifest;
        match latest.iter_mut().find(|a| a.is(&m.namespace, &m.name)) {
            Some(slot) => *slot = artifact,
            None => latest.push(artifact),
        }
    }
    let results: Vec<Value> = latest
        .iter()
        .map(|a| {
            json!({
                "namespace": a.manifest.namespace,
                "name": a.manifest.name,
                "highest_version": {"version": a.manifest.version},
            })
        })
        .collect();
    Reply::json(
        200,
        &json!({"meta": {"count": results.len()}, "results": results}),
    )
}

/// First value of header `name`, matched case-insensitively.
fn header_value(headers: &[Header], name: &str) -> Option<String> {
    headers
        .iter()
        .find(|h| h.field.as_str().as_str().eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str().to_owned())
}

fn respond(req: tiny_http::Request, reply: Reply) {
    let mut response =
        Response::from_data(reply.body).with_status_code(StatusCode(reply.status));
    if let Ok(h) = Header::from_bytes("Content-Type", reply.content_type) {
        response.add_header(h);
    }
    if let Some(h) = reply
        .set_cookie
        .and_then(|c| Header::from_bytes("Set-Cookie", c).ok())
    {
        response.add_header(h);
    }
    if reply.status == 401 {
        if let Ok(h) = Header::from_bytes("WWW-Authenticate", "Basic realm=\"api\"") {
            response.add_header(h);
        }
    }
    if let Err(e) = req.respond(response) {
        warn!("failed to send response: {e}");
    }
}

/// Read one HTTP request off the wire and answer it.
pub fn handle_request(stub: &Stub, mut req: tiny_http::Request) {
    let method = req.method().clone();
    let url = req.url().to_owned();
    let authorization = header_value(req.headers(), "Authorization");
    let cookie = header_value(req.headers(), "Cookie");
    let content_type = header_value(req.headers(), "Content-Type");

    let mut body = Vec::new();
    if let Err(e) = req.as_reader().read_to_end(&mut body) {
        warn!("{method} {url}: failed to read body: {e}");
        respond(req, Reply::error(500, "read error"));
        return;
    }

    let reply = stub.handle(&StubRequest {
        method,
        url: &url,
        authorization: authorization.as_deref(),
        cookie: cookie.as_deref(),
        content_type: content_type.as_deref(),
        body: &body,
    });
    respond(req, reply);
}

/// Serve requests on `addr` until the process exits.
pub fn run_server(stub: &Stub, addr: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let server = Server::http(addr)?;
    info!("listening on {addr}");
    for request in server.incoming_requests() {
        handle_request(stub, request);
    }
    Ok(())
}

/// A stub on `127.0.0.1` with a random port, served from a background thread.
/// Dropping it unblocks the server loop.
pub struct TestServer {
    pub url: String,
    pub port: u16,
    pub stub: Arc<Stub>,
    server: Arc<Server>,
    _handle: std::thread::JoinHandle<()>,
}

impl TestServer {
    pub fn start(config: StubConfig) -> Self {
        let server =
            Arc::new(Server::http("127.0.0.1:0").expect("failed to bind test HTTP server"));
        let port = server.server_addr().to_ip().expect("not an IP addr").port();
        let url = format!("http://127.0.0.1:{port}");

        let stub = Arc::new(Stub::new(config));
        let (srv, st) = (Arc::clone(&server), Arc::clone(&stub));
        let handle = std::thread::spawn(move || {
            for request in srv.incoming_requests() {
                handle_request(&st, request);
            }
        });

        Self {
            url,
            port,
            stub,
            server,
            _handle: handle,
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.server.unblock();
    }
}
