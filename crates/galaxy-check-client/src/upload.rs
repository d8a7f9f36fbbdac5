use crate::api::ApiPaths;
use crate::config::PollSettings;
use crate::package::{self, ArtifactDescriptor};
use crate::{ClientError, ImportPoller, ImportState, Transport};
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::path::Path;
use tracing::{info, warn};

/// What happened to one upload.
///
/// `uploaded` is set on synchronous acceptance, `import_status` after an
/// asynchronous acceptance, `error` when the service refused or could not be
/// reached. An accepted upload whose import failed has no `error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadResult {
    pub collection: String,
    pub uploaded: bool,
    #[serde(serialize_with = "serialize_import_status")]
    pub import_status: Option<ImportState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub bytes: u64,
    pub blake3: String,
}

impl UploadResult {
    /// `import_status` as reported to users: the terminal state or `unknown`.
    pub fn import_status_str(&self) -> &'static str {
        self.import_status.map_or("unknown", ImportState::as_str)
    }

    pub fn imported(&self) -> bool {
        self.import_status == Some(ImportState::Success)
    }
}

fn serialize_import_status<S: Serializer>(
    status: &Option<ImportState>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(status.map_or("unknown", ImportState::as_str))
}

pub fn boundary_for(epoch_seconds: i64) -> String {
    format!("----GalaxyBoundary{epoch_seconds}")
}

/// Encode a multipart/form-data body with a single `file` part.
pub fn encode_multipart(boundary: &str, file_name: &str, content: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(content.len() + 256);
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\n")
            .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/gzip\r\n\r\n");
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

/// Pull a task id out of the `task` field of a 202 response. The service may
/// answer with a bare id or with the task's href; for an href the last path
/// segment is the id.
fn task_id_from(value: &Value) -> Option<String> {
    let raw = value.as_str()?.trim().trim_end_matches('/');
    let id = raw.rsplit('/').next().unwrap_or(raw);
    if id.is_empty() {
        None
    } else {
        Some(id.to_owned())
    }
}

/// Upload `src`, or a freshly packaged test collection when `src` is `None`.
pub fn upload(
    transport: &dyn Transport,
    paths: &ApiPaths,
    src: Option<&Path>,
    settings: PollSettings,
) -> Result<UploadResult, ClientError> {
    let artifact = match src {
        Some(path) => ArtifactDescriptor::from_path(path),
        None => package::create_test_artifact()?,
    };
    upload_descriptor(transport, paths, artifact, settings)
}

/// Upload an artifact and release it. Packager-owned archives are removed
/// whatever the outcome.
pub fn upload_descriptor(
    transport: &dyn Transport,
    paths: &ApiPaths,
    artifact: ArtifactDescriptor,
    settings: PollSettings,
) -> Result<UploadResult, ClientError> {
    let result = send_artifact(transport, paths, &artifact, settings);
    artifact.cleanup();
    result
}

fn send_artifact(
    transport: &dyn Transport,
    paths: &ApiPaths,
    artifact: &ArtifactDescriptor,
    settings: PollSettings,
) -> Result<UploadResult, ClientError> {
    let content = std::fs::read(&artifact.path)?;
    let boundary = boundary_for(crate::epoch_seconds());
    let body = encode_multipart(&boundary, &artifact.file_name(), &content);

    let mut result = UploadResult {
        collection: artifact.name.clone(),
        uploaded: false,
        import_status: None,
        task_id: None,
        error: None,
        bytes: content.len() as u64,
        blake3: blake3::hash(&content).to_hex().to_string(),
    };

    info!("uploading {} ({} bytes)", artifact.file_name(), content.len());
    let response = transport.send_bytes(
        &paths.collections(),
        &format!("multipart/form-data; boundary={boundary}"),
        &body,
    );

    match response.status {
        202 => {
            result.task_id = response.field("task").and_then(task_id_from);
            match result.task_id.as_deref() {
                Some(task_id) => {
                    let poller = ImportPoller::new(task_id, paths.import_task(task_id), settings);
                    result.import_status = Some(poller.wait(transport));
                }
                None => warn!("upload accepted without a task id; import status unknown"),
            }
        }
        _ if response.is_success() => result.uploaded = true,
        _ => {
            let message = response.error_message();
            warn!("upload of {} rejected: {message}", artifact.name);
            result.error = Some(message);
        }
    }
    Ok(result)
}
