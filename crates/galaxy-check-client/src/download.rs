use crate::api::ApiPaths;
use crate::{ClientError, Method, Transport};
use serde::Serialize;
use serde_json::Value;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// One entry of a collection's version listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRecord {
    pub version: String,
    pub download_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DownloadResult {
    pub downloaded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blake3: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DownloadResult {
    fn failed(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }
}

/// Split `namespace.name`. Anything other than exactly two non-empty parts is
/// rejected.
pub fn parse_collection_name(name: &str) -> Result<(&str, &str), ClientError> {
    let mut parts = name.split('.');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(ns), Some(short), None) if !ns.is_empty() && !short.is_empty() => Ok((ns, short)),
        _ => Err(ClientError::InvalidInput(
            "Collection must be in format namespace.name".to_owned(),
        )),
    }
}

/// `<temp dir>/<namespace>_<name>.tar.gz`
pub fn default_dest(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("{}.tar.gz", name.replace('.', "_")))
}

/// Read the `results` array of a version listing, in listing order.
/// Entries without a `version` string are skipped.
pub fn parse_versions(listing: &Value) -> Vec<VersionRecord> {
    listing
        .get("results")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| {
                    Some(VersionRecord {
                        version: entry.get("version")?.as_str()?.to_owned(),
                        download_url: entry
                            .get("download_url")
                            .and_then(Value::as_str)
                            .map(str::to_owned),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Pick the requested version, or the first listed one. The listing order is
/// trusted as-is; no version comparison happens here.
pub fn select_version<'a>(
    versions: &'a [VersionRecord],
    requested: Option<&str>,
) -> Result<&'a VersionRecord, String> {
    match requested {
        Some(wanted) => versions
            .iter()
            .find(|v| v.version == wanted)
            .ok_or_else(|| format!("Version {wanted} not found")),
        None => versions
            .first()
            .ok_or_else(|| "No versions found".to_owned()),
    }
}

/// Writer adapter hashing everything that passes through it.
struct HashingWriter<'a, W: Write> {
    inner: &'a mut W,
    hasher: blake3::Hasher,
}

impl<W: Write> Write for HashingWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

/// Stream `url` into `dest` through a sibling temp file, replacing `dest` only
/// once the whole body has arrived.
fn fetch_into(
    transport: &dyn Transport,
    url: &str,
    dest: &Path,
) -> Result<(u64, String), ClientError> {
    let parent = match dest.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(&parent)?;
    let mut writer = HashingWriter {
        inner: tmp.as_file_mut(),
        hasher: blake3::Hasher::new(),
    };
    let written = transport.fetch_to(url, &mut writer)?;
    writer.flush()?;
    let digest = writer.hasher.finalize().to_hex().to_string();
    tmp.persist(dest).map_err(|e| ClientError::Io(e.error))?;
    Ok((written, digest))
}

/// Resolve `name` (and optionally `version`) against the version listing and
/// save the archive to `dest`. Every failure is reported in the result.
pub fn download(
    transport: &dyn Transport,
    paths: &ApiPaths,
    name: &str,
    version: Option<&str>,
    dest: Option<&Path>,
) -> DownloadResult {
    let (namespace, short) = match parse_collection_name(name) {
        Ok(parts) => parts,
        Err(ClientError::InvalidInput(msg)) => return DownloadResult::failed(msg),
        Err(e) => return DownloadResult::failed(e.to_string()),
    };
    let dest = dest.map_or_else(|| default_dest(name), Path::to_path_buf);

    let listing = transport.request(Method::Get, &paths.versions(namespace, short), None);
    if listing.status != 200 {
        debug!("version listing for {name} answered HTTP {}", listing.status);
        return DownloadResult::failed("Failed to get collection versions");
    }
    let versions = parse_versions(listing.body_json().unwrap_or(&Value::Null));
    if versions.is_empty() {
        return DownloadResult::failed("No versions found");
    }

    let record = match select_version(&versions, version) {
        Ok(r) => r,
        Err(msg) => return DownloadResult::failed(msg),
    };
    let Some(href) = record.download_url.as_deref() else {
        return DownloadResult::failed(format!(
            "Version {} has no download URL",
            record.version
        ));
    };

    let url = paths.resolve(href);
    info!("downloading {name} {} to {}", record.version, dest.display());
    match fetch_into(transport, &url, &dest) {
        Ok((bytes, digest)) => DownloadResult {
            downloaded: true,
            path: Some(dest),
            collection: Some(name.to_owned()),
            version: Some(record.version.clone()),
            bytes: Some(bytes),
            blake3: Some(digest),
            error: None,
        },
        Err(e) => {
            warn!("download of {name} failed: {e}");
            DownloadResult::failed(format!("Download failed: {e}"))
        }
    }
}
