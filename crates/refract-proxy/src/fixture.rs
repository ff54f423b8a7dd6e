//! Content-addressed fixture store.
//!
//! A fixture is a metadata document under `<root>/meta/<id>` plus a raw
//! body blob under `<root>/data/<HEX>` where the filename is the
//! uppercase-hex SHA-256 of the blob's content. Identical bodies across
//! fixtures are stored once. Fixtures are write-once: both writes use
//! create-if-absent semantics and an existing file is never overwritten.

use crate::error::ProxyError;
use hyper::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Request half of a fixture metadata document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureRequest {
    pub method: String,
    pub href: String,
    pub headers: BTreeMap<String, Value>,
    pub trailers: BTreeMap<String, Value>,
    /// Uppercase-hex SHA-256 of the request body
    pub body: String,
}

/// Response half of a fixture metadata document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixtureResponse {
    pub status_code: u16,
    pub status_message: String,
    pub href: String,
    pub headers: BTreeMap<String, Value>,
    pub trailers: BTreeMap<String, Value>,
    /// Uppercase-hex SHA-256 of the response body; names the blob under `data/`
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureMeta {
    pub id: String,
    pub request: FixtureRequest,
    pub response: FixtureResponse,
}

/// Render a header map as a JSON object; repeated headers become arrays.
pub fn headers_to_json(headers: &HeaderMap) -> BTreeMap<String, Value> {
    let mut map = BTreeMap::new();
    for name in headers.keys() {
        let values: Vec<&str> = headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect();
        let value = match values.as_slice() {
            [single] => Value::String((*single).to_string()),
            many => Value::Array(many.iter().map(|v| Value::String((*v).to_string())).collect()),
        };
        map.insert(name.as_str().to_string(), value);
    }
    map
}

/// Rebuild a header map from the JSON object form. Unparseable names or
/// values are skipped rather than failing the whole fixture.
pub fn headers_from_json(map: &BTreeMap<String, Value>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in map {
        let Ok(name) = name.parse::<HeaderName>() else {
            continue;
        };
        match value {
            Value::String(s) => {
                if let Ok(v) = HeaderValue::from_str(s) {
                    headers.append(name, v);
                }
            }
            Value::Array(items) => {
                for item in items {
                    if let Some(s) = item.as_str() {
                        if let Ok(v) = HeaderValue::from_str(s) {
                            headers.append(name.clone(), v);
                        }
                    }
                }
            }
            _ => {}
        }
    }
    headers
}

/// On-disk fixture store rooted at a caller-chosen directory.
#[derive(Debug, Clone)]
pub struct FixtureStore {
    root: PathBuf,
}

impl FixtureStore {
    /// Open (and create if needed) a store under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, ProxyError> {
        let root = root.into();
        std::fs::create_dir_all(root.join("meta"))?;
        std::fs::create_dir_all(root.join("data"))?;
        Ok(Self { root })
    }

    pub fn meta_path(&self, id: &str) -> PathBuf {
        self.root.join("meta").join(id)
    }

    pub fn data_path(&self, digest: &str) -> PathBuf {
        self.root.join("data").join(digest)
    }

    /// Persist a metadata document under create-if-absent semantics.
    /// Returns `false` when a fixture with this id already exists.
    pub async fn write_meta(&self, meta: &FixtureMeta) -> Result<bool, ProxyError> {
        let json = serde_json::to_vec_pretty(meta)
            .map_err(|e| ProxyError::FixturePersist(std::io::Error::new(ErrorKind::InvalidData, e)))?;
        self.write_new(&self.meta_path(&meta.id), &json).await
    }

    /// Persist a body blob keyed by its content digest. Returns `false`
    /// when a blob with this digest already exists (content dedup).
    pub async fn write_body(&self, digest: &str, body: &[u8]) -> Result<bool, ProxyError> {
        self.write_new(&self.data_path(digest), body).await
    }

    async fn write_new(&self, path: &Path, contents: &[u8]) -> Result<bool, ProxyError> {
        let open = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await;
        let mut file = match open {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                debug!("fixture file exists, skipping: {}", path.display());
                return Ok(false);
            }
            Err(e) => return Err(ProxyError::FixturePersist(e)),
        };
        tokio::io::AsyncWriteExt::write_all(&mut file, contents)
            .await
            .map_err(ProxyError::FixturePersist)?;
        Ok(true)
    }

    pub async fn read_meta(&self, id: &str) -> Result<FixtureMeta, ProxyError> {
        let path = self.meta_path(id);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| ProxyError::FixtureLookup(format!("{}: {e}", path.display())))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| ProxyError::FixtureLookup(format!("{}: {e}", path.display())))
    }

    pub async fn open_body(&self, digest: &str) -> Result<tokio::fs::File, ProxyError> {
        let path = self.data_path(digest);
        tokio::fs::File::open(&path)
            .await
            .map_err(|e| ProxyError::FixtureLookup(format!("{}: {e}", path.display())))
    }
}
