use crate::client::{read_json, read_optional_json};
use crate::error::{Error, Result};
use crate::profile::{Profile, Target};
use crate::util::api_path;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use slog::{debug, warn};
use std::collections::BTreeMap;

/// The data a webtask keeps between invocations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Storage {
    #[serde(default)]
    pub data: Value,
    /// Version of the stored data; when given to an update, the update only succeeds
    /// if the stored data has not changed since
    #[serde(
        default,
        deserialize_with = "etag_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub etag: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Storage {
    pub fn new(data: Value) -> Self {
        Storage {
            data,
            ..Storage::default()
        }
    }

    pub fn etag<S: Into<String>>(mut self, etag: S) -> Self {
        self.etag = Some(etag.into());
        self
    }
}

/// The cluster reports etags as either strings or numbers.
fn etag_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

impl Profile {
    /// Replace the storage of a named webtask, returning the cluster's response.
    ///
    /// The data is sent JSON-encoded as a string.  A conflicting etag fails with a 409
    /// [`Error::Client`].
    pub async fn update_storage(&self, storage: &Storage, target: &Target) -> Result<Value> {
        let (container, name) = target.resolve(self)?;
        let data = serde_json::to_string(&storage.data)
            .map_err(|e| Error::Validation(format!("Unable to encode storage data: {}", e)))?;

        let mut payload = json!({ "data": data });
        if let Some(ref etag) = storage.etag {
            payload["etag"] = json!(etag);
        }

        let resp = self
            .client()
            .request(
                "PUT",
                &api_path(&["api", "webtask", container, name, "data"]),
                vec![],
                Some(&payload),
            )
            .await?;
        read_optional_json(resp).await
    }

    /// Read the storage of a named webtask.
    ///
    /// Stored data that is not valid JSON is returned as a string.
    pub async fn get_storage(&self, target: &Target) -> Result<Storage> {
        let (container, name) = target.resolve(self)?;
        let resp = self
            .client()
            .request(
                "GET",
                &api_path(&["api", "webtask", container, name, "data"]),
                vec![],
                None,
            )
            .await?;
        let mut storage: Storage = read_json(resp).await?;

        if let Value::String(ref encoded) = storage.data {
            match serde_json::from_str(encoded) {
                Ok(decoded) => storage.data = decoded,
                Err(e) => {
                    warn!(self.logger(), "storage data is not JSON"; "name" => name, "error" => %e)
                }
            }
        }
        debug!(self.logger(), "read storage"; "name" => name, "etag" => storage.etag.as_deref());
        Ok(storage)
    }
}
