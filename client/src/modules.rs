use crate::error::Result;
use crate::profile::Profile;
use crate::util::api_path;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use slog::debug;
use std::collections::BTreeMap;

/// A node module, as named in a module provisioning request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeModule {
    pub name: String,
    /// A semver version or range
    pub version: String,
}

impl NodeModule {
    pub fn new<S1: Into<String>, S2: Into<String>>(name: S1, version: S2) -> Self {
        NodeModule {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// The provisioning state of a node module on the cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeModuleState {
    pub name: String,
    pub version: String,
    /// `queued`, `available` or `failed`
    pub state: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Profile {
    /// List the versions of a node module known to the cluster.
    pub async fn list_node_module_versions(&self, name: &str) -> Result<Value> {
        self.client()
            .request_json(
                "GET",
                &api_path(&["api", "env", "node", "modules", name]),
                vec![],
                None,
            )
            .await
    }

    /// Ask the cluster to make the given modules available to webtasks.
    ///
    /// `reset` forces the modules to be rebuilt, and requires an administrative token.
    pub async fn ensure_node_modules(
        &self,
        modules: &[NodeModule],
        reset: bool,
    ) -> Result<Vec<NodeModuleState>> {
        let query = if reset {
            vec![("reset".to_owned(), "1".to_owned())]
        } else {
            vec![]
        };
        debug!(self.logger(), "ensuring node modules"; "count" => modules.len(), "reset" => reset);
        self.client()
            .request_json(
                "POST",
                "api/env/node/modules",
                query,
                Some(&json!({ "modules": modules })),
            )
            .await
    }
}
