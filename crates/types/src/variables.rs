//! Scoped variable bindings.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Flat name to value mapping. Insertion order is preserved so that files
/// written back to disk keep the user's ordering.
pub type Variables = IndexMap<String, Value>;

/// Which layer wins when both define the same key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariablePrecedence {
    /// The narrower collection layer overrides the workspace layer.
    #[default]
    CollectionOverWorkspace,
    WorkspaceOverCollection,
}

/// Named variable layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableLayer {
    Workspace,
    Collection,
}

/// The two binding layers visible to a request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariableScope {
    #[serde(default)]
    pub workspace: Variables,
    #[serde(default)]
    pub collection: Variables,
}

impl VariableScope {
    pub fn new(workspace: Variables, collection: Variables) -> Self {
        Self { workspace, collection }
    }

    pub fn layer(&self, layer: VariableLayer) -> &Variables {
        match layer {
            VariableLayer::Workspace => &self.workspace,
            VariableLayer::Collection => &self.collection,
        }
    }

    pub fn layer_mut(&mut self, layer: VariableLayer) -> &mut Variables {
        match layer {
            VariableLayer::Workspace => &mut self.workspace,
            VariableLayer::Collection => &mut self.collection,
        }
    }
}

/// Environment changes returned by a script hook.
///
/// `workspace` and `collection` target a layer explicitly. `variables` is
/// unscoped: each entry updates whichever layer currently wins for its key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentPatch {
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub workspace: Variables,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub collection: Variables,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub variables: Variables,
}

impl EnvironmentPatch {
    /// Patch made only of unscoped entries.
    pub fn unscoped(variables: Variables) -> Self {
        Self {
            variables,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.workspace.is_empty() && self.collection.is_empty() && self.variables.is_empty()
    }
}
