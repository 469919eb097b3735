// crates/server/src/jobs/inventory.rs
//! Inventory resolution.
//!
//! Turning a request into an inventory document belongs to the workspace
//! subsystem; the job engine consumes it through the [`InventorySource`]
//! trait and treats failures as user-facing validation errors. The built-in
//! [`InlineInventory`] renders the request's host/user/roles directly, which
//! is all a workspace-less deployment needs.

use serde_yaml::{Mapping, Value};
use thiserror::Error;

use runhub_core::types::DeployRequest;

/// Outcome of inventory resolution: the YAML document written into the job
/// directory and the role groups it defines.
#[derive(Debug, Clone)]
pub struct ResolvedInventory {
    pub yaml: String,
    pub roles: Vec<String>,
}

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("unknown workspace: {0}")]
    UnknownWorkspace(String),

    #[error("invalid inventory request: {0}")]
    Invalid(String),
}

pub trait InventorySource: Send + Sync {
    fn resolve(&self, req: &DeployRequest) -> Result<ResolvedInventory, InventoryError>;
}

/// Renders an inventory from the request itself. Workspace-backed requests
/// are rejected here; wiring a workspace manager in means registering a
/// different [`InventorySource`].
pub struct InlineInventory;

impl InventorySource for InlineInventory {
    fn resolve(&self, req: &DeployRequest) -> Result<ResolvedInventory, InventoryError> {
        if let Some(ws) = req.workspace_id.as_deref() {
            return Err(InventoryError::UnknownWorkspace(ws.to_string()));
        }

        let host = req.host.trim();
        let roles = req.roles();

        let mut host_vars = Mapping::new();
        host_vars.insert(
            Value::String("ansible_host".into()),
            Value::String(host.to_string()),
        );
        host_vars.insert(
            Value::String("ansible_user".into()),
            Value::String(req.user.trim().to_string()),
        );

        let mut hosts = Mapping::new();
        hosts.insert(Value::String(host.to_string()), Value::Mapping(host_vars));

        let mut children = Mapping::new();
        for role in &roles {
            let mut group_hosts = Mapping::new();
            group_hosts.insert(Value::String(host.to_string()), Value::Mapping(Mapping::new()));
            let mut group = Mapping::new();
            group.insert(Value::String("hosts".into()), Value::Mapping(group_hosts));
            children.insert(Value::String(role.clone()), Value::Mapping(group));
        }

        let mut all = Mapping::new();
        all.insert(Value::String("hosts".into()), Value::Mapping(hosts));
        all.insert(Value::String("children".into()), Value::Mapping(children));

        let mut root = Mapping::new();
        root.insert(Value::String("all".into()), Value::Mapping(all));

        let yaml = serde_yaml::to_string(&Value::Mapping(root))
            .map_err(|e| InventoryError::Invalid(e.to_string()))?;

        Ok(ResolvedInventory { yaml, roles })
    }
}

/// Role groups defined by an inventory document (`all.children` keys).
/// Malformed documents yield an empty list rather than an error.
pub fn roles_from_inventory(yaml: &str) -> Vec<String> {
    let doc: Value = match serde_yaml::from_str(yaml) {
        Ok(doc) => doc,
        Err(_) => return Vec::new(),
    };
    doc.get("all")
        .and_then(|all| all.get("children"))
        .and_then(Value::as_mapping)
        .map(|children| {
            children
                .keys()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
