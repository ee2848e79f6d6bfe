//! Provider configuration and the storage descriptor tagged union (spec
//! §6 "storage descriptor", SPEC_FULL.md "Configuration"). CLI parsing
//! and config *file* discovery stay out of scope; this module only
//! turns an opaque YAML string into a `serde_json::Value` a provider's
//! own hooks can read.

use diagnostics::Diagnostics;
use serde::{Deserialize, Serialize};

/// `{type, options}` tagged union identifying which storage backend to
/// construct and its backend-specific options. Only `Postgresql` has a
/// reference implementation (`storage-postgres`); other variants are
/// recognized here but have no built-in factory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum StorageDescriptor {
    Postgresql { options: serde_json::Value },
}

/// Parse a provider's opaque YAML config string into a generic JSON
/// value. The core never interprets the shape; a concrete provider's
/// own init hook is responsible for pulling fields out of it.
pub fn parse_config(yaml: &str) -> Result<serde_json::Value, Diagnostics> {
    if yaml.trim().is_empty() {
        return Ok(serde_json::Value::Null);
    }
    serde_yaml::from_str::<serde_json::Value>(yaml).map_err(|e| Diagnostics::from_error(format!("invalid provider config yaml: {e}")))
}

/// The namespace/schema a provider's storage I/O targets, read from the
/// parsed config's `schema` or `namespace` key (convention only — see
/// SPEC_FULL.md supplemented feature 4 / spec.md §9 Open Question).
/// Defaults to `"public"`, matching the reference SQL storage's default
/// `search_path`.
pub fn namespace_from_config(config: &serde_json::Value) -> String {
    config
        .get("schema")
        .or_else(|| config.get("namespace"))
        .and_then(|v| v.as_str())
        .unwrap_or("public")
        .to_string()
}
