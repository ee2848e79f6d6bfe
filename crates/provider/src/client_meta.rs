//! The client-meta contract a provider's config resolves into (spec
//! §4.8 `Init`, "init logger/client-meta (user-supplied or default)").
//! Concrete per-provider API clients and credential handling stay out
//! of scope (spec.md §1); this crate only supplies a default that makes
//! every pull run with a single null client, and the factory seam a
//! provider plugs its own client construction into.

use std::collections::HashMap;
use std::sync::Arc;

use diagnostics::Diagnostics;
use schema::{ClientHandle, ClientMeta};

/// Builds the `ClientMeta` a provider runtime attaches to its tables.
/// Default providers get `DefaultClientMeta`; a provider with real API
/// clients supplies its own factory at `Provider::with_client_meta_factory`.
pub trait ClientMetaFactory: Send + Sync {
    fn build(&self, workspace: &str, provider_name: &str, config: &serde_json::Value) -> Result<Arc<dyn ClientMeta>, Diagnostics>;
}

/// A client-meta backed by nothing but the parsed config object: `clients()`
/// always returns a single `ClientHandle::none()`, and `get_item` reads
/// top-level config keys. Sufficient for providers with no concrete API
/// client (spec.md Non-goal) or as a base for tests.
pub struct DefaultClientMeta {
    items: HashMap<String, serde_json::Value>,
}

impl DefaultClientMeta {
    pub fn from_config(config: &serde_json::Value) -> Self {
        let items = config.as_object().map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect()).unwrap_or_default();
        DefaultClientMeta { items }
    }
}

impl ClientMeta for DefaultClientMeta {
    fn get_item(&self, key: &str) -> Option<serde_json::Value> {
        self.items.get(key).cloned()
    }

    fn clients(&self) -> Vec<ClientHandle> {
        vec![ClientHandle::none()]
    }
}

pub struct DefaultClientMetaFactory;

impl ClientMetaFactory for DefaultClientMetaFactory {
    fn build(&self, _workspace: &str, _provider_name: &str, config: &serde_json::Value) -> Result<Arc<dyn ClientMeta>, Diagnostics> {
        Ok(Arc::new(DefaultClientMeta::from_config(config)))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_client_meta_has_a_single_null_client() {
        let meta = DefaultClientMeta::from_config(&serde_json::json!({}));
        let clients = meta.clients();
        assert_eq!(clients.len(), 1);
        assert!(clients[0].downcast::<()>().is_none());
    }

    #[test]
    fn default_client_meta_reads_top_level_config_keys() {
        let meta = DefaultClientMeta::from_config(&serde_json::json!({"region": "us-east-1"}));
        assert_eq!(meta.get_item("region"), Some(serde_json::json!("us-east-1")));
        assert_eq!(meta.get_item("missing"), None);
    }
}
