//! Per-provider transformer configuration (spec §4.7 `DataSourcePullResultAutoExpand`,
//! §4.8 `Init` convertor-choice priority).

use std::collections::HashSet;
use std::sync::Arc;

use convert::Convertor;

/// Knobs the result handler (§4.7) and `Init`'s convertor selection
/// (§4.8) read. Defaults match the reference behavior: no auto-expand,
/// no provider-supplied convertor override, default blacklist in use.
#[derive(Default)]
pub struct TransformerMeta {
    /// If a single raw result is itself an array, iterate its elements
    /// as independent results (spec §4.7 step 1).
    pub auto_expand: bool,
    /// Highest-priority convertor choice in `Init`'s priority list.
    pub convertor_override: Option<Arc<dyn Convertor>>,
    /// Second-priority choice: a `DefaultConvertor` built from
    /// `blacklist_override` (or the hard-coded default blacklist if
    /// `None`) when `use_default_convertor` is set.
    pub use_default_convertor: bool,
    pub blacklist_override: Option<HashSet<String>>,
}

impl TransformerMeta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_auto_expand(mut self, auto_expand: bool) -> Self {
        self.auto_expand = auto_expand;
        self
    }

    pub fn with_convertor(mut self, convertor: Arc<dyn Convertor>) -> Self {
        self.convertor_override = Some(convertor);
        self
    }

    pub fn with_default_convertor(mut self, blacklist: impl IntoIterator<Item = String>) -> Self {
        self.use_default_convertor = true;
        self.blacklist_override = Some(blacklist.into_iter().collect());
        self
    }
}

/// Expand `raw` into the elements the result handler should transform
/// individually (spec §4.7 step 1). Only expands when `auto_expand` is
/// set and the value's runtime shape is an array; a scalar always
/// yields exactly one element (spec §8 boundary behavior).
pub fn expand_raw_result(raw: &serde_json::Value, auto_expand: bool) -> Vec<serde_json::Value> {
    if auto_expand {
        if let serde_json::Value::Array(items) = raw {
            return items.clone();
        }
    }
    vec![raw.clone()]
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn scalar_result_always_yields_one_element() {
        let elements = expand_raw_result(&serde_json::json!({"a": 1}), true);
        assert_eq!(elements.len(), 1);
    }

    #[test]
    fn array_result_expands_only_when_enabled() {
        let raw = serde_json::json!([{"a": 1}, {"a": 2}]);
        assert_eq!(expand_raw_result(&raw, true).len(), 2);
        assert_eq!(expand_raw_result(&raw, false).len(), 1);
    }
}
