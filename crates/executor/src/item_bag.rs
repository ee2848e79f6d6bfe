use std::collections::HashMap;

use schema::ItemBag;
use serde_json::Value as Raw;

/// A task's own key/value entries plus a flattened snapshot of its
/// ancestors' entries, copied at construction time rather than held as a
/// live reference to the parent task (which is free to be dropped once
/// its children are enqueued).
#[derive(Clone, Default)]
pub struct TaskItemBag {
    own: HashMap<String, Raw>,
    inherited: HashMap<String, Raw>,
}

impl TaskItemBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries(entries: impl IntoIterator<Item = (String, Raw)>) -> Self {
        TaskItemBag {
            own: entries.into_iter().collect(),
            inherited: HashMap::new(),
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: Raw) -> &mut Self {
        self.own.insert(key.into(), value);
        self
    }

    /// The bag a child task starts with: this bag's effective view (own
    /// entries shadowing inherited ones) becomes the child's inherited
    /// baseline; the child's own map starts empty.
    pub fn child(&self) -> TaskItemBag {
        let mut inherited = self.inherited.clone();
        inherited.extend(self.own.clone());
        TaskItemBag {
            own: HashMap::new(),
            inherited,
        }
    }
}

impl ItemBag for TaskItemBag {
    fn get(&self, key: &str) -> Option<Raw> {
        self.own.get(key).cloned()
    }

    fn lookup(&self, key: &str) -> Option<Raw> {
        self.own.get(key).cloned().or_else(|| self.inherited.get(key).cloned())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn get_sees_only_own_entries() {
        let mut bag = TaskItemBag::new();
        bag.set("a", Raw::from(1));
        let child = bag.child();
        assert_eq!(child.get("a"), None);
        assert_eq!(child.lookup("a"), Some(Raw::from(1)));
    }

    #[test]
    fn own_entries_shadow_inherited_ones_on_lookup() {
        let mut bag = TaskItemBag::new();
        bag.set("a", Raw::from("parent"));
        let mut child = bag.child();
        child.set("a", Raw::from("child"));
        assert_eq!(child.get("a"), Some(Raw::from("child")));
        assert_eq!(child.lookup("a"), Some(Raw::from("child")));
    }

    #[test]
    fn grandchild_still_sees_grandparent_entries() {
        let mut grandparent = TaskItemBag::new();
        grandparent.set("a", Raw::from(1));
        let parent = grandparent.child();
        let grandchild = parent.child();
        assert_eq!(grandchild.lookup("a"), Some(Raw::from(1)));
    }
}
