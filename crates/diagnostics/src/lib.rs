//! The data-plane error channel returned alongside a nominal result from
//! every fallible operation in this workspace. See spec §3/§7.

use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

/// Severity of a single diagnostic entry. `Fatal` is reserved for errors
/// that abort the containing init/validation pass outright (spec §7);
/// `Error` and below are always collected and never abort on their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl Level {
    fn is_error(self) -> bool {
        matches!(self, Level::Error | Level::Fatal)
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Fatal => "fatal",
        };
        f.write_str(s)
    }
}

/// One entry in a Diagnostics bag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub level: Level,
    pub content: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.level, self.content)
    }
}

/// An append-only, ordered sequence of diagnostic entries with a cached
/// "has any error" bit. Combinable: merging two bags appends entries in
/// order and ORs the error bit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
    has_error: bool,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    /// True once any Error or Fatal entry has ever been added. Sticky: a
    /// later merge of an error-free bag does not clear it.
    pub fn has_error(&self) -> bool {
        self.has_error
    }

    pub fn add(&mut self, level: Level, content: impl Into<String>) -> &mut Self {
        let content = content.into();
        if level.is_error() {
            self.has_error = true;
        }
        match level {
            Level::Error | Level::Fatal => tracing::warn!(content = %content, %level, "diagnostic"),
            _ => tracing::debug!(content = %content, %level, "diagnostic"),
        }
        self.entries.push(Diagnostic { level, content });
        self
    }

    pub fn error(&mut self, content: impl Into<String>) -> &mut Self {
        self.add(Level::Error, content)
    }

    pub fn warn(&mut self, content: impl Into<String>) -> &mut Self {
        self.add(Level::Warn, content)
    }

    pub fn info(&mut self, content: impl Into<String>) -> &mut Self {
        self.add(Level::Info, content)
    }

    pub fn from_error(content: impl Into<String>) -> Self {
        let mut d = Self::new();
        d.error(content);
        d
    }

    /// Merge `other` into `self` in order, OR-ing the error bit.
    pub fn merge(&mut self, other: Diagnostics) -> &mut Self {
        self.has_error = self.has_error || other.has_error;
        self.entries.extend(other.entries);
        self
    }
}

impl Extend<Diagnostic> for Diagnostics {
    fn extend<T: IntoIterator<Item = Diagnostic>>(&mut self, iter: T) {
        for d in iter {
            self.add(d.level, d.content);
        }
    }
}

/// Recover a human-readable message from a caught panic payload.
pub fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Run `f`, converting any panic into an `Error` diagnostic instead of
/// letting it unwind past this boundary. Used at the four recovery points
/// named in spec §7: RPC entry points, worker task execution,
/// producer/consumer goroutines, and extractor/convertor calls inside the
/// transformer.
pub fn catch_panic<T>(scope: &str, f: impl FnOnce() -> T) -> Result<T, Diagnostics> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Ok(value),
        Err(payload) => {
            let message = panic_message(payload);
            tracing::error!(scope, message = %message, "recovered panic");
            Err(Diagnostics::from_error(format!(
                "panic in {scope}: {message}"
            )))
        }
    }
}

/// The set of error kinds an `ErrorHandlerMeta` may be configured to
/// ignore. Mirrors the four sites named in spec §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IgnoreKind {
    OnPullTable,
    OnTransformerRow,
    OnTransformerCell,
    OnSaveResult,
}

/// Per-provider error-handling policy: which error kinds are absorbed
/// (logged but never surfaced upward or allowed to abort their containing
/// operation) versus propagated. `ignore_all` is the `All` option from
/// spec §7.
#[derive(Debug, Clone, Default)]
pub struct ErrorHandlerMeta {
    ignore_all: bool,
    ignored: HashSet<IgnoreKind>,
}

impl ErrorHandlerMeta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ignore_all() -> Self {
        Self {
            ignore_all: true,
            ignored: HashSet::new(),
        }
    }

    pub fn with_ignored(kinds: impl IntoIterator<Item = IgnoreKind>) -> Self {
        Self {
            ignore_all: false,
            ignored: kinds.into_iter().collect(),
        }
    }

    pub fn ignore(&mut self, kind: IgnoreKind) -> &mut Self {
        self.ignored.insert(kind);
        self
    }

    pub fn is_ignored(&self, kind: IgnoreKind) -> bool {
        self.ignore_all || self.ignored.contains(&kind)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn merge_preserves_order_and_ors_error_bit() {
        let mut a = Diagnostics::new();
        a.info("a1");
        let mut b = Diagnostics::new();
        b.error("b1");
        b.info("b2");

        a.merge(b);

        assert!(a.has_error());
        let contents: Vec<_> = a.entries().iter().map(|d| d.content.as_str()).collect();
        assert_eq!(contents, vec!["a1", "b1", "b2"]);
    }

    #[test]
    fn has_error_is_sticky() {
        let mut d = Diagnostics::new();
        d.error("boom");
        d.merge(Diagnostics::new());
        assert!(d.has_error());
    }

    #[test]
    fn catch_panic_converts_to_error_diagnostic() {
        let result = catch_panic("test", || -> i32 { panic!("kaboom") });
        let diags = result.unwrap_err();
        assert!(diags.has_error());
        assert!(diags.entries()[0].content.contains("kaboom"));
    }

    #[test]
    fn catch_panic_passes_through_value() {
        let result = catch_panic("test", || 42);
        assert_eq!(result.unwrap(), 42);
    }

    #[test]
    fn error_handler_meta_respects_ignore_all() {
        let meta = ErrorHandlerMeta::ignore_all();
        assert!(meta.is_ignored(IgnoreKind::OnPullTable));
        assert!(meta.is_ignored(IgnoreKind::OnSaveResult));
    }

    #[test]
    fn error_handler_meta_respects_specific_kinds() {
        let meta = ErrorHandlerMeta::with_ignored([IgnoreKind::OnTransformerCell]);
        assert!(meta.is_ignored(IgnoreKind::OnTransformerCell));
        assert!(!meta.is_ignored(IgnoreKind::OnPullTable));
    }
}
