// SPDX-License-Identifier: AGPL-3.0-or-later
//! String-id registries for parsers, sink factories and macros
//!
//! One generic [`Registry`] is reused for all three; lookups of an unknown
//! id fail with [`DoxiaError::NotFound`] naming the registry kind.

use crate::macros::{EchoMacro, Macro, TocMacro};
use crate::sink::{EventLogSinkFactory, XhtmlSinkFactory};
use crate::traits::{DoxiaError, Parser, Result, SinkFactory};
use std::collections::HashMap;
use std::sync::Arc;

pub struct Registry<T: ?Sized> {
    kind: &'static str,
    entries: HashMap<String, Box<T>>,
}

pub type ParserRegistry = Registry<dyn Parser>;
pub type SinkRegistry = Registry<dyn SinkFactory>;
pub type MacroRegistry = Registry<dyn Macro>;

impl<T: ?Sized> Registry<T> {
    /// Empty registry; `kind` names the entries in error messages
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: HashMap::new(),
        }
    }

    /// Register an entry, replacing any previous one with the same id
    pub fn register(&mut self, id: impl Into<String>, entry: Box<T>) {
        let id = id.into();
        tracing::debug!(kind = self.kind, id = %id, "registering");
        self.entries.insert(id, entry);
    }

    pub fn get(&self, id: &str) -> Result<&T> {
        self.entries
            .get(id)
            .map(Box::as_ref)
            .ok_or_else(|| DoxiaError::NotFound {
                kind: self.kind,
                id: id.to_string(),
            })
    }

    pub fn has(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Registered ids, sorted
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.entries.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Registry<dyn Parser> {
    pub fn add<P: Parser + 'static>(&mut self, parser: P) {
        self.register(parser.id(), Box::new(parser));
    }

    /// Every built-in dialect, sharing the default macros
    pub fn with_defaults() -> Self {
        Self::with_macros(Arc::new(MacroRegistry::with_defaults()))
    }

    /// Every built-in dialect, resolving macros through `macros`
    #[allow(unused_variables, unused_mut)]
    pub fn with_macros(macros: Arc<MacroRegistry>) -> Self {
        let mut registry = Self::new("parser");
        #[cfg(feature = "apt")]
        registry.add(crate::modules::AptParser::new().with_macros(Arc::clone(&macros)));
        #[cfg(feature = "confluence")]
        registry.add(crate::modules::ConfluenceParser::new());
        #[cfg(feature = "twiki")]
        registry.add(crate::modules::TwikiParser::new());
        #[cfg(feature = "xdoc")]
        registry.add(crate::modules::XdocParser::new().with_macros(Arc::clone(&macros)));
        #[cfg(feature = "fml")]
        registry.add(crate::modules::FmlParser::new());
        registry
    }
}

impl Registry<dyn SinkFactory> {
    pub fn add<F: SinkFactory + 'static>(&mut self, factory: F) {
        self.register(factory.id(), Box::new(factory));
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new("sink");
        registry.add(XhtmlSinkFactory);
        registry.add(EventLogSinkFactory);
        registry
    }
}

impl Registry<dyn Macro> {
    pub fn add<M: Macro + 'static>(&mut self, id: &str, entry: M) {
        self.register(id, Box::new(entry));
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new("macro");
        registry.add("toc", TocMacro);
        registry.add("echo", EchoMacro);
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::Sink;
    use crate::macros::MacroRequest;

    struct Shout;

    impl Macro for Shout {
        fn execute(&self, sink: &mut dyn Sink, _request: &MacroRequest<'_>) -> Result<()> {
            sink.text("HEY")
        }
    }

    #[test]
    fn test_missing_id_names_registry_kind() {
        let registry = MacroRegistry::new("macro");
        let err = registry.get("snippet").err().unwrap();
        assert!(matches!(
            &err,
            DoxiaError::NotFound { kind: "macro", id } if id == "snippet"
        ));
        assert_eq!(err.to_string(), "macro not found: snippet");
    }

    #[test]
    fn test_register_replaces() {
        let mut registry = MacroRegistry::with_defaults();
        assert!(registry.has("echo"));
        registry.add("echo", Shout);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.ids(), vec!["echo", "toc"]);
    }

    #[test]
    fn test_default_sinks() {
        let registry = SinkRegistry::with_defaults();
        assert_eq!(registry.ids(), vec!["events", "xhtml"]);
        assert_eq!(registry.get("xhtml").unwrap().id(), "xhtml");
    }

    #[cfg(all(feature = "apt", feature = "confluence", feature = "twiki", feature = "fml"))]
    #[test]
    fn test_default_parsers() {
        let registry = ParserRegistry::with_defaults();
        assert_eq!(registry.ids(), vec!["apt", "confluence", "fml", "twiki", "xdoc"]);
        assert!(matches!(
            registry.get("markdown"),
            Err(DoxiaError::NotFound { kind: "parser", .. })
        ));
    }
}
