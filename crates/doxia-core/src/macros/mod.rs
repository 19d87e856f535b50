// SPDX-License-Identifier: AGPL-3.0-or-later
//! Macros embedded in documents (`%{toc}` in APT, `<macro name="toc"/>` in XDOC)

mod echo;
mod toc;

pub use echo::EchoMacro;
pub use toc::TocMacro;

use crate::registry::MacroRegistry;
use crate::sink::Sink;
use crate::traits::{DoxiaError, ParseConfig, Parser, Result};
use std::collections::BTreeMap;
use std::path::Path;

/// Everything a macro may look at while it runs
pub struct MacroRequest<'a> {
    /// Full source of the document the macro sits in
    pub source: &'a str,
    /// Parser currently reading that document
    pub parser: &'a dyn Parser,
    pub config: &'a ParseConfig,
    pub parameters: BTreeMap<String, String>,
    pub base_dir: Option<&'a Path>,
}

impl<'a> MacroRequest<'a> {
    pub fn new(
        source: &'a str,
        parser: &'a dyn Parser,
        config: &'a ParseConfig,
        parameters: BTreeMap<String, String>,
    ) -> Self {
        Self {
            source,
            parser,
            config,
            parameters,
            base_dir: config.base_dir.as_deref(),
        }
    }

    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }

    /// Integer parameter; absent or non-numeric values give `default`,
    /// negative ones are an error
    pub fn int_parameter(&self, macro_id: &str, name: &str, default: u32) -> Result<u32> {
        let Some(value) = self.parameter(name).map(str::trim).filter(|v| !v.is_empty()) else {
            return Ok(default);
        };
        match value.parse::<i64>() {
            Ok(n) if n < 0 => Err(DoxiaError::Macro {
                id: macro_id.to_string(),
                message: format!("the {name}={n} should be positive"),
            }),
            Ok(n) => Ok(u32::try_from(n).unwrap_or(u32::MAX)),
            Err(_) => Ok(default),
        }
    }
}

pub trait Macro: Send + Sync {
    fn execute(&self, sink: &mut dyn Sink, request: &MacroRequest<'_>) -> Result<()>;
}

/// Resolve `id` and run it, honoring the request's parse configuration
///
/// Unknown ids are skipped with a warning unless `fail_on_missing_macro`
/// is set. Nothing runs during a nested parse.
pub fn execute_macro(
    registry: Option<&MacroRegistry>,
    id: &str,
    sink: &mut dyn Sink,
    request: &MacroRequest<'_>,
) -> Result<()> {
    if !request.config.execute_macros {
        tracing::debug!(id, "macro execution disabled, skipping");
        return Ok(());
    }
    let found = registry.map(|macros| macros.get(id));
    match found {
        Some(Ok(entry)) => {
            tracing::debug!(id, "executing macro");
            entry.execute(sink, request)
        }
        Some(Err(err)) if request.config.fail_on_missing_macro => Err(err),
        None if request.config.fail_on_missing_macro => Err(DoxiaError::NotFound {
            kind: "macro",
            id: id.to_string(),
        }),
        _ => {
            tracing::warn!(id, "unknown macro, skipping");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{EventCollector, NullSink};

    struct NoParser;

    impl Parser for NoParser {
        fn id(&self) -> &'static str {
            "none"
        }

        fn parse(
            &self,
            _reader: &mut dyn std::io::BufRead,
            _name: &str,
            _sink: &mut dyn Sink,
            _config: &ParseConfig,
        ) -> Result<()> {
            Ok(())
        }
    }

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_int_parameter() {
        let config = ParseConfig::default();
        let request = MacroRequest::new(
            "",
            &NoParser,
            &config,
            params(&[("a", "3"), ("b", "x"), ("c", "-1"), ("d", " ")]),
        );
        assert_eq!(request.int_parameter("toc", "a", 0).unwrap(), 3);
        assert_eq!(request.int_parameter("toc", "b", 7).unwrap(), 7);
        assert_eq!(request.int_parameter("toc", "d", 5).unwrap(), 5);
        assert_eq!(request.int_parameter("toc", "missing", 5).unwrap(), 5);
        assert!(matches!(
            request.int_parameter("toc", "c", 0),
            Err(DoxiaError::Macro { .. })
        ));
    }

    #[test]
    fn test_missing_macro_is_skipped_by_default() {
        let config = ParseConfig::default();
        let request = MacroRequest::new("", &NoParser, &config, BTreeMap::new());
        let registry = MacroRegistry::with_defaults();
        assert!(execute_macro(Some(&registry), "snippet", &mut NullSink, &request).is_ok());
        assert!(execute_macro(None, "toc", &mut NullSink, &request).is_ok());
    }

    #[test]
    fn test_missing_macro_fails_when_configured() {
        let config = ParseConfig {
            fail_on_missing_macro: true,
            ..ParseConfig::default()
        };
        let request = MacroRequest::new("", &NoParser, &config, BTreeMap::new());
        let registry = MacroRegistry::with_defaults();
        assert!(matches!(
            execute_macro(Some(&registry), "snippet", &mut NullSink, &request),
            Err(DoxiaError::NotFound { kind: "macro", .. })
        ));
    }

    #[test]
    fn test_nested_parse_skips_macros() {
        let config = ParseConfig {
            execute_macros: false,
            ..ParseConfig::default()
        };
        let request = MacroRequest::new("", &NoParser, &config, params(&[("k", "v")]));
        let registry = MacroRegistry::with_defaults();
        let mut sink = EventCollector::new();
        execute_macro(Some(&registry), "echo", &mut sink, &request).unwrap();
        assert!(sink.events().is_empty());
    }
}
