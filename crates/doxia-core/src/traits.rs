// SPDX-License-Identifier: AGPL-3.0-or-later
//! Parser and sink-factory traits, shared configuration and the crate error type

use crate::sink::{Sink, ValidatingSink};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, Write};
use std::path::PathBuf;

/// Malformed input, located in its source document
#[derive(Debug, thiserror::Error)]
#[error("{dialect} parse error in {source_name}{}: {message}", at_line(.line))]
pub struct ParseError {
    /// Dialect id of the parser that failed (`apt`, `twiki`, ...)
    pub dialect: String,
    /// Logical name of the document
    pub source_name: String,
    /// 1-based line of the offending construct, when known
    pub line: Option<usize>,
    pub message: String,
    #[source]
    pub cause: Option<Box<DoxiaError>>,
}

fn at_line(line: &Option<usize>) -> String {
    match line {
        Some(line) => format!(" at line {line}"),
        None => String::new(),
    }
}

impl ParseError {
    pub fn new(
        dialect: impl Into<String>,
        source_name: impl Into<String>,
        line: Option<usize>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            dialect: dialect.into(),
            source_name: source_name.into(),
            line,
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: DoxiaError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }
}

/// Error type shared by parsers, sinks, registries and macros
#[derive(Debug, thiserror::Error)]
pub enum DoxiaError {
    #[error(transparent)]
    Parse(Box<ParseError>),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// A producer broke the begin/end contract
    #[error("Nesting violation: {0}")]
    Structure(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Macro '{id}' failed: {message}")]
    Macro { id: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl From<ParseError> for DoxiaError {
    fn from(err: ParseError) -> Self {
        DoxiaError::Parse(Box::new(err))
    }
}

impl DoxiaError {
    /// The parse error inside, if this is one
    pub fn as_parse(&self) -> Option<&ParseError> {
        match self {
            DoxiaError::Parse(err) => Some(err),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, DoxiaError>;

/// Deepest list or element nesting a parser accepts
pub const MAX_NESTING_DEPTH: usize = 128;

/// Configuration for parsing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParseConfig {
    /// Emit source comments as `comment` events
    pub emit_comments: bool,
    /// Run embedded macros (cleared for the nested parse a macro runs itself)
    pub execute_macros: bool,
    /// Fail the parse on an unregistered macro id instead of skipping it
    pub fail_on_missing_macro: bool,
    /// Check begin/end nesting while parsing
    pub validate: bool,
    /// Base directory handed to macros
    pub base_dir: Option<PathBuf>,
}

impl Default for ParseConfig {
    fn default() -> Self {
        Self {
            emit_comments: false,
            execute_macros: true,
            fail_on_missing_macro: false,
            validate: false,
            base_dir: None,
        }
    }
}

/// Configuration for the bundled serializing sinks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Line separator written between block elements
    pub eol: String,
    /// Wrap output in `<html>`/`<head>`/`<body>` scaffolding
    pub full_document: bool,
    /// Pretty-print JSON event logs
    pub pretty: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            eol: "\n".to_string(),
            full_document: true,
            pretty: false,
        }
    }
}

/// Parser trait: drive a sink from a dialect's source text
pub trait Parser: Send + Sync {
    /// Registry id of the dialect this parser reads
    fn id(&self) -> &'static str;

    /// Parse `reader`, a document called `name`, into `sink`
    ///
    /// The sink is neither flushed nor closed; its owner does that.
    fn parse(
        &self,
        reader: &mut dyn BufRead,
        name: &str,
        sink: &mut dyn Sink,
        config: &ParseConfig,
    ) -> Result<()>;
}

/// Convenience entry points shared by every parser
pub trait ParserExt: Parser {
    /// Parse an in-memory document, validating nesting when configured to
    fn parse_str(
        &self,
        input: &str,
        name: &str,
        sink: &mut dyn Sink,
        config: &ParseConfig,
    ) -> Result<()> {
        let mut reader = input.as_bytes();
        if config.validate {
            let mut validating = ValidatingSink::new(sink);
            self.parse(&mut reader, name, &mut validating, config)?;
            validating.finish()
        } else {
            self.parse(&mut reader, name, sink, config)
        }
    }
}

// Blanket implementation
impl<T: Parser + ?Sized> ParserExt for T {}

/// Creates terminal sinks writing to a byte stream
pub trait SinkFactory: Send + Sync {
    /// Registry id of the output format
    fn id(&self) -> &'static str;

    fn create<'w>(&self, writer: Box<dyn Write + 'w>, config: &RenderConfig) -> Box<dyn Sink + 'w>;
}
