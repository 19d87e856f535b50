// SPDX-License-Identifier: AGPL-3.0-or-later
//! Doxia Pipeline - named conversions loaded from TOML
//!
//! A pipeline wires one parser to one output sink through an ordered chain
//! of decorators:
//! - Input: parser id (`apt`, `confluence`, `twiki`, `xdoc`, `fml`)
//! - Steps: `validate`, `index`, `create-anchors`, `unique-anchors`
//! - Output: sink id (`xhtml`, `events`)
//!
//! The first step sees the parser's events first.

use doxia_core::index::IndexObserver;
use doxia_core::{
    DoxiaError, IndexEntry, IndexingSink, MacroRegistry, ParseConfig, Parser, ParserExt,
    ParserRegistry, RenderConfig, Sink, SinkRegistry, UniqueAnchorNames, ValidatingSink,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Doxia(#[from] DoxiaError),

    #[error("Pipeline not found: {0}")]
    NotFound(String),

    #[error("Invalid pipeline configuration: {0}")]
    InvalidConfig(String),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Output is not valid UTF-8: {0}")]
    Output(#[from] std::string::FromUtf8Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// A named conversion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub name: String,
    /// Parser id
    pub input: String,
    #[serde(default)]
    pub steps: Vec<PipelineStep>,
    /// Sink id
    pub output: String,
    #[serde(default)]
    pub parse: ParseConfig,
    #[serde(default)]
    pub render: RenderConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PipelineStep {
    /// Reject ill-nested event streams
    Validate,
    /// Build the section index
    Index,
    /// Build the section index and emit an anchor before each section
    CreateAnchors,
    /// Reject duplicate anchor names
    UniqueAnchors,
}

impl PipelineStep {
    fn is_index(self) -> bool {
        matches!(self, PipelineStep::Index | PipelineStep::CreateAnchors)
    }
}

/// Top level of a pipeline file: `[[pipeline]]` tables
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineFile {
    #[serde(default, rename = "pipeline")]
    pub pipelines: Vec<Pipeline>,
}

/// Result of one conversion
#[derive(Debug, Clone, PartialEq)]
pub struct Conversion {
    pub output: String,
    /// Section index, when the pipeline had an index step
    pub index: Option<IndexEntry>,
}

/// Parser and sink lookup plus the decorator chain
pub struct Converter {
    parsers: ParserRegistry,
    sinks: SinkRegistry,
}

impl Converter {
    /// Every bundled parser, sink and macro
    pub fn new() -> Self {
        let macros = Arc::new(MacroRegistry::with_defaults());
        Self::with_registries(ParserRegistry::with_macros(macros), SinkRegistry::with_defaults())
    }

    pub fn with_registries(parsers: ParserRegistry, sinks: SinkRegistry) -> Self {
        Self { parsers, sinks }
    }

    pub fn parsers(&self) -> &ParserRegistry {
        &self.parsers
    }

    pub fn sinks(&self) -> &SinkRegistry {
        &self.sinks
    }

    /// Reject pipelines this converter could not run
    pub fn check(&self, pipeline: &Pipeline) -> Result<()> {
        if pipeline.name.trim().is_empty() {
            return Err(PipelineError::InvalidConfig(
                "pipeline name must not be empty".to_string(),
            ));
        }
        if !self.parsers.has(&pipeline.input) {
            return Err(PipelineError::InvalidConfig(format!(
                "pipeline '{}': unknown input '{}' (known: {})",
                pipeline.name,
                pipeline.input,
                self.parsers.ids().join(", ")
            )));
        }
        if !self.sinks.has(&pipeline.output) {
            return Err(PipelineError::InvalidConfig(format!(
                "pipeline '{}': unknown output '{}' (known: {})",
                pipeline.name,
                pipeline.output,
                self.sinks.ids().join(", ")
            )));
        }
        index_position(pipeline)?;
        Ok(())
    }

    /// Run `pipeline` over `input`, writing the sink's output to `out`
    pub fn convert(
        &self,
        pipeline: &Pipeline,
        name: &str,
        input: &str,
        out: &mut dyn Write,
    ) -> Result<Option<IndexEntry>> {
        let parser = self.parsers.get(&pipeline.input)?;
        let factory = self.sinks.get(&pipeline.output)?;
        tracing::debug!(
            pipeline = %pipeline.name,
            input = %pipeline.input,
            output = %pipeline.output,
            steps = pipeline.steps.len(),
            "converting"
        );

        let terminal = factory.create(Box::new(out), &pipeline.render);
        let Some(at) = index_position(pipeline)? else {
            let mut sink = decorate(terminal, &pipeline.steps);
            drive(parser, name, input, &mut sink, &pipeline.parse)?;
            return Ok(None);
        };

        let inner = decorate(terminal, &pipeline.steps[at + 1..]);
        let outer = &pipeline.steps[..at];
        let root = match pipeline.steps[at] {
            PipelineStep::CreateAnchors => indexed(
                IndexingSink::create_anchors(inner),
                outer,
                parser,
                name,
                input,
                &pipeline.parse,
            )?,
            _ => indexed(
                IndexingSink::new(inner),
                outer,
                parser,
                name,
                input,
                &pipeline.parse,
            )?,
        };
        Ok(Some(root))
    }
}

impl Default for Converter {
    fn default() -> Self {
        Self::new()
    }
}

/// Position of the single index step, if any
fn index_position(pipeline: &Pipeline) -> Result<Option<usize>> {
    let mut positions = pipeline
        .steps
        .iter()
        .enumerate()
        .filter(|(_, step)| step.is_index())
        .map(|(i, _)| i);
    let first = positions.next();
    if positions.next().is_some() {
        return Err(PipelineError::InvalidConfig(format!(
            "pipeline '{}': at most one index or create-anchors step",
            pipeline.name
        )));
    }
    Ok(first)
}

/// Wrap `sink` so that `steps[0]` receives events first
///
/// Index steps are split off by the caller.
fn decorate<'w>(mut sink: Box<dyn Sink + 'w>, steps: &[PipelineStep]) -> Box<dyn Sink + 'w> {
    for step in steps.iter().rev() {
        sink = match step {
            PipelineStep::Validate => Box::new(ValidatingSink::new(sink)),
            PipelineStep::UniqueAnchors => Box::new(UniqueAnchorNames::new(sink)),
            PipelineStep::Index | PipelineStep::CreateAnchors => sink,
        };
    }
    sink
}

fn indexed<'w, O: IndexObserver>(
    mut indexing: IndexingSink<Box<dyn Sink + 'w>, O>,
    outer: &[PipelineStep],
    parser: &dyn Parser,
    name: &str,
    input: &str,
    config: &ParseConfig,
) -> Result<IndexEntry> {
    {
        let mut sink = decorate(Box::new(&mut indexing), outer);
        drive(parser, name, input, &mut sink, config)?;
    }
    Ok(indexing.into_root_entry()?)
}

fn drive(
    parser: &dyn Parser,
    name: &str,
    input: &str,
    sink: &mut dyn Sink,
    config: &ParseConfig,
) -> Result<()> {
    parser.parse_str(input, name, sink, config)?;
    sink.flush()?;
    sink.close()?;
    Ok(())
}

/// Pipeline executor
pub struct PipelineExecutor {
    converter: Converter,
    pipelines: HashMap<String, Pipeline>,
}

impl PipelineExecutor {
    pub fn new() -> Self {
        Self::with_converter(Converter::new())
    }

    pub fn with_converter(converter: Converter) -> Self {
        Self {
            converter,
            pipelines: HashMap::new(),
        }
    }

    /// Load every pipeline in a TOML file; returns how many were added
    pub fn load_pipeline(&mut self, path: &Path) -> Result<usize> {
        tracing::debug!(path = %path.display(), "loading pipelines");
        let content = std::fs::read_to_string(path)?;
        self.load_str(&content)
    }

    pub fn load_str(&mut self, content: &str) -> Result<usize> {
        let file: PipelineFile = toml::from_str(content)?;
        let count = file.pipelines.len();
        for pipeline in file.pipelines {
            self.register(pipeline)?;
        }
        Ok(count)
    }

    pub fn register(&mut self, pipeline: Pipeline) -> Result<()> {
        self.converter.check(&pipeline)?;
        if self.pipelines.contains_key(&pipeline.name) {
            return Err(PipelineError::InvalidConfig(format!(
                "pipeline '{}' defined twice",
                pipeline.name
            )));
        }
        tracing::debug!(pipeline = %pipeline.name, "registered pipeline");
        self.pipelines.insert(pipeline.name.clone(), pipeline);
        Ok(())
    }

    pub fn pipeline(&self, name: &str) -> Option<&Pipeline> {
        self.pipelines.get(name)
    }

    /// Registered pipeline names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.pipelines.keys().cloned().collect();
        names.sort();
        names
    }

    /// Execute a pipeline; the pipeline name doubles as the document name
    pub fn execute(&self, pipeline_name: &str, input: &str) -> Result<String> {
        Ok(self.run(pipeline_name, pipeline_name, input)?.output)
    }

    /// Execute a pipeline over a document called `document`
    pub fn run(&self, pipeline_name: &str, document: &str, input: &str) -> Result<Conversion> {
        let pipeline = self
            .pipelines
            .get(pipeline_name)
            .ok_or_else(|| PipelineError::NotFound(pipeline_name.to_string()))?;

        let mut buffer = Vec::new();
        let index = self
            .converter
            .convert(pipeline, document, input, &mut buffer)?;
        Ok(Conversion {
            output: String::from_utf8(buffer)?,
            index,
        })
    }
}

impl Default for PipelineExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write as _;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    const PIPELINES: &str = r#"
[[pipeline]]
name = "apt-html"
input = "apt"
steps = ["validate", "create-anchors", "unique-anchors"]
output = "xhtml"

[pipeline.render]
full_document = false

[[pipeline]]
name = "twiki-events"
input = "twiki"
steps = ["index"]
output = "events"

[pipeline.parse]
validate = true
"#;

    const APT: &str = "Intro\n\n  Some <<bold>> text.\n\n* Detail\n\n  More.\n";

    fn executor() -> PipelineExecutor {
        init_tracing();
        let mut executor = PipelineExecutor::new();
        assert_eq!(executor.load_str(PIPELINES).unwrap(), 2);
        executor
    }

    #[test]
    fn test_load_pipelines() {
        let executor = executor();
        assert_eq!(executor.names(), vec!["apt-html", "twiki-events"]);

        let apt = executor.pipeline("apt-html").unwrap();
        assert_eq!(
            apt.steps,
            vec![
                PipelineStep::Validate,
                PipelineStep::CreateAnchors,
                PipelineStep::UniqueAnchors
            ]
        );
        assert!(!apt.render.full_document);
        assert!(apt.parse.execute_macros);
        assert!(executor.pipeline("twiki-events").unwrap().parse.validate);
    }

    #[test]
    fn test_apt_to_xhtml_with_anchors() {
        let conversion = executor().run("apt-html", "intro.apt", APT).unwrap();
        let html = conversion.output;
        assert!(html.contains("<a name=\"intro\">"), "{html}");
        assert!(html.contains("<h2>Intro</h2>"), "{html}");
        assert!(html.contains("<b>bold</b>"), "{html}");
        assert!(!html.contains("<html"));

        let index = conversion.index.unwrap();
        let titles: Vec<&str> = index.iter().filter_map(IndexEntry::title).collect();
        assert_eq!(titles, vec!["Intro", "Detail"]);
        assert_eq!(index.find("detail").and_then(IndexEntry::level), Some(2));
    }

    #[test]
    fn test_twiki_to_event_log() {
        let output = executor()
            .execute("twiki-events", "---+ Title\nBody text\n")
            .unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert!(lines.first().unwrap().contains("\"start\""));
        assert!(lines.last().unwrap().contains("\"close\""));
        assert!(output.contains("Body text"));
    }

    #[test]
    fn test_duplicate_anchor_is_rejected() {
        let err = executor()
            .execute("apt-html", "  {dup}one and {dup}two\n")
            .unwrap_err();
        assert!(err.to_string().contains("used more than once"), "{err}");
    }

    #[test]
    fn test_unknown_pipeline() {
        let err = executor().execute("nope", "").unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(name) if name == "nope"));
    }

    #[test]
    fn test_invalid_definitions() {
        let mut executor = PipelineExecutor::new();
        let unknown_input = "[[pipeline]]\nname = \"x\"\ninput = \"rtf\"\noutput = \"xhtml\"\n";
        assert!(matches!(
            executor.load_str(unknown_input),
            Err(PipelineError::InvalidConfig(_))
        ));

        let two_indexes = "[[pipeline]]\nname = \"x\"\ninput = \"apt\"\noutput = \"xhtml\"\n\
                           steps = [\"index\", \"create-anchors\"]\n";
        assert!(matches!(
            executor.load_str(two_indexes),
            Err(PipelineError::InvalidConfig(_))
        ));

        let bad_step = "[[pipeline]]\nname = \"x\"\ninput = \"apt\"\noutput = \"xhtml\"\n\
                        steps = [\"shout\"]\n";
        assert!(matches!(executor.load_str(bad_step), Err(PipelineError::Toml(_))));

        let duplicate = "[[pipeline]]\nname = \"x\"\ninput = \"apt\"\noutput = \"xhtml\"\n";
        executor.load_str(duplicate).unwrap();
        assert!(executor.load_str(duplicate).is_err());
    }

    #[test]
    fn test_load_pipeline_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(PIPELINES.as_bytes()).unwrap();

        let mut executor = PipelineExecutor::new();
        assert_eq!(executor.load_pipeline(file.path()).unwrap(), 2);
        assert!(executor.pipeline("apt-html").is_some());

        let missing = executor.load_pipeline(Path::new("/nonexistent/pipelines.toml"));
        assert!(matches!(missing, Err(PipelineError::Io(_))));
    }

    #[test]
    fn test_converter_without_index_step() {
        let converter = Converter::new();
        let pipeline = Pipeline {
            name: "plain".to_string(),
            input: "confluence".to_string(),
            steps: vec![PipelineStep::Validate],
            output: "xhtml".to_string(),
            parse: ParseConfig::default(),
            render: RenderConfig {
                full_document: false,
                ..RenderConfig::default()
            },
        };
        converter.check(&pipeline).unwrap();

        let mut out = Vec::new();
        let index = converter
            .convert(&pipeline, "page", "h1. Heading\n\nSome *bold* text\n", &mut out)
            .unwrap();
        assert!(index.is_none());
        let html = String::from_utf8(out).unwrap();
        assert!(html.contains("<b>bold</b>"), "{html}");
    }
}
