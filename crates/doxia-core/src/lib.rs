// SPDX-License-Identifier: AGPL-3.0-or-later
//! Doxia Core - Event-driven parsing of lightweight markup dialects
//!
//! This crate provides:
//! - The sink event contract every parser emits into
//! - A line source with one line of pushback, a block model and a list-tree builder
//! - Parsers for APT, Confluence, TWiki, XDOC and FML
//! - An indexing sink that builds a section tree and the `toc` macro on top of it
//! - Registries for parsers, sinks and macros

pub mod block;
pub mod ids;
pub mod index;
pub mod list;
pub mod macros;
pub mod modules;
pub mod registry;
pub mod sink;
pub mod source;
pub mod traits;

pub use block::{Block, FatherKind};
pub use index::{IndexEntry, IndexingSink, UniqueAnchorNames};
pub use registry::{MacroRegistry, ParserRegistry, SinkRegistry};
pub use sink::{Attributes, Element, EventCollector, Sink, SinkEvent, ValidatingSink};
pub use source::LineSource;
pub use traits::{
    DoxiaError, ParseConfig, ParseError, Parser, ParserExt, RenderConfig, Result, SinkFactory,
};
