// SPDX-License-Identifier: AGPL-3.0-or-later
//! Sink event contract
//!
//! A document is a linear stream of [`SinkEvent`]s. Paired elements open
//! with [`SinkEvent::Start`] and close with [`SinkEvent::End`] in stack
//! order; everything else is a leaf event. Producers (parsers, block
//! traversal, macros) push events into a [`Sink`]; decorators observe or
//! validate the stream on its way to a terminal sink.

mod events;
mod validating;
mod xhtml;

pub use events::{EventLogSink, EventLogSinkFactory};
pub use validating::ValidatingSink;
pub use xhtml::{XhtmlSink, XhtmlSinkFactory};

use crate::traits::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Well-known attribute names
pub mod attr {
    pub const HREF: &str = "href";
    pub const NAME: &str = "name";
    pub const NUMBERING: &str = "numbering";
    pub const JUSTIFICATION: &str = "justification";
    pub const GRID: &str = "grid";
    pub const BOXED: &str = "boxed";
    pub const ID: &str = "id";
    pub const CLASS: &str = "class";
    pub const STYLE: &str = "style";
    pub const ALT: &str = "alt";
    pub const TITLE: &str = "title";
    pub const WIDTH: &str = "width";
    pub const HEIGHT: &str = "height";
}

/// Highest section level in the event vocabulary
pub const MAX_SECTION_LEVEL: u8 = 5;

/// Paired structural elements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Element {
    Head,
    Title,
    Author,
    Date,
    Body,
    Section(u8),
    SectionTitle(u8),
    List,
    ListItem,
    NumberedList,
    NumberedListItem,
    DefinitionList,
    DefinitionListItem,
    DefinedTerm,
    Definition,
    Figure,
    FigureCaption,
    Table,
    TableRows,
    TableRow,
    TableCell,
    TableHeaderCell,
    TableCaption,
    Paragraph,
    Verbatim,
    Italic,
    Bold,
    Monospaced,
    Link,
    Anchor,
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Element::Section(level) => return write!(f, "section{level}"),
            Element::SectionTitle(level) => return write!(f, "sectionTitle{level}"),
            Element::Head => "head",
            Element::Title => "title",
            Element::Author => "author",
            Element::Date => "date",
            Element::Body => "body",
            Element::List => "list",
            Element::ListItem => "listItem",
            Element::NumberedList => "numberedList",
            Element::NumberedListItem => "numberedListItem",
            Element::DefinitionList => "definitionList",
            Element::DefinitionListItem => "definitionListItem",
            Element::DefinedTerm => "definedTerm",
            Element::Definition => "definition",
            Element::Figure => "figure",
            Element::FigureCaption => "figureCaption",
            Element::Table => "table",
            Element::TableRows => "tableRows",
            Element::TableRow => "tableRow",
            Element::TableCell => "tableCell",
            Element::TableHeaderCell => "tableHeaderCell",
            Element::TableCaption => "tableCaption",
            Element::Paragraph => "paragraph",
            Element::Verbatim => "verbatim",
            Element::Italic => "italic",
            Element::Bold => "bold",
            Element::Monospaced => "monospaced",
            Element::Link => "link",
            Element::Anchor => "anchor",
        };
        f.write_str(name)
    }
}

/// List numbering styles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Numbering {
    #[default]
    Decimal,
    LowerAlpha,
    UpperAlpha,
    LowerRoman,
    UpperRoman,
}

impl Numbering {
    pub fn as_str(&self) -> &'static str {
        match self {
            Numbering::Decimal => "decimal",
            Numbering::LowerAlpha => "lower-alpha",
            Numbering::UpperAlpha => "upper-alpha",
            Numbering::LowerRoman => "lower-roman",
            Numbering::UpperRoman => "upper-roman",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "decimal" => Some(Numbering::Decimal),
            "lower-alpha" => Some(Numbering::LowerAlpha),
            "upper-alpha" => Some(Numbering::UpperAlpha),
            "lower-roman" => Some(Numbering::LowerRoman),
            "upper-roman" => Some(Numbering::UpperRoman),
            _ => None,
        }
    }
}

/// Table column justification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Justify {
    Center,
    Left,
    Right,
}

impl Justify {
    pub fn as_str(&self) -> &'static str {
        match self {
            Justify::Center => "center",
            Justify::Left => "left",
            Justify::Right => "right",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "center" => Some(Justify::Center),
            "left" => Some(Justify::Left),
            "right" => Some(Justify::Right),
            _ => None,
        }
    }
}

/// Open attribute set attached to an event
///
/// Keys a sink does not recognize are ignored, never rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attributes(BTreeMap<String, String>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn href(&self) -> Option<&str> {
        self.get(attr::HREF)
    }

    pub fn name(&self) -> Option<&str> {
        self.get(attr::NAME)
    }

    /// Numbering of a numbered list; unknown values fall back to decimal
    pub fn numbering(&self) -> Numbering {
        self.get(attr::NUMBERING)
            .and_then(Numbering::from_name)
            .unwrap_or_default()
    }

    /// Per-column justification of a table, skipping unknown entries
    pub fn justification(&self) -> Vec<Justify> {
        self.get(attr::JUSTIFICATION)
            .map(|value| value.split(',').filter_map(Justify::from_name).collect())
            .unwrap_or_default()
    }

    pub fn grid(&self) -> bool {
        self.flag(attr::GRID)
    }

    pub fn boxed(&self) -> bool {
        self.flag(attr::BOXED)
    }

    fn flag(&self, key: &str) -> bool {
        matches!(self.get(key), Some("true"))
    }
}

/// One event of the document stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "args", rename_all = "snake_case")]
pub enum SinkEvent {
    Start(Element, Attributes),
    End(Element),
    Text(String, Attributes),
    /// Passed through without escaping
    RawText(String),
    LineBreak,
    NonBreakingSpace,
    HorizontalRule,
    PageBreak,
    FigureGraphics(String, Attributes),
    Comment(String),
    /// Dialect construct outside the fixed vocabulary
    Unknown {
        name: String,
        params: Vec<String>,
        attributes: Attributes,
    },
    Flush,
    Close,
}

impl SinkEvent {
    /// Short event name (`section1`, `section1_`, `text`, ...)
    pub fn name(&self) -> String {
        match self {
            SinkEvent::Start(element, _) => element.to_string(),
            SinkEvent::End(element) => format!("{element}_"),
            SinkEvent::Text(..) => "text".to_string(),
            SinkEvent::RawText(_) => "rawText".to_string(),
            SinkEvent::LineBreak => "lineBreak".to_string(),
            SinkEvent::NonBreakingSpace => "nonBreakingSpace".to_string(),
            SinkEvent::HorizontalRule => "horizontalRule".to_string(),
            SinkEvent::PageBreak => "pageBreak".to_string(),
            SinkEvent::FigureGraphics(..) => "figureGraphics".to_string(),
            SinkEvent::Comment(_) => "comment".to_string(),
            SinkEvent::Unknown { .. } => "unknown".to_string(),
            SinkEvent::Flush => "flush".to_string(),
            SinkEvent::Close => "close".to_string(),
        }
    }
}

/// Push-based consumer of document events
///
/// Only [`Sink::event`] is required. The provided methods build the
/// matching event so producers read like the document they emit. A sink
/// is not meant to be shared between concurrent producers.
pub trait Sink {
    fn event(&mut self, event: SinkEvent) -> Result<()>;

    fn start(&mut self, element: Element) -> Result<()> {
        self.event(SinkEvent::Start(element, Attributes::new()))
    }

    fn start_with(&mut self, element: Element, attributes: Attributes) -> Result<()> {
        self.event(SinkEvent::Start(element, attributes))
    }

    fn end(&mut self, element: Element) -> Result<()> {
        self.event(SinkEvent::End(element))
    }

    fn section(&mut self, level: u8) -> Result<()> {
        self.start(Element::Section(level))
    }

    fn section_(&mut self, level: u8) -> Result<()> {
        self.end(Element::Section(level))
    }

    fn section_title(&mut self, level: u8) -> Result<()> {
        self.start(Element::SectionTitle(level))
    }

    fn section_title_(&mut self, level: u8) -> Result<()> {
        self.end(Element::SectionTitle(level))
    }

    fn numbered_list(&mut self, numbering: Numbering) -> Result<()> {
        self.start_with(
            Element::NumberedList,
            Attributes::new().with(attr::NUMBERING, numbering.as_str()),
        )
    }

    fn table_rows(&mut self, justification: &[Justify], grid: bool) -> Result<()> {
        let mut attributes = Attributes::new();
        if !justification.is_empty() {
            let joined: Vec<&str> = justification.iter().map(Justify::as_str).collect();
            attributes.insert(attr::JUSTIFICATION, joined.join(","));
        }
        if grid {
            attributes.insert(attr::GRID, "true");
        }
        self.start_with(Element::TableRows, attributes)
    }

    fn verbatim(&mut self, boxed: bool) -> Result<()> {
        let attributes = if boxed {
            Attributes::new().with(attr::BOXED, "true")
        } else {
            Attributes::new()
        };
        self.start_with(Element::Verbatim, attributes)
    }

    fn link(&mut self, href: &str) -> Result<()> {
        self.start_with(Element::Link, Attributes::new().with(attr::HREF, href))
    }

    fn link_(&mut self) -> Result<()> {
        self.end(Element::Link)
    }

    fn anchor(&mut self, name: &str) -> Result<()> {
        self.start_with(Element::Anchor, Attributes::new().with(attr::NAME, name))
    }

    fn anchor_(&mut self) -> Result<()> {
        self.end(Element::Anchor)
    }

    fn text(&mut self, text: &str) -> Result<()> {
        self.event(SinkEvent::Text(text.to_string(), Attributes::new()))
    }

    fn raw_text(&mut self, text: &str) -> Result<()> {
        self.event(SinkEvent::RawText(text.to_string()))
    }

    fn line_break(&mut self) -> Result<()> {
        self.event(SinkEvent::LineBreak)
    }

    fn non_breaking_space(&mut self) -> Result<()> {
        self.event(SinkEvent::NonBreakingSpace)
    }

    fn horizontal_rule(&mut self) -> Result<()> {
        self.event(SinkEvent::HorizontalRule)
    }

    fn page_break(&mut self) -> Result<()> {
        self.event(SinkEvent::PageBreak)
    }

    fn figure_graphics(&mut self, src: &str) -> Result<()> {
        self.event(SinkEvent::FigureGraphics(src.to_string(), Attributes::new()))
    }

    fn comment(&mut self, text: &str) -> Result<()> {
        self.event(SinkEvent::Comment(text.to_string()))
    }

    fn unknown(&mut self, name: &str, params: Vec<String>, attributes: Attributes) -> Result<()> {
        self.event(SinkEvent::Unknown {
            name: name.to_string(),
            params,
            attributes,
        })
    }

    fn flush(&mut self) -> Result<()> {
        self.event(SinkEvent::Flush)
    }

    fn close(&mut self) -> Result<()> {
        self.event(SinkEvent::Close)
    }
}

impl<S: Sink + ?Sized> Sink for &mut S {
    fn event(&mut self, event: SinkEvent) -> Result<()> {
        (**self).event(event)
    }
}

impl<S: Sink + ?Sized> Sink for Box<S> {
    fn event(&mut self, event: SinkEvent) -> Result<()> {
        (**self).event(event)
    }
}

/// Discards every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl Sink for NullSink {
    fn event(&mut self, _event: SinkEvent) -> Result<()> {
        Ok(())
    }
}

/// Records every event in order
#[derive(Debug, Clone, Default)]
pub struct EventCollector {
    events: Vec<SinkEvent>,
}

impl EventCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[SinkEvent] {
        &self.events
    }

    pub fn into_events(self) -> Vec<SinkEvent> {
        self.events
    }

    /// Event names in order, handy for sequence assertions
    pub fn names(&self) -> Vec<String> {
        self.events.iter().map(SinkEvent::name).collect()
    }

    /// Concatenation of all text events
    pub fn collected_text(&self) -> String {
        self.events
            .iter()
            .filter_map(|e| match e {
                SinkEvent::Text(text, _) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Replay the recorded events into another sink
    pub fn replay(&self, sink: &mut dyn Sink) -> Result<()> {
        for event in &self.events {
            sink.event(event.clone())?;
        }
        Ok(())
    }
}

impl Sink for EventCollector {
    fn event(&mut self, event: SinkEvent) -> Result<()> {
        self.events.push(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_event_names() {
        let mut sink = EventCollector::new();
        sink.section(2).unwrap();
        sink.section_title(2).unwrap();
        sink.text("Intro").unwrap();
        sink.section_title_(2).unwrap();
        sink.link("#top").unwrap();
        sink.link_().unwrap();
        sink.section_(2).unwrap();

        assert_eq!(
            sink.names(),
            vec![
                "section2",
                "sectionTitle2",
                "text",
                "sectionTitle2_",
                "link",
                "link_",
                "section2_"
            ]
        );
    }

    #[test]
    fn test_typed_arguments_travel_as_attributes() {
        let mut sink = EventCollector::new();
        sink.numbered_list(Numbering::UpperRoman).unwrap();
        sink.table_rows(&[Justify::Center, Justify::Right], true).unwrap();
        sink.verbatim(true).unwrap();

        let attrs: Vec<&Attributes> = sink
            .events()
            .iter()
            .filter_map(|e| match e {
                SinkEvent::Start(_, a) => Some(a),
                _ => None,
            })
            .collect();
        assert_eq!(attrs[0].numbering(), Numbering::UpperRoman);
        assert_eq!(attrs[1].justification(), vec![Justify::Center, Justify::Right]);
        assert!(attrs[1].grid());
        assert!(attrs[2].boxed());
    }

    #[test]
    fn test_unknown_attribute_values_are_tolerated() {
        let attrs = Attributes::new()
            .with(attr::NUMBERING, "klingon")
            .with(attr::JUSTIFICATION, "left,diagonal,right")
            .with("data-future", "1");
        assert_eq!(attrs.numbering(), Numbering::Decimal);
        assert_eq!(attrs.justification(), vec![Justify::Left, Justify::Right]);
        assert!(!attrs.grid());
    }

    #[test]
    fn test_event_serde_roundtrip() {
        let event = SinkEvent::Start(
            Element::Section(3),
            Attributes::new().with(attr::ID, "intro"),
        );
        let json = serde_json::to_string(&event).unwrap();
        let back: SinkEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, back);
    }

    #[test]
    fn test_collector_replay() {
        let mut first = EventCollector::new();
        first.start(Element::Paragraph).unwrap();
        first.text("hi").unwrap();
        first.end(Element::Paragraph).unwrap();

        let mut second = EventCollector::new();
        first.replay(&mut second).unwrap();
        assert_eq!(first.events(), second.events());
        assert_eq!(second.collected_text(), "hi");
    }
}
