// SPDX-License-Identifier: AGPL-3.0-or-later
//! XDOC parser
//!
//! `<document>` with optional `<properties>` and a `<body>` of sections,
//! subsections and an XHTML subset. Elements outside that subset reach the
//! sink as `unknown` start and end events around their content.

use super::located;
use super::xml::{self, XmlElement, XmlNode};
use crate::macros::{execute_macro, MacroRequest};
use crate::registry::MacroRegistry;
use crate::sink::{attr, Attributes, Element, Numbering, Sink, SinkEvent};
use crate::traits::{ParseConfig, ParseError, Parser, Result};
use std::collections::BTreeMap;
use std::io::BufRead;
use std::sync::Arc;

const ID: &str = "xdoc";

#[derive(Default, Clone)]
pub struct XdocParser {
    macros: Option<Arc<MacroRegistry>>,
}

impl XdocParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_macros(mut self, macros: Arc<MacroRegistry>) -> Self {
        self.macros = Some(macros);
        self
    }
}

impl Parser for XdocParser {
    fn id(&self) -> &'static str {
        ID
    }

    fn parse(
        &self,
        reader: &mut dyn BufRead,
        name: &str,
        sink: &mut dyn Sink,
        config: &ParseConfig,
    ) -> Result<()> {
        let mut content = String::new();
        reader
            .read_to_string(&mut content)
            .map_err(|err| located(ID, name, 0, err.into()))?;
        let root = xml::parse_document(&content, ID, name)?;

        Run::new(self, &content, name, config).document(&root, sink)
    }
}

/// Elements whose whitespace-only text is layout, not content
fn is_inline(name: &str) -> bool {
    matches!(
        name,
        "b" | "strong" | "i" | "em" | "code" | "tt" | "a" | "br" | "img"
    )
}

/// `h2` is the first section level, `h6` the last
fn heading_level(name: &str) -> Option<u8> {
    match name {
        "h2" => Some(1),
        "h3" => Some(2),
        "h4" => Some(3),
        "h5" => Some(4),
        "h6" => Some(5),
        _ => None,
    }
}

fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_space = false;
    for c in text.chars() {
        if c.is_whitespace() && c != '\u{a0}' {
            if !in_space {
                out.push(' ');
            }
            in_space = true;
        } else {
            out.push(c);
            in_space = false;
        }
    }
    out
}

fn is_inline_node(node: Option<&XmlNode>) -> bool {
    match node {
        Some(XmlNode::Element(element)) => is_inline(&element.name),
        Some(XmlNode::Text(text)) => !text.trim().is_empty(),
        None => false,
    }
}

/// One pass over a parsed tree; FML reuses it for questions and answers
pub(super) struct Run<'a> {
    parser: &'a XdocParser,
    content: &'a str,
    name: &'a str,
    config: &'a ParseConfig,
}

impl<'a> Run<'a> {
    pub(super) fn new(
        parser: &'a XdocParser,
        content: &'a str,
        name: &'a str,
        config: &'a ParseConfig,
    ) -> Self {
        Self {
            parser,
            content,
            name,
            config,
        }
    }

    fn error(&self, element: &XmlElement, message: impl Into<String>) -> ParseError {
        ParseError::new(ID, self.name, Some(element.line), message)
    }

    fn document(&self, root: &XmlElement, sink: &mut dyn Sink) -> Result<()> {
        if root.name != "document" {
            return Err(self
                .error(root, format!("expected <document>, found <{}>", root.name))
                .into());
        }

        sink.start(Element::Head)?;
        if let Some(properties) = root.child("properties").or_else(|| root.child("head")) {
            self.properties(properties, sink)
                .map_err(|err| located(ID, self.name, properties.line, err))?;
        }
        sink.end(Element::Head)?;

        sink.start(Element::Body)?;
        if let Some(body) = root.child("body") {
            self.flow(body, sink)?;
        }
        sink.end(Element::Body)
    }

    fn properties(&self, properties: &XmlElement, sink: &mut dyn Sink) -> Result<()> {
        for element in properties.elements() {
            let wrapper = match element.name.as_str() {
                "title" => Element::Title,
                "author" => Element::Author,
                "date" => Element::Date,
                other => {
                    tracing::debug!(element = other, "ignoring document property");
                    continue;
                }
            };
            sink.start(wrapper)?;
            sink.text(collapse_whitespace(&element.text()).trim())?;
            sink.end(wrapper)?;
        }
        Ok(())
    }

    /// Children of `parent`, closing any `h2`-`h6` sections it opened
    pub(super) fn flow(&self, parent: &XmlElement, sink: &mut dyn Sink) -> Result<()> {
        let mut headings: Vec<u8> = Vec::new();

        for (i, node) in parent.children.iter().enumerate() {
            match node {
                XmlNode::Text(text) => {
                    if text.trim().is_empty() {
                        let between_inline = i > 0
                            && is_inline_node(parent.children.get(i - 1))
                            && is_inline_node(parent.children.get(i + 1));
                        if !between_inline {
                            continue;
                        }
                    }
                    sink.text(&collapse_whitespace(text))?;
                }
                XmlNode::Element(child) => {
                    if let Some(level) = heading_level(&child.name) {
                        while let Some(&open) = headings.last().filter(|&&open| open >= level) {
                            sink.section_(open)?;
                            headings.pop();
                        }
                        sink.section(level)?;
                        sink.section_title(level)?;
                        self.flow(child, sink)?;
                        sink.section_title_(level)?;
                        headings.push(level);
                        continue;
                    }
                    if matches!(child.name.as_str(), "section" | "subsection") && !headings.is_empty()
                    {
                        tracing::warn!(
                            line = child.line,
                            open = headings.len(),
                            "folding open heading sections before <{}>",
                            child.name
                        );
                        while let Some(open) = headings.pop() {
                            sink.section_(open)?;
                        }
                    }
                    self.element(child, sink)
                        .map_err(|err| located(ID, self.name, child.line, err))?;
                }
            }
        }

        while let Some(open) = headings.pop() {
            sink.section_(open)?;
        }
        Ok(())
    }

    fn wrapped(&self, element: &XmlElement, wrapper: Element, sink: &mut dyn Sink) -> Result<()> {
        sink.start(wrapper)?;
        self.flow(element, sink)?;
        sink.end(wrapper)
    }

    fn element(&self, element: &XmlElement, sink: &mut dyn Sink) -> Result<()> {
        tracing::trace!(element = %element.name, line = element.line, "xdoc element");
        match element.name.as_str() {
            "section" => self.section(element, 1, sink),
            "subsection" => self.section(element, 2, sink),
            "p" => self.wrapped(element, Element::Paragraph, sink),
            "source" => self.verbatim(element, true, sink),
            "pre" => self.verbatim(element, false, sink),
            "ul" => self.list(element, false, sink),
            "ol" => self.list(element, true, sink),
            "li" => self.wrapped(element, Element::ListItem, sink),
            "dl" => self.definition_list(element, sink),
            "dt" => self.wrapped(element, Element::DefinedTerm, sink),
            "dd" => self.wrapped(element, Element::Definition, sink),
            "table" => self.table(element, sink),
            "img" => self.image(element, sink),
            "a" => self.anchor_or_link(element, sink),
            "b" | "strong" => self.wrapped(element, Element::Bold, sink),
            "i" | "em" => self.wrapped(element, Element::Italic, sink),
            "code" | "tt" => self.wrapped(element, Element::Monospaced, sink),
            "br" => sink.line_break(),
            "hr" => sink.horizontal_rule(),
            "macro" => self.macro_element(element, sink),
            _ => self.unknown(element, sink),
        }
    }

    fn section(&self, element: &XmlElement, level: u8, sink: &mut dyn Sink) -> Result<()> {
        sink.section(level)?;
        if let Some(title) = element.attribute(attr::NAME) {
            sink.section_title(level)?;
            sink.text(title)?;
            sink.section_title_(level)?;
        }
        self.flow(element, sink)?;
        sink.section_(level)
    }

    fn verbatim(&self, element: &XmlElement, boxed: bool, sink: &mut dyn Sink) -> Result<()> {
        let text = element.text();
        let text = text
            .strip_prefix("\r\n")
            .or_else(|| text.strip_prefix('\n'))
            .unwrap_or(&text);
        sink.verbatim(boxed)?;
        sink.text(text)?;
        sink.end(Element::Verbatim)
    }

    fn list(&self, element: &XmlElement, numbered: bool, sink: &mut dyn Sink) -> Result<()> {
        let (list, item) = if numbered {
            let numbering = match element.attribute("type") {
                Some("a") => Numbering::LowerAlpha,
                Some("A") => Numbering::UpperAlpha,
                Some("i") => Numbering::LowerRoman,
                Some("I") => Numbering::UpperRoman,
                _ => Numbering::Decimal,
            };
            sink.numbered_list(numbering)?;
            (Element::NumberedList, Element::NumberedListItem)
        } else {
            sink.start(Element::List)?;
            (Element::List, Element::ListItem)
        };

        for child in element.elements() {
            if child.name == "li" {
                self.wrapped(child, item, sink)
            } else {
                self.element(child, sink)
            }
            .map_err(|err| located(ID, self.name, child.line, err))?;
        }
        sink.end(list)
    }

    /// `dt`/`dd` pairs become one definition list item each
    fn definition_list(&self, element: &XmlElement, sink: &mut dyn Sink) -> Result<()> {
        sink.start(Element::DefinitionList)?;
        let mut item_open = false;
        for child in element.elements() {
            match child.name.as_str() {
                "dt" => {
                    if item_open {
                        sink.end(Element::DefinitionListItem)?;
                    }
                    sink.start(Element::DefinitionListItem)?;
                    self.wrapped(child, Element::DefinedTerm, sink)?;
                    item_open = true;
                }
                "dd" => {
                    if !item_open {
                        sink.start(Element::DefinitionListItem)?;
                    }
                    self.wrapped(child, Element::Definition, sink)?;
                    sink.end(Element::DefinitionListItem)?;
                    item_open = false;
                }
                _ => self.element(child, sink)?,
            }
        }
        if item_open {
            sink.end(Element::DefinitionListItem)?;
        }
        sink.end(Element::DefinitionList)
    }

    fn table(&self, element: &XmlElement, sink: &mut dyn Sink) -> Result<()> {
        let grid = element.attribute("border").is_some_and(|border| border != "0");
        sink.start(Element::Table)?;
        sink.table_rows(&[], grid)?;
        let caption = self.table_rows(element, sink)?;
        sink.end(Element::TableRows)?;
        if let Some(caption) = caption {
            self.wrapped(caption, Element::TableCaption, sink)?;
        }
        sink.end(Element::Table)
    }

    /// Rows of `element`, looking through `thead`/`tbody`/`tfoot`; returns the caption
    fn table_rows<'e>(
        &self,
        element: &'e XmlElement,
        sink: &mut dyn Sink,
    ) -> Result<Option<&'e XmlElement>> {
        let mut caption = None;
        for child in element.elements() {
            match child.name.as_str() {
                "tr" => {
                    sink.start(Element::TableRow)?;
                    for cell in child.elements() {
                        match cell.name.as_str() {
                            "th" => self.wrapped(cell, Element::TableHeaderCell, sink)?,
                            "td" => self.wrapped(cell, Element::TableCell, sink)?,
                            _ => self.element(cell, sink)?,
                        }
                    }
                    sink.end(Element::TableRow)?;
                }
                "thead" | "tbody" | "tfoot" => {
                    if let Some(inner) = self.table_rows(child, sink)? {
                        caption = Some(inner);
                    }
                }
                "caption" => caption = Some(child),
                _ => self.element(child, sink)?,
            }
        }
        Ok(caption)
    }

    fn image(&self, element: &XmlElement, sink: &mut dyn Sink) -> Result<()> {
        let src = element
            .attribute("src")
            .ok_or_else(|| self.error(element, "<img> without src"))?;
        let mut attributes = Attributes::new();
        for key in [attr::ALT, attr::TITLE, attr::WIDTH, attr::HEIGHT] {
            if let Some(value) = element.attribute(key) {
                attributes.insert(key, value);
            }
        }
        sink.event(SinkEvent::FigureGraphics(src.to_string(), attributes))
    }

    fn anchor_or_link(&self, element: &XmlElement, sink: &mut dyn Sink) -> Result<()> {
        if let Some(href) = element.attribute(attr::HREF) {
            sink.link(href)?;
            self.flow(element, sink)?;
            sink.link_()
        } else if let Some(name) = element.attribute(attr::NAME) {
            sink.anchor(name)?;
            self.flow(element, sink)?;
            sink.anchor_()
        } else {
            self.flow(element, sink)
        }
    }

    fn macro_element(&self, element: &XmlElement, sink: &mut dyn Sink) -> Result<()> {
        let id = element
            .attribute(attr::NAME)
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| self.error(element, "<macro> without name"))?;

        let mut parameters = BTreeMap::new();
        for param in element.elements().filter(|e| e.name == "param") {
            let key = param
                .attribute(attr::NAME)
                .ok_or_else(|| self.error(param, "<param> without name"))?;
            parameters.insert(
                key.to_string(),
                param.attribute("value").unwrap_or_default().to_string(),
            );
        }

        let request = MacroRequest::new(self.content, self.parser, self.config, parameters);
        execute_macro(self.parser.macros.as_deref(), id, sink, &request).map_err(|err| {
            self.error(element, format!("unable to execute macro '{id}'"))
                .with_cause(err)
                .into()
        })
    }

    fn unknown(&self, element: &XmlElement, sink: &mut dyn Sink) -> Result<()> {
        tracing::debug!(element = %element.name, line = element.line, "unknown xdoc element");
        sink.unknown(&element.name, vec!["start".to_string()], element.attributes.clone())?;
        self.flow(element, sink)?;
        sink.unknown(&element.name, vec!["end".to_string()], Attributes::new())
    }
}
