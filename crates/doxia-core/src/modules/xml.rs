// SPDX-License-Identifier: AGPL-3.0-or-later
//! Minimal element tree for the XML dialects
//!
//! Every element remembers the line its start tag sits on so parse errors
//! can point back into the source.

use crate::sink::Attributes;
use crate::traits::{ParseError, Result, MAX_NESTING_DEPTH};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum XmlNode {
    Element(XmlElement),
    Text(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct XmlElement {
    pub name: String,
    pub attributes: Attributes,
    pub children: Vec<XmlNode>,
    /// 1-based line of the start tag
    pub line: usize,
}

impl XmlElement {
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key)
    }

    pub fn elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|node| match node {
            XmlNode::Element(element) => Some(element),
            XmlNode::Text(_) => None,
        })
    }

    /// First child element called `name`
    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.elements().find(|element| element.name == name)
    }

    /// Concatenated text of all descendants
    pub fn text(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        for node in &self.children {
            match node {
                XmlNode::Text(text) => out.push_str(text),
                XmlNode::Element(element) => element.collect_text(out),
            }
        }
    }

    fn push_text(&mut self, text: &str) {
        if let Some(XmlNode::Text(last)) = self.children.last_mut() {
            last.push_str(text);
        } else {
            self.children.push(XmlNode::Text(text.to_string()));
        }
    }
}

/// Tracks the line of the reader's position as it advances
struct Lines<'a> {
    content: &'a str,
    offset: usize,
    line: usize,
}

impl<'a> Lines<'a> {
    fn new(content: &'a str) -> Self {
        Self {
            content,
            offset: 0,
            line: 1,
        }
    }

    fn advance(&mut self, position: u64) -> usize {
        let position = usize::try_from(position)
            .unwrap_or(usize::MAX)
            .min(self.content.len());
        if position > self.offset {
            self.line += self.content.as_bytes()[self.offset..position]
                .iter()
                .filter(|&&b| b == b'\n')
                .count();
            self.offset = position;
        }
        self.line
    }
}

/// Read `content` into a tree rooted at its single document element
pub(crate) fn parse_document(content: &str, dialect: &str, name: &str) -> Result<XmlElement> {
    let error = |line: usize, message: String| ParseError::new(dialect, name, Some(line), message);

    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(false);
    let mut lines = Lines::new(content);
    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        let line = lines.advance(reader.buffer_position());
        let event = reader
            .read_event()
            .map_err(|err| error(lines.advance(reader.error_position()), err.to_string()))?;

        let finished = match event {
            Event::Start(start) => {
                if stack.len() >= MAX_NESTING_DEPTH {
                    let message = format!("elements nested deeper than {MAX_NESTING_DEPTH} levels");
                    return Err(error(line, message).into());
                }
                stack.push(element(&start, line).map_err(|msg| error(line, msg))?);
                None
            }
            Event::Empty(start) => Some(element(&start, line).map_err(|msg| error(line, msg))?),
            Event::End(_) => stack.pop(),
            Event::Text(text) => {
                let text = reader
                    .decoder()
                    .decode(&text)
                    .map_err(|err| error(line, err.to_string()))?;
                append_text(&mut stack, &text, line, &error)?;
                None
            }
            Event::GeneralRef(reference) => {
                let entity = reader
                    .decoder()
                    .decode(&reference)
                    .map_err(|err| error(line, err.to_string()))?;
                let text = decode_entity(&entity)
                    .ok_or_else(|| error(line, format!("unknown entity '&{entity};'")))?;
                append_text(&mut stack, &text, line, &error)?;
                None
            }
            Event::CData(data) => {
                let text = String::from_utf8_lossy(&data).into_owned();
                append_text(&mut stack, &text, line, &error)?;
                None
            }
            Event::Eof => break,
            Event::Comment(_) | Event::Decl(_) | Event::PI(_) | Event::DocType(_) => None,
        };

        if let Some(done) = finished {
            match stack.last_mut() {
                Some(parent) => parent.children.push(XmlNode::Element(done)),
                None if root.is_some() => {
                    return Err(error(done.line, "more than one root element".to_string()).into())
                }
                None => root = Some(done),
            }
        }
    }

    if let Some(open) = stack.last() {
        return Err(error(open.line, format!("unclosed element <{}>", open.name)).into());
    }
    root.ok_or_else(|| error(lines.line, "no root element".to_string()).into())
}

fn element(start: &BytesStart<'_>, line: usize) -> std::result::Result<XmlElement, String> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut attributes = Attributes::new();
    for attribute in start.attributes() {
        let attribute = attribute.map_err(|err| format!("bad attribute in <{name}>: {err}"))?;
        let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
        let value = attribute.unescape_value().map_or_else(
            |_| String::from_utf8_lossy(&attribute.value).into_owned(),
            std::borrow::Cow::into_owned,
        );
        attributes.insert(key, value);
    }
    Ok(XmlElement {
        name,
        attributes,
        children: Vec::new(),
        line,
    })
}

fn append_text(
    stack: &mut [XmlElement],
    text: &str,
    line: usize,
    error: &dyn Fn(usize, String) -> ParseError,
) -> Result<()> {
    match stack.last_mut() {
        Some(parent) => {
            parent.push_text(text);
            Ok(())
        }
        None if text.trim().is_empty() => Ok(()),
        None => Err(error(line, "text outside the root element".to_string()).into()),
    }
}

/// Predefined, numeric and `nbsp` references
fn decode_entity(entity: &str) -> Option<String> {
    let decoded = match entity {
        "lt" => "<",
        "gt" => ">",
        "amp" => "&",
        "apos" => "'",
        "quot" => "\"",
        "nbsp" => "\u{a0}",
        s => {
            let code = if let Some(hex) = s.strip_prefix("#x").or_else(|| s.strip_prefix("#X")) {
                u32::from_str_radix(hex, 16).ok()
            } else {
                s.strip_prefix('#').and_then(|dec| dec.parse::<u32>().ok())
            };
            return code.and_then(char::from_u32).map(String::from);
        }
    };
    Some(decoded.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(content: &str) -> Result<XmlElement> {
        parse_document(content, "xdoc", "t.xml")
    }

    #[test]
    fn test_tree_with_lines() {
        let root = parse(
            "<?xml version=\"1.0\"?>\n<doc a=\"1\">\n  <p>one <b>two</b></p>\n  <br/>\n</doc>\n",
        )
        .unwrap();
        assert_eq!(root.name, "doc");
        assert_eq!(root.line, 2);
        assert_eq!(root.attribute("a"), Some("1"));

        let names: Vec<(&str, usize)> = root.elements().map(|e| (e.name.as_str(), e.line)).collect();
        assert_eq!(names, vec![("p", 3), ("br", 4)]);
        assert_eq!(root.child("p").unwrap().text(), "one two");
    }

    #[test]
    fn test_entities_and_cdata() {
        let root = parse("<d>a &lt; b &amp; &#65;&#x42;&nbsp;<![CDATA[<raw>]]></d>").unwrap();
        assert_eq!(root.text(), "a < b & AB\u{a0}<raw>");
        assert_eq!(root.children.len(), 1);
    }

    #[test]
    fn test_mismatched_end_tag_is_located() {
        let err = parse("<d>\n<p>\n</q>\n</d>").unwrap_err();
        let parse = err.as_parse().unwrap();
        assert_eq!(parse.line, Some(3));
        assert_eq!(parse.dialect, "xdoc");
    }

    #[test]
    fn test_unclosed_element() {
        let err = parse("<d>\n  <p>text\n").unwrap_err();
        let parse = err.as_parse().unwrap();
        assert!(parse.line.is_some());
        assert!(!parse.message.is_empty());
    }

    #[test]
    fn test_nesting_depth_is_capped() {
        let nested = |depth: usize| "<d>\n".repeat(depth) + &"</d>".repeat(depth);
        assert!(parse(&nested(MAX_NESTING_DEPTH)).is_ok());

        let err = parse(&nested(MAX_NESTING_DEPTH + 1)).unwrap_err();
        let parse = err.as_parse().unwrap();
        assert_eq!(parse.line, Some(MAX_NESTING_DEPTH + 1));
        assert!(parse.message.contains("nested deeper than"));
    }

    #[test]
    fn test_empty_input_has_no_root() {
        assert!(parse("  \n").is_err());
        assert!(parse("<a/><b/>").is_err());
        assert!(parse("<a>&bogus;</a>").is_err());
    }
}
