// SPDX-License-Identifier: AGPL-3.0-or-later
//! FAQ markup (FML) parser
//!
//! The document is rendered as an overview section listing every question,
//! then one section per part with the question/answer pairs.
//! Questions and answers may carry the same XHTML subset as XDOC.

use super::located;
use super::xdoc::{Run, XdocParser};
use super::xml::{self, XmlElement};
use crate::sink::{attr, Element, Numbering, Sink};
use crate::traits::{ParseConfig, ParseError, Parser, Result};
use std::io::BufRead;

const ID: &str = "fml";
const TOP_ANCHOR: &str = "top";

#[derive(Debug, Default, Clone, Copy)]
pub struct FmlParser;

impl FmlParser {
    pub fn new() -> Self {
        Self
    }
}

struct Faq<'x> {
    id: &'x str,
    question: &'x XmlElement,
    answer: &'x XmlElement,
}

struct Part<'x> {
    id: &'x str,
    title: Option<&'x XmlElement>,
    faqs: Vec<Faq<'x>>,
}

struct Faqs<'x> {
    title: Option<&'x str>,
    top_link: bool,
    parts: Vec<Part<'x>>,
}

impl Parser for FmlParser {
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
        let faqs = read_faqs(&root, name)?;

        let xdoc = XdocParser::new();
        let run = Run::new(&xdoc, &content, name, config);
        write_faqs(&faqs, &run, sink)
    }
}

fn read_faqs<'x>(root: &'x XmlElement, name: &str) -> Result<Faqs<'x>> {
    let error = |element: &XmlElement, message: String| {
        ParseError::new(ID, name, Some(element.line), message)
    };

    if root.name != "faqs" {
        return Err(error(root, format!("expected <faqs>, found <{}>", root.name)).into());
    }

    let mut parts = Vec::new();
    for element in root.elements() {
        match element.name.as_str() {
            "part" => {
                let id = element
                    .attribute(attr::ID)
                    .filter(|id| !id.trim().is_empty())
                    .ok_or_else(|| error(element, "<part> without id".to_string()))?;
                let mut faqs = Vec::new();
                for faq in element.elements().filter(|e| e.name == "faq") {
                    let id = faq
                        .attribute(attr::ID)
                        .filter(|id| !id.trim().is_empty())
                        .ok_or_else(|| error(faq, "<faq> without id".to_string()))?;
                    let question = faq
                        .child("question")
                        .ok_or_else(|| error(faq, format!("faq '{id}' has no question")))?;
                    let answer = faq
                        .child("answer")
                        .ok_or_else(|| error(faq, format!("faq '{id}' has no answer")))?;
                    faqs.push(Faq {
                        id,
                        question,
                        answer,
                    });
                }
                parts.push(Part {
                    id,
                    title: element.child("title"),
                    faqs,
                });
            }
            "faq" => {
                return Err(error(element, "<faq> outside a <part>".to_string()).into());
            }
            other => tracing::debug!(element = other, "ignoring faqs child"),
        }
    }

    Ok(Faqs {
        title: root.attribute(attr::TITLE),
        top_link: root.attribute("toplink").is_some_and(|v| v == "true"),
        parts,
    })
}

fn plain(element: &XmlElement) -> String {
    element.text().split_whitespace().collect::<Vec<_>>().join(" ")
}

fn write_faqs(faqs: &Faqs<'_>, run: &Run<'_>, sink: &mut dyn Sink) -> Result<()> {
    sink.start(Element::Head)?;
    if let Some(title) = faqs.title {
        sink.start(Element::Title)?;
        sink.text(title)?;
        sink.end(Element::Title)?;
    }
    sink.end(Element::Head)?;

    sink.start(Element::Body)?;
    if faqs.top_link {
        sink.anchor(TOP_ANCHOR)?;
        sink.anchor_()?;
    }

    sink.section(1)?;
    if let Some(title) = faqs.title {
        sink.section_title(1)?;
        sink.text(title)?;
        sink.section_title_(1)?;
    }
    for part in &faqs.parts {
        if let Some(title) = part.title {
            sink.start(Element::Paragraph)?;
            sink.start(Element::Bold)?;
            sink.text(&plain(title))?;
            sink.end(Element::Bold)?;
            sink.end(Element::Paragraph)?;
        }
        if part.faqs.is_empty() {
            continue;
        }
        sink.numbered_list(Numbering::Decimal)?;
        for faq in &part.faqs {
            sink.start(Element::NumberedListItem)?;
            sink.link(&format!("#{}", faq.id))?;
            sink.text(&plain(faq.question))?;
            sink.link_()?;
            sink.end(Element::NumberedListItem)?;
        }
        sink.end(Element::NumberedList)?;
    }
    sink.section_(1)?;

    for part in &faqs.parts {
        write_part(part, faqs.top_link, run, sink)?;
    }
    sink.end(Element::Body)
}

fn write_part(part: &Part<'_>, top_link: bool, run: &Run<'_>, sink: &mut dyn Sink) -> Result<()> {
    sink.section(1)?;
    sink.section_title(1)?;
    sink.anchor(part.id)?;
    if let Some(title) = part.title {
        sink.text(&plain(title))?;
    }
    sink.anchor_()?;
    sink.section_title_(1)?;

    if !part.faqs.is_empty() {
        sink.start(Element::DefinitionList)?;
        for faq in &part.faqs {
            sink.start(Element::DefinitionListItem)?;
            sink.start(Element::DefinedTerm)?;
            sink.anchor(faq.id)?;
            run.flow(faq.question, sink)?;
            sink.anchor_()?;
            sink.end(Element::DefinedTerm)?;

            sink.start(Element::Definition)?;
            run.flow(faq.answer, sink)?;
            if top_link {
                sink.start(Element::Paragraph)?;
                sink.link(&format!("#{TOP_ANCHOR}"))?;
                sink.text("[top]")?;
                sink.link_()?;
                sink.end(Element::Paragraph)?;
            }
            sink.end(Element::Definition)?;
            sink.end(Element::DefinitionListItem)?;
        }
        sink.end(Element::DefinitionList)?;
    }
    sink.section_(1)
}
