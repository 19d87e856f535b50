// SPDX-License-Identifier: AGPL-3.0-or-later
//! Minimal XHTML serializer
//!
//! Enough markup to eyeball a converted document. Escaping is delegated to
//! quick-xml and attributes other than the typed ones are ignored.

use super::{Attributes, Element, Justify, Sink, SinkEvent};
use crate::traits::{RenderConfig, Result, SinkFactory};
use quick_xml::escape::escape;
use std::io::Write;

/// Metadata collected while inside `<head>`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeadField {
    Title,
    Author,
    Date,
}

/// Writes XHTML for the event stream to `W`
pub struct XhtmlSink<W: Write> {
    out: W,
    config: RenderConfig,
    in_head: bool,
    head_field: Option<(HeadField, String)>,
    verbatim_depth: usize,
    /// Justification of each open table, innermost last
    tables: Vec<(Vec<Justify>, usize)>,
}

impl<W: Write> XhtmlSink<W> {
    pub fn new(out: W, config: RenderConfig) -> Self {
        Self {
            out,
            config,
            in_head: false,
            head_field: None,
            verbatim_depth: 0,
            tables: Vec::new(),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write(&mut self, markup: &str) -> Result<()> {
        if self.in_head && !self.config.full_document {
            return Ok(());
        }
        self.out.write_all(markup.as_bytes())?;
        Ok(())
    }

    fn eol(&mut self) -> Result<()> {
        let eol = self.config.eol.clone();
        self.write(&eol)
    }

    fn open_tag(&mut self, element: Element, attributes: &Attributes) -> Result<()> {
        match element {
            Element::Head => {
                if self.config.full_document {
                    self.write("<html>")?;
                    self.eol()?;
                    self.write("<head>")?;
                    self.eol()?;
                }
                self.in_head = true;
            }
            Element::Title => self.head_field = Some((HeadField::Title, String::new())),
            Element::Author => self.head_field = Some((HeadField::Author, String::new())),
            Element::Date => self.head_field = Some((HeadField::Date, String::new())),
            Element::Body => {
                if self.config.full_document {
                    self.write("<body>")?;
                    self.eol()?;
                }
            }
            Element::Section(_) => self.write("<div class=\"section\">")?,
            Element::SectionTitle(level) => {
                self.write(&format!("<h{}>", level.saturating_add(1).min(6)))?
            }
            Element::List => self.write("<ul>")?,
            Element::NumberedList => {
                let style = attributes.numbering().as_str();
                self.write(&format!("<ol style=\"list-style-type: {style}\">"))?
            }
            Element::ListItem | Element::NumberedListItem => self.write("<li>")?,
            Element::DefinitionList => self.write("<dl>")?,
            Element::DefinitionListItem => {}
            Element::DefinedTerm => self.write("<dt>")?,
            Element::Definition => self.write("<dd>")?,
            Element::Figure => self.write("<div class=\"figure\">")?,
            Element::FigureCaption => self.write("<p><i>")?,
            Element::Table => self.write("<div class=\"table\">")?,
            Element::TableRows => {
                let border = if attributes.grid() { "1" } else { "0" };
                self.tables.push((attributes.justification(), 0));
                self.write(&format!("<table border=\"{border}\">"))?
            }
            Element::TableRow => {
                if let Some((_, column)) = self.tables.last_mut() {
                    *column = 0;
                }
                self.write("<tr>")?
            }
            Element::TableCell | Element::TableHeaderCell => {
                let tag = if element == Element::TableCell { "td" } else { "th" };
                let align = self.next_cell_alignment();
                match align {
                    Some(justify) => {
                        self.write(&format!("<{tag} align=\"{}\">", justify.as_str()))?
                    }
                    None => self.write(&format!("<{tag}>"))?,
                }
            }
            Element::TableCaption => self.write("<p class=\"caption\">")?,
            Element::Paragraph => self.write("<p>")?,
            Element::Verbatim => {
                self.verbatim_depth += 1;
                if attributes.boxed() {
                    self.write("<div class=\"source\"><pre>")?
                } else {
                    self.write("<div><pre>")?
                }
            }
            Element::Italic => self.write("<i>")?,
            Element::Bold => self.write("<b>")?,
            Element::Monospaced => self.write("<tt>")?,
            Element::Link => {
                let href = escape(attributes.href().unwrap_or_default()).into_owned();
                self.write(&format!("<a href=\"{href}\">"))?
            }
            Element::Anchor => {
                let name = escape(attributes.name().unwrap_or_default()).into_owned();
                self.write(&format!("<a name=\"{name}\">"))?
            }
        }
        Ok(())
    }

    fn next_cell_alignment(&mut self) -> Option<Justify> {
        let (justification, column) = self.tables.last_mut()?;
        let align = justification.get(*column).copied();
        *column += 1;
        align
    }

    fn close_tag(&mut self, element: Element) -> Result<()> {
        match element {
            Element::Head => {
                if self.config.full_document {
                    self.write("</head>")?;
                    self.eol()?;
                }
                self.in_head = false;
            }
            Element::Title | Element::Author | Element::Date => self.write_head_field()?,
            Element::Body => {
                if self.config.full_document {
                    self.write("</body>")?;
                    self.eol()?;
                    self.write("</html>")?;
                    self.eol()?;
                }
            }
            Element::Section(_) => {
                self.write("</div>")?;
                self.eol()?
            }
            Element::SectionTitle(level) => {
                self.write(&format!("</h{}>", level.saturating_add(1).min(6)))?;
                self.eol()?
            }
            Element::List => self.write("</ul>")?,
            Element::NumberedList => self.write("</ol>")?,
            Element::ListItem | Element::NumberedListItem => self.write("</li>")?,
            Element::DefinitionList => self.write("</dl>")?,
            Element::DefinitionListItem => {}
            Element::DefinedTerm => self.write("</dt>")?,
            Element::Definition => self.write("</dd>")?,
            Element::Figure => self.write("</div>")?,
            Element::FigureCaption => self.write("</i></p>")?,
            Element::Table => self.write("</div>")?,
            Element::TableRows => {
                self.tables.pop();
                self.write("</table>")?
            }
            Element::TableRow => self.write("</tr>")?,
            Element::TableCell => self.write("</td>")?,
            Element::TableHeaderCell => self.write("</th>")?,
            Element::TableCaption => self.write("</p>")?,
            Element::Paragraph => {
                self.write("</p>")?;
                self.eol()?
            }
            Element::Verbatim => {
                self.verbatim_depth = self.verbatim_depth.saturating_sub(1);
                self.write("</pre></div>")?;
                self.eol()?
            }
            Element::Italic => self.write("</i>")?,
            Element::Bold => self.write("</b>")?,
            Element::Monospaced => self.write("</tt>")?,
            Element::Link | Element::Anchor => self.write("</a>")?,
        }
        Ok(())
    }

    fn write_head_field(&mut self) -> Result<()> {
        let Some((field, value)) = self.head_field.take() else {
            return Ok(());
        };
        let value = escape(value.trim()).into_owned();
        let markup = match field {
            HeadField::Title => format!("<title>{value}</title>"),
            HeadField::Author => format!("<meta name=\"author\" content=\"{value}\" />"),
            HeadField::Date => format!("<meta name=\"date\" content=\"{value}\" />"),
        };
        self.write(&markup)?;
        self.eol()
    }
}

impl<W: Write> Sink for XhtmlSink<W> {
    fn event(&mut self, event: SinkEvent) -> Result<()> {
        match event {
            SinkEvent::Start(element, attributes) => self.open_tag(element, &attributes),
            SinkEvent::End(element) => self.close_tag(element),
            SinkEvent::Text(text, _) => {
                if let Some((_, buffer)) = self.head_field.as_mut() {
                    buffer.push_str(&text);
                    return Ok(());
                }
                let escaped = escape(text.as_str()).into_owned();
                self.write(&escaped)
            }
            SinkEvent::RawText(text) => self.write(&text),
            SinkEvent::LineBreak => {
                if let Some((_, buffer)) = self.head_field.as_mut() {
                    buffer.push(' ');
                    return Ok(());
                }
                self.write("<br />")
            }
            SinkEvent::NonBreakingSpace => self.write("&#160;"),
            SinkEvent::HorizontalRule => {
                self.write("<hr />")?;
                self.eol()
            }
            SinkEvent::PageBreak => self.write("<!-- PB -->"),
            SinkEvent::FigureGraphics(src, attributes) => {
                let src = escape(src.as_str()).into_owned();
                match attributes.get(super::attr::ALT) {
                    Some(alt) => {
                        let alt = escape(alt).into_owned();
                        self.write(&format!("<img src=\"{src}\" alt=\"{alt}\" />"))
                    }
                    None => self.write(&format!("<img src=\"{src}\" />")),
                }
            }
            SinkEvent::Comment(text) => self.write(&format!("<!--{}-->", text.replace("--", "- -"))),
            SinkEvent::Unknown { name, .. } => {
                tracing::trace!(name = %name, "xhtml sink ignores unknown event");
                Ok(())
            }
            SinkEvent::Flush | SinkEvent::Close => {
                self.out.flush()?;
                Ok(())
            }
        }
    }
}

/// Registry entry for [`XhtmlSink`]
#[derive(Debug, Clone, Copy, Default)]
pub struct XhtmlSinkFactory;

impl SinkFactory for XhtmlSinkFactory {
    fn id(&self) -> &'static str {
        "xhtml"
    }

    fn create<'w>(&self, writer: Box<dyn Write + 'w>, config: &RenderConfig) -> Box<dyn Sink + 'w> {
        Box::new(XhtmlSink::new(writer, config.clone()))
    }
}
