// SPDX-License-Identifier: AGPL-3.0-or-later
//! APT ("Almost Plain Text") parser
//!
//! The document is read block by block with one line and one block of
//! lookahead. A block is classified by the first non-blank character of
//! its first line and its indentation; tabs count as 8 columns. Sections
//! nest strictly, so a `**` block directly under a top-level section is an
//! error rather than a silent promotion.

use super::located;
use crate::macros::{execute_macro, MacroRequest};
use crate::registry::MacroRegistry;
use crate::sink::{Element, Justify, Numbering, Sink, SinkEvent};
use crate::source::LineSource;
use crate::traits::{DoxiaError, ParseConfig, ParseError, Parser, Result, MAX_NESTING_DEPTH};
use std::collections::BTreeMap;
use std::io::BufRead;
use std::sync::Arc;

const ID: &str = "apt";
const TAB_WIDTH: usize = 8;

#[derive(Default, Clone)]
pub struct AptParser {
    macros: Option<Arc<MacroRegistry>>,
}

impl AptParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `%{...}` macros through `macros`
    pub fn with_macros(mut self, macros: Arc<MacroRegistry>) -> Self {
        self.macros = Some(macros);
        self
    }
}

impl Parser for AptParser {
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
        reader.read_to_string(&mut content).map_err(|err| {
            ParseError::new(ID, name, None, "unable to read source").with_cause(err.into())
        })?;

        let mut run = Run::new(self, &content, name, config);
        run.parse(sink).map_err(|err| run.located(err))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Title,
    Section(u8),
    Paragraph,
    Verbatim,
    Figure,
    Table,
    ListItem,
    NumberedListItem,
    DefinitionListItem,
    HorizontalRule,
    PageBreak,
    ListBreak,
    Macro,
}

impl Kind {
    fn type_name(self) -> String {
        match self {
            Kind::Title => "TITLE".to_string(),
            Kind::Section(level) => format!("SECTION{level}"),
            Kind::Paragraph => "PARAGRAPH".to_string(),
            Kind::Verbatim => "VERBATIM".to_string(),
            Kind::Figure => "FIGURE".to_string(),
            Kind::Table => "TABLE".to_string(),
            Kind::ListItem => "LIST_ITEM".to_string(),
            Kind::NumberedListItem => "NUMBERED_LIST_ITEM".to_string(),
            Kind::DefinitionListItem => "DEFINITION_LIST_ITEM".to_string(),
            Kind::HorizontalRule => "HORIZONTAL_RULE".to_string(),
            Kind::PageBreak => "PAGE_BREAK".to_string(),
            Kind::ListBreak => "LIST_BREAK".to_string(),
            Kind::Macro => "MACRO".to_string(),
        }
    }

    /// Position in the section hierarchy; body blocks rank below all sections
    fn rank(self) -> u8 {
        match self {
            Kind::Title => 0,
            Kind::Section(level) => level,
            _ => u8::MAX,
        }
    }
}

#[derive(Debug)]
struct AptBlock {
    kind: Kind,
    indent: usize,
    text: String,
    boxed: bool,
    numbering: Numbering,
}

impl AptBlock {
    fn new(kind: Kind, indent: usize, text: String) -> Self {
        Self {
            kind,
            indent,
            text,
            boxed: false,
            numbering: Numbering::Decimal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListFlavor {
    Bulleted,
    Numbered,
    Definition,
}

impl ListFlavor {
    fn of(kind: Kind) -> Option<Self> {
        match kind {
            Kind::ListItem => Some(ListFlavor::Bulleted),
            Kind::NumberedListItem => Some(ListFlavor::Numbered),
            Kind::DefinitionListItem => Some(ListFlavor::Definition),
            _ => None,
        }
    }

    fn item_kind(self) -> Kind {
        match self {
            ListFlavor::Bulleted => Kind::ListItem,
            ListFlavor::Numbered => Kind::NumberedListItem,
            ListFlavor::Definition => Kind::DefinitionListItem,
        }
    }

    fn open_item(self, sink: &mut dyn Sink) -> Result<()> {
        match self {
            ListFlavor::Bulleted => sink.start(Element::ListItem),
            ListFlavor::Numbered => sink.start(Element::NumberedListItem),
            ListFlavor::Definition => sink.start(Element::DefinitionListItem),
        }
    }

    fn close_item(self, sink: &mut dyn Sink) -> Result<()> {
        match self {
            ListFlavor::Bulleted => sink.end(Element::ListItem),
            ListFlavor::Numbered => sink.end(Element::NumberedListItem),
            ListFlavor::Definition => {
                sink.end(Element::Definition)?;
                sink.end(Element::DefinitionListItem)
            }
        }
    }

    fn close_list(self, sink: &mut dyn Sink) -> Result<()> {
        match self {
            ListFlavor::Bulleted => sink.end(Element::List),
            ListFlavor::Numbered => sink.end(Element::NumberedList),
            ListFlavor::Definition => sink.end(Element::DefinitionList),
        }
    }
}

/// Source position used in error messages
#[derive(Debug, Clone, Copy)]
struct Location<'a> {
    name: &'a str,
    line: usize,
}

impl Location<'_> {
    fn error(&self, message: impl Into<String>) -> DoxiaError {
        ParseError::new(ID, self.name, Some(self.line), message).into()
    }
}

/// State of one parse
struct Run<'a> {
    parser: &'a AptParser,
    content: &'a str,
    name: &'a str,
    config: &'a ParseConfig,
    source: LineSource<&'a [u8]>,
    line: Option<String>,
    block: Option<AptBlock>,
    block_line: usize,
}

impl<'a> Run<'a> {
    fn new(parser: &'a AptParser, content: &'a str, name: &'a str, config: &'a ParseConfig) -> Self {
        Self {
            parser,
            content,
            name,
            config,
            source: LineSource::new(content.as_bytes(), name),
            line: None,
            block: None,
            block_line: 0,
        }
    }

    fn location(&self) -> Location<'a> {
        Location {
            name: self.name,
            line: self.block_line,
        }
    }

    /// Attach the current block's position to errors that lack one
    fn located(&self, err: DoxiaError) -> DoxiaError {
        located(ID, self.name, self.block_line, err)
    }

    fn parse(&mut self, sink: &mut dyn Sink) -> Result<()> {
        self.next_line()?;
        self.next_block(true, sink)?;
        self.traverse_head(sink)?;
        self.traverse_body(sink)?;
        self.source.close();
        Ok(())
    }

    fn next_line(&mut self) -> Result<()> {
        self.line = self.source.next_line()?;
        Ok(())
    }

    fn kind(&self) -> Option<Kind> {
        self.block.as_ref().map(|b| b.kind)
    }

    fn indent(&self) -> usize {
        self.block.as_ref().map_or(0, |b| b.indent)
    }

    // ------------------------------------------------------------------
    // Block reading
    // ------------------------------------------------------------------

    /// Skip blank and comment lines, then classify the next block
    fn next_block(&mut self, first: bool, sink: &mut dyn Sink) -> Result<()> {
        let (line, indent, start) = loop {
            let Some(line) = self.line.take() else {
                self.block = None;
                return Ok(());
            };
            let chars: Vec<char> = line.chars().collect();
            let (indent, start) = leading_indent(&chars);
            if start == chars.len() {
                self.next_line()?;
                continue;
            }
            if chars[start] == '~' && char_at(&chars, start + 1) == '~' {
                if self.config.emit_comments {
                    let text: String = chars[start + 2..].iter().collect();
                    sink.comment(text.trim())?;
                }
                self.next_line()?;
                continue;
            }
            break (line, indent, start);
        };

        self.block_line = self.source.line_number();
        let chars: Vec<char> = line.chars().collect();
        let at = |offset: usize| char_at(&chars, start + offset);

        let block = match at(0) {
            '*' if indent == 0 => {
                if at(1) == '-' && at(2) == '-' {
                    self.text_block(Kind::Table, indent, line)?
                } else {
                    let stars = chars[start..].iter().take_while(|&&c| c == '*').count();
                    let level = (stars.min(4) + 1) as u8;
                    self.text_block(Kind::Section(level), indent, line)?
                }
            }
            '*' => self.text_block(Kind::ListItem, indent, line)?,
            '[' if at(1) == ']' => self.line_block(Kind::ListBreak, indent, line)?,
            '[' if indent == 0 => self.text_block(Kind::Figure, indent, line)?,
            '[' if at(1) == '[' => {
                let numbering = match at(2) {
                    'a' => Numbering::LowerAlpha,
                    'A' => Numbering::UpperAlpha,
                    'i' => Numbering::LowerRoman,
                    'I' => Numbering::UpperRoman,
                    _ => Numbering::Decimal,
                };
                let mut block = self.text_block(Kind::NumberedListItem, indent, line)?;
                block.numbering = numbering;
                block
            }
            '[' => self.text_block(Kind::DefinitionListItem, indent, line)?,
            '-' if at(1) == '-' && at(2) == '-' && indent == 0 => {
                self.verbatim_block(false, indent)?
            }
            '-' if at(1) == '-' && at(2) == '-' && first => {
                self.text_block(Kind::Title, indent, line)?
            }
            '+' if indent == 0 && at(1) == '-' && at(2) == '-' => {
                self.verbatim_block(true, indent)?
            }
            '=' if indent == 0 && at(1) == '=' && at(2) == '=' => {
                self.line_block(Kind::HorizontalRule, indent, line)?
            }
            '\u{c}' if indent == 0 => self.line_block(Kind::PageBreak, indent, line)?,
            '%' if indent == 0 && at(1) == '{' => self.line_block(Kind::Macro, indent, line)?,
            _ if indent == 0 => self.text_block(Kind::Section(1), indent, line)?,
            _ => self.text_block(Kind::Paragraph, indent, line)?,
        };

        tracing::debug!(kind = ?block.kind, line = self.block_line, "apt block");
        self.block = Some(block);
        Ok(())
    }

    /// A block made of its first line alone
    fn line_block(&mut self, kind: Kind, indent: usize, line: String) -> Result<AptBlock> {
        self.next_line()?;
        Ok(AptBlock::new(kind, indent, line))
    }

    /// A block running until the next blank or comment line
    fn text_block(&mut self, kind: Kind, indent: usize, first: String) -> Result<AptBlock> {
        let mut text = first;
        self.next_line()?;
        while let Some(line) = self.line.as_deref() {
            let trimmed = line.trim_start_matches([' ', '\t']);
            if trimmed.is_empty() {
                self.next_line()?;
                break;
            }
            if trimmed.starts_with("~~") {
                // left as lookahead so next_block can report it
                break;
            }
            text.push('\n');
            text.push_str(line);
            self.next_line()?;
        }
        Ok(AptBlock::new(kind, indent, text))
    }

    /// Lines up to the closing `---` (or `+--`), tabs expanded
    fn verbatim_block(&mut self, boxed: bool, indent: usize) -> Result<AptBlock> {
        let delimiter = if boxed { '+' } else { '-' };
        let mut text = String::new();
        self.next_line()?;
        while let Some(line) = self.line.take() {
            let mut chars = line.chars();
            if chars.next() == Some(delimiter) && chars.next() == Some('-') && chars.next() == Some('-') {
                self.next_line()?;
                break;
            }
            expand_tabs(&line, &mut text);
            text.push('\n');
            self.next_line()?;
        }
        // the newline before the closing delimiter is not content
        text.pop();
        let mut block = AptBlock::new(Kind::Verbatim, indent, text);
        block.boxed = boxed;
        Ok(block)
    }

    // ------------------------------------------------------------------
    // Document structure
    // ------------------------------------------------------------------

    fn expect(&self, expected: Kind) -> Result<()> {
        match self.kind() {
            Some(found) if found == expected => Ok(()),
            Some(found) => Err(self.location().error(format!(
                "expected {}, found {}",
                expected.type_name(),
                found.type_name()
            ))),
            None => Err(self.location().error(format!(
                "expected {}, found end of document",
                expected.type_name()
            ))),
        }
    }

    /// Traverse the current block and read the next one
    fn advance(&mut self, sink: &mut dyn Sink) -> Result<()> {
        if let Some(block) = self.block.take() {
            self.traverse_block(&block, sink)?;
        }
        self.next_block(false, sink)
    }

    fn traverse_head(&mut self, sink: &mut dyn Sink) -> Result<()> {
        sink.start(Element::Head)?;
        if self.kind() == Some(Kind::Title) {
            self.advance(sink)?;
        }
        sink.end(Element::Head)
    }

    fn traverse_body(&mut self, sink: &mut dyn Sink) -> Result<()> {
        sink.start(Element::Body)?;
        if self.block.is_some() {
            self.traverse_section_blocks(sink)?;
        }
        while self.block.is_some() {
            self.traverse_section(1, sink)?;
        }
        sink.end(Element::Body)
    }

    fn traverse_section(&mut self, level: u8, sink: &mut dyn Sink) -> Result<()> {
        self.expect(Kind::Section(level))?;
        sink.section(level)?;
        self.advance(sink)?;
        self.traverse_section_blocks(sink)?;
        while let Some(kind) = self.kind() {
            if kind.rank() <= level {
                break;
            }
            self.traverse_section(level + 1, sink)?;
        }
        sink.section_(level)
    }

    fn traverse_section_blocks(&mut self, sink: &mut dyn Sink) -> Result<()> {
        while let Some(kind) = self.kind() {
            match kind {
                Kind::Paragraph
                | Kind::Verbatim
                | Kind::Figure
                | Kind::Table
                | Kind::HorizontalRule
                | Kind::PageBreak
                | Kind::Macro => self.advance(sink)?,
                Kind::ListItem => self.traverse_list(ListFlavor::Bulleted, 1, sink)?,
                Kind::NumberedListItem => self.traverse_list(ListFlavor::Numbered, 1, sink)?,
                Kind::DefinitionListItem => self.traverse_list(ListFlavor::Definition, 1, sink)?,
                // a list break that is not indented enough to end a list
                Kind::ListBreak => self.next_block(false, sink)?,
                Kind::Title | Kind::Section(_) => break,
            }
        }
        Ok(())
    }

    fn traverse_list(
        &mut self,
        flavor: ListFlavor,
        depth: usize,
        sink: &mut dyn Sink,
    ) -> Result<()> {
        self.expect(flavor.item_kind())?;
        if depth > MAX_NESTING_DEPTH {
            return Err(self
                .location()
                .error(format!("lists nested deeper than {MAX_NESTING_DEPTH} levels")));
        }
        let list_indent = self.indent();

        match flavor {
            ListFlavor::Bulleted => sink.start(Element::List)?,
            ListFlavor::Numbered => {
                let numbering = self.block.as_ref().map_or(Numbering::Decimal, |b| b.numbering);
                sink.numbered_list(numbering)?
            }
            ListFlavor::Definition => sink.start(Element::DefinitionList)?,
        }
        flavor.open_item(sink)?;
        self.advance(sink)?;

        while let Some(kind) = self.kind() {
            let indent = self.indent();
            match kind {
                Kind::Paragraph if indent < list_indent => break,
                Kind::Paragraph
                | Kind::Verbatim
                | Kind::Figure
                | Kind::Table
                | Kind::HorizontalRule
                | Kind::PageBreak => self.advance(sink)?,
                Kind::ListItem | Kind::NumberedListItem | Kind::DefinitionListItem => {
                    if indent < list_indent {
                        break;
                    }
                    let other = ListFlavor::of(kind).unwrap_or(flavor);
                    if other != flavor || indent > list_indent {
                        self.traverse_list(other, depth + 1, sink)?;
                    } else {
                        flavor.close_item(sink)?;
                        flavor.open_item(sink)?;
                        self.advance(sink)?;
                    }
                }
                Kind::ListBreak => {
                    if indent >= list_indent {
                        self.next_block(false, sink)?;
                    }
                    break;
                }
                _ => break,
            }
        }

        flavor.close_item(sink)?;
        flavor.close_list(sink)
    }

    // ------------------------------------------------------------------
    // Single blocks
    // ------------------------------------------------------------------

    fn traverse_block(&self, block: &AptBlock, sink: &mut dyn Sink) -> Result<()> {
        let at = self.location();
        let text: Vec<char> = block.text.chars().collect();
        match block.kind {
            Kind::Title => traverse_title(&block.text, at, sink),
            Kind::Section(level) => {
                sink.section_title(level)?;
                traverse_text(&text[skip_leading_bullets(&text)..], at, sink)?;
                sink.section_title_(level)
            }
            Kind::Paragraph => {
                sink.start(Element::Paragraph)?;
                traverse_text(&text[skip_space(&text, 0)..], at, sink)?;
                sink.end(Element::Paragraph)
            }
            Kind::Verbatim => {
                sink.verbatim(block.boxed)?;
                sink.text(&block.text)?;
                sink.end(Element::Verbatim)
            }
            Kind::Figure => {
                sink.start(Element::Figure)?;
                let close = skip_to_right_bracket(&text, 0, at)?;
                let src: String = text[1..close].iter().collect();
                sink.figure_graphics(src.trim())?;
                let caption = skip_space(&text, close + 1);
                if caption < text.len() {
                    sink.start(Element::FigureCaption)?;
                    traverse_text(&text[caption..], at, sink)?;
                    sink.end(Element::FigureCaption)?;
                }
                sink.end(Element::Figure)
            }
            Kind::Table => traverse_table(&block.text, at, sink),
            Kind::ListItem => {
                sink.start(Element::Paragraph)?;
                traverse_text(&text[skip_leading_bullets(&text)..], at, sink)?;
                sink.end(Element::Paragraph)
            }
            Kind::NumberedListItem => {
                let start = skip_item_number(&text, at)?;
                sink.start(Element::Paragraph)?;
                traverse_text(&text[start..], at, sink)?;
                sink.end(Element::Paragraph)
            }
            Kind::DefinitionListItem => {
                let open = skip_space(&text, 0);
                let close = skip_to_right_bracket(&text, open, at)?;
                sink.start(Element::DefinedTerm)?;
                traverse_text(&text[open + 1..close], at, sink)?;
                sink.end(Element::DefinedTerm)?;
                let definition = skip_space(&text, close + 1);
                if definition == text.len() {
                    return Err(at.error("no definition"));
                }
                sink.start(Element::Definition)?;
                sink.start(Element::Paragraph)?;
                traverse_text(&text[definition..], at, sink)?;
                sink.end(Element::Paragraph)
            }
            Kind::HorizontalRule => sink.horizontal_rule(),
            Kind::PageBreak => sink.page_break(),
            Kind::Macro => self.traverse_macro(&block.text, at, sink),
            Kind::ListBreak => Err(at.error("internal error: traversing list break")),
        }
    }

    fn traverse_macro(&self, line: &str, at: Location<'_>, sink: &mut dyn Sink) -> Result<()> {
        let body = line
            .trim_end()
            .strip_prefix("%{")
            .and_then(|rest| rest.strip_suffix('}'))
            .ok_or_else(|| at.error("missing '}'"))?;

        let mut parts = body.split('|').filter(|part| !part.is_empty());
        let id = parts
            .next()
            .map(str::trim)
            .ok_or_else(|| at.error("missing macro id"))?;
        let parameters: BTreeMap<String, String> = parts
            .map(|part| match part.split_once('=') {
                Some((key, value)) => (key.trim().to_string(), value.to_string()),
                None => (part.trim().to_string(), String::new()),
            })
            .collect();

        let request = MacroRequest::new(self.content, self.parser, self.config, parameters);
        execute_macro(self.parser.macros.as_deref(), id, sink, &request).map_err(|err| {
            ParseError::new(ID, at.name, Some(at.line), format!("unable to execute macro '{id}'"))
                .with_cause(err)
                .into()
        })
    }
}

// ----------------------------------------------------------------------
// Character helpers
// ----------------------------------------------------------------------

fn char_at(chars: &[char], i: usize) -> char {
    chars.get(i).copied().unwrap_or('\0')
}

/// Indentation in columns and index of the first non-blank character
fn leading_indent(chars: &[char]) -> (usize, usize) {
    let mut indent = 0;
    for (i, &c) in chars.iter().enumerate() {
        match c {
            ' ' => indent += 1,
            '\t' => indent += TAB_WIDTH,
            _ => return (indent, i),
        }
    }
    (indent, chars.len())
}

fn skip_space(chars: &[char], mut i: usize) -> usize {
    while i < chars.len() && matches!(chars[i], ' ' | '\t') {
        i += 1;
    }
    i
}

fn skip_leading_bullets(chars: &[char]) -> usize {
    let mut i = skip_space(chars, 0);
    while i < chars.len() && chars[i] == '*' {
        i += 1;
    }
    skip_space(chars, i)
}

/// Index of the `]` closing the `[` at `open`
fn skip_to_right_bracket(chars: &[char], open: usize, at: Location<'_>) -> Result<usize> {
    let mut previous = '[';
    for (i, &c) in chars.iter().enumerate().skip(open + 1) {
        if c == ']' && previous != '\\' {
            return Ok(i);
        }
        previous = c;
    }
    Err(at.error("missing ']'"))
}

fn skip_item_number(chars: &[char], at: Location<'_>) -> Result<usize> {
    let mut previous = ' ';
    for (i, &c) in chars.iter().enumerate().skip(skip_space(chars, 0)) {
        if c == ']' && previous == ']' {
            return Ok(skip_space(chars, i + 1));
        }
        previous = c;
    }
    Err(at.error("missing ']]'"))
}

fn expand_tabs(line: &str, out: &mut String) {
    let mut column = 0;
    for c in line.chars() {
        if c == '\t' {
            let next = (column / TAB_WIDTH + 1) * TAB_WIDTH;
            out.extend(std::iter::repeat(' ').take(next - column));
            column = next;
        } else {
            out.push(c);
            column += 1;
        }
    }
}

// ----------------------------------------------------------------------
// Title block
// ----------------------------------------------------------------------

fn traverse_title(text: &str, at: Location<'_>, sink: &mut dyn Sink) -> Result<()> {
    let field = |separator: usize| match separator {
        0 => Some(Element::Title),
        1 => Some(Element::Author),
        2 => Some(Element::Date),
        _ => None,
    };

    let mut separator = None::<usize>;
    let mut open: Option<Element> = None;
    let mut seen_title = false;

    for line in text.split('\n').map(str::trim).filter(|l| !l.is_empty()) {
        if line.starts_with("---") {
            match separator {
                Some(0) if !seen_title => return Err(at.error("missing title")),
                Some(2) => break,
                _ => {}
            }
            if let Some(element) = open.take() {
                sink.end(element)?;
            }
            separator = Some(separator.map_or(0, |s| s + 1));
            continue;
        }

        match open {
            Some(_) => sink.line_break()?,
            None => {
                // text before the first separator counts as title
                let element = field(separator.unwrap_or(0)).unwrap_or(Element::Date);
                if element == Element::Title {
                    seen_title = true;
                }
                sink.start(element)?;
                open = Some(element);
            }
        }
        let chars: Vec<char> = line.chars().collect();
        traverse_text(&chars, at, sink)?;
    }

    if !seen_title {
        return Err(at.error("missing title"));
    }
    if let Some(element) = open {
        sink.end(element)?;
    }
    Ok(())
}

// ----------------------------------------------------------------------
// Tables
// ----------------------------------------------------------------------

fn traverse_table(text: &str, at: Location<'_>, sink: &mut dyn Sink) -> Result<()> {
    let mut justification: Vec<Justify> = Vec::new();
    let mut rows_started = false;
    let mut rows = 0;
    let mut cells: Vec<String> = Vec::new();
    let mut headers: Vec<bool> = Vec::new();
    let mut caption = None;

    sink.start(Element::Table)?;

    let mut rest = text;
    while !rest.is_empty() {
        if !rest.contains("*--") {
            caption = Some(rest);
            break;
        }
        let (line, next) = rest.split_once('\n').unwrap_or((rest, ""));
        rest = next;

        if line.starts_with("*--") {
            if justification.is_empty() {
                justification = parse_justification(line, at)?;
                cells = vec![String::new(); justification.len()];
                headers = vec![false; justification.len()];
            } else if traverse_row(&mut cells, &headers, at, sink)? {
                rows += 1;
            }
            continue;
        }

        if justification.is_empty() {
            continue;
        }
        if !rows_started {
            // grid mode is only known at the first row line
            sink.table_rows(&justification, line.starts_with('|'))?;
            rows_started = true;
        }

        let line = line.replace("\\|", "\\174");
        let mut column = 0;
        let mut after_bar = false;
        for token in split_keep_bars(&line) {
            if token == "|" {
                if column < cells.len() {
                    headers[column] = after_bar;
                }
                after_bar = true;
                continue;
            }
            after_bar = false;
            let value = token.replace("\\ ", "\\240");
            let value = value.trim();
            if !value.is_empty() {
                let cell = &mut cells[column];
                if !cell.is_empty() {
                    cell.push_str("\\\n");
                }
                cell.push_str(value);
            }
            column += 1;
            if column == cells.len() {
                break;
            }
        }
    }

    if rows == 0 {
        return Err(at.error("no table rows"));
    }
    sink.end(Element::TableRows)?;
    if let Some(caption) = caption {
        let chars: Vec<char> = caption.chars().collect();
        sink.start(Element::TableCaption)?;
        traverse_text(&chars, at, sink)?;
        sink.end(Element::TableCaption)?;
    }
    sink.end(Element::Table)
}

fn parse_justification(line: &str, at: Location<'_>) -> Result<Vec<Justify>> {
    let justification: Vec<Justify> = line
        .chars()
        .skip(2)
        .filter_map(|c| match c {
            '*' => Some(Justify::Center),
            '+' => Some(Justify::Left),
            ':' => Some(Justify::Right),
            _ => None,
        })
        .collect();
    if justification.is_empty() {
        return Err(at.error("no columns specified"));
    }
    Ok(justification)
}

/// Split on `|`, keeping each bar as its own token
fn split_keep_bars(line: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut start = 0;
    for (i, c) in line.char_indices() {
        if c == '|' {
            if start < i {
                tokens.push(&line[start..i]);
            }
            tokens.push(&line[i..i + 1]);
            start = i + 1;
        }
    }
    if start < line.len() {
        tokens.push(&line[start..]);
    }
    tokens
}

/// Emit the buffered row unless it is empty (a decorative separator)
fn traverse_row(
    cells: &mut [String],
    headers: &[bool],
    at: Location<'_>,
    sink: &mut dyn Sink,
) -> Result<bool> {
    if cells.iter().all(String::is_empty) {
        return Ok(false);
    }
    sink.start(Element::TableRow)?;
    for (cell, &header) in cells.iter_mut().zip(headers) {
        let element = if header {
            Element::TableHeaderCell
        } else {
            Element::TableCell
        };
        sink.start(element)?;
        if !cell.is_empty() {
            let chars: Vec<char> = cell.chars().collect();
            traverse_text(&chars, at, sink)?;
            cell.clear();
        }
        sink.end(element)?;
    }
    sink.end(Element::TableRow)?;
    Ok(true)
}

// ----------------------------------------------------------------------
// Inline text
// ----------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Inline {
    Italic,
    Bold,
    Monospaced,
    Link,
    Anchor,
}

impl Inline {
    fn element(self) -> Element {
        match self {
            Inline::Italic => Element::Italic,
            Inline::Bold => Element::Bold,
            Inline::Monospaced => Element::Monospaced,
            Inline::Link => Element::Link,
            Inline::Anchor => Element::Anchor,
        }
    }

    fn closing(self) -> &'static str {
        match self {
            Inline::Italic => "missing '>'",
            Inline::Bold => "missing '>>'",
            Inline::Monospaced => "missing '>>>'",
            Inline::Link => "missing '}}'",
            Inline::Anchor => "missing '}'",
        }
    }
}

struct InlineState<'s> {
    open: Vec<Inline>,
    buffer: String,
    sink: &'s mut dyn Sink,
}

impl InlineState<'_> {
    fn flush(&mut self) -> Result<()> {
        if !self.buffer.is_empty() {
            let text = std::mem::take(&mut self.buffer);
            self.sink.text(&text)?;
        }
        Ok(())
    }

    fn is_open(&self, inline: Inline) -> bool {
        self.open.contains(&inline)
    }

    fn close(&mut self, inline: Inline, at: Location<'_>) -> Result<()> {
        self.flush()?;
        if self.open.last() != Some(&inline) {
            return Err(at.error(format!("overlapping markup: {}", inline.closing())));
        }
        self.open.pop();
        match inline {
            Inline::Link => self.sink.link_(),
            Inline::Anchor => self.sink.anchor_(),
            other => self.sink.end(other.element()),
        }
    }

    fn open_format(&mut self, inline: Inline) -> Result<()> {
        self.flush()?;
        self.open.push(inline);
        self.sink.start(inline.element())
    }
}

fn traverse_text(text: &[char], at: Location<'_>, sink: &mut dyn Sink) -> Result<()> {
    let end = text.len();
    let mut state = InlineState {
        open: Vec::new(),
        buffer: String::with_capacity(end),
        sink,
    };
    let mut i = 0;

    while i < end {
        let c = text[i];
        match c {
            '\\' => {
                i += escape(text, i, &mut state)?;
            }
            '{' if !state.is_open(Inline::Anchor) && !state.is_open(Inline::Link) => {
                state.flush()?;
                if char_at(text, i + 1) == '{' {
                    i += 1;
                    let target = if char_at(text, i + 1) == '{' {
                        i += 1;
                        let (target, close) = link_target(text, i + 1, at)?;
                        i = close;
                        target
                    } else {
                        link_text(text, i + 1, at)?
                    };
                    state.open.push(Inline::Link);
                    state.sink.link(&target)?;
                } else {
                    let name = anchor_name(text, i + 1, at)?;
                    state.open.push(Inline::Anchor);
                    state.sink.anchor(&name)?;
                }
            }
            '}' if state.is_open(Inline::Link) && char_at(text, i + 1) == '}' => {
                i += 1;
                state.close(Inline::Link, at)?;
            }
            '}' if state.is_open(Inline::Anchor) => state.close(Inline::Anchor, at)?,
            '<' if !state.is_open(Inline::Italic)
                && !state.is_open(Inline::Bold)
                && !state.is_open(Inline::Monospaced) =>
            {
                if char_at(text, i + 1) == '<' {
                    if char_at(text, i + 2) == '<' {
                        i += 2;
                        state.open_format(Inline::Monospaced)?;
                    } else {
                        i += 1;
                        state.open_format(Inline::Bold)?;
                    }
                } else {
                    state.open_format(Inline::Italic)?;
                }
            }
            '>' if state.is_open(Inline::Monospaced)
                && char_at(text, i + 1) == '>'
                && char_at(text, i + 2) == '>' =>
            {
                i += 2;
                state.close(Inline::Monospaced, at)?;
            }
            '>' if state.is_open(Inline::Bold) && char_at(text, i + 1) == '>' => {
                i += 1;
                state.close(Inline::Bold, at)?;
            }
            '>' if state.is_open(Inline::Italic) => state.close(Inline::Italic, at)?,
            c if c.is_whitespace() => {
                state.buffer.push(' ');
                while i + 1 < end && text[i + 1].is_whitespace() {
                    i += 1;
                }
            }
            c => state.buffer.push(c),
        }
        i += 1;
    }

    for inline in [
        Inline::Monospaced,
        Inline::Bold,
        Inline::Italic,
        Inline::Link,
        Inline::Anchor,
    ] {
        if state.is_open(inline) {
            return Err(at.error(inline.closing()));
        }
    }
    state.flush()
}

/// Handle the escape starting at `text[i] == '\\'`; returns how many
/// characters beyond the backslash were consumed
fn escape(text: &[char], i: usize, state: &mut InlineState<'_>) -> Result<usize> {
    let end = text.len();
    if i + 1 >= end {
        state.buffer.push('\\');
        return Ok(0);
    }
    let escaped = text[i + 1];
    let hex = |from: usize, count: usize| -> Option<char> {
        if from + count > end || !text[from..from + count].iter().all(char::is_ascii_hexdigit) {
            return None;
        }
        let digits: String = text[from..from + count].iter().collect();
        let value = u32::from_str_radix(&digits, 16).ok()?;
        Some(char::from_u32(value).unwrap_or('?'))
    };

    match escaped {
        ' ' => {
            state.flush()?;
            state.sink.non_breaking_space()?;
            Ok(1)
        }
        '\n' => {
            let mut consumed = 1;
            while i + consumed + 1 < end && text[i + consumed + 1].is_whitespace() {
                consumed += 1;
            }
            state.flush()?;
            state.sink.line_break()?;
            Ok(consumed)
        }
        '\\' | '|' | '~' | '=' | '-' | '+' | '*' | '[' | ']' | '<' | '>' | '{' | '}' => {
            state.buffer.push(escaped);
            Ok(1)
        }
        'x' => match hex(i + 2, 2) {
            Some(c) => {
                state.buffer.push(c);
                Ok(3)
            }
            None => {
                state.buffer.push('\\');
                Ok(0)
            }
        },
        'u' => match hex(i + 2, 4) {
            Some(c) => {
                state.buffer.push(c);
                Ok(5)
            }
            None => {
                state.buffer.push('\\');
                Ok(0)
            }
        },
        c if c.is_digit(8) => {
            let digits: String = text[i + 1..]
                .iter()
                .take(3)
                .take_while(|c| c.is_digit(8))
                .collect();
            let value = u32::from_str_radix(&digits, 8).unwrap_or(u32::from('?'));
            state.buffer.push(char::from_u32(value).unwrap_or('?'));
            Ok(digits.len())
        }
        _ => {
            state.buffer.push('\\');
            Ok(0)
        }
    }
}

/// `{{{target}text}}`: the target up to the first unescaped `}`
fn link_target(text: &[char], begin: usize, at: Location<'_>) -> Result<(String, usize)> {
    let mut target = String::new();
    let mut i = begin;
    while i < text.len() {
        match text[i] {
            '}' => return Ok((target, i)),
            '\\' if i + 1 < text.len() => {
                i += 1;
                target.push(text[i]);
            }
            c => target.push(c),
        }
        i += 1;
    }
    Err(at.error("missing '}'"))
}

/// `{{link}}`: the plain text of everything up to the closing `}}`
fn link_text(text: &[char], begin: usize, at: Location<'_>) -> Result<String> {
    let mut previous2 = '{';
    let mut previous = '{';
    for (i, &c) in text.iter().enumerate().skip(begin) {
        if c == '}' && previous == '}' && previous2 != '\\' {
            return plain_text(&text[begin..i - 1], at);
        }
        previous2 = previous;
        previous = c;
    }
    Err(at.error("missing '}}'"))
}

fn anchor_name(text: &[char], begin: usize, at: Location<'_>) -> Result<String> {
    let mut previous = '{';
    for (i, &c) in text.iter().enumerate().skip(begin) {
        if c == '}' && previous != '\\' {
            return plain_text(&text[begin..i], at);
        }
        previous = c;
    }
    Err(at.error("missing '}'"))
}

/// Text content of inline markup, breaks and spaces flattened
fn plain_text(text: &[char], at: Location<'_>) -> Result<String> {
    struct Flatten(String);

    impl Sink for Flatten {
        fn event(&mut self, event: SinkEvent) -> Result<()> {
            match event {
                SinkEvent::Text(text, _) => self.0.push_str(&text),
                SinkEvent::LineBreak | SinkEvent::NonBreakingSpace => self.0.push(' '),
                _ => {}
            }
            Ok(())
        }
    }

    let mut flat = Flatten(String::new());
    traverse_text(text, at, &mut flat)?;
    Ok(flat.0.trim().to_string())
}
