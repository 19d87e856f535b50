// SPDX-License-Identifier: AGPL-3.0-or-later
//! Confluence wiki markup parser
//!
//! Lines are offered to the block parsers in priority order; the paragraph
//! parser accepts anything, so every non-blank line ends up in some block.
//! The whole document is turned into [`Block`]s first and traversed once
//! parsing succeeded.

use super::located;
use crate::block::{traverse_all, Block, FatherKind};
use crate::list::{ListType, TreeListBuilder};
use crate::sink::{Element, Numbering, Sink};
use crate::source::LineSource;
use crate::traits::{ParseConfig, Parser, Result};
use std::io::BufRead;

const ID: &str = "confluence";

type Source<'r> = LineSource<&'r mut dyn BufRead>;

trait BlockParser: Sync {
    fn accept(&self, line: &str) -> bool;

    /// Build the block starting at `line`, reading more lines as needed
    fn visit(&self, line: &str, source: &mut Source<'_>) -> Result<Block>;
}

const PARSERS: &[&dyn BlockParser] = &[
    &SectionParser,
    &FigureParser,
    &VerbatimParser,
    &DefinitionParser,
    &RuleParser,
    &ListParser,
    &TableParser,
    &ParagraphParser,
];

/// Blocks that end a running paragraph
const INTERRUPTS: &[&dyn BlockParser] = &[&SectionParser, &FigureParser, &ListParser, &TableParser];

#[derive(Debug, Default, Clone, Copy)]
pub struct ConfluenceParser;

impl ConfluenceParser {
    pub fn new() -> Self {
        Self
    }

    fn blocks(&self, source: &mut Source<'_>) -> Result<Vec<Block>> {
        let mut blocks = Vec::new();
        while let Some(line) = source.next_line()? {
            if line.trim().is_empty() {
                continue;
            }
            // the paragraph parser accepts everything
            if let Some(parser) = PARSERS.iter().find(|p| p.accept(&line)) {
                blocks.push(parser.visit(&line, source)?);
            }
        }
        Ok(blocks)
    }
}

impl Parser for ConfluenceParser {
    fn id(&self) -> &'static str {
        ID
    }

    fn parse(
        &self,
        reader: &mut dyn BufRead,
        name: &str,
        sink: &mut dyn Sink,
        _config: &ParseConfig,
    ) -> Result<()> {
        let mut source: Source<'_> = LineSource::new(reader, name);
        let blocks = self
            .blocks(&mut source)
            .map_err(|err| located(ID, name, source.line_number(), err))?;
        source.close();
        tracing::debug!(name, blocks = blocks.len(), "confluence document parsed");

        sink.start(Element::Head)?;
        sink.end(Element::Head)?;
        sink.start(Element::Body)?;
        traverse_all(&blocks, sink)?;
        sink.end(Element::Body)
    }
}

// ----------------------------------------------------------------------
// Block parsers
// ----------------------------------------------------------------------

struct SectionParser;

impl BlockParser for SectionParser {
    fn accept(&self, line: &str) -> bool {
        let bytes = line.as_bytes();
        bytes.len() >= 3 && bytes[0] == b'h' && (b'1'..=b'5').contains(&bytes[1]) && bytes[2] == b'.'
    }

    fn visit(&self, line: &str, _source: &mut Source<'_>) -> Result<Block> {
        let level = line.as_bytes()[1] - b'0';
        let title = inline_blocks(line[3..].trim());
        Ok(Block::section(level, title, Vec::new()))
    }
}

/// `!image.png|options!caption`, the caption may run on until a blank line
/// or the start of another block
struct FigureParser;

impl BlockParser for FigureParser {
    fn accept(&self, line: &str) -> bool {
        line.starts_with('!') && line.rfind('!').is_some_and(|i| i > 1)
    }

    fn visit(&self, line: &str, source: &mut Source<'_>) -> Result<Block> {
        let close = line.rfind('!').unwrap_or(line.len());
        let image = &line[1..close];
        let image = image.split('|').next().unwrap_or(image);

        let first = line[close + 1..].trim();
        let first = first.strip_prefix("\\\\").unwrap_or(first);
        let mut caption = first.to_string();
        while let Some(next) = source.next_line()? {
            if next.trim().is_empty() {
                break;
            }
            if INTERRUPTS.iter().any(|p| p.accept(&next)) {
                source.unget_line()?;
                break;
            }
            if !caption.is_empty() {
                caption.push(' ');
            }
            caption.push_str(next.trim());
        }

        let mut children = vec![Block::FigureGraphics(image.trim().to_string())];
        if !caption.trim().is_empty() {
            children.push(Block::father(FatherKind::FigureCaption, inline_blocks(&caption)));
        }
        Ok(Block::father(FatherKind::Figure, children))
    }
}

struct VerbatimParser;

impl BlockParser for VerbatimParser {
    fn accept(&self, line: &str) -> bool {
        line.starts_with("{code") || line.starts_with("{noformat}")
    }

    fn visit(&self, line: &str, source: &mut Source<'_>) -> Result<Block> {
        let boxed = line.starts_with("{code");
        let mut text = String::new();
        while let Some(next) = source.next_line()? {
            if next.starts_with("{code}") || next.starts_with("{noformat}") {
                break;
            }
            text.push_str(&next);
            text.push('\n');
        }
        Ok(Block::verbatim(boxed, text))
    }
}

/// `{note}`, `{tip}`, `{info}` and `{quote}` panels, optionally titled
struct DefinitionParser;

const PANELS: [&str; 4] = ["{note", "{tip", "{info", "{quote"];

impl BlockParser for DefinitionParser {
    fn accept(&self, line: &str) -> bool {
        PANELS.iter().any(|panel| line.starts_with(panel))
    }

    fn visit(&self, line: &str, source: &mut Source<'_>) -> Result<Block> {
        let mut title = String::new();
        if let Some(index) = line.find("title=") {
            let mut current = line[index + 6..].to_string();
            loop {
                if let Some(end) = current.find('}') {
                    append_words(&mut title, &current[..end]);
                    break;
                }
                append_words(&mut title, &current);
                match source.next_line()? {
                    Some(next) => current = next,
                    None => break,
                }
            }
        }

        let mut text = String::new();
        while let Some(next) = source.next_line()? {
            if self.accept(&next) {
                break;
            }
            append_words(&mut text, &next);
        }

        let mut item = Vec::new();
        if !title.is_empty() {
            item.push(Block::father(FatherKind::DefinedTerm, vec![Block::text(title)]));
        }
        item.push(Block::father(FatherKind::Definition, inline_blocks(&text)));
        Ok(Block::father(
            FatherKind::DefinitionList,
            vec![Block::father(FatherKind::DefinitionListItem, item)],
        ))
    }
}

struct RuleParser;

impl BlockParser for RuleParser {
    fn accept(&self, line: &str) -> bool {
        line.starts_with("----")
    }

    fn visit(&self, _line: &str, _source: &mut Source<'_>) -> Result<Block> {
        Ok(Block::HorizontalRule)
    }
}

/// `*`, `-` and `#` items; the marker count is the nesting level
struct ListParser;

const LIST_MARKERS: [char; 3] = ['*', '-', '#'];

fn is_list(line: &str) -> bool {
    let line = line.trim();
    let rest = line.trim_start_matches(LIST_MARKERS);
    rest.len() < line.len() && rest.starts_with(' ')
}

impl BlockParser for ListParser {
    fn accept(&self, line: &str) -> bool {
        is_list(line)
    }

    fn visit(&self, line: &str, source: &mut Source<'_>) -> Result<Block> {
        let mut builder = TreeListBuilder::new();
        let mut item = String::new();
        let mut current = Some(line.to_string());

        while let Some(line) = current {
            if line.trim().is_empty() {
                break;
            }
            if !item.is_empty() && is_list(&line) {
                add_item(&mut builder, &item)?;
                item.clear();
            }
            append_words(&mut item, &line);
            current = source.next_line()?;
        }
        if !item.is_empty() {
            add_item(&mut builder, &item)?;
        }

        Ok(builder.build(inline_blocks).unwrap_or(Block::Nop))
    }
}

fn add_item(builder: &mut TreeListBuilder, item: &str) -> Result<()> {
    let markers: Vec<char> = item.chars().take_while(|c| LIST_MARKERS.contains(c)).collect();
    let level = markers.len();
    let kind = match markers.last() {
        Some('#') => ListType::Numbered(Numbering::Decimal),
        _ => ListType::Bulleted,
    };
    builder.feed_entry(kind, level, item[level..].trim())
}

/// `||head||head||` and `|cell|cell|` rows
struct TableParser;

impl BlockParser for TableParser {
    fn accept(&self, line: &str) -> bool {
        line.starts_with('|')
    }

    fn visit(&self, line: &str, source: &mut Source<'_>) -> Result<Block> {
        let mut rows = vec![table_row(line)];
        while let Some(next) = source.next_line()? {
            if !self.accept(&next) {
                source.unget_line()?;
                break;
            }
            rows.push(table_row(&next));
        }
        Ok(Block::father(
            FatherKind::Table {
                justification: Vec::new(),
                grid: false,
                caption: Vec::new(),
            },
            rows,
        ))
    }
}

fn table_row(line: &str) -> Block {
    let line = line.trim_end();
    let line = &line[..line.rfind('|').unwrap_or(line.len())];

    let cells = if line.starts_with("||") {
        line.split('|')
            .filter(|cell| !cell.is_empty())
            .map(|cell| {
                let bold = Block::father(FatherKind::Bold, inline_blocks(cell.trim()));
                Block::father(FatherKind::TableHeaderCell, vec![bold])
            })
            .collect()
    } else {
        cell_texts(line)
            .into_iter()
            .map(|cell| Block::father(FatherKind::TableCell, inline_blocks(cell.trim())))
            .collect()
    };
    Block::father(FatherKind::TableRow, cells)
}

/// Split a row on `|`, except inside `[text|link]`
fn cell_texts(line: &str) -> Vec<String> {
    let mut cells = Vec::new();
    let mut pending: Option<String> = None;
    for piece in line.split('|').filter(|piece| !piece.is_empty()) {
        match pending.take() {
            Some(mut open) => {
                open.push('|');
                open.push_str(piece);
                if open.rfind('[') > open.rfind(']') {
                    pending = Some(open);
                } else {
                    cells.push(open);
                }
            }
            None if piece.rfind('[') > piece.rfind(']') => pending = Some(piece.to_string()),
            None => cells.push(piece.to_string()),
        }
    }
    cells.extend(pending);
    cells
}

/// Catch-all: lines up to a blank line or the start of another block
struct ParagraphParser;

impl BlockParser for ParagraphParser {
    fn accept(&self, _line: &str) -> bool {
        true
    }

    fn visit(&self, line: &str, source: &mut Source<'_>) -> Result<Block> {
        let mut text = line.trim().to_string();
        while let Some(next) = source.next_line()? {
            if next.trim().is_empty() {
                break;
            }
            if INTERRUPTS.iter().any(|p| p.accept(&next)) {
                source.unget_line()?;
                break;
            }
            append_words(&mut text, &next);
        }
        Ok(Block::paragraph(inline_blocks(&text)))
    }
}

fn append_words(buffer: &mut String, line: &str) {
    if !buffer.is_empty() {
        buffer.push(' ');
    }
    buffer.push_str(line.trim());
}

// ----------------------------------------------------------------------
// Inline markup
// ----------------------------------------------------------------------

struct Frame {
    kind: Option<FatherKind>,
    marker: &'static str,
    children: Vec<Block>,
    text: String,
}

impl Frame {
    fn new(kind: Option<FatherKind>, marker: &'static str) -> Self {
        Self {
            kind,
            marker,
            children: Vec::new(),
            text: String::new(),
        }
    }

    fn flush(&mut self) {
        if !self.text.is_empty() {
            self.children.push(Block::Text(std::mem::take(&mut self.text)));
        }
    }
}

struct InlineBuilder {
    frames: Vec<Frame>,
}

impl InlineBuilder {
    fn top(&mut self) -> &mut Frame {
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }

    fn push_text(&mut self, text: &str) {
        self.top().text.push_str(text);
    }

    fn push_block(&mut self, block: Block) {
        let top = self.top();
        top.flush();
        top.children.push(block);
    }

    fn is_top(&self, kind: &FatherKind) -> bool {
        self.frames.len() > 1 && self.frames.last().and_then(|f| f.kind.as_ref()) == Some(kind)
    }

    fn open(&mut self, kind: FatherKind, marker: &'static str) {
        self.top().flush();
        self.frames.push(Frame::new(Some(kind), marker));
    }

    fn close(&mut self) {
        if self.frames.len() < 2 {
            return;
        }
        let Some(mut frame) = self.frames.pop() else {
            return;
        };
        frame.flush();
        if let Some(kind) = frame.kind {
            self.push_block(Block::father(kind, frame.children));
        }
    }

    /// Toggle a symmetric marker such as `*` or `_`
    fn toggle(&mut self, kind: FatherKind, marker: &'static str) {
        if self.is_top(&kind) {
            self.close();
        } else {
            self.open(kind, marker);
        }
    }

    /// Unclosed markup falls back to its literal text
    fn finish(mut self) -> Vec<Block> {
        while self.frames.len() > 1 {
            let Some(mut frame) = self.frames.pop() else {
                break;
            };
            frame.flush();
            let parent = self.top();
            parent.text.push_str(frame.marker);
            parent.flush();
            parent.children.extend(frame.children);
        }
        let mut root = self.frames.pop().unwrap_or_else(|| Frame::new(None, ""));
        root.flush();
        root.children
    }
}

/// Inline blocks of a run of Confluence text
fn inline_blocks(input: &str) -> Vec<Block> {
    let chars: Vec<char> = input.chars().collect();
    let next = |i: usize| chars.get(i + 1).copied();
    let mut builder = InlineBuilder {
        frames: vec![Frame::new(None, "")],
    };

    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '*' => builder.toggle(FatherKind::Bold, "*"),
            '_' => builder.toggle(FatherKind::Italic, "_"),
            '{' if next(i) == Some('{') => {
                builder.open(FatherKind::Monospaced, "{{");
                i += 1;
            }
            '}' if next(i) == Some('}') && builder.is_top(&FatherKind::Monospaced) => {
                builder.close();
                i += 1;
            }
            '{' => match find_from(&chars, i + 1, '}') {
                Some(end) => {
                    let name: String = chars[i + 1..end].iter().collect();
                    match name.strip_prefix("anchor:") {
                        Some(anchor) => builder.push_block(Block::Anchor(anchor.trim().to_string())),
                        None => builder.push_text(&format!("{{{name}}}")),
                    }
                    i = end;
                }
                None => builder.push_text("{"),
            },
            '[' => match find_from(&chars, i + 1, ']') {
                Some(end) => {
                    let link: String = chars[i + 1..end].iter().collect();
                    builder.push_block(link_block(&link));
                    i = end;
                }
                None => builder.push_text("["),
            },
            '\\' => match next(i) {
                Some('\\') => {
                    builder.push_block(Block::LineBreak);
                    i += 1;
                }
                Some(escaped) => {
                    builder.push_text(escaped.encode_utf8(&mut [0; 4]));
                    i += 1;
                }
                None => builder.push_text("\\"),
            },
            c => builder.push_text(c.encode_utf8(&mut [0; 4])),
        }
        i += 1;
    }
    builder.finish()
}

fn find_from(chars: &[char], from: usize, target: char) -> Option<usize> {
    chars.iter().skip(from).position(|&c| c == target).map(|p| p + from)
}

fn link_block(link: &str) -> Block {
    match link.split_once('|') {
        Some((text, href)) if !text.is_empty() => Block::link(href.trim(), text.trim()),
        _ => {
            let link = link.trim_start_matches('|').trim();
            let text = link.strip_prefix('#').unwrap_or(link);
            Block::link(link, text)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{EventCollector, SinkEvent};
    use crate::traits::ParserExt;
    use pretty_assertions::assert_eq;

    fn parse(input: &str) -> EventCollector {
        let mut sink = EventCollector::new();
        let config = ParseConfig {
            validate: true,
            ..ParseConfig::default()
        };
        ConfluenceParser::new()
            .parse_str(input, "test.confluence", &mut sink, &config)
            .unwrap();
        sink
    }

    /// Event names between `body` and `body_`
    fn body(input: &str) -> Vec<String> {
        let names = parse(input).names();
        names[3..names.len() - 1].to_vec()
    }

    fn hrefs(sink: &EventCollector) -> Vec<String> {
        sink.events()
            .iter()
            .filter_map(|e| match e {
                SinkEvent::Start(Element::Link, a) => a.href().map(str::to_string),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_document_frame() {
        let names = parse("h1. Title\n").names();
        assert_eq!(
            names,
            vec![
                "head",
                "head_",
                "body",
                "section1",
                "sectionTitle1",
                "text",
                "sectionTitle1_",
                "section1_",
                "body_"
            ]
        );
    }

    #[test]
    fn test_paragraph_joins_lines_until_blank() {
        let sink = parse("first line\nsecond line\n\nnext paragraph\n");
        assert_eq!(
            sink.names()[3..9].to_vec(),
            vec!["paragraph", "text", "paragraph_", "paragraph", "text", "paragraph_"]
        );
        assert_eq!(sink.collected_text(), "first line second linenext paragraph");
    }

    #[test]
    fn test_paragraph_stops_at_list_and_keeps_the_line() {
        assert_eq!(
            body("intro text\n* item\n"),
            vec![
                "paragraph",
                "text",
                "paragraph_",
                "list",
                "listItem",
                "text",
                "listItem_",
                "list_"
            ]
        );
    }

    #[test]
    fn test_inline_markup() {
        let sink = parse("*bold* _it_ {{mono}} [Site|http://x.org] [#top] {anchor:here} a\\\\b \\*lit\\*\n");
        let names = sink.names();
        for name in ["bold", "italic", "monospaced", "anchor", "lineBreak"] {
            assert!(names.contains(&name.to_string()), "missing {name}");
        }
        assert_eq!(hrefs(&sink), vec!["http://x.org", "#top"]);
        assert!(sink.collected_text().contains("Site"));
        assert!(sink.collected_text().contains("*lit*"));
    }

    #[test]
    fn test_unclosed_markup_is_literal() {
        let sink = parse("a *b c\n");
        assert!(!sink.names().contains(&"bold".to_string()));
        assert_eq!(sink.collected_text(), "a *b c");
    }

    #[test]
    fn test_nested_lists_with_mixed_types() {
        let sink = parse("* one\n** sub a\n** sub b\n# numbered\n");
        assert_eq!(
            sink.names()[3..].to_vec(),
            vec![
                "list",
                "listItem",
                "text",
                "list",
                "listItem",
                "text",
                "listItem_",
                "listItem",
                "text",
                "listItem_",
                "list_",
                "listItem_",
                "listItem",
                "text",
                "listItem_",
                "list_",
                "body_"
            ]
        );
    }

    #[test]
    fn test_table_with_header_and_link_cell() {
        let sink = parse("||Name||Site||\n|Doxia|[home|http://d.org]|\nafter\n");
        let names = sink.names();
        let expected_prefix = vec![
            "table",
            "tableRows",
            "tableRow",
            "tableHeaderCell",
            "bold",
            "text",
            "bold_",
            "tableHeaderCell_",
            "tableHeaderCell",
            "bold",
            "text",
            "bold_",
            "tableHeaderCell_",
            "tableRow_",
            "tableRow",
            "tableCell",
            "text",
            "tableCell_",
            "tableCell",
            "link",
            "text",
            "link_",
            "tableCell_",
            "tableRow_",
            "tableRows_",
            "table_",
            "paragraph",
        ];
        assert_eq!(names[3..3 + expected_prefix.len()].to_vec(), expected_prefix);
        assert_eq!(hrefs(&sink), vec!["http://d.org"]);
        assert!(sink.collected_text().ends_with("after"));
    }

    #[test]
    fn test_figure_with_caption() {
        let sink = parse("!logo.png|align=right!\\\\The logo\ncontinued\n");
        assert_eq!(
            body("!logo.png|align=right!\\\\The logo\ncontinued\n"),
            vec![
                "figure",
                "figureGraphics",
                "figureCaption",
                "text",
                "figureCaption_",
                "figure_"
            ]
        );
        assert!(sink
            .events()
            .iter()
            .any(|e| matches!(e, SinkEvent::FigureGraphics(src, _) if src == "logo.png")));
        assert_eq!(sink.collected_text(), "The logo continued");
    }

    #[test]
    fn test_block_after_figure_is_not_caption() {
        assert_eq!(
            body("!logo.png!\n* item\n"),
            vec!["figure", "figureGraphics", "figure_", "list", "listItem", "text", "listItem_", "list_"]
        );
        assert_eq!(
            body("!logo.png!\n|c|\n"),
            vec![
                "figure",
                "figureGraphics",
                "figure_",
                "table",
                "tableRows",
                "tableRow",
                "tableCell",
                "text",
                "tableCell_",
                "tableRow_",
                "tableRows_",
                "table_"
            ]
        );
        assert_eq!(parse("!logo.png!\n* item\n").collected_text(), "item");
    }

    #[test]
    fn test_verbatim_keeps_lines() {
        let sink = parse("{code}\nlet x = *y*;\n  indented\n{code}\n");
        assert_eq!(body("{noformat}\nraw\n{noformat}\n"), vec!["verbatim", "text", "verbatim_"]);
        assert_eq!(sink.collected_text(), "let x = *y*;\n  indented\n");
    }

    #[test]
    fn test_titled_panel_is_definition_list() {
        let sink = parse("{note:title=Be careful}\nThis *matters*.\n{note}\n");
        assert_eq!(
            sink.names()[3..].to_vec(),
            vec![
                "definitionList",
                "definitionListItem",
                "definedTerm",
                "text",
                "definedTerm_",
                "definition",
                "text",
                "bold",
                "text",
                "bold_",
                "text",
                "definition_",
                "definitionListItem_",
                "definitionList_",
                "body_"
            ]
        );
        assert!(sink.collected_text().starts_with("Be careful"));
    }

    #[test]
    fn test_horizontal_rule() {
        assert_eq!(body("----\n"), vec!["horizontalRule"]);
    }

    #[test]
    fn test_cell_texts_keep_link_pipes() {
        assert_eq!(
            cell_texts("|a|[x|y]|b"),
            vec!["a".to_string(), "[x|y]".to_string(), "b".to_string()]
        );
    }
}
