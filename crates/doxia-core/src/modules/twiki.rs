// SPDX-License-Identifier: AGPL-3.0-or-later
//! TWiki markup parser
//!
//! A section runs from its `---+` header to the next header of any level,
//! so sections never nest. Paragraphs host lists and tables; those are
//! emitted as siblings of the surrounding text runs.

use super::located;
use crate::block::{traverse_all, Block, FatherKind};
use crate::list::{ListType, TreeListBuilder};
use crate::sink::{Element, Numbering, Sink, MAX_SECTION_LEVEL};
use crate::source::LineSource;
use crate::traits::{DoxiaError, ParseConfig, ParseError, Parser, Result};
use regex::Regex;
use std::io::BufRead;
use std::sync::LazyLock;

const ID: &str = "twiki";
const EXTENSION: &str = ".twiki";

type Source<'r> = LineSource<&'r mut dyn BufRead>;

static SECTION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^---(\++)\s*(.+)$").unwrap());
static HRULE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^-{3,}\s*$").unwrap());
static VERBATIM_START: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*<verbatim>").unwrap());
static TABLE_ROW: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*\|").unwrap());

/// Item markers in match order; `i.` and `I.` are roman, not alphabetic
static LIST_ITEMS: LazyLock<Vec<(Regex, ListType)>> = LazyLock::new(|| {
    [
        (r"\*", ListType::Bulleted),
        (r"[a-hj-z]\.", ListType::Numbered(Numbering::LowerAlpha)),
        (r"[A-HJ-Z]\.", ListType::Numbered(Numbering::UpperAlpha)),
        (r"[0-9]\.", ListType::Numbered(Numbering::Decimal)),
        (r"i\.", ListType::Numbered(Numbering::LowerRoman)),
        (r"I\.", ListType::Numbered(Numbering::UpperRoman)),
    ]
    .into_iter()
    .map(|(marker, kind)| (Regex::new(&format!(r"^((?:   )+){marker}(.*)$")).unwrap(), kind))
    .collect()
});

static SPECIFIC_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!?\[\[(.+?)\]\[(.+?)\]\]").unwrap());
static WIKI_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!?([A-Z]\w*[.])?([A-Z][a-z]+){2,}(#\w*)?").unwrap());
static FORCED_LINK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(!)?(\[\[(.+?)\]\])").unwrap());
static ANCHOR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"#(([A-Z][A-Za-z]*){2,})").unwrap());
static URL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\w+)://\S*").unwrap());

#[derive(Debug, Default, Clone, Copy)]
pub struct TwikiParser;

impl TwikiParser {
    pub fn new() -> Self {
        Self
    }
}

impl Parser for TwikiParser {
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
        let blocks = document(&mut source).map_err(|err| located(ID, name, source.line_number(), err))?;
        source.close();

        sink.start(Element::Head)?;
        if let Some(title) = title(&blocks, name) {
            sink.start(Element::Title)?;
            sink.text(&title)?;
            sink.end(Element::Title)?;
        }
        sink.end(Element::Head)?;
        sink.start(Element::Body)?;
        traverse_all(&blocks, sink)?;
        sink.end(Element::Body)
    }
}

/// Title of the first section, else the document name without `.twiki`
fn title(blocks: &[Block], name: &str) -> Option<String> {
    let section_title = blocks.iter().find_map(|block| match block {
        Block::Father {
            kind: FatherKind::Section { title, .. },
            ..
        } => Some(
            title
                .iter()
                .filter_map(|b| match b {
                    Block::Text(text) => Some(text.as_str()),
                    _ => None,
                })
                .collect::<String>(),
        ),
        _ => None,
    });
    if section_title.is_some() {
        return section_title;
    }
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some(name.strip_suffix(EXTENSION).unwrap_or(name).to_string())
}

fn document(source: &mut Source<'_>) -> Result<Vec<Block>> {
    let mut blocks = Vec::new();
    while let Some(line) = source.next_line()? {
        if SECTION.is_match(&line) {
            blocks.push(section(&line, source)?);
        } else if HRULE.is_match(&line) {
            blocks.push(Block::HorizontalRule);
        } else if VERBATIM_START.is_match(&line) {
            blocks.push(verbatim(&line, source)?);
        } else if accepts_paragraph(&line) {
            blocks.extend(paragraph(&line, source)?);
        } else {
            return Err(ParseError::new(
                ID,
                source.name(),
                Some(source.line_number()),
                format!("line not handled: {line}"),
            )
            .into());
        }
    }
    Ok(blocks)
}

fn accepts_paragraph(line: &str) -> bool {
    !SECTION.is_match(line) && !HRULE.is_match(line) && !VERBATIM_START.is_match(line)
}

fn section(line: &str, source: &mut Source<'_>) -> Result<Block> {
    let captures = SECTION
        .captures(line)
        .ok_or_else(|| DoxiaError::InvalidState(format!("not a section header: {line}")))?;
    let level = captures[1].len();
    if level > usize::from(MAX_SECTION_LEVEL) {
        return Err(DoxiaError::Structure(format!("invalid section level {level}")));
    }
    let title = captures[2].trim().to_string();

    let mut children = Vec::new();
    while let Some(next) = source.next_line()? {
        if SECTION.is_match(&next) {
            source.unget_line()?;
            break;
        }
        if HRULE.is_match(&next) {
            children.push(Block::HorizontalRule);
        } else if VERBATIM_START.is_match(&next) {
            children.push(verbatim(&next, source)?);
        } else {
            children.extend(paragraph(&next, source)?);
        }
    }
    Ok(Block::section(level as u8, vec![Block::text(title)], children))
}

/// `<verbatim>` up to the line holding `</verbatim>`
fn verbatim(line: &str, source: &mut Source<'_>) -> Result<Block> {
    let start = line.find("<verbatim>").map_or(0, |i| i + "<verbatim>".len());
    let mut text = String::new();
    let mut current = Some(line[start..].to_string());
    let mut first = true;

    while let Some(line) = current {
        if let Some(end) = line.find("</verbatim>") {
            text.push_str(&line[..end]);
            break;
        }
        if !(first && line.trim().is_empty()) {
            text.push_str(&line);
            text.push('\n');
        }
        first = false;
        current = source.next_line()?;
    }
    Ok(Block::verbatim(false, text))
}

/// Text up to a blank line; lists and tables inside come out as their own blocks
fn paragraph(line: &str, source: &mut Source<'_>) -> Result<Vec<Block>> {
    let mut blocks = Vec::new();
    let mut text = String::new();
    let mut saw_text = false;
    let mut current = Some(line.to_string());

    while let Some(line) = current.take() {
        if !accepts_paragraph(&line) {
            source.unget_line()?;
            break;
        }
        if line.trim().is_empty() {
            if saw_text {
                break;
            }
        } else {
            saw_text = true;
            if is_list(&line) {
                flush_paragraph(&mut text, &mut blocks);
                blocks.push(list(&line, source)?);
            } else if TABLE_ROW.is_match(&line) {
                flush_paragraph(&mut text, &mut blocks);
                blocks.push(table(&line, source)?);
            } else {
                text.push_str(line.trim());
                text.push(' ');
            }
        }
        current = source.next_line()?;
    }

    flush_paragraph(&mut text, &mut blocks);
    Ok(blocks)
}

fn flush_paragraph(text: &mut String, blocks: &mut Vec<Block>) {
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        blocks.push(Block::paragraph(formatted_blocks(trimmed)));
    }
    text.clear();
}

fn list_item(line: &str) -> Option<(ListType, usize, String)> {
    LIST_ITEMS.iter().find_map(|(regex, kind)| {
        regex.captures(line).map(|captures| {
            let level = captures[1].len() / 3;
            (*kind, level, captures[2].trim().to_string())
        })
    })
}

fn is_list(line: &str) -> bool {
    list_item(line).is_some()
}

fn list(line: &str, source: &mut Source<'_>) -> Result<Block> {
    let mut builder = TreeListBuilder::new();
    let mut current = Some(line.to_string());
    while let Some(line) = current.take() {
        let Some((kind, level, text)) = list_item(&line) else {
            source.unget_line()?;
            break;
        };
        builder.feed_entry(kind, level, &text)?;
        current = source.next_line()?;
    }
    Ok(builder.build(formatted_blocks).unwrap_or(Block::Nop))
}

/// `| cell | *header* |` rows up to the first other line
fn table(line: &str, source: &mut Source<'_>) -> Result<Block> {
    let mut rows = Vec::new();
    let mut current = Some(line.to_string());
    while let Some(line) = current.take() {
        if !TABLE_ROW.is_match(&line) {
            source.unget_line()?;
            break;
        }
        rows.push(table_row(&line));
        current = source.next_line()?;
    }
    Ok(Block::father(
        FatherKind::Table {
            justification: Vec::new(),
            grid: true,
            caption: Vec::new(),
        },
        rows,
    ))
}

fn table_row(line: &str) -> Block {
    let line = line.trim();
    let line = line.strip_prefix('|').unwrap_or(line);
    let line = line.strip_suffix('|').unwrap_or(line);
    let cells = line
        .split('|')
        .map(|cell| {
            let cell = cell.trim();
            match cell.strip_prefix('*').and_then(|c| c.strip_suffix('*')) {
                Some(header) if !header.is_empty() => {
                    Block::father(FatherKind::TableHeaderCell, formatted_blocks(header.trim()))
                }
                _ => Block::father(FatherKind::TableCell, formatted_blocks(cell)),
            }
        })
        .collect();
    Block::father(FatherKind::TableRow, cells)
}

// ----------------------------------------------------------------------
// Inline formatting
// ----------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum Style {
    BoldItalic,
    BoldMono,
    Bold,
    Italic,
    Mono,
}

impl Style {
    fn wrap(self, content: &str) -> Block {
        match self {
            Style::BoldItalic => Block::father(
                FatherKind::Bold,
                vec![Block::father(FatherKind::Italic, text_blocks(content))],
            ),
            Style::BoldMono => Block::father(
                FatherKind::Bold,
                vec![Block::father(FatherKind::Monospaced, vec![Block::text(content)])],
            ),
            Style::Bold => Block::father(FatherKind::Bold, formatted_blocks(content)),
            Style::Italic => Block::father(FatherKind::Italic, formatted_blocks(content)),
            Style::Mono => Block::father(FatherKind::Monospaced, vec![Block::text(content)]),
        }
    }
}

fn style_pattern(marker: &str) -> Regex {
    let marker = regex::escape(marker);
    Regex::new(&format!(
        r"(?:^|[\s(])({marker}(\S|\S.*?\S){marker})(?:$|[\s,.;:!?)])"
    ))
    .unwrap()
}

/// Longer markers first so `__x__` is not read as italic `_x_`
static STYLES: LazyLock<Vec<(Regex, Style)>> = LazyLock::new(|| {
    vec![
        (style_pattern("__"), Style::BoldItalic),
        (style_pattern("=="), Style::BoldMono),
        (style_pattern("*"), Style::Bold),
        (style_pattern("_"), Style::Italic),
        (style_pattern("="), Style::Mono),
    ]
});

/// Formatting first, then links inside the plain runs
fn formatted_blocks(text: &str) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut offset = 0;

    loop {
        let earliest = STYLES
            .iter()
            .filter_map(|(regex, style)| {
                let captures = regex.captures_at(text, offset)?;
                let whole = captures.get(1)?;
                let content = captures.get(2)?;
                Some((whole.start(), whole.end(), content.as_str(), *style))
            })
            .min_by_key(|(start, ..)| *start);

        let Some((start, end, content, style)) = earliest else {
            break;
        };
        blocks.extend(text_blocks(&text[offset..start]));
        blocks.push(style.wrap(content));
        offset = end;
    }

    blocks.extend(text_blocks(&text[offset..]));
    blocks
}

fn starts_like_word(line: &str, start: usize) -> bool {
    start == 0 || line[..start].ends_with([' ', '\t'])
}

fn ends_like_word(line: &str, end: usize) -> bool {
    end == line.len() || line[end..].starts_with([' ', '\t'])
}

/// Link target of a WikiWord, keeping any `#anchor`
fn wiki_link(word: &str) -> String {
    match word.split_once('#') {
        Some((page, anchor)) => format!("./{page}.html#{anchor}"),
        None => format!("./{word}.html"),
    }
}

/// Plain text with links, WikiWords, anchors and URLs
fn text_blocks(line: &str) -> Vec<Block> {
    if line.is_empty() {
        return Vec::new();
    }

    let split = |start: usize, end: usize, middle: Block| {
        let mut blocks = text_blocks(&line[..start]);
        blocks.push(middle);
        blocks.extend(text_blocks(&line[end..]));
        blocks
    };

    if let Some(captures) = SPECIFIC_LINK.captures(line) {
        let whole = &captures[0];
        let block = match whole.strip_prefix('!') {
            Some(escaped) => Block::text(escaped),
            None => Block::link(&captures[1], &captures[2]),
        };
        let m = captures.get(0).map_or(0..0, |m| m.range());
        return split(m.start, m.end, block);
    }

    if let Some(m) = WIKI_WORD
        .find_iter(line)
        .find(|m| starts_like_word(line, m.start()))
    {
        let word = m.as_str();
        let block = match word.strip_prefix('!') {
            Some(escaped) => Block::text(escaped),
            None => Block::link(wiki_link(word), word),
        };
        return split(m.start(), m.end(), block);
    }

    if let Some(captures) = FORCED_LINK.captures(line) {
        let range = captures.get(0).map_or(0..0, |m| m.range());
        let shown = captures[3].trim();
        let block = if captures.get(1).is_some() {
            Block::text(&captures[2])
        } else if let Some(mail) = shown.strip_prefix("mailto:") {
            match mail.split_once(' ') {
                Some((address, text)) => Block::link(format!("mailto:{address}"), text.trim()),
                None => Block::text(shown),
            }
        } else if shown.contains("://") {
            Block::link(shown, shown)
        } else {
            let page: String = shown
                .split_whitespace()
                .map(|word| {
                    let mut chars = word.chars();
                    chars
                        .next()
                        .map(|first| first.to_uppercase().chain(chars).collect::<String>())
                        .unwrap_or_default()
                })
                .collect();
            Block::link(wiki_link(&page), &captures[3])
        };
        return split(range.start, range.end, block);
    }

    if let Some(captures) = ANCHOR.captures_iter(line).find(|c| {
        c.get(0)
            .is_some_and(|m| starts_like_word(line, m.start()) && ends_like_word(line, m.end()))
    }) {
        let range = captures.get(0).map_or(0..0, |m| m.range());
        return split(range.start, range.end, Block::Anchor(captures[1].to_string()));
    }

    if let Some(m) = URL
        .find_iter(line)
        .find(|m| starts_like_word(line, m.start()) && ends_like_word(line, m.end()))
    {
        let url = m.as_str();
        return split(m.start(), m.end(), Block::link(url, url));
    }

    vec![Block::text(line)]
}
