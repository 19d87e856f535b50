// SPDX-License-Identifier: AGPL-3.0-or-later
//! Immutable block trees built by the line-oriented dialects
//!
//! Confluence, TWiki and the list-tree builder produce [`Block`] values
//! instead of driving a sink directly. Traversal turns a tree back into
//! events; nesting is correct by construction since every father emits
//! its end events after its children.

use crate::sink::{Element, Justify, Numbering, Sink};
use crate::traits::Result;

/// Structural container kinds
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FatherKind {
    List,
    NumberedList(Numbering),
    ListItem,
    NumberedListItem,
    Section { level: u8, title: Vec<Block> },
    Paragraph,
    Bold,
    Italic,
    Monospaced,
    Table {
        justification: Vec<Justify>,
        grid: bool,
        caption: Vec<Block>,
    },
    TableRow,
    TableCell,
    TableHeaderCell,
    DefinitionList,
    DefinitionListItem,
    DefinedTerm,
    Definition,
    Verbatim { boxed: bool },
    Figure,
    FigureCaption,
    /// Children emitted with a link around them
    Link { href: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Text(String),
    RawText(String),
    LineBreak,
    NonBreakingSpace,
    HorizontalRule,
    PageBreak,
    Comment(String),
    /// `anchor(name)` immediately followed by `anchor_()`
    Anchor(String),
    /// `link(href)`, `text(text)`, `link_()`
    Link { href: String, text: String },
    FigureGraphics(String),
    /// Emits nothing
    Nop,
    Father { kind: FatherKind, children: Vec<Block> },
}

impl Block {
    pub fn text(text: impl Into<String>) -> Self {
        Block::Text(text.into())
    }

    pub fn link(href: impl Into<String>, text: impl Into<String>) -> Self {
        Block::Link {
            href: href.into(),
            text: text.into(),
        }
    }

    pub fn father(kind: FatherKind, children: Vec<Block>) -> Self {
        Block::Father { kind, children }
    }

    pub fn paragraph(children: Vec<Block>) -> Self {
        Block::father(FatherKind::Paragraph, children)
    }

    pub fn section(level: u8, title: Vec<Block>, children: Vec<Block>) -> Self {
        Block::father(FatherKind::Section { level, title }, children)
    }

    pub fn verbatim(boxed: bool, text: impl Into<String>) -> Self {
        Block::father(FatherKind::Verbatim { boxed }, vec![Block::Text(text.into())])
    }

    pub fn children(&self) -> &[Block] {
        match self {
            Block::Father { children, .. } => children,
            _ => &[],
        }
    }

    pub fn is_nop(&self) -> bool {
        matches!(self, Block::Nop)
    }

    /// Emit this block and its descendants
    pub fn traverse(&self, sink: &mut dyn Sink) -> Result<()> {
        match self {
            Block::Text(text) => sink.text(text),
            Block::RawText(text) => sink.raw_text(text),
            Block::LineBreak => sink.line_break(),
            Block::NonBreakingSpace => sink.non_breaking_space(),
            Block::HorizontalRule => sink.horizontal_rule(),
            Block::PageBreak => sink.page_break(),
            Block::Comment(text) => sink.comment(text),
            Block::Anchor(name) => {
                sink.anchor(name)?;
                sink.anchor_()
            }
            Block::Link { href, text } => {
                sink.link(href)?;
                sink.text(text)?;
                sink.link_()
            }
            Block::FigureGraphics(src) => sink.figure_graphics(src),
            Block::Nop => Ok(()),
            Block::Father { kind, children } => {
                before(kind, sink)?;
                traverse_all(children, sink)?;
                after(kind, sink)
            }
        }
    }
}

pub fn traverse_all(blocks: &[Block], sink: &mut dyn Sink) -> Result<()> {
    for block in blocks {
        block.traverse(sink)?;
    }
    Ok(())
}

fn before(kind: &FatherKind, sink: &mut dyn Sink) -> Result<()> {
    match kind {
        FatherKind::List => sink.start(Element::List),
        FatherKind::NumberedList(numbering) => sink.numbered_list(*numbering),
        FatherKind::ListItem => sink.start(Element::ListItem),
        FatherKind::NumberedListItem => sink.start(Element::NumberedListItem),
        FatherKind::Section { level, title } => {
            sink.section(*level)?;
            sink.section_title(*level)?;
            traverse_all(title, sink)?;
            sink.section_title_(*level)
        }
        FatherKind::Paragraph => sink.start(Element::Paragraph),
        FatherKind::Bold => sink.start(Element::Bold),
        FatherKind::Italic => sink.start(Element::Italic),
        FatherKind::Monospaced => sink.start(Element::Monospaced),
        FatherKind::Table {
            justification,
            grid,
            ..
        } => {
            sink.start(Element::Table)?;
            sink.table_rows(justification, *grid)
        }
        FatherKind::TableRow => sink.start(Element::TableRow),
        FatherKind::TableCell => sink.start(Element::TableCell),
        FatherKind::TableHeaderCell => sink.start(Element::TableHeaderCell),
        FatherKind::DefinitionList => sink.start(Element::DefinitionList),
        FatherKind::DefinitionListItem => sink.start(Element::DefinitionListItem),
        FatherKind::DefinedTerm => sink.start(Element::DefinedTerm),
        FatherKind::Definition => sink.start(Element::Definition),
        FatherKind::Verbatim { boxed } => sink.verbatim(*boxed),
        FatherKind::Figure => sink.start(Element::Figure),
        FatherKind::FigureCaption => sink.start(Element::FigureCaption),
        FatherKind::Link { href } => sink.link(href),
    }
}

fn after(kind: &FatherKind, sink: &mut dyn Sink) -> Result<()> {
    match kind {
        FatherKind::List => sink.end(Element::List),
        FatherKind::NumberedList(_) => sink.end(Element::NumberedList),
        FatherKind::ListItem => sink.end(Element::ListItem),
        FatherKind::NumberedListItem => sink.end(Element::NumberedListItem),
        FatherKind::Section { level, .. } => sink.section_(*level),
        FatherKind::Paragraph => sink.end(Element::Paragraph),
        FatherKind::Bold => sink.end(Element::Bold),
        FatherKind::Italic => sink.end(Element::Italic),
        FatherKind::Monospaced => sink.end(Element::Monospaced),
        FatherKind::Table { caption, .. } => {
            sink.end(Element::TableRows)?;
            if !caption.is_empty() {
                sink.start(Element::TableCaption)?;
                traverse_all(caption, sink)?;
                sink.end(Element::TableCaption)?;
            }
            sink.end(Element::Table)
        }
        FatherKind::TableRow => sink.end(Element::TableRow),
        FatherKind::TableCell => sink.end(Element::TableCell),
        FatherKind::TableHeaderCell => sink.end(Element::TableHeaderCell),
        FatherKind::DefinitionList => sink.end(Element::DefinitionList),
        FatherKind::DefinitionListItem => sink.end(Element::DefinitionListItem),
        FatherKind::DefinedTerm => sink.end(Element::DefinedTerm),
        FatherKind::Definition => sink.end(Element::Definition),
        FatherKind::Verbatim { .. } => sink.end(Element::Verbatim),
        FatherKind::Figure => sink.end(Element::Figure),
        FatherKind::FigureCaption => sink.end(Element::FigureCaption),
        FatherKind::Link { .. } => sink.link_(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{EventCollector, ValidatingSink};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn test_section_traversal_order() {
        let block = Block::section(
            2,
            vec![Block::text("Usage")],
            vec![Block::paragraph(vec![
                Block::text("see "),
                Block::link("#top", "top"),
            ])],
        );
        let mut sink = EventCollector::new();
        block.traverse(&mut sink).unwrap();
        assert_eq!(
            sink.names(),
            vec![
                "section2",
                "sectionTitle2",
                "text",
                "sectionTitle2_",
                "paragraph",
                "text",
                "link",
                "text",
                "link_",
                "paragraph_",
                "section2_",
            ]
        );
    }

    #[test]
    fn test_table_caption_after_rows() {
        let block = Block::father(
            FatherKind::Table {
                justification: vec![Justify::Center],
                grid: false,
                caption: vec![Block::text("Totals")],
            },
            vec![Block::father(
                FatherKind::TableRow,
                vec![Block::father(FatherKind::TableCell, vec![Block::text("1")])],
            )],
        );
        let mut sink = EventCollector::new();
        block.traverse(&mut sink).unwrap();
        assert_eq!(
            sink.names(),
            vec![
                "table",
                "tableRows",
                "tableRow",
                "tableCell",
                "text",
                "tableCell_",
                "tableRow_",
                "tableRows_",
                "tableCaption",
                "text",
                "tableCaption_",
                "table_",
            ]
        );
    }

    #[test]
    fn test_traversal_is_repeatable() {
        let block = Block::verbatim(true, "fn main() {}");
        let mut first = EventCollector::new();
        let mut second = EventCollector::new();
        block.traverse(&mut first).unwrap();
        block.traverse(&mut second).unwrap();
        assert_eq!(first.events(), second.events());
    }

    fn father_kind() -> impl Strategy<Value = FatherKind> {
        prop_oneof![
            Just(FatherKind::List),
            Just(FatherKind::NumberedList(Numbering::LowerAlpha)),
            Just(FatherKind::ListItem),
            (1u8..=5).prop_map(|level| FatherKind::Section {
                level,
                title: vec![Block::text("t")],
            }),
            Just(FatherKind::Paragraph),
            Just(FatherKind::Bold),
            Just(FatherKind::Italic),
            Just(FatherKind::Table {
                justification: vec![],
                grid: true,
                caption: vec![Block::text("c")],
            }),
            Just(FatherKind::TableRow),
            Just(FatherKind::DefinedTerm),
            Just(FatherKind::Verbatim { boxed: false }),
            Just(FatherKind::Figure),
            Just(FatherKind::Link { href: "#x".into() }),
        ]
    }

    fn block_tree() -> impl Strategy<Value = Block> {
        let leaf = prop_oneof![
            "[a-z ]{0,8}".prop_map(Block::Text),
            Just(Block::LineBreak),
            Just(Block::HorizontalRule),
            Just(Block::Anchor("a".into())),
            Just(Block::link("#b", "b")),
            Just(Block::Nop),
        ];
        leaf.prop_recursive(4, 32, 4, |inner| {
            (father_kind(), prop::collection::vec(inner, 0..4))
                .prop_map(|(kind, children)| Block::father(kind, children))
        })
    }

    proptest! {
        #[test]
        fn test_any_tree_traverses_well_formed(block in block_tree()) {
            let mut sink = ValidatingSink::new(EventCollector::new());
            block.traverse(&mut sink).unwrap();
            prop_assert!(sink.finish().is_ok());
        }
    }
}
