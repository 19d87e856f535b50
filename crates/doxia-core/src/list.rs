// SPDX-License-Identifier: AGPL-3.0-or-later
//! Flat `(type, level, text)` entries to nested list blocks

use crate::block::{Block, FatherKind};
use crate::sink::Numbering;
use crate::traits::{DoxiaError, Result, MAX_NESTING_DEPTH};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListType {
    Bulleted,
    Numbered(Numbering),
}

#[derive(Debug)]
struct Node {
    text: String,
    kind: ListType,
    depth: usize,
    father: Option<usize>,
    children: Vec<usize>,
}

/// Accumulates list entries into a tree
///
/// Nodes live in an arena; index 0 is the synthetic root at depth 0.
#[derive(Debug)]
pub struct TreeListBuilder {
    nodes: Vec<Node>,
    current: usize,
}

impl Default for TreeListBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TreeListBuilder {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                text: String::new(),
                kind: ListType::Bulleted,
                depth: 0,
                father: None,
                children: Vec::new(),
            }],
            current: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes[0].children.is_empty()
    }

    /// Add one entry; `level` is 1-based
    pub fn feed_entry(&mut self, kind: ListType, level: usize, text: &str) -> Result<()> {
        if level == 0 {
            return Err(DoxiaError::Structure("list level must be at least 1".to_string()));
        }
        if level > MAX_NESTING_DEPTH {
            return Err(DoxiaError::Structure(format!(
                "list level {level} is deeper than {MAX_NESTING_DEPTH}"
            )));
        }
        let incoming = level - 1;
        let depth = self.nodes[self.current].depth;

        if incoming > depth {
            match self.nodes[self.current].children.last() {
                Some(&last) => self.current = last,
                None => {
                    for _ in depth..incoming {
                        self.current = self.add_child(self.current, "", kind);
                    }
                }
            }
        } else if incoming < depth {
            for _ in incoming..depth {
                self.current = self.nodes[self.current].father.ok_or_else(|| {
                    DoxiaError::Structure("list entry walked past the root".to_string())
                })?;
            }
        }

        self.add_child(self.current, text, kind);
        Ok(())
    }

    fn add_child(&mut self, father: usize, text: &str, kind: ListType) -> usize {
        let index = self.nodes.len();
        let depth = self.nodes[father].depth + 1;
        self.nodes.push(Node {
            text: text.to_string(),
            kind,
            depth,
            father: Some(father),
            children: Vec::new(),
        });
        self.nodes[father].children.push(index);
        index
    }

    /// Convert to a list block, `None` when nothing was fed
    ///
    /// `inline` turns item text into inline blocks for the dialect.
    pub fn build<F>(&self, inline: F) -> Option<Block>
    where
        F: Fn(&str) -> Vec<Block>,
    {
        if self.is_empty() {
            return None;
        }
        Some(self.list_block(0, &inline))
    }

    fn list_block<F>(&self, index: usize, inline: &F) -> Block
    where
        F: Fn(&str) -> Vec<Block>,
    {
        let node = &self.nodes[index];
        // the list type is decided by its first child
        let kind = node
            .children
            .first()
            .map(|&first| self.nodes[first].kind)
            .unwrap_or(ListType::Bulleted);

        let (list_kind, item_kind) = match kind {
            ListType::Bulleted => (FatherKind::List, FatherKind::ListItem),
            ListType::Numbered(numbering) => {
                (FatherKind::NumberedList(numbering), FatherKind::NumberedListItem)
            }
        };

        let items = node
            .children
            .iter()
            .map(|&child| {
                let child_node = &self.nodes[child];
                let mut content = if child_node.text.is_empty() {
                    Vec::new()
                } else {
                    inline(&child_node.text)
                };
                if !child_node.children.is_empty() {
                    content.push(self.list_block(child, inline));
                }
                Block::father(item_kind.clone(), content)
            })
            .collect();

        Block::father(list_kind, items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{EventCollector, ValidatingSink};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn plain(text: &str) -> Vec<Block> {
        vec![Block::text(text)]
    }

    fn item(text: &str, nested: Option<Block>) -> Block {
        let mut children = plain(text);
        children.extend(nested);
        Block::father(FatherKind::ListItem, children)
    }

    #[test]
    fn test_two_level_tree() {
        let mut builder = TreeListBuilder::new();
        builder.feed_entry(ListType::Bulleted, 1, "a").unwrap();
        builder.feed_entry(ListType::Bulleted, 2, "b").unwrap();
        builder.feed_entry(ListType::Bulleted, 2, "c").unwrap();
        builder.feed_entry(ListType::Bulleted, 1, "d").unwrap();

        let expected = Block::father(
            FatherKind::List,
            vec![
                item(
                    "a",
                    Some(Block::father(
                        FatherKind::List,
                        vec![item("b", None), item("c", None)],
                    )),
                ),
                item("d", None),
            ],
        );
        assert_eq!(builder.build(plain), Some(expected));
    }

    #[test]
    fn test_empty_feed_builds_nothing() {
        assert_eq!(TreeListBuilder::new().build(plain), None);
    }

    #[test]
    fn test_first_child_decides_list_type() {
        let mut builder = TreeListBuilder::new();
        builder.feed_entry(ListType::Bulleted, 1, "one").unwrap();
        builder
            .feed_entry(ListType::Numbered(Numbering::Decimal), 1, "two")
            .unwrap();

        let block = builder.build(plain).unwrap();
        let Block::Father { kind, children } = block else {
            panic!("expected a list");
        };
        assert_eq!(kind, FatherKind::List);
        assert_eq!(children.len(), 2);
    }

    #[test]
    fn test_numbered_list_uses_numbered_items() {
        let mut builder = TreeListBuilder::new();
        builder
            .feed_entry(ListType::Numbered(Numbering::UpperAlpha), 1, "x")
            .unwrap();
        let mut sink = EventCollector::new();
        builder.build(plain).unwrap().traverse(&mut sink).unwrap();
        assert_eq!(
            sink.names(),
            vec!["numberedList", "numberedListItem", "text", "numberedListItem_", "numberedList_"]
        );
    }

    #[test]
    fn test_deep_first_entry_synthesizes_empty_items() {
        let mut builder = TreeListBuilder::new();
        builder.feed_entry(ListType::Bulleted, 3, "deep").unwrap();

        let mut sink = EventCollector::new();
        builder.build(plain).unwrap().traverse(&mut sink).unwrap();
        assert_eq!(
            sink.names(),
            vec![
                "list", "listItem", "list", "listItem", "list", "listItem", "text", "listItem_",
                "list_", "listItem_", "list_", "listItem_", "list_"
            ]
        );
        assert_eq!(sink.collected_text(), "deep");
    }

    #[test]
    fn test_level_zero_is_rejected() {
        let mut builder = TreeListBuilder::new();
        assert!(matches!(
            builder.feed_entry(ListType::Bulleted, 0, "x"),
            Err(DoxiaError::Structure(_))
        ));
    }

    #[test]
    fn test_level_beyond_nesting_limit_is_rejected() {
        let mut builder = TreeListBuilder::new();
        builder
            .feed_entry(ListType::Bulleted, MAX_NESTING_DEPTH, "deepest allowed")
            .unwrap();
        let err = builder
            .feed_entry(ListType::Bulleted, MAX_NESTING_DEPTH + 1, "too deep")
            .unwrap_err();
        assert!(matches!(err, DoxiaError::Structure(_)));
    }

    proptest! {
        #[test]
        fn test_any_level_sequence_nests_correctly(levels in prop::collection::vec(1usize..6, 1..20)) {
            let mut builder = TreeListBuilder::new();
            for (i, level) in levels.iter().enumerate() {
                builder.feed_entry(ListType::Bulleted, *level, &format!("item {i}")).unwrap();
            }
            let block = builder.build(plain).unwrap();
            let mut sink = ValidatingSink::new(EventCollector::new());
            block.traverse(&mut sink).unwrap();
            prop_assert!(sink.finish().is_ok());
        }
    }
}
