// SPDX-License-Identifier: AGPL-3.0-or-later
//! Section index (table of contents) built from the event stream
//!
//! [`IndexingSink`] watches `section`/`sectionTitle` pairs go by and grows
//! an [`IndexEntry`] tree while forwarding every event to its delegate.
//! Events that follow a section start are held back until the entry's id
//! is known, so an [`IndexObserver`] can emit something (an anchor, say)
//! in front of the section it describes.

use crate::ids::{encode_id, is_valid_id};
use crate::sink::{Element, EventCollector, NullSink, Sink, SinkEvent};
use crate::traits::{DoxiaError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Id of the root entry; section ids never take it
pub const ROOT_ID: &str = "index";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Root,
    Section(u8),
}

/// One node of the section index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: Option<String>,
    pub title: Option<String>,
    pub kind: EntryKind,
    /// The section carried an explicit anchor
    pub has_anchor: bool,
    pub children: Vec<IndexEntry>,
}

impl IndexEntry {
    pub fn root() -> Self {
        Self {
            id: Some(ROOT_ID.to_string()),
            title: None,
            kind: EntryKind::Root,
            has_anchor: false,
            children: Vec::new(),
        }
    }

    fn section(level: u8) -> Self {
        Self {
            id: None,
            title: None,
            kind: EntryKind::Section(level),
            has_anchor: false,
            children: Vec::new(),
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn level(&self) -> Option<u8> {
        match self.kind {
            EntryKind::Root => None,
            EntryKind::Section(level) => Some(level),
        }
    }

    pub fn first_entry(&self) -> Option<&IndexEntry> {
        self.children.first()
    }

    pub fn last_entry(&self) -> Option<&IndexEntry> {
        self.children.last()
    }

    /// Depth-first search for the entry with `id`
    pub fn find(&self, id: &str) -> Option<&IndexEntry> {
        if self.id() == Some(id) {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(id))
    }

    /// The entry whose children include `id`
    pub fn parent_of(&self, id: &str) -> Option<&IndexEntry> {
        if self.children.iter().any(|child| child.id() == Some(id)) {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.parent_of(id))
    }

    pub fn next_sibling_of(&self, id: &str) -> Option<&IndexEntry> {
        let parent = self.parent_of(id)?;
        let position = parent.children.iter().position(|c| c.id() == Some(id))?;
        parent.children.get(position + 1)
    }

    pub fn prev_sibling_of(&self, id: &str) -> Option<&IndexEntry> {
        let parent = self.parent_of(id)?;
        let position = parent.children.iter().position(|c| c.id() == Some(id))?;
        position.checked_sub(1).and_then(|p| parent.children.get(p))
    }

    /// Pre-order iterator over this entry and all descendants
    pub fn iter(&self) -> impl Iterator<Item = &IndexEntry> {
        let mut pending = vec![self];
        std::iter::from_fn(move || {
            let entry = pending.pop()?;
            pending.extend(entry.children.iter().rev());
            Some(entry)
        })
    }
}

/// Hook run once per entry, when its id is settled
pub trait IndexObserver {
    /// `sink` is the unbuffered delegate; anything written here precedes
    /// the section's own events
    fn on_index_entry(&mut self, entry: &IndexEntry, sink: &mut dyn Sink) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl IndexObserver for NoopObserver {
    fn on_index_entry(&mut self, _entry: &IndexEntry, _sink: &mut dyn Sink) -> Result<()> {
        Ok(())
    }
}

/// Emits an anchor for every section lacking an explicit one
#[derive(Debug, Clone, Copy, Default)]
pub struct CreateAnchors;

impl IndexObserver for CreateAnchors {
    fn on_index_entry(&mut self, entry: &IndexEntry, sink: &mut dyn Sink) -> Result<()> {
        if entry.has_anchor {
            return Ok(());
        }
        if let Some(id) = entry.id() {
            sink.anchor(id)?;
            sink.anchor_()?;
        }
        Ok(())
    }
}

#[derive(Debug)]
enum Capture {
    Idle,
    DocumentTitle(String),
    SectionTitle(String),
}

/// Section currently being described
#[derive(Debug)]
struct OpenEntry {
    anchor: Option<String>,
    title: Option<String>,
    buffer: EventCollector,
}

pub struct IndexingSink<S: Sink, O: IndexObserver = NoopObserver> {
    delegate: S,
    observer: O,
    stack: Vec<IndexEntry>,
    /// 1-based sibling position of each stacked entry below the root
    positions: Vec<usize>,
    open: Option<OpenEntry>,
    capture: Capture,
    used_ids: HashMap<String, usize>,
    root: Option<IndexEntry>,
}

impl IndexingSink<NullSink> {
    /// Index only, no delegate
    pub fn detached() -> Self {
        IndexingSink::new(NullSink)
    }
}

impl<S: Sink> IndexingSink<S> {
    pub fn new(delegate: S) -> Self {
        IndexingSink::with_observer(delegate, NoopObserver)
    }
}

impl<S: Sink> IndexingSink<S, CreateAnchors> {
    pub fn create_anchors(delegate: S) -> Self {
        IndexingSink::with_observer(delegate, CreateAnchors)
    }
}

impl<S: Sink, O: IndexObserver> IndexingSink<S, O> {
    pub fn with_observer(delegate: S, observer: O) -> Self {
        let mut used_ids = HashMap::new();
        used_ids.insert(ROOT_ID.to_string(), 0);
        Self {
            delegate,
            observer,
            stack: vec![IndexEntry::root()],
            positions: Vec::new(),
            open: None,
            capture: Capture::Idle,
            used_ids,
            root: None,
        }
    }

    /// The finished index; available once the sink was closed
    pub fn root_entry(&self) -> Result<&IndexEntry> {
        self.root.as_ref().ok_or_else(|| {
            DoxiaError::InvalidState("index is not complete until the sink is closed".to_string())
        })
    }

    pub fn into_root_entry(self) -> Result<IndexEntry> {
        self.root.ok_or_else(|| {
            DoxiaError::InvalidState("index is not complete until the sink is closed".to_string())
        })
    }

    /// Document title seen so far
    pub fn title(&self) -> Option<&str> {
        match &self.root {
            Some(root) => root.title(),
            None => self.stack.first().and_then(IndexEntry::title),
        }
    }

    pub fn into_inner(self) -> S {
        self.delegate
    }

    fn forward(&mut self, event: SinkEvent) -> Result<()> {
        match self.open.as_mut() {
            Some(open) => open.buffer.event(event),
            None => self.delegate.event(event),
        }
    }

    fn push_entry(&mut self, level: u8) {
        let position = self.stack.last().map_or(0, |top| top.children.len()) + 1;
        self.stack.push(IndexEntry::section(level));
        self.positions.push(position);
        self.open = Some(OpenEntry {
            anchor: None,
            title: None,
            buffer: EventCollector::new(),
        });
    }

    /// Settle the id of the open entry, run the observer and release the
    /// events held back since its section started
    fn complete_entry(&mut self) -> Result<()> {
        let Some(open) = self.open.take() else {
            return Ok(());
        };
        self.capture = Capture::Idle;

        let candidate = match (&open.anchor, &open.title) {
            (Some(anchor), _) if is_valid_id(anchor) => Some(anchor.clone()),
            (Some(anchor), _) => {
                let encoded = encode_id(anchor);
                tracing::warn!(anchor = %anchor, id = ?encoded, "section anchor is not a valid id");
                encoded
            }
            (None, Some(title)) => encode_id(&title.to_lowercase()),
            (None, None) => None,
        };
        let candidate = candidate.unwrap_or_else(|| self.positional_id());
        let id = self.unique_id(candidate);

        let Some(entry) = self.stack.last_mut() else {
            return Err(DoxiaError::Structure("index stack is empty".to_string()));
        };
        entry.id = Some(id);
        entry.title = open.title;
        entry.has_anchor = open.anchor.is_some();
        tracing::debug!(id = ?entry.id, level = ?entry.level(), "index entry complete");

        self.observer.on_index_entry(entry, &mut self.delegate)?;
        open.buffer.replay(&mut self.delegate)
    }

    fn positional_id(&self) -> String {
        let path: Vec<String> = self.positions.iter().map(usize::to_string).collect();
        format!("section_{}", path.join("_"))
    }

    fn unique_id(&mut self, id: String) -> String {
        if !self.used_ids.contains_key(&id) {
            self.used_ids.insert(id.clone(), 0);
            return id;
        }
        loop {
            let counter = self.used_ids.entry(id.clone()).or_insert(0);
            *counter += 1;
            let candidate = format!("{id}_{counter}");
            if !self.used_ids.contains_key(&candidate) {
                self.used_ids.insert(candidate.clone(), 0);
                return candidate;
            }
        }
    }

    fn pop_entry(&mut self) -> Result<()> {
        if self.stack.len() <= 1 {
            return Err(DoxiaError::Structure(
                "section end without an open section".to_string(),
            ));
        }
        self.positions.pop();
        if let Some(entry) = self.stack.pop() {
            if let Some(parent) = self.stack.last_mut() {
                parent.children.push(entry);
            }
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if self.root.is_some() {
            return Ok(());
        }
        self.complete_entry()?;
        if self.stack.len() > 1 {
            tracing::warn!(
                open = self.stack.len() - 1,
                "closing index with unterminated sections"
            );
            while self.stack.len() > 1 {
                self.pop_entry()?;
            }
        }
        self.root = self.stack.pop();
        Ok(())
    }
}

impl<S: Sink, O: IndexObserver> Sink for IndexingSink<S, O> {
    fn event(&mut self, event: SinkEvent) -> Result<()> {
        match &event {
            SinkEvent::Start(Element::Title, _) => {
                self.capture = Capture::DocumentTitle(String::new());
            }
            SinkEvent::End(Element::Title) => {
                if let Capture::DocumentTitle(title) =
                    std::mem::replace(&mut self.capture, Capture::Idle)
                {
                    if let Some(root) = self.stack.first_mut() {
                        if !title.is_empty() {
                            root.title = Some(title);
                        }
                    }
                }
            }
            SinkEvent::Start(Element::Section(level), _) => {
                self.complete_entry()?;
                self.push_entry(*level);
            }
            SinkEvent::Start(Element::SectionTitle(_), _) => {
                if self.open.is_some() {
                    self.capture = Capture::SectionTitle(String::new());
                }
            }
            SinkEvent::End(Element::SectionTitle(_)) => {
                if let Capture::SectionTitle(title) =
                    std::mem::replace(&mut self.capture, Capture::Idle)
                {
                    if let Some(open) = self.open.as_mut() {
                        let title = title.trim();
                        if !title.is_empty() {
                            open.title = Some(title.to_string());
                        }
                    }
                }
                self.complete_entry()?;
            }
            SinkEvent::End(Element::Section(_)) => {
                self.complete_entry()?;
                self.pop_entry()?;
            }
            SinkEvent::Text(text, _) => match &mut self.capture {
                Capture::DocumentTitle(buffer) | Capture::SectionTitle(buffer) => {
                    buffer.extend(text.chars().filter(|c| !matches!(c, '\r' | '\n')));
                }
                Capture::Idle => {}
            },
            SinkEvent::Start(Element::Anchor, attributes) => {
                if let (Some(open), Some(name)) = (self.open.as_mut(), attributes.name()) {
                    open.anchor = Some(name.to_string());
                }
            }
            SinkEvent::Close => {
                self.finish()?;
                return self.delegate.event(event);
            }
            _ => {}
        }
        self.forward(event)
    }
}

/// Decorator rejecting a second anchor with the same name
#[derive(Debug)]
pub struct UniqueAnchorNames<S: Sink> {
    delegate: S,
    used: HashSet<String>,
}

impl<S: Sink> UniqueAnchorNames<S> {
    pub fn new(delegate: S) -> Self {
        Self {
            delegate,
            used: HashSet::new(),
        }
    }

    pub fn into_inner(self) -> S {
        self.delegate
    }
}

impl<S: Sink> Sink for UniqueAnchorNames<S> {
    fn event(&mut self, event: SinkEvent) -> Result<()> {
        if let SinkEvent::Start(Element::Anchor, attributes) = &event {
            let name = attributes.name().unwrap_or_default();
            if !self.used.insert(name.to_string()) {
                return Err(DoxiaError::Structure(format!(
                    "anchor name \"{name}\" used more than once"
                )));
            }
        }
        self.delegate.event(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn section(sink: &mut dyn Sink, level: u8, title: &str) {
        sink.section(level).unwrap();
        sink.section_title(level).unwrap();
        sink.text(title).unwrap();
        sink.section_title_(level).unwrap();
    }

    fn index_of(emit: impl FnOnce(&mut dyn Sink)) -> IndexEntry {
        let mut sink = IndexingSink::detached();
        emit(&mut sink);
        sink.close().unwrap();
        sink.into_root_entry().unwrap()
    }

    fn ids(entry: &IndexEntry) -> Vec<&str> {
        entry.children.iter().filter_map(IndexEntry::id).collect()
    }

    #[test]
    fn test_duplicate_titles_get_suffixes() {
        let root = index_of(|sink| {
            section(sink, 1, "Overview");
            sink.section_(1).unwrap();
            section(sink, 1, "Overview");
            sink.section_(1).unwrap();
            section(sink, 1, "Overview");
            sink.section_(1).unwrap();
        });
        assert_eq!(ids(&root), vec!["overview", "overview_1", "overview_2"]);
    }

    #[test]
    fn test_two_chapter_structure() {
        let root = index_of(|sink| {
            sink.start(Element::Title).unwrap();
            sink.text("Book").unwrap();
            sink.end(Element::Title).unwrap();

            section(sink, 1, "Chapter One");
            section(sink, 2, "Section 1.1");
            sink.section_(2).unwrap();
            section(sink, 2, "Section 1.2");
            section(sink, 3, "Details");
            sink.section_(3).unwrap();
            sink.section_(2).unwrap();
            sink.section_(1).unwrap();

            section(sink, 1, "Chapter Two");
            section(sink, 2, "Section 2.1");
            sink.section_(2).unwrap();
            sink.section_(1).unwrap();
        });

        assert_eq!(root.title(), Some("Book"));
        assert_eq!(ids(&root), vec!["chapter_one", "chapter_two"]);

        let first = &root.children[0];
        assert_eq!(first.title(), Some("Chapter One"));
        assert_eq!(ids(first), vec!["section_1.1", "section_1.2"]);
        assert_eq!(ids(&first.children[1]), vec!["details"]);
        assert_eq!(first.children[1].children[0].level(), Some(3));

        let second = &root.children[1];
        assert_eq!(ids(second), vec!["section_2.1"]);

        assert_eq!(root.parent_of("details").and_then(IndexEntry::id), Some("section_1.2"));
        assert_eq!(
            root.next_sibling_of("section_1.1").and_then(IndexEntry::id),
            Some("section_1.2")
        );
        assert_eq!(
            root.prev_sibling_of("chapter_two").and_then(IndexEntry::id),
            Some("chapter_one")
        );
        assert!(root.prev_sibling_of("chapter_one").is_none());
        assert_eq!(root.last_entry().and_then(IndexEntry::title), Some("Chapter Two"));
        assert_eq!(root.iter().count(), 7);
    }

    #[test]
    fn test_anchor_name_wins_over_title() {
        let root = index_of(|sink| {
            sink.section(1).unwrap();
            sink.anchor("Intro").unwrap();
            sink.anchor_().unwrap();
            sink.section_title(1).unwrap();
            sink.text("Introduction").unwrap();
            sink.section_title_(1).unwrap();
            sink.section_(1).unwrap();
        });
        let entry = &root.children[0];
        assert_eq!(entry.id(), Some("Intro"));
        assert!(entry.has_anchor);
    }

    #[test]
    fn test_invalid_anchor_name_is_encoded() {
        let root = index_of(|sink| {
            sink.section(1).unwrap();
            sink.anchor("2 Setup").unwrap();
            sink.anchor_().unwrap();
            sink.section_title(1).unwrap();
            sink.text("Setup").unwrap();
            sink.section_title_(1).unwrap();
            sink.section_(1).unwrap();
        });
        let entry = &root.children[0];
        assert_eq!(entry.id(), Some("a2_Setup"));
        assert!(entry.has_anchor);
    }

    #[test]
    fn test_untitled_sections_get_positional_ids() {
        let root = index_of(|sink| {
            section(sink, 1, "Named");
            sink.section_(1).unwrap();
            sink.section(1).unwrap();
            sink.section(2).unwrap();
            sink.section_(2).unwrap();
            sink.section(2).unwrap();
            sink.section_(2).unwrap();
            sink.section_(1).unwrap();
        });
        assert_eq!(ids(&root), vec!["named", "section_2"]);
        assert_eq!(ids(&root.children[1]), vec!["section_2_1", "section_2_2"]);
        assert_eq!(root.children[1].title(), None);
    }

    #[test]
    fn test_title_text_line_breaks_are_removed() {
        let root = index_of(|sink| {
            sink.section(1).unwrap();
            sink.section_title(1).unwrap();
            sink.text("Getting\r\n").unwrap();
            sink.text(" Started").unwrap();
            sink.section_title_(1).unwrap();
            sink.section_(1).unwrap();
        });
        assert_eq!(root.children[0].title(), Some("Getting Started"));
        assert_eq!(root.children[0].id(), Some("getting_started"));
    }

    #[test]
    fn test_section_end_underflow() {
        let mut sink = IndexingSink::detached();
        assert!(matches!(sink.section_(1), Err(DoxiaError::Structure(_))));
    }

    #[test]
    fn test_root_entry_requires_close() {
        let mut sink = IndexingSink::detached();
        section(&mut sink, 1, "A");
        assert!(matches!(sink.root_entry(), Err(DoxiaError::InvalidState(_))));
        sink.section_(1).unwrap();
        sink.close().unwrap();
        assert!(sink.root_entry().is_ok());
    }

    #[test]
    fn test_second_close_keeps_index() {
        let mut sink = IndexingSink::detached();
        section(&mut sink, 1, "Only");
        sink.section_(1).unwrap();
        sink.close().unwrap();
        sink.close().unwrap();
        let root = sink.root_entry().unwrap();
        assert_eq!(ids(root), vec!["only"]);
        assert_eq!(sink.into_root_entry().unwrap().children.len(), 1);
    }

    #[test]
    fn test_chapters_sections_and_subsections() {
        let root = index_of(|sink| {
            section(sink, 1, "Chapter");
            section(sink, 2, "Section");
            section(sink, 3, "Item");
            section(sink, 4, "Detail");
            sink.section_(4).unwrap();
            sink.section_(3).unwrap();
            for _ in 0..3 {
                section(sink, 3, "Item");
                sink.section_(3).unwrap();
            }
            sink.section_(2).unwrap();
            section(sink, 2, "Section");
            sink.section_(2).unwrap();
            sink.section_(1).unwrap();

            section(sink, 1, "Chapter");
            section(sink, 2, "Section");
            sink.section_(2).unwrap();
            section(sink, 2, "Section");
            sink.section_(2).unwrap();
            sink.section_(1).unwrap();
        });

        assert_eq!(root.children.len(), 2);
        let chapter = &root.children[0];
        assert_eq!(chapter.children.len(), 2);
        let first = &chapter.children[0];
        assert_eq!(first.children.len(), 4);
        assert_eq!(first.children[0].children.len(), 1);
        assert_eq!(first.children[0].children[0].level(), Some(4));

        assert_eq!(ids(&root), vec!["chapter", "chapter_1"]);
        assert_eq!(ids(chapter), vec!["section", "section_1"]);
        assert_eq!(ids(first), vec!["item", "item_1", "item_2", "item_3"]);
        assert_eq!(ids(&root.children[1]), vec!["section_2", "section_3"]);
        assert_eq!(root.iter().count(), 12);
    }

    #[test]
    fn test_close_folds_open_sections() {
        let root = index_of(|sink| {
            section(sink, 1, "Outer");
            section(sink, 2, "Inner");
        });
        assert_eq!(ids(&root), vec!["outer"]);
        assert_eq!(ids(&root.children[0]), vec!["inner"]);
    }

    #[test]
    fn test_delegate_sees_events_in_order() {
        let mut sink = IndexingSink::new(EventCollector::new());
        sink.start(Element::Body).unwrap();
        section(&mut sink, 1, "A");
        sink.start(Element::Paragraph).unwrap();
        sink.end(Element::Paragraph).unwrap();
        sink.section_(1).unwrap();
        sink.end(Element::Body).unwrap();
        sink.close().unwrap();

        assert_eq!(
            sink.into_inner().names(),
            vec![
                "body",
                "section1",
                "sectionTitle1",
                "text",
                "sectionTitle1_",
                "paragraph",
                "paragraph_",
                "section1_",
                "body_",
                "close"
            ]
        );
    }

    #[test]
    fn test_create_anchors_precede_sections() {
        let mut sink = IndexingSink::create_anchors(EventCollector::new());
        section(&mut sink, 1, "First Steps");
        sink.section_(1).unwrap();
        sink.section(1).unwrap();
        sink.anchor("custom").unwrap();
        sink.anchor_().unwrap();
        sink.section_title(1).unwrap();
        sink.text("Second").unwrap();
        sink.section_title_(1).unwrap();
        sink.section_(1).unwrap();
        sink.close().unwrap();

        let collector = sink.into_inner();
        assert_eq!(
            collector.names()[..6].to_vec(),
            vec!["anchor", "anchor_", "section1", "sectionTitle1", "text", "sectionTitle1_"]
        );
        assert_eq!(
            collector.events()[0],
            SinkEvent::Start(
                Element::Anchor,
                crate::sink::Attributes::new().with(crate::sink::attr::NAME, "first_steps")
            )
        );
        let anchors = collector
            .names()
            .iter()
            .filter(|name| name.as_str() == "anchor")
            .count();
        assert_eq!(anchors, 2);
    }

    #[test]
    fn test_unique_anchor_names() {
        let mut sink = UniqueAnchorNames::new(EventCollector::new());
        sink.anchor("a").unwrap();
        sink.anchor_().unwrap();
        let err = sink.anchor("a").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Nesting violation: anchor name \"a\" used more than once"
        );
        assert_eq!(sink.into_inner().events().len(), 2);
    }

    #[test]
    fn test_entry_serializes() {
        let root = index_of(|sink| {
            section(sink, 1, "A");
            sink.section_(1).unwrap();
        });
        let json = serde_json::to_string(&root).unwrap();
        let back: IndexEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(root, back);
    }

    proptest! {
        #[test]
        fn test_ids_are_unique(titles in prop::collection::vec("[A-Ca-c ]{0,3}", 1..12)) {
            let root = index_of(|sink| {
                for title in &titles {
                    section(sink, 1, title);
                    sink.section_(1).unwrap();
                }
            });
            let all: Vec<&str> = root.iter().filter_map(IndexEntry::id).collect();
            let unique: HashSet<&str> = all.iter().copied().collect();
            prop_assert_eq!(all.len(), unique.len());
            prop_assert_eq!(root.children.len(), titles.len());
        }
    }
}
