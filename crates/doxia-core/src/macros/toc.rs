// SPDX-License-Identifier: AGPL-3.0-or-later
//! Table of contents macro
//!
//! Parameters: `section` (1-based top-level section to restrict to, 0 for
//! all), `fromDepth` and `toDepth` (only read when `section` is set), plus
//! `id` and `class` which are copied onto the outer list.

use super::{Macro, MacroRequest};
use crate::index::{IndexEntry, IndexingSink};
use crate::sink::{attr, Attributes, Element, Sink};
use crate::traits::{DoxiaError, ParseConfig, Result};

const ID: &str = "toc";
const MAX_DEPTH: u32 = 5;

#[derive(Debug, Clone, Copy, Default)]
pub struct TocMacro;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TocRange {
    section: u32,
    from_depth: u32,
    to_depth: u32,
}

impl TocRange {
    fn from_request(request: &MacroRequest<'_>) -> Result<Self> {
        let section = request.int_parameter(ID, "section", 0)?;
        if section == 0 {
            return Ok(Self {
                section,
                from_depth: 0,
                to_depth: MAX_DEPTH,
            });
        }
        Ok(Self {
            section,
            from_depth: request.int_parameter(ID, "fromDepth", 0)?,
            to_depth: request.int_parameter(ID, "toDepth", MAX_DEPTH)?,
        })
    }
}

impl Macro for TocMacro {
    fn execute(&self, sink: &mut dyn Sink, request: &MacroRequest<'_>) -> Result<()> {
        let range = TocRange::from_request(request)?;

        let nested = ParseConfig {
            execute_macros: false,
            validate: false,
            ..request.config.clone()
        };
        let mut indexing = IndexingSink::detached();
        let mut reader = request.source.as_bytes();
        request
            .parser
            .parse(&mut reader, ID, &mut indexing, &nested)
            .map_err(|err| DoxiaError::Macro {
                id: ID.to_string(),
                message: err.to_string(),
            })?;
        indexing.close()?;
        let root = indexing.into_root_entry()?;

        let mut attributes = Attributes::new();
        for key in [attr::ID, attr::CLASS] {
            if let Some(value) = request.parameter(key) {
                attributes.insert(key, value);
            }
        }
        write_toc(sink, &root, range, attributes)
    }
}

fn write_toc(
    sink: &mut dyn Sink,
    root: &IndexEntry,
    range: TocRange,
    attributes: Attributes,
) -> Result<()> {
    if root.children.is_empty() {
        return Ok(());
    }
    let outer_list = range.from_depth < range.section || range.section == 0;
    if outer_list {
        sink.start_with(Element::List, attributes)?;
    }
    let mut position = 1;
    for entry in &root.children {
        if range.section == 0 || position == range.section {
            write_entry(sink, entry, 1, range)?;
        }
        position += 1;
    }
    if outer_list {
        sink.end(Element::List)?;
    }
    Ok(())
}

fn write_item(sink: &mut dyn Sink, id: &str, title: &str) -> Result<()> {
    sink.start(Element::ListItem)?;
    sink.link(&format!("#{id}"))?;
    sink.text(title)?;
    sink.link_()
}

/// Write `entry` at depth `n`; untitled entries contribute only their
/// children, at the same depth
fn write_entry(sink: &mut dyn Sink, entry: &IndexEntry, n: u32, range: TocRange) -> Result<()> {
    let (Some(id), Some(title)) = (entry.id(), entry.title()) else {
        for child in &entry.children {
            write_entry(sink, child, n, range)?;
        }
        return Ok(());
    };

    let own_item = range.from_depth < n;
    if own_item {
        write_item(sink, id, title)?;
    }

    if range.to_depth >= n && !entry.children.is_empty() {
        let sub_list = range.from_depth < n + 1;
        if sub_list {
            sink.start(Element::List)?;
        }
        for child in &entry.children {
            if n == MAX_DEPTH {
                if let (Some(child_id), Some(child_title)) = (child.id(), child.title()) {
                    write_item(sink, child_id, child_title)?;
                    sink.end(Element::ListItem)?;
                }
            } else {
                write_entry(sink, child, n + 1, range)?;
            }
        }
        if sub_list {
            sink.end(Element::List)?;
        }
    }

    if own_item {
        sink.end(Element::ListItem)?;
    }
    Ok(())
}
