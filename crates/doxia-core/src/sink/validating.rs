// SPDX-License-Identifier: AGPL-3.0-or-later
//! Begin/end nesting checker

use super::{Element, Sink, SinkEvent, MAX_SECTION_LEVEL};
use crate::traits::{DoxiaError, Result};

/// Decorator that rejects any event stream breaking stack order
///
/// Events are forwarded only after they pass the check, so the delegate
/// never sees an ill-formed prefix.
#[derive(Debug)]
pub struct ValidatingSink<S: Sink> {
    delegate: S,
    open: Vec<Element>,
}

impl<S: Sink> ValidatingSink<S> {
    pub fn new(delegate: S) -> Self {
        Self {
            delegate,
            open: Vec::new(),
        }
    }

    /// Elements currently open, outermost first
    pub fn open_elements(&self) -> &[Element] {
        &self.open
    }

    pub fn depth(&self) -> usize {
        self.open.len()
    }

    /// Check that every element was closed
    pub fn finish(self) -> Result<()> {
        check_balanced(&self.open)
    }

    pub fn into_inner(self) -> S {
        self.delegate
    }

    fn check(&mut self, event: &SinkEvent) -> Result<()> {
        match event {
            SinkEvent::Start(element, _) => {
                check_level(*element)?;
                self.open.push(*element);
            }
            SinkEvent::End(element) => {
                check_level(*element)?;
                match self.open.pop() {
                    Some(top) if top == *element => {}
                    Some(top) => {
                        return Err(DoxiaError::Structure(format!(
                            "expected end of {top}, found end of {element}"
                        )))
                    }
                    None => {
                        return Err(DoxiaError::Structure(format!(
                            "end of {element} without matching start"
                        )))
                    }
                }
            }
            SinkEvent::Close => check_balanced(&self.open)?,
            _ => {}
        }
        Ok(())
    }
}

fn check_level(element: Element) -> Result<()> {
    match element {
        Element::Section(level) | Element::SectionTitle(level)
            if !(1..=MAX_SECTION_LEVEL).contains(&level) =>
        {
            Err(DoxiaError::Structure(format!(
                "section level {level} outside 1..={MAX_SECTION_LEVEL}"
            )))
        }
        _ => Ok(()),
    }
}

fn check_balanced(open: &[Element]) -> Result<()> {
    if open.is_empty() {
        return Ok(());
    }
    let names: Vec<String> = open.iter().map(Element::to_string).collect();
    Err(DoxiaError::Structure(format!(
        "unclosed elements: {}",
        names.join(", ")
    )))
}

impl<S: Sink> Sink for ValidatingSink<S> {
    fn event(&mut self, event: SinkEvent) -> Result<()> {
        self.check(&event)?;
        self.delegate.event(event)
    }
}
