// SPDX-License-Identifier: AGPL-3.0-or-later
//! Line-oriented input with one level of pushback
//!
//! Block parsers read ahead one line to decide where a block ends and hand
//! the surplus line back with [`LineSource::unget_line`]. Only one line can
//! be pending at a time; a second unget before the next read is an error.

use crate::traits::{DoxiaError, Result};
use std::io::{self, BufRead};

pub struct LineSource<R: BufRead> {
    reader: Option<R>,
    name: String,
    line_number: usize,
    last_line: Option<String>,
    ungetted: bool,
}

impl<R: BufRead> LineSource<R> {
    pub fn new(reader: R, name: impl Into<String>) -> Self {
        Self {
            reader: Some(reader),
            name: name.into(),
            line_number: 0,
            last_line: None,
            ungetted: false,
        }
    }

    /// Next line without its terminator, `None` at end of input
    pub fn next_line(&mut self) -> Result<Option<String>> {
        if self.ungetted {
            self.ungetted = false;
            return Ok(self.last_line.clone());
        }

        let Some(reader) = self.reader.as_mut() else {
            self.last_line = None;
            return Ok(None);
        };

        let line = read_line(reader)?;
        match &line {
            Some(text) => {
                self.line_number += 1;
                tracing::trace!(source = %self.name, line = self.line_number, text = %text, "read line");
            }
            None => self.close(),
        }
        self.last_line = line.clone();
        Ok(line)
    }

    /// Push the most recently returned line back
    pub fn unget_line(&mut self) -> Result<()> {
        if self.ungetted {
            return Err(DoxiaError::InvalidState(
                "only one level of unget is supported".to_string(),
            ));
        }
        if self.last_line.is_none() {
            return Err(DoxiaError::InvalidState("no line to unget".to_string()));
        }
        self.ungetted = true;
        Ok(())
    }

    /// Push `text` back in place of the last line; empty text is ignored
    pub fn unget(&mut self, text: &str) -> Result<()> {
        if self.ungetted {
            return Err(DoxiaError::InvalidState(
                "only one level of unget is supported".to_string(),
            ));
        }
        if text.is_empty() {
            return Ok(());
        }
        self.last_line = Some(text.to_string());
        self.ungetted = true;
        Ok(())
    }

    /// 1-based number of the last line read from the input
    ///
    /// Line numbers start at 1, so 0 marks a source nothing was read from
    /// yet. Parse errors reported at line 0 carry no line at all.
    pub fn line_number(&self) -> usize {
        self.line_number
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_closed(&self) -> bool {
        self.reader.is_none()
    }

    /// Release the reader; pending pushback survives
    pub fn close(&mut self) {
        self.reader = None;
    }
}

/// Read up to `\n`, `\r\n` or a lone `\r`
fn read_line<R: BufRead>(reader: &mut R) -> io::Result<Option<String>> {
    let mut bytes = Vec::new();
    let mut saw_any = false;
    loop {
        let (consumed, done, pending_cr) = {
            let buf = reader.fill_buf()?;
            if buf.is_empty() {
                break;
            }
            saw_any = true;
            match buf.iter().position(|&b| b == b'\n' || b == b'\r') {
                Some(pos) => {
                    bytes.extend_from_slice(&buf[..pos]);
                    (pos + 1, true, buf[pos] == b'\r')
                }
                None => {
                    bytes.extend_from_slice(buf);
                    (buf.len(), false, false)
                }
            }
        };
        reader.consume(consumed);
        if done {
            if pending_cr {
                let buf = reader.fill_buf()?;
                if buf.first() == Some(&b'\n') {
                    reader.consume(1);
                }
            }
            break;
        }
    }

    if !saw_any {
        return Ok(None);
    }
    String::from_utf8(bytes)
        .map(Some)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}
