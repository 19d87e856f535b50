// SPDX-License-Identifier: AGPL-3.0-or-later
//! JSON-lines event log

use super::{Sink, SinkEvent};
use crate::traits::{DoxiaError, RenderConfig, Result, SinkFactory};
use std::io::Write;

/// Writes each event as one JSON document followed by the configured EOL
pub struct EventLogSink<W: Write> {
    out: W,
    eol: String,
    pretty: bool,
}

impl<W: Write> EventLogSink<W> {
    pub fn new(out: W, config: &RenderConfig) -> Self {
        Self {
            out,
            eol: config.eol.clone(),
            pretty: config.pretty,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Sink for EventLogSink<W> {
    fn event(&mut self, event: SinkEvent) -> Result<()> {
        let written = if self.pretty {
            serde_json::to_writer_pretty(&mut self.out, &event)
        } else {
            serde_json::to_writer(&mut self.out, &event)
        };
        written.map_err(|e| DoxiaError::Serialization(e.to_string()))?;
        self.out.write_all(self.eol.as_bytes())?;
        if matches!(event, SinkEvent::Flush | SinkEvent::Close) {
            self.out.flush()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EventLogSinkFactory;

impl SinkFactory for EventLogSinkFactory {
    fn id(&self) -> &'static str {
        "events"
    }

    fn create<'w>(&self, writer: Box<dyn Write + 'w>, config: &RenderConfig) -> Box<dyn Sink + 'w> {
        Box::new(EventLogSink::new(writer, config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::Element;

    #[test]
    fn test_one_json_event_per_line() {
        let mut sink = EventLogSink::new(Vec::new(), &RenderConfig::default());
        sink.section(1).unwrap();
        sink.text("Intro").unwrap();
        sink.section_(1).unwrap();

        let out = String::from_utf8(sink.into_inner()).unwrap();
        let events: Vec<SinkEvent> = out
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(events.len(), 3);
        assert_eq!(events[2], SinkEvent::End(Element::Section(1)));
    }

    #[test]
    fn test_line_shape() {
        let mut sink = EventLogSink::new(Vec::new(), &RenderConfig::default());
        sink.horizontal_rule().unwrap();
        let out = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(out, "{\"event\":\"horizontal_rule\"}\n");
    }
}
