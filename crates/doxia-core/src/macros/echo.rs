// SPDX-License-Identifier: AGPL-3.0-or-later
use super::{Macro, MacroRequest};
use crate::sink::{Element, Sink};
use crate::traits::Result;

/// Writes its parameters back as a boxed verbatim block
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoMacro;

impl Macro for EchoMacro {
    fn execute(&self, sink: &mut dyn Sink, request: &MacroRequest<'_>) -> Result<()> {
        sink.verbatim(true)?;
        sink.text("echo\n")?;
        for (key, value) in &request.parameters {
            sink.text(&format!("{key} ---> {value}\n"))?;
        }
        sink.end(Element::Verbatim)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{EventCollector, SinkEvent};
    use crate::traits::{ParseConfig, Parser};
    use std::collections::BTreeMap;

    struct Dummy;

    impl Parser for Dummy {
        fn id(&self) -> &'static str {
            "dummy"
        }

        fn parse(
            &self,
            _reader: &mut dyn std::io::BufRead,
            _name: &str,
            _sink: &mut dyn Sink,
            _config: &ParseConfig,
        ) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_echo_lists_parameters_in_order() {
        let config = ParseConfig::default();
        let mut parameters = BTreeMap::new();
        parameters.insert("zeta".to_string(), "last".to_string());
        parameters.insert("alpha".to_string(), "first".to_string());
        let request = MacroRequest::new("", &Dummy, &config, parameters);

        let mut sink = EventCollector::new();
        EchoMacro.execute(&mut sink, &request).unwrap();

        assert_eq!(sink.names(), vec!["verbatim", "text", "text", "text", "verbatim_"]);
        assert_eq!(sink.collected_text(), "echo\nalpha ---> first\nzeta ---> last\n");
        assert!(matches!(&sink.events()[0], SinkEvent::Start(Element::Verbatim, a) if a.boxed()));
    }
}
