// SPDX-License-Identifier: AGPL-3.0-or-later
#![no_main]

use doxia_core::modules::{AptParser, ConfluenceParser, TwikiParser};
use doxia_core::{EventCollector, ParseConfig, Parser, ParserExt};
use libfuzzer_sys::fuzz_target;

// Any input either fails with an error or yields a well-nested event stream
fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let config = ParseConfig {
        validate: true,
        ..ParseConfig::default()
    };
    let parsers: [&dyn Parser; 3] = [
        &AptParser::new(),
        &ConfluenceParser::new(),
        &TwikiParser::new(),
    ];
    for parser in parsers {
        let mut sink = EventCollector::new();
        if parser.parse_str(text, "fuzz", &mut sink, &config).is_ok() {
            assert!(!sink.events().is_empty());
        }
    }
});
