// SPDX-License-Identifier: AGPL-3.0-or-later
//! Dialect parsers, one module per markup language

#[cfg(feature = "apt")]
mod apt;
#[cfg(feature = "confluence")]
mod confluence;
#[cfg(feature = "fml")]
mod fml;
#[cfg(feature = "twiki")]
mod twiki;
#[cfg(feature = "xdoc")]
mod xdoc;
#[cfg(feature = "xdoc")]
mod xml;

#[cfg(feature = "apt")]
pub use apt::AptParser;
#[cfg(feature = "confluence")]
pub use confluence::ConfluenceParser;
#[cfg(feature = "fml")]
pub use fml::FmlParser;
#[cfg(feature = "twiki")]
pub use twiki::TwikiParser;
#[cfg(feature = "xdoc")]
pub use xdoc::XdocParser;

use crate::traits::{DoxiaError, ParseError};

/// Turn any failure during a parse into a [`ParseError`] at `line`
///
/// Errors that already carry a location pass through untouched.
pub(crate) fn located(dialect: &str, name: &str, line: usize, err: DoxiaError) -> DoxiaError {
    if err.as_parse().is_some() {
        return err;
    }
    let line = (line > 0).then_some(line);
    ParseError::new(dialect, name, line, err.to_string())
        .with_cause(err)
        .into()
}
