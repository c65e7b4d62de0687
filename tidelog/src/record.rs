//! Record formatting and severity filtering.
//!
//! A record is one line of UTF-8 text:
//!
//! ```text
//! 2024.03.07 14:05:09.042\tdisk full /var/data\r\n
//! ```
//!
//! Error records append their cause chain, one cause per line, each prefixed
//! with a space.

use std::error::Error;
use std::fmt::{Display, Write as _};

use chrono::{DateTime, TimeZone};
use serde::{Deserialize, Serialize};

use crate::framing::RECORD_DELIMITER;

/// Timestamp layout at the start of every record.
pub const TIMESTAMP_FORMAT: &str = "%Y.%m.%d %H:%M:%S%.3f";

/// Severity of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    /// Informational record.
    Info,
    /// Error record.
    Error,
}

/// Which records the engine writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoggingLevel {
    /// Write every record.
    #[default]
    All,
    /// Write nothing.
    Nothing,
    /// Write error records only.
    ErrorsOnly,
}

impl LoggingLevel {
    /// Returns true if records of `severity` pass this level.
    #[must_use]
    pub const fn admits(self, severity: Severity) -> bool {
        match self {
            Self::All => true,
            Self::Nothing => false,
            Self::ErrorsOnly => matches!(severity, Severity::Error),
        }
    }
}

impl Display for LoggingLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::All => "all",
            Self::Nothing => "nothing",
            Self::ErrorsOnly => "errors_only",
        })
    }
}

/// Formats one record.
///
/// `cause` and every error reachable through [`Error::source`] are appended
/// after `text`, each as ` <cause>` terminated by the record delimiter.
#[must_use]
pub fn format_record<Tz>(
    moment: &DateTime<Tz>,
    text: &str,
    cause: Option<&(dyn Error + 'static)>,
) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let delimiter = std::str::from_utf8(RECORD_DELIMITER).unwrap_or("\r\n");
    let mut out = String::with_capacity(text.len() + 32);

    let _ = write!(out, "{}\t{text}", moment.format(TIMESTAMP_FORMAT));

    let Some(cause) = cause else {
        out.push_str(delimiter);
        return out;
    };

    let mut next = Some(cause);
    while let Some(err) = next {
        let _ = write!(out, " {err}{delimiter}");
        next = err.source();
    }
    out
}
