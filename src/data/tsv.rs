//! Shared helpers for reading tab-separated tables with named columns.

use crate::error::{CleanError, Result};
use csv::{ReaderBuilder, StringRecord, Trim};
use std::io::Read;
use std::str::FromStr;

/// Build a tab-separated reader with a mandatory header row.
pub(crate) fn tsv_reader<R: Read>(reader: R) -> csv::Reader<R> {
    ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .trim(Trim::All)
        .from_reader(reader)
}

/// Locate a mandatory column by any of its accepted names.
pub(crate) fn required_column(
    headers: &StringRecord,
    names: &[&str],
    table: &str,
) -> Result<usize> {
    optional_column(headers, names).ok_or_else(|| {
        let accepted: Vec<String> = names.iter().map(|name| format!("'{}'", name)).collect();
        CleanError::Schema(format!(
            "Missing mandatory column {} in {} table",
            accepted.join(" or "),
            table
        ))
    })
}

/// Locate an optional column by any of its accepted names.
pub(crate) fn optional_column(headers: &StringRecord, names: &[&str]) -> Option<usize> {
    headers
        .iter()
        .position(|h| names.iter().any(|name| h.eq_ignore_ascii_case(name)))
}

/// Parse one field, reporting the row and column on failure.
pub(crate) fn parse_field<T: FromStr>(
    record: &StringRecord,
    idx: usize,
    row: usize,
    column: &str,
) -> Result<T> {
    let raw = record.get(idx).unwrap_or("");
    raw.parse().map_err(|_| CleanError::InvalidValue {
        value: raw.to_string(),
        row,
        column: column.to_string(),
    })
}

/// Parse a boolean flag written as 0/1 or true/false.
pub(crate) fn parse_flag(
    record: &StringRecord,
    idx: usize,
    row: usize,
    column: &str,
) -> Result<bool> {
    let raw = record.get(idx).unwrap_or("");
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "t" | "yes" => Ok(true),
        "0" | "false" | "f" | "no" | "" => Ok(false),
        _ => Err(CleanError::InvalidValue {
            value: raw.to_string(),
            row,
            column: column.to_string(),
        }),
    }
}
