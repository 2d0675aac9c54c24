//! Per-URL result records.

use std::io::{self, Write};

use serde::Serialize;

/// One line of JSON written to stdout per URL.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct Record<'a> {
    pub url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<'a> Record<'a> {
    pub fn html(url: &'a str, html: &'a str) -> Self {
        Self {
            url,
            html: Some(html),
            error: None,
        }
    }

    pub fn failed(url: &'a str, error: impl ToString) -> Self {
        Self {
            url,
            html: None,
            error: Some(error.to_string()),
        }
    }
}

pub fn write_record(out: &mut impl Write, record: &Record<'_>) -> io::Result<()> {
    serde_json::to_writer(&mut *out, record)?;
    out.write_all(b"\n")
}
