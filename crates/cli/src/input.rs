//! Turning the positional input into a list of URLs.

use std::{io::BufRead, path::Path};

use {
    serde_json::Value,
    thiserror::Error,
    tracing::{debug, warn},
    yoink_browser::is_valid_url,
};

#[derive(Debug, Error)]
pub enum InputError {
    #[error("no input provided")]
    Missing,

    #[error("could not parse url information from input: {0}")]
    Unrecognized(String),

    #[error("cannot read inputs: {0}")]
    Unreadable(String),
}

impl InputError {
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Missing | Self::Unrecognized(_) => crate::EXIT_BAD_INPUT,
            Self::Unreadable(_) => crate::EXIT_UNREADABLE,
        }
    }
}

/// Resolve `input`: `-` reads stdin, an existing file is read as a URL list,
/// anything else must itself be a URL.
pub fn read_input(input: Option<&str>) -> Result<Vec<String>, InputError> {
    let input = input.filter(|s| !s.is_empty()).ok_or(InputError::Missing)?;

    if input == "-" {
        return read_lines(std::io::stdin().lock());
    }

    let path = Path::new(input);
    if path.is_file() {
        return read_url_file(path);
    }

    if is_valid_url(input) {
        return Ok(vec![input.to_string()]);
    }

    Err(InputError::Unrecognized(input.to_string()))
}

/// `.json` files hold an array; everything else is one URL per line.
pub fn read_url_file(path: &Path) -> Result<Vec<String>, InputError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| InputError::Unreadable(format!("{}: {e}", path.display())))?;

    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => parse_json(&text),
        Some("txt") => Ok(parse_lines(&text)),
        _ => {
            warn!(path = %path.display(), "unknown file extension, treating as text");
            Ok(parse_lines(&text))
        },
    }
}

pub fn read_lines(reader: impl BufRead) -> Result<Vec<String>, InputError> {
    let mut urls = Vec::new();
    for line in reader.lines() {
        let line = line.map_err(|e| InputError::Unreadable(e.to_string()))?;
        urls.extend(accept(&line));
    }
    Ok(urls)
}

/// Valid URLs, one per line. Blank lines and `#` comments are ignored.
pub fn parse_lines(text: &str) -> Vec<String> {
    text.lines().filter_map(accept).collect()
}

fn accept(line: &str) -> Option<String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    if is_valid_url(line) {
        Some(line.to_string())
    } else {
        debug!(line, "skipping invalid URL");
        None
    }
}

/// An array whose items are URL strings or objects with a `url` field.
pub fn parse_json(text: &str) -> Result<Vec<String>, InputError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| InputError::Unreadable(e.to_string()))?;
    let Value::Array(items) = value else {
        return Err(InputError::Unreadable("expected a JSON array of URLs".into()));
    };

    Ok(items
        .iter()
        .filter_map(|item| match item {
            Value::String(url) => Some(url.as_str()),
            Value::Object(map) => map.get("url").and_then(Value::as_str),
            _ => None,
        })
        .filter_map(accept)
        .collect())
}
