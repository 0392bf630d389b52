//! Request cookie parsing.
//!
//! The jar keeps entries in the order each name was first seen while the
//! stored entry is always the last one written, so reconstruction is
//! deterministic and preserves the client's original formatting.

use hyper::header::COOKIE;
use hyper::HeaderMap;
use std::fmt;

/// A single `name=value` pair from a `Cookie` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieEntry {
    pub name: String,
    pub value: String,
    /// Trimmed segment exactly as the client sent it.
    pub raw_segment: String,
}

impl CookieEntry {
    fn parse(segment: &str) -> Option<Self> {
        let raw = segment.trim();
        if raw.is_empty() {
            return None;
        }

        let (name, value) = match raw.split_once('=') {
            Some((name, value)) => (name.trim(), value.trim()),
            None => (raw, raw),
        };

        Some(Self {
            name: name.to_string(),
            value: value.to_string(),
            raw_segment: raw.to_string(),
        })
    }
}

/// Ordered, name-keyed view of a request's cookies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieJar {
    entries: Vec<CookieEntry>,
}

impl CookieJar {
    /// Parse a raw `Cookie` header value. Never fails.
    pub fn parse(header: &str) -> Self {
        let mut jar = Self::default();
        for entry in header.split(';').filter_map(CookieEntry::parse) {
            jar.insert(entry);
        }
        jar
    }

    /// Build a jar from every `Cookie` header line of a request.
    ///
    /// HTTP/2 clients may split cookies across several header lines; they are
    /// joined with `"; "` before parsing.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let joined = headers
            .get_all(COOKIE)
            .iter()
            // Opaque bytes in one cookie must not hide the others.
            .map(|v| String::from_utf8_lossy(v.as_bytes()))
            .collect::<Vec<_>>()
            .join("; ");
        Self::parse(&joined)
    }

    fn insert(&mut self, entry: CookieEntry) {
        match self.entries.iter_mut().find(|e| e.name == entry.name) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.value.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for CookieJar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, entry) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            f.write_str(&entry.raw_segment)?;
        }
        Ok(())
    }
}
