//! Ordered RFC-822-style header block, bounded by a blank line.

use crate::error::{DumpError, Result};
use crate::reader::ByteReader;

#[derive(Debug, Clone)]
pub struct HeaderBlock {
    /// Preserves original key insertion order.
    index: Vec<String>,
    table: std::collections::HashMap<String, String>,
    /// Number of blank lines that terminated the block.
    newlines: usize,
}

impl HeaderBlock {
    pub fn parse(r: &mut ByteReader<'_>) -> Result<Self> {
        let mut index = Vec::new();
        let mut table = std::collections::HashMap::new();

        loop {
            let line = next_line(r)?;
            if line.is_empty() {
                break;
            }
            let (key, value) = split_header(line)?;
            index.push(key.to_string());
            table.insert(key.to_string(), value.to_string());
        }

        // `next_line` already consumed the blank line that terminated the
        // block above; count it, then any further blank lines.
        let mut newlines = 1;
        while r.expect_and_consume("\n") {
            newlines += 1;
        }

        Ok(Self {
            index,
            table,
            newlines,
        })
    }

    pub fn has(&self, key: &str) -> bool {
        self.table.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.table.get(key).map(String::as_str)
    }

    pub fn int(&self, key: &str) -> Result<i64> {
        let value = self
            .table
            .get(key)
            .ok_or_else(|| DumpError::MissingField(key.to_string()))?;
        value
            .parse()
            .map_err(|source| DumpError::InvalidInteger {
                context: "header int",
                source,
            })
    }

    /// Sets `key` to `value`. Preserves the key's original position if it
    /// already existed, otherwise appends it.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        if !self.table.contains_key(key) {
            self.index.push(key.to_string());
        }
        self.table.insert(key.to_string(), value.into());
    }

    pub fn remove(&mut self, key: &str) {
        self.table.remove(key);
        if let Some(pos) = self.index.iter().position(|k| k == key) {
            self.index.remove(pos);
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Re-emit keys in original order as `key: value\n`, followed by the
    /// recorded trailing blank-line count.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.index.len() * 48);
        for key in &self.index {
            out.extend_from_slice(key.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(self.table[key].as_bytes());
            out.push(b'\n');
        }
        for _ in 0..self.newlines {
            out.push(b'\n');
        }
        out
    }
}

fn next_line<'a>(r: &mut ByteReader<'a>) -> Result<&'a str> {
    // Peek for the next newline without disturbing the reader on failure.
    let remaining = r.peek(r.len());
    let newline = remaining
        .iter()
        .position(|&b| b == b'\n')
        .ok_or(DumpError::UnexpectedEof)?;
    let line = &remaining[..newline];
    r.discard(newline + 1);
    std::str::from_utf8(line).map_err(|_| DumpError::InvalidHeader("non-utf8 header line".into()))
}

fn split_header(line: &str) -> Result<(&str, &str)> {
    match line.find(": ") {
        Some(idx) => Ok((&line[..idx], &line[idx + 2..])),
        None => Err(DumpError::InvalidHeader(line.replace('\r', "\\r"))),
    }
}
