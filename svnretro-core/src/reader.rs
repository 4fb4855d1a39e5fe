//! Cursor over a byte region.
//!
//! A `ByteReader` never owns the bytes it walks and never rewinds. It is
//! parameterized by an absolute origin so `offset()` stays meaningful even
//! when constructed over a sub-slice partway through a larger dump.

use crate::error::{DumpError, Result};

pub struct ByteReader<'a> {
    buffer: &'a [u8],
    origin_len: usize,
}

impl<'a> ByteReader<'a> {
    /// Build a reader over `buffer`, whose first byte sits at absolute
    /// position `origin_len - buffer.len()` within some larger region.
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            origin_len: buffer.len(),
        }
    }

    /// Current absolute offset within the original region this reader (or
    /// its ancestor slice) was constructed over.
    pub fn offset(&self) -> usize {
        self.origin_len - self.buffer.len()
    }

    pub fn at_eof(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn peek(&self, n: usize) -> &'a [u8] {
        let n = n.min(self.buffer.len());
        &self.buffer[..n]
    }

    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.buffer.starts_with(prefix.as_bytes())
    }

    /// If the remaining buffer starts with `prefix`, consume through the
    /// following `\n` and return the text between prefix and newline.
    /// Otherwise leaves the cursor untouched.
    pub fn line_after(&mut self, prefix: &str) -> Option<&'a str> {
        if !self.buffer.starts_with(prefix.as_bytes()) {
            return None;
        }
        let newline = self.buffer.iter().position(|&b| b == b'\n')?;
        let line = &self.buffer[prefix.len()..newline];
        self.buffer = &self.buffer[newline + 1..];
        std::str::from_utf8(line).ok()
    }

    /// `line_after(header + ": ")` followed by a decimal parse. Fails with
    /// `MissingField` (not a parse error) when the prefix itself is absent.
    pub fn int_after(&mut self, header: &str) -> Result<i64> {
        let prefixed = format!("{header}: ");
        match self.line_after(&prefixed) {
            Some(text) => text
                .parse::<i64>()
                .map_err(|source| DumpError::InvalidInteger {
                    context: "int_after",
                    source,
                }),
            None => Err(DumpError::MissingField(header.to_string())),
        }
    }

    pub fn read(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.buffer.len() {
            return Err(DumpError::UnexpectedEof);
        }
        let (data, rest) = self.buffer.split_at(n);
        self.buffer = rest;
        Ok(data)
    }

    /// Advance up to `n` bytes; returns `false` if fewer remained (the
    /// cursor is then positioned at EOF).
    pub fn discard(&mut self, n: usize) -> bool {
        if n > self.buffer.len() {
            self.buffer = &self.buffer[self.buffer.len()..];
            false
        } else {
            self.buffer = &self.buffer[n..];
            true
        }
    }

    /// Parses `{prefix} {decimal}\n<payload>\n`.
    pub fn read_sized(&mut self, prefix: char) -> Result<&'a [u8]> {
        let lead = format!("{prefix} ");
        let size_str = self
            .line_after(&lead)
            .ok_or_else(|| DumpError::InvalidHeader(format!("expected '{prefix}' prefix")))?;
        let size: usize = size_str
            .parse()
            .map_err(|source| DumpError::InvalidInteger {
                context: "read_sized size",
                source,
            })?;
        let payload = self.read(size)?;
        if !self.newline() {
            return Err(DumpError::MissingNewline("after sized payload"));
        }
        Ok(payload)
    }

    pub fn newline(&mut self) -> bool {
        if self.buffer.first() == Some(&b'\n') {
            self.buffer = &self.buffer[1..];
            true
        } else {
            false
        }
    }

    /// Lookahead-then-advance: if the buffer starts with `s`, consume it.
    pub fn expect_and_consume(&mut self, s: &str) -> bool {
        if self.buffer.starts_with(s.as_bytes()) {
            self.buffer = &self.buffer[s.len()..];
            true
        } else {
            false
        }
    }
}
