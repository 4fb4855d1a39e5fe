//! Length-prefixed key/value property records terminated by `PROPS-END`.
//!
//! A `Properties` retains enough state to re-emit byte-identical output when
//! untouched: the original raw window (a zero-copy `bytes::Bytes` slice into
//! the dump's mmap region), the original key order including deletion
//! tombstones, and a dirty flag. Only a `set`/`remove`/`apply_replacements`
//! call flips the dirty flag and forces re-encoding.

use bytes::Bytes;

use crate::error::{DumpError, Result};
use crate::reader::ByteReader;

const PROPS_END: &str = "PROPS-END";

#[derive(Debug, Clone)]
pub struct Properties {
    /// Original key order, including keys that were deleted (tombstones).
    index: Vec<String>,
    /// Live key -> value for keys that have not been deleted.
    table: std::collections::HashMap<String, String>,
    raw: Bytes,
    dirty: bool,
}

impl Properties {
    pub fn empty() -> Self {
        Self {
            index: Vec::new(),
            table: std::collections::HashMap::new(),
            raw: Bytes::from_static(b"PROPS-END\n"),
            dirty: false,
        }
    }

    /// Parses a `length`-byte window starting at the reader's current
    /// position. `origin` is the full backing buffer, used to produce a
    /// zero-copy slice for `raw`.
    pub fn parse(r: &mut ByteReader<'_>, length: usize, origin: &Bytes) -> Result<Self> {
        let window = r.read(length)?;
        let raw = origin.slice_ref(window);

        let mut index = Vec::new();
        let mut table = std::collections::HashMap::new();
        let mut wr = ByteReader::new(window);

        loop {
            if wr.has_prefix(&format!("{PROPS_END}\n")) {
                wr.discard(PROPS_END.len() + 1);
                break;
            }
            if wr.at_eof() {
                return Err(DumpError::UnexpectedEof);
            }

            if wr.has_prefix("D ") {
                let key = wr.read_sized('D')?;
                let key = std::str::from_utf8(key)
                    .map_err(|_| DumpError::InvalidHeader("non-utf8 property key".into()))?
                    .to_string();
                if index.contains(&key) {
                    return Err(DumpError::DuplicateProperty(key));
                }
                index.push(key);
            } else {
                let key = wr.read_sized('K')?;
                let key = std::str::from_utf8(key)
                    .map_err(|_| DumpError::InvalidHeader("non-utf8 property key".into()))?
                    .to_string();
                let value = wr.read_sized('V')?;
                let value = std::str::from_utf8(value)
                    .map_err(|_| DumpError::InvalidHeader("non-utf8 property value".into()))?
                    .to_string();
                if index.contains(&key) || table.contains_key(&key) {
                    return Err(DumpError::DuplicateProperty(key));
                }
                index.push(key.clone());
                table.insert(key, value);
            }
        }

        Ok(Self {
            index,
            table,
            raw,
            dirty: false,
        })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.table.get(key).map(String::as_str)
    }

    pub fn has_key_values(&self) -> bool {
        !self.table.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Updates an existing key's value. Keys are never newly introduced by
    /// this engine — that is an invariant of the dump-rewriting domain.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        if self.table.contains_key(key) {
            self.table.insert(key.to_string(), value.into());
            self.dirty = true;
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let removed = self.table.remove(key);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    /// Substring-substitutes every value against the given prefix->replacement
    /// map. Used by the `replace` rule pass and by retrofit's `retrofit-props`.
    pub fn apply_replacements(&mut self, replacements: &std::collections::BTreeMap<String, String>) {
        for value in self.table.values_mut() {
            for (from, to) in replacements {
                if value.contains(from.as_str()) {
                    *value = value.replace(from.as_str(), to);
                }
            }
        }
        self.dirty = true;
    }

    /// Substring-substitutes `old` -> `new` in the named properties only,
    /// leaving every other key untouched. Used by refit-branch history
    /// rewriting, which must only touch `retrofit-props` keys.
    pub fn replace_substring_in_keys(&mut self, keys: &[String], old: &str, new: &str) {
        let mut changed = false;
        for key in keys {
            if let Some(value) = self.table.get_mut(key) {
                if value.contains(old) {
                    *value = value.replace(old, new);
                    changed = true;
                }
            }
        }
        if changed {
            self.dirty = true;
        }
    }

    /// Returns the encoded byte form: the original window verbatim when
    /// untouched, otherwise a fresh encoding driven by `index` order.
    pub fn bytes(&self) -> Bytes {
        if !self.dirty {
            return self.raw.clone();
        }

        let mut out = Vec::with_capacity(self.raw.len());
        for key in &self.index {
            match self.table.get(key) {
                Some(value) => {
                    out.extend_from_slice(format!("K {}\n", key.len()).as_bytes());
                    out.extend_from_slice(key.as_bytes());
                    out.push(b'\n');
                    out.extend_from_slice(format!("V {}\n", value.len()).as_bytes());
                    out.extend_from_slice(value.as_bytes());
                    out.push(b'\n');
                }
                None => {
                    out.extend_from_slice(format!("D {}\n", key.len()).as_bytes());
                    out.extend_from_slice(key.as_bytes());
                    out.push(b'\n');
                }
            }
        }
        out.extend_from_slice(b"PROPS-END\n");
        Bytes::from(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &[u8]) -> Properties {
        let origin = Bytes::copy_from_slice(src);
        let mut r = ByteReader::new(src);
        Properties::parse(&mut r, src.len(), &origin).unwrap()
    }

    #[test]
    fn round_trips_verbatim_when_untouched() {
        let src = b"K 3\nfoo\nV 3\nbar\nPROPS-END\n";
        let props = parse(src);
        assert_eq!(props.get("foo"), Some("bar"));
        assert_eq!(&props.bytes()[..], &src[..]);
    }

    #[test]
    fn tombstones_preserve_index_position() {
        let src = b"K 1\na\nV 1\n1\nD 1\nb\nK 1\nc\nV 1\n3\nPROPS-END\n";
        let props = parse(src);
        assert_eq!(props.get("a"), Some("1"));
        assert_eq!(props.get("b"), None);
        assert_eq!(props.get("c"), Some("3"));
        assert_eq!(&props.bytes()[..], &src[..]);
    }

    #[test]
    fn set_marks_dirty_and_reencodes() {
        let src = b"K 1\na\nV 1\n1\nPROPS-END\n";
        let mut props = parse(src);
        props.set("a", "99");
        assert_eq!(props.get("a"), Some("99"));
        assert_eq!(&props.bytes()[..], b"K 1\na\nV 2\n99\nPROPS-END\n".as_slice());
    }

    #[test]
    fn remove_reencodes_as_tombstone() {
        let src = b"K 1\na\nV 1\n1\nPROPS-END\n";
        let mut props = parse(src);
        props.remove("a");
        assert_eq!(&props.bytes()[..], b"D 1\na\nPROPS-END\n".as_slice());
    }

    #[test]
    fn duplicate_key_is_an_error() {
        let src = b"K 1\na\nV 1\n1\nK 1\na\nV 1\n2\nPROPS-END\n";
        let origin = Bytes::copy_from_slice(src);
        let mut r = ByteReader::new(src);
        assert!(Properties::parse(&mut r, src.len(), &origin).is_err());
    }

    #[test]
    fn apply_replacements_substring_matches_all_values() {
        let src = b"K 1\na\nV 6\n/a/foo\nPROPS-END\n";
        let mut props = parse(src);
        let mut repl = std::collections::BTreeMap::new();
        repl.insert("/a".to_string(), "/x".to_string());
        props.apply_replacements(&repl);
        assert_eq!(props.get("a"), Some("/x/foo"));
    }

    #[test]
    fn replace_substring_in_keys_skips_unnamed_properties() {
        let src = b"K 9\nsvn:mergeinfo\nV 6\n/Trunk\nK 1\na\nV 6\n/Trunk\nPROPS-END\n";
        let mut props = parse(src);
        props.replace_substring_in_keys(
            &["svn:mergeinfo".to_string()],
            "/Trunk",
            "/Project/Trunk",
        );
        assert_eq!(props.get("svn:mergeinfo"), Some("/Project/Trunk"));
        assert_eq!(props.get("a"), Some("/Trunk"));
    }
}
