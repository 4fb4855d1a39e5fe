//! An ordered list of nodes plus revision-level properties.

use bytes::Bytes;

use crate::error::{DumpError, Result};
use crate::headers::HeaderBlock;
use crate::node::{Node, CONTENT_LENGTH_HEADER, NODE_PATH_HEADER, PROP_CONTENT_LENGTH_HEADER};
use crate::properties::Properties;
use crate::reader::ByteReader;

pub const REVISION_NUMBER_HEADER: &str = "Revision-number";

#[derive(Debug, Clone)]
pub struct Revision {
    pub number: i64,
    pub headers: HeaderBlock,
    pub properties: Properties,
    pub nodes: Vec<Node>,
    pub start_offset: usize,
    pub end_offset: usize,
}

impl Revision {
    pub fn parse(r: &mut ByteReader<'_>, origin: &Bytes) -> Result<Self> {
        let start_offset = r.offset();
        let headers = HeaderBlock::parse(r)?;
        let number = headers.int(REVISION_NUMBER_HEADER)?;
        let prop_len = headers.int(PROP_CONTENT_LENGTH_HEADER)? as usize;

        let properties = Properties::parse(r, prop_len, origin)?;
        if !r.expect_and_consume("\n") {
            return Err(DumpError::MissingNewline(
                "after revision header/properties",
            ));
        }

        let mut nodes = Vec::new();
        while r.has_prefix(&format!("{NODE_PATH_HEADER}: ")) {
            match Node::parse(r, origin, number)? {
                Some(node) => nodes.push(node),
                None => break,
            }
        }

        let end_offset = r.offset();
        r.expect_and_consume("\n");

        Ok(Self {
            number,
            headers,
            properties,
            nodes,
            start_offset,
            end_offset,
        })
    }

    /// Returns indexes of nodes whose path matches `prefix` as a path
    /// component (never a raw string prefix — `Model` never matches `Models`).
    pub fn node_indexes_with_prefix(&self, prefix: &str) -> Vec<usize> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| crate::tree::match_path_prefix(n.path(), prefix))
            .map(|(idx, _)| idx)
            .collect()
    }

    pub fn find_node(&self, predicate: impl Fn(&Node) -> bool) -> Option<&Node> {
        self.nodes.iter().find(|n| predicate(n))
    }

    /// Re-encodes this revision: recomputes `Prop-content-length`/
    /// `Content-length` (equal here, since revisions carry only properties),
    /// then each node in order.
    pub fn encode(&mut self) -> Bytes {
        let props_bytes = self.properties.bytes();
        self.headers
            .set(PROP_CONTENT_LENGTH_HEADER, props_bytes.len().to_string());
        self.headers
            .set(CONTENT_LENGTH_HEADER, props_bytes.len().to_string());

        let mut out = self.headers.encode();
        out.extend_from_slice(&props_bytes);
        out.push(b'\n');
        for node in &mut self.nodes {
            out.extend_from_slice(&node.encode());
        }
        Bytes::from(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_revision_with_two_nodes() {
        let src = b"Revision-number: 1\nProp-content-length: 10\nContent-length: 10\n\nPROPS-END\n\nNode-path: /a\nNode-kind: dir\nNode-action: add\nProp-content-length: 10\nText-content-length: 0\nContent-length: 10\n\nPROPS-END\n\n";
        let origin = Bytes::copy_from_slice(src);
        let mut r = ByteReader::new(src);
        let rev = Revision::parse(&mut r, &origin).unwrap();
        assert_eq!(rev.number, 1);
        assert_eq!(rev.nodes.len(), 1);
        assert_eq!(rev.nodes[0].path(), "/a");
    }

    #[test]
    fn round_trips_when_untouched() {
        let src = b"Revision-number: 1\nProp-content-length: 10\nContent-length: 10\n\nPROPS-END\n\nNode-path: /a\nNode-kind: dir\nNode-action: add\nProp-content-length: 10\nText-content-length: 0\nContent-length: 10\n\nPROPS-END\n\n";
        let origin = Bytes::copy_from_slice(src);
        let mut r = ByteReader::new(src);
        let mut rev = Revision::parse(&mut r, &origin).unwrap();
        assert_eq!(&rev.encode()[..], &src[..]);
    }
}
