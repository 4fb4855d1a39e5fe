//! A single file/directory mutation within a revision.

use bytes::Bytes;

use crate::error::{DumpError, Result};
use crate::headers::HeaderBlock;
use crate::properties::Properties;
use crate::reader::ByteReader;

pub const NODE_PATH_HEADER: &str = "Node-path";
pub const NODE_ACTION_HEADER: &str = "Node-action";
pub const NODE_KIND_HEADER: &str = "Node-kind";
pub const NODE_COPYFROM_REV_HEADER: &str = "Node-copyfrom-rev";
pub const NODE_COPYFROM_PATH_HEADER: &str = "Node-copyfrom-path";
pub const PROP_CONTENT_LENGTH_HEADER: &str = "Prop-content-length";
pub const TEXT_CONTENT_LENGTH_HEADER: &str = "Text-content-length";
pub const CONTENT_LENGTH_HEADER: &str = "Content-length";

/// Closed sum type: an unrecognized wire value is a parse error, not a
/// variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeAction {
    Add,
    Change,
    Delete,
    Replace,
}

impl NodeAction {
    fn parse(path: &str, s: &str) -> Result<Self> {
        match s {
            "add" => Ok(Self::Add),
            "change" => Ok(Self::Change),
            "delete" => Ok(Self::Delete),
            "replace" => Ok(Self::Replace),
            other => Err(DumpError::UnknownNodeAction {
                path: path.to_string(),
                action: other.to_string(),
            }),
        }
    }

    pub fn as_wire(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Change => "change",
            Self::Delete => "delete",
            Self::Replace => "replace",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Dir,
}

impl NodeKind {
    fn parse(path: &str, s: &str) -> Result<Self> {
        match s {
            "file" => Ok(Self::File),
            "dir" => Ok(Self::Dir),
            other => Err(DumpError::UnknownNodeKind {
                path: path.to_string(),
                kind: other.to_string(),
            }),
        }
    }
}

/// Copy-from ancestry: the `(rev, path)` a node was branched/copied from.
#[derive(Debug, Clone)]
pub struct Ancestry {
    pub rev: i64,
    pub path: String,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub headers: HeaderBlock,
    pub properties: Properties,
    pub content: Bytes,
    pub action: NodeAction,
    pub kind: Option<NodeKind>,
    pub ancestry: Option<Ancestry>,
    /// The revision this node lives in, by number — a non-owning
    /// back-reference, not an owning one.
    pub revision_number: i64,
    /// Whether the wire form actually carried a `Prop-content-length` header
    /// and property block. A node can validly have none at all (e.g. a
    /// text-only `change`); re-encoding must not invent one.
    has_properties: bool,
    trailing_newlines: usize,
}

impl Node {
    /// Parses the next node from `r`. Returns `Ok(None)` (not an error) when
    /// the stream no longer begins with `Node-path`, signaling the end of
    /// this revision's node list.
    pub fn parse(
        r: &mut ByteReader<'_>,
        origin: &Bytes,
        revision_number: i64,
    ) -> Result<Option<Self>> {
        if !r.has_prefix(&format!("{NODE_PATH_HEADER}: ")) {
            return Ok(None);
        }

        let headers = HeaderBlock::parse(r)?;
        let path = headers
            .get(NODE_PATH_HEADER)
            .ok_or_else(|| DumpError::MissingField(NODE_PATH_HEADER.to_string()))?
            .to_string();

        let action_str = headers
            .get(NODE_ACTION_HEADER)
            .ok_or_else(|| DumpError::MissingField(NODE_ACTION_HEADER.to_string()))?;
        let action = NodeAction::parse(&path, action_str)?;

        let kind = match headers.get(NODE_KIND_HEADER) {
            Some(k) => Some(NodeKind::parse(&path, k)?),
            None if action == NodeAction::Delete => None,
            None => return Err(DumpError::MissingField(NODE_KIND_HEADER.to_string())),
        };

        let ancestry = match headers.get(NODE_COPYFROM_REV_HEADER) {
            Some(rev_str) => {
                let from_path = headers
                    .get(NODE_COPYFROM_PATH_HEADER)
                    .ok_or_else(|| {
                        DumpError::MissingField(NODE_COPYFROM_PATH_HEADER.to_string())
                    })?
                    .to_string();
                let rev: i64 = rev_str
                    .parse()
                    .map_err(|source| DumpError::InvalidInteger {
                        context: "Node-copyfrom-rev",
                        source,
                    })?;
                Some(Ancestry {
                    rev,
                    path: from_path,
                })
            }
            None => None,
        };

        if action == NodeAction::Delete {
            let mut trailing_newlines = 0;
            while r.expect_and_consume("\n") {
                trailing_newlines += 1;
            }
            return Ok(Some(Self {
                headers,
                properties: Properties::empty(),
                content: Bytes::new(),
                action,
                kind,
                ancestry,
                revision_number,
                has_properties: false,
                trailing_newlines,
            }));
        }

        let has_properties = headers.has(PROP_CONTENT_LENGTH_HEADER);
        let prop_len = match headers.int(PROP_CONTENT_LENGTH_HEADER) {
            Ok(n) => n as usize,
            Err(DumpError::MissingField(_)) => 0,
            Err(e) => return Err(e),
        };
        let text_len = match headers.int(TEXT_CONTENT_LENGTH_HEADER) {
            Ok(n) => n as usize,
            Err(DumpError::MissingField(_)) => 0,
            Err(e) => return Err(e),
        };

        let properties = if prop_len > 0 {
            Properties::parse(r, prop_len, origin)?
        } else {
            Properties::empty()
        };

        let content_slice = r.read(text_len)?;
        let content = origin.slice_ref(content_slice);

        let mut trailing_newlines = 0;
        while r.expect_and_consume("\n") {
            trailing_newlines += 1;
        }

        Ok(Some(Self {
            headers,
            properties,
            content,
            action,
            kind,
            ancestry,
            revision_number,
            has_properties,
            trailing_newlines,
        }))
    }

    pub fn path(&self) -> &str {
        self.headers.get(NODE_PATH_HEADER).unwrap_or_default()
    }

    pub fn set_path(&mut self, path: &str) {
        self.headers.set(NODE_PATH_HEADER, path);
    }

    pub fn copyfrom_path(&self) -> Option<&str> {
        self.headers.get(NODE_COPYFROM_PATH_HEADER)
    }

    pub fn set_copyfrom_path(&mut self, path: &str) {
        self.headers.set(NODE_COPYFROM_PATH_HEADER, path);
        if let Some(ancestry) = self.ancestry.as_mut() {
            ancestry.path = path.to_string();
        }
    }

    /// Re-emits this node: header block, then recomputed `Prop-content-length`
    /// and `Content-length`, then properties, content, and trailing newlines.
    pub fn encode(&mut self) -> Bytes {
        if self.action == NodeAction::Delete {
            let mut out = self.headers.encode();
            for _ in 0..self.trailing_newlines {
                out.push(b'\n');
            }
            return Bytes::from(out);
        }

        let props_bytes = if self.has_properties {
            let props_bytes = self.properties.bytes();
            self.headers
                .set(PROP_CONTENT_LENGTH_HEADER, props_bytes.len().to_string());
            props_bytes
        } else {
            Bytes::new()
        };
        self.headers.set(
            CONTENT_LENGTH_HEADER,
            (props_bytes.len() + self.content.len()).to_string(),
        );

        let mut out = self.headers.encode();
        out.extend_from_slice(&props_bytes);
        out.extend_from_slice(&self.content);
        for _ in 0..self.trailing_newlines {
            out.push(b'\n');
        }
        Bytes::from(out)
    }
}
