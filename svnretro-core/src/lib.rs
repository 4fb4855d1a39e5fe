//! SvnRetro Core Library
//!
//! Core functionality for retroactively rewriting a Subversion dump-stream's
//! structural history:
//! - Wire-format parsing and encoding (`reader`, `headers`, `properties`,
//!   `node`, `revision`, `dumpfile`)
//! - Multi-file aggregation into one consistent revision sequence (`repos`)
//! - Path-indexed history analysis (`tree`)
//! - Rule-driven rewriting (`rules`, `transform`)
//! - Bounded streaming re-encoding (`encoder`)

pub mod dumpfile;
pub mod encoder;
pub mod error;
pub mod headers;
pub mod node;
pub mod properties;
pub mod reader;
pub mod repos;
pub mod revision;
pub mod rules;
pub mod transform;
pub mod tree;

pub use dumpfile::DumpFile;
pub use encoder::{Encoder, Mode};
pub use error::{DumpError, Result};
pub use headers::HeaderBlock;
pub use node::{Ancestry, Node, NodeAction, NodeKind};
pub use properties::Properties;
pub use reader::ByteReader;
pub use repos::{EncodeProgress, Repos};
pub use revision::Revision;
pub use rules::Rules;
pub use transform::{FirstLast, TransformReport, Transformer};
pub use tree::Tree;
