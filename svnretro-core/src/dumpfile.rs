//! Memory-mapped dump-stream source file.

use bytes::Bytes;
use std::path::{Path, PathBuf};

use crate::error::{DumpError, Result};
use crate::reader::ByteReader;
use crate::revision::Revision;

pub const VERSION_HEADER: &str = "SVN-fs-dump-format-version";
pub const UUID_HEADER: &str = "UUID";

pub struct DumpFile {
    pub path: PathBuf,
    pub format: u32,
    pub uuid: String,
    pub revisions: Vec<Revision>,
    /// Zero-copy backing buffer; every node/revision byte slice is a cheap
    /// `Bytes` clone that keeps this buffer (and, when mmap-backed, the
    /// memory mapping) alive for as long as any slice survives.
    data: Bytes,
}

impl DumpFile {
    /// Opens and memory-maps `path`, then eagerly parses every revision.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)?;
        // SAFETY: the file is not expected to be mutated concurrently by
        // another process while this tool runs; this matches the mmap
        // contract every mmap-backed dump reader in this space relies on.
        let mmap = unsafe { memmap2::Mmap::map(&file)? };
        let data = Bytes::from_owner(mmap);
        Self::from_bytes(path.to_path_buf(), data)
    }

    /// Parses from an already-loaded buffer — used by tests that construct a
    /// literal dump in memory instead of mapping a real file.
    pub fn from_vec(path: impl AsRef<Path>, data: Vec<u8>) -> Result<Self> {
        Self::from_bytes(path.as_ref().to_path_buf(), Bytes::from(data))
    }

    fn from_bytes(path: PathBuf, data: Bytes) -> Result<Self> {
        // A CRLF-clobbered dump is detected from its first line alone.
        let first_line_end = data.iter().position(|&b| b == b'\n').unwrap_or(data.len());
        if data[..first_line_end].contains(&b'\r') {
            return Err(DumpError::WindowsLineEndings);
        }

        let mut r = ByteReader::new(&data);
        let format = r
            .int_after(VERSION_HEADER)
            .map_err(|_| DumpError::MissingField(VERSION_HEADER.to_string()))? as u32;
        if !r.expect_and_consume("\n") {
            return Err(DumpError::MissingNewline("after format version header"));
        }

        let uuid = if format >= 2 {
            let uuid = r
                .line_after(&format!("{UUID_HEADER}: "))
                .ok_or_else(|| DumpError::MissingField(UUID_HEADER.to_string()))?
                .to_string();
            if !r.expect_and_consume("\n") {
                return Err(DumpError::MissingNewline("after UUID header"));
            }
            uuid
        } else {
            String::new()
        };

        let mut revisions = Vec::new();
        while !r.at_eof() {
            let rev = Revision::parse(&mut r, &data)?;
            revisions.push(rev);
        }

        Ok(Self {
            path,
            format,
            uuid,
            revisions,
            data,
        })
    }
}
