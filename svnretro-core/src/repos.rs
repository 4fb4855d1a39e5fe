//! Concatenation of dump files into a single consistent revision sequence.

use std::path::PathBuf;

use crate::dumpfile::DumpFile;
use crate::encoder::Encoder;
use crate::error::{DumpError, Result};
use crate::revision::Revision;

/// Records which source file a contiguous range of revisions came from, so
/// `-outdir` mode can re-split the output the same way the input was split.
pub struct DumpFileMeta {
    pub path: PathBuf,
    pub start: i64,
    pub end: i64,
}

pub struct Repos {
    pub format: Option<u32>,
    pub uuid: Option<String>,
    pub revisions: Vec<Revision>,
    pub dump_files: Vec<DumpFileMeta>,
}

/// Emitted while streaming a repository back out to bytes.
#[derive(Debug, Clone, Copy)]
pub struct EncodeProgress {
    pub revision: i64,
    pub percent: f64,
}

impl Default for Repos {
    fn default() -> Self {
        Self::new()
    }
}

impl Repos {
    pub fn new() -> Self {
        Self {
            format: None,
            uuid: None,
            revisions: Vec::new(),
            dump_files: Vec::new(),
        }
    }

    /// Highest revision number present, or -1 if empty.
    pub fn head(&self) -> i64 {
        self.revisions.len() as i64 - 1
    }

    /// Adds a loaded `DumpFile`'s revisions, enforcing format/UUID agreement
    /// and that its first revision is exactly `head() + 1`. Takes ownership
    /// of `dump` so its revisions move into the flat `Repos::revisions` list
    /// without duplication; only the file's path and revision range are
    /// retained, for `-outdir` mode to re-split output the same way.
    pub fn add(&mut self, mut dump: DumpFile) -> Result<()> {
        match self.format {
            None => self.format = Some(dump.format),
            Some(expected) if expected != dump.format => {
                return Err(DumpError::FormatMismatch {
                    expected,
                    found: dump.format,
                });
            }
            Some(_) => {}
        }

        match &self.uuid {
            None => self.uuid = Some(dump.uuid.clone()),
            Some(expected) if expected != &dump.uuid => {
                return Err(DumpError::UuidMismatch {
                    expected: expected.clone(),
                    found: dump.uuid.clone(),
                });
            }
            Some(_) => {}
        }

        let revisions = std::mem::take(&mut dump.revisions);
        if let Some(first) = revisions.first() {
            let expected = self.head() + 1;
            if first.number != expected {
                return Err(DumpError::NonSequentialRevision {
                    expected,
                    found: first.number,
                });
            }
        }

        if let (Some(first), Some(last)) = (revisions.first(), revisions.last()) {
            self.dump_files.push(DumpFileMeta {
                path: dump.path.clone(),
                start: first.number,
                end: last.number,
            });
        }
        self.revisions.extend(revisions);
        Ok(())
    }

    /// Streams the dump preamble once, then each revision in `start..=end`,
    /// yielding `{revision, percent}` progress via `on_progress`.
    pub async fn encode(
        &mut self,
        encoder: &Encoder,
        start: i64,
        end: i64,
        mut on_progress: impl FnMut(EncodeProgress),
    ) -> Result<()> {
        let format = self.format.unwrap_or(3);
        encoder
            .write(format!("SVN-fs-dump-format-version: {format}\n\n").into_bytes())
            .await;
        if format >= 2 {
            if let Some(uuid) = &self.uuid {
                encoder
                    .write(format!("UUID: {uuid}\n\n").into_bytes())
                    .await;
            }
        }

        let total = (end - start + 1).max(1) as f64;
        for rev in self.revisions.iter_mut() {
            if rev.number < start || rev.number > end {
                continue;
            }
            encoder.write(rev.encode()).await;
            let percent = ((rev.number - start + 1) as f64 / total) * 100.0;
            on_progress(EncodeProgress {
                revision: rev.number,
                percent,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dump(bytes: &[u8]) -> DumpFile {
        DumpFile::from_vec("x.dump", bytes.to_vec()).unwrap()
    }

    #[test]
    fn head_is_minus_one_when_empty() {
        let repos = Repos::new();
        assert_eq!(repos.head(), -1);
    }

    #[test]
    fn enforces_sequential_revisions_across_files() {
        let mut repos = Repos::new();
        let d0 = dump(b"SVN-fs-dump-format-version: 3\n\nUUID: u\n\nRevision-number: 0\nProp-content-length: 10\nContent-length: 10\n\nPROPS-END\n\n");
        repos.add(d0).unwrap();
        assert_eq!(repos.head(), 0);

        let d2 = dump(b"SVN-fs-dump-format-version: 3\n\nUUID: u\n\nRevision-number: 2\nProp-content-length: 10\nContent-length: 10\n\nPROPS-END\n\n");
        let err = repos.add(d2).unwrap_err();
        assert!(matches!(err, DumpError::NonSequentialRevision { .. }));
    }

    #[test]
    fn rejects_uuid_mismatch() {
        let mut repos = Repos::new();
        let d0 = dump(b"SVN-fs-dump-format-version: 3\n\nUUID: u1\n\nRevision-number: 0\nProp-content-length: 10\nContent-length: 10\n\nPROPS-END\n\n");
        repos.add(d0).unwrap();

        let d1 = dump(b"SVN-fs-dump-format-version: 3\n\nUUID: u2\n\nRevision-number: 1\nProp-content-length: 10\nContent-length: 10\n\nPROPS-END\n\n");
        let err = repos.add(d1).unwrap_err();
        assert!(matches!(err, DumpError::UuidMismatch { .. }));
    }
}
