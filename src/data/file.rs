//! Wordlist file source.

use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use super::{DEFAULT_KIND, DataSource, SourceRef, SourceSize, WorkItem, check_offset};
use crate::error::DataError;

/// A wordlist on disk, one item per line.
///
/// Line start offsets are indexed once when the file is opened, so seeking to
/// line `k` is a single file seek rather than a re-read of `k` lines. Lines
/// that are not valid UTF-8 are decoded lossily instead of failing the read.
#[derive(Debug)]
pub struct FileSource {
    path: PathBuf,
    reader: BufReader<File>,
    line_starts: Vec<u64>,
    kind: String,
    cursor: u64,
}

impl FileSource {
    /// Open and index a wordlist. The index pass reads the whole file, so it
    /// runs on the blocking pool.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, DataError> {
        let path = path.as_ref().to_path_buf();
        let indexed = path.clone();
        let (line_starts, file) = tokio::task::spawn_blocking(move || {
            let starts = index_lines(&indexed)?;
            Ok::<_, DataError>((starts, File::open(&indexed)?))
        })
        .await
        .map_err(|e| DataError::Io(std::io::Error::other(e)))??;
        let reader = BufReader::new(file);
        tracing::debug!(path = %path.display(), lines = line_starts.len(), "Indexed wordlist");
        Ok(Self {
            path,
            reader,
            line_starts,
            kind: DEFAULT_KIND.to_string(),
            cursor: 0,
        })
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    fn len(&self) -> u64 {
        self.line_starts.len() as u64
    }
}

fn index_lines(path: &Path) -> Result<Vec<u64>, DataError> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut starts = Vec::new();
    let mut offset = 0u64;
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let read = reader.read_until(b'\n', &mut buf)?;
        if read == 0 {
            break;
        }
        starts.push(offset);
        offset += read as u64;
    }
    Ok(starts)
}

impl DataSource for FileSource {
    fn next_item(&mut self) -> Result<Option<WorkItem>, DataError> {
        if self.cursor >= self.len() {
            return Ok(None);
        }
        let mut raw = Vec::new();
        self.reader.read_until(b'\n', &mut raw)?;
        let line = String::from_utf8_lossy(&raw);
        let trimmed = line.trim_end_matches(['\n', '\r']);
        let item = WorkItem::new(trimmed, self.kind.clone(), self.cursor);
        self.cursor += 1;
        Ok(Some(item))
    }

    fn seek(&mut self, offset: u64) -> Result<(), DataError> {
        check_offset(offset, self.len())?;
        let byte_offset = match self.line_starts.get(offset as usize) {
            Some(start) => *start,
            // seeking to the end: park the reader past the last line
            None => self.reader.get_ref().metadata()?.len(),
        };
        self.reader.seek(SeekFrom::Start(byte_offset))?;
        self.cursor = offset;
        Ok(())
    }

    fn position(&self) -> u64 {
        self.cursor
    }

    fn size(&self) -> SourceSize {
        SourceSize::Finite(self.len())
    }

    fn reference(&self) -> SourceRef {
        SourceRef::File {
            path: self.path.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn wordlist(contents: impl AsRef<[u8]>) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_ref()).unwrap();
        file.flush().unwrap();
        file
    }

    #[tokio::test]
    async fn reads_lines_in_order() {
        let file = wordlist("user1:pass1\r\nuser2:pass2\nuser3:pass3");
        let mut source = FileSource::open(file.path()).await.unwrap();
        assert_eq!(source.size(), SourceSize::Finite(3));

        let mut lines = Vec::new();
        while let Some(item) = source.next_item().unwrap() {
            lines.push(item.data);
        }
        assert_eq!(lines, vec!["user1:pass1", "user2:pass2", "user3:pass3"]);
    }

    #[tokio::test]
    async fn seek_jumps_directly_to_line() {
        let file = wordlist("a\nbb\nccc\ndddd\n");
        let mut source = FileSource::open(file.path()).await.unwrap();
        source.seek(2).unwrap();
        let item = source.next_item().unwrap().unwrap();
        assert_eq!(item.data, "ccc");
        assert_eq!(item.index, 2);

        source.seek(0).unwrap();
        assert_eq!(source.next_item().unwrap().unwrap().data, "a");
    }

    #[tokio::test]
    async fn seek_to_end_exhausts() {
        let file = wordlist("a\nb\n");
        let mut source = FileSource::open(file.path()).await.unwrap();
        source.seek(2).unwrap();
        assert!(source.next_item().unwrap().is_none());
        assert!(source.seek(3).is_err());
    }

    #[tokio::test]
    async fn reference_points_at_path() {
        let file = wordlist("x\n");
        let source = FileSource::open(file.path()).await.unwrap();
        assert_eq!(
            source.reference(),
            SourceRef::File {
                path: file.path().to_path_buf()
            }
        );
    }

    #[tokio::test]
    async fn invalid_utf8_line_is_decoded_lossily() {
        let file = wordlist(b"a\n\xff\xfe\nc\n");
        let mut source = FileSource::open(file.path()).await.unwrap();

        let mut lines = Vec::new();
        while let Some(item) = source.next_item().unwrap() {
            lines.push(item.data);
        }
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "a");
        assert_eq!(lines[1], "\u{FFFD}\u{FFFD}");
        assert_eq!(lines[2], "c");
    }

    #[tokio::test]
    async fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileSource::open(dir.path().join("absent.txt")).await.unwrap_err();
        assert!(matches!(err, DataError::Io(_)));
    }
}
