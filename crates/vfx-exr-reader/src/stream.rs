//! Source stream abstraction.
//!
//! One seekable byte source with three realisations:
//!
//! - **Buffered**: the whole file in one heap buffer, descriptor closed.
//! - **Mapped**: the whole file mapped read-only, descriptor closed. It may
//!   *advertise itself as non-mapped* so codecs that do unaligned loads bounce
//!   through an owned copy instead.
//! - **Streamed**: an OS file handle read on demand.
//!
//! All three share `read`, `read_mapped`, `tell`, `seek` and
//! `is_memory_mapped`. Every operation here is position-bearing, so callers
//! serialise access (the reader keeps the stream behind one mutex).
//!
//! # Selection
//!
//! [`select_kind`] applies the per-file policy: an explicit
//! [`FileReadMode`] wins, otherwise the compression decides.

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use tracing::{debug, trace};

use crate::attribute::Compression;
use crate::config::FileReadMode;
use crate::error::{ReadError, ReadResult};

/// Concrete realisation chosen for a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Whole file in memory.
    Buffered,
    /// Memory mapped; `advertise_mapped == false` forces bounce reads.
    Mapped {
        /// What [`SourceStream::is_memory_mapped`] reports.
        advertise_mapped: bool,
    },
    /// Read on demand.
    Streamed,
}

/// Picks the realisation for a file whose first part uses `compression`.
pub fn select_kind(mode: FileReadMode, compression: Compression) -> StreamKind {
    let advertise_mapped = !matches!(compression, Compression::Dwaa | Compression::Dwab);
    match mode {
        FileReadMode::Normal => StreamKind::Streamed,
        FileReadMode::Mmap => StreamKind::Mapped { advertise_mapped },
        FileReadMode::Buffer => StreamKind::Buffered,
        FileReadMode::Default => {
            if cfg!(target_os = "linux") && compression != Compression::Zips {
                StreamKind::Mapped { advertise_mapped }
            } else {
                StreamKind::Streamed
            }
        }
    }
}

/// Seekable byte source over one file.
#[derive(Debug)]
pub enum SourceStream {
    /// Whole-file heap buffer. `data` is `None` once the buffer was
    /// reclaimed; reads then fall back to the file.
    Buffered {
        /// File contents.
        data: Option<Vec<u8>>,
        /// Path used for the fallback after a reclaim.
        path: PathBuf,
        /// Lazily reopened handle for the fallback.
        fallback: Option<BufReader<File>>,
        /// Current position.
        pos: u64,
        /// File length.
        len: u64,
    },
    /// Read-only mapping.
    Mapped {
        /// The mapping.
        map: Mmap,
        /// Reported by `is_memory_mapped`.
        advertise_mapped: bool,
        /// Current position.
        pos: u64,
    },
    /// On-demand reads.
    Streamed {
        /// Buffered handle.
        file: BufReader<File>,
        /// Current position.
        pos: u64,
        /// File length.
        len: u64,
    },
    /// In-memory bytes not backed by a file (headers parsed from a prefix,
    /// tests).
    Memory {
        /// The bytes.
        data: Vec<u8>,
        /// Current position.
        pos: u64,
    },
}

impl SourceStream {
    /// Opens `path` as `kind`.
    ///
    /// `preread` holds bytes from the start of the file that the caller has
    /// already read; the buffered form reuses them instead of reading twice.
    pub fn open(path: &Path, kind: StreamKind, preread: &[u8]) -> ReadResult<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        debug!(path = %path.display(), ?kind, len, "opening source stream");

        match kind {
            StreamKind::Buffered => {
                let mut file = file;
                let reuse = preread.len().min(len as usize);
                let mut data = Vec::with_capacity(len as usize);
                data.extend_from_slice(&preread[..reuse]);
                file.seek(SeekFrom::Start(reuse as u64))?;
                file.read_to_end(&mut data)?;
                // descriptor closes here
                Ok(SourceStream::Buffered { data: Some(data), path: path.to_path_buf(), fallback: None, pos: 0, len })
            }
            StreamKind::Mapped { advertise_mapped } => {
                // SAFETY: the mapping is read-only and the file is not modified
                // through this process while the reader is alive.
                let map = unsafe { Mmap::map(&file)? };
                #[cfg(unix)]
                {
                    let _ = map.advise(memmap2::Advice::Random);
                }
                Ok(SourceStream::Mapped { map, advertise_mapped, pos: 0 })
            }
            StreamKind::Streamed => Ok(SourceStream::Streamed { file: BufReader::new(file), pos: 0, len }),
        }
    }

    /// Wraps bytes already in memory.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        SourceStream::Memory { data, pos: 0 }
    }

    /// Which realisation this is.
    pub fn kind(&self) -> StreamKind {
        match self {
            SourceStream::Buffered { .. } | SourceStream::Memory { .. } => StreamKind::Buffered,
            SourceStream::Mapped { advertise_mapped, .. } => StreamKind::Mapped { advertise_mapped: *advertise_mapped },
            SourceStream::Streamed { .. } => StreamKind::Streamed,
        }
    }

    /// Total length in bytes.
    pub fn len(&self) -> u64 {
        match self {
            SourceStream::Buffered { len, .. } | SourceStream::Streamed { len, .. } => *len,
            SourceStream::Mapped { map, .. } => map.len() as u64,
            SourceStream::Memory { data, .. } => data.len() as u64,
        }
    }

    /// `true` for an empty file.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether codecs may borrow bytes through [`read_mapped`](Self::read_mapped).
    pub fn is_memory_mapped(&self) -> bool {
        match self {
            SourceStream::Buffered { data, .. } => data.is_some(),
            SourceStream::Mapped { advertise_mapped, .. } => *advertise_mapped,
            SourceStream::Memory { .. } => true,
            SourceStream::Streamed { .. } => false,
        }
    }

    /// Current position.
    pub fn tell(&self) -> u64 {
        match self {
            SourceStream::Buffered { pos, .. }
            | SourceStream::Mapped { pos, .. }
            | SourceStream::Streamed { pos, .. }
            | SourceStream::Memory { pos, .. } => *pos,
        }
    }

    /// Absolute reposition. Seeking past the end is allowed; the next read fails.
    pub fn seek(&mut self, to: u64) -> ReadResult<()> {
        match self {
            SourceStream::Buffered { pos, fallback, .. } => {
                if let Some(file) = fallback {
                    file.seek(SeekFrom::Start(to))?;
                }
                *pos = to;
            }
            SourceStream::Mapped { pos, .. } | SourceStream::Memory { pos, .. } => *pos = to,
            SourceStream::Streamed { file, pos, .. } => {
                if *pos != to {
                    file.seek(SeekFrom::Start(to))?;
                    *pos = to;
                }
            }
        }
        Ok(())
    }

    fn backing(&self) -> Option<&[u8]> {
        match self {
            SourceStream::Buffered { data: Some(data), .. } | SourceStream::Memory { data, .. } => Some(data),
            SourceStream::Mapped { map, .. } => Some(&map[..]),
            _ => None,
        }
    }

    fn slice_range(&self, n: usize) -> ReadResult<(usize, usize)> {
        let start = self.tell();
        let end = start.checked_add(n as u64).filter(|&end| end <= self.len());
        match end {
            Some(end) => Ok((start as usize, end as usize)),
            None => Err(ReadError::Truncated(format!(
                "need {n} bytes at offset {start}, file is {} bytes",
                self.len()
            ))),
        }
    }

    fn advance(&mut self, n: usize) {
        match self {
            SourceStream::Buffered { pos, .. }
            | SourceStream::Mapped { pos, .. }
            | SourceStream::Streamed { pos, .. }
            | SourceStream::Memory { pos, .. } => *pos += n as u64,
        }
    }

    /// Copies `dst.len()` bytes and advances.
    pub fn read(&mut self, dst: &mut [u8]) -> ReadResult<()> {
        let n = dst.len();
        let (start, end) = self.slice_range(n)?;
        if let Some(bytes) = self.backing() {
            dst.copy_from_slice(&bytes[start..end]);
            self.advance(n);
            return Ok(());
        }

        match self {
            SourceStream::Streamed { file, pos, .. } => {
                file.read_exact(dst).map_err(|e| ReadError::from_read(e, "chunk data"))?;
                *pos += n as u64;
            }
            SourceStream::Buffered { path, fallback, pos, .. } => {
                if fallback.is_none() {
                    trace!(path = %path.display(), "reopening file after buffer reclaim");
                    let mut file = BufReader::new(File::open(&*path)?);
                    file.seek(SeekFrom::Start(*pos))?;
                    *fallback = Some(file);
                }
                if let Some(file) = fallback {
                    file.read_exact(dst).map_err(|e| ReadError::from_read(e, "chunk data"))?;
                }
                *pos += n as u64;
            }
            _ => unreachable!("memory-backed streams are served above"),
        }
        Ok(())
    }

    /// Reads `n` bytes into a new vector.
    ///
    /// Uses the borrowed path when the stream advertises itself as mapped and
    /// a plain `read` bounce otherwise.
    pub fn read_vec(&mut self, n: usize) -> ReadResult<Vec<u8>> {
        if self.is_memory_mapped() {
            return self.read_mapped(n).map(<[u8]>::to_vec);
        }
        let mut out = vec![0; n];
        self.read(&mut out)?;
        Ok(out)
    }

    /// Borrows `n` bytes of backing memory and advances.
    pub fn read_mapped(&mut self, n: usize) -> ReadResult<&[u8]> {
        let (start, end) = self.slice_range(n)?;
        if self.backing().is_none() {
            return Err(ReadError::UnsupportedFormat("stream is not memory backed".into()));
        }
        self.advance(n);
        match self.backing() {
            Some(bytes) => Ok(&bytes[start..end]),
            None => Err(ReadError::UnsupportedFormat("stream is not memory backed".into())),
        }
    }

    /// Drops the whole-file buffer of a buffered stream.
    ///
    /// Returns the number of bytes released; later reads go to the file.
    pub fn release_buffer(&mut self) -> usize {
        match self {
            SourceStream::Buffered { data, .. } => data.take().map(|d| d.len()).unwrap_or(0),
            _ => 0,
        }
    }

    /// Bytes of heap memory held by the stream.
    pub fn buffered_bytes(&self) -> usize {
        match self {
            SourceStream::Buffered { data: Some(data), .. } => data.len(),
            _ => 0,
        }
    }
}

impl Read for SourceStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.len().saturating_sub(self.tell());
        let n = (buf.len() as u64).min(remaining) as usize;
        if n == 0 {
            return Ok(0);
        }
        SourceStream::read(self, &mut buf[..n]).map_err(|e| match e {
            ReadError::Io(io) => io,
            other => io::Error::new(io::ErrorKind::UnexpectedEof, other.to_string()),
        })?;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_file(bytes: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(bytes).unwrap();
        file.flush().unwrap();
        file
    }

    fn all_kinds() -> [StreamKind; 4] {
        [
            StreamKind::Buffered,
            StreamKind::Mapped { advertise_mapped: true },
            StreamKind::Mapped { advertise_mapped: false },
            StreamKind::Streamed,
        ]
    }

    #[test]
    fn realisations_agree() {
        let bytes: Vec<u8> = (0..=255).collect();
        let file = temp_file(&bytes);
        for kind in all_kinds() {
            let mut stream = SourceStream::open(file.path(), kind, &bytes[..10]).unwrap();
            assert_eq!(stream.len(), 256);
            stream.seek(100).unwrap();
            let mut dst = [0u8; 4];
            stream.read(&mut dst).unwrap();
            assert_eq!(dst, [100, 101, 102, 103], "{kind:?}");
            assert_eq!(stream.tell(), 104);
            assert_eq!(stream.read_vec(2).unwrap(), vec![104, 105]);
        }
    }

    #[test]
    fn short_reads_are_truncated() {
        let file = temp_file(&[1, 2, 3]);
        for kind in all_kinds() {
            let mut stream = SourceStream::open(file.path(), kind, &[]).unwrap();
            stream.seek(2).unwrap();
            let mut dst = [0u8; 4];
            assert!(matches!(stream.read(&mut dst), Err(ReadError::Truncated(_))), "{kind:?}");
        }
    }

    #[test]
    fn mapped_capability() {
        let file = temp_file(&[9; 16]);
        let streamed = SourceStream::open(file.path(), StreamKind::Streamed, &[]).unwrap();
        assert!(!streamed.is_memory_mapped());

        let mut lying = SourceStream::open(file.path(), StreamKind::Mapped { advertise_mapped: false }, &[]).unwrap();
        assert!(!lying.is_memory_mapped());
        // the backing is still a mapping
        assert_eq!(lying.read_mapped(2).unwrap(), &[9, 9]);

        let mut streamed = streamed;
        assert!(matches!(streamed.read_mapped(1), Err(ReadError::UnsupportedFormat(_))));
    }

    #[test]
    fn buffer_reclaim_falls_back_to_file() {
        let bytes: Vec<u8> = (0..64).collect();
        let file = temp_file(&bytes);
        let mut stream = SourceStream::open(file.path(), StreamKind::Buffered, &[]).unwrap();
        assert_eq!(stream.buffered_bytes(), 64);
        stream.seek(10).unwrap();
        assert_eq!(stream.release_buffer(), 64);
        assert!(!stream.is_memory_mapped());
        assert_eq!(stream.read_vec(3).unwrap(), vec![10, 11, 12]);
        stream.seek(60).unwrap();
        assert_eq!(stream.read_vec(4).unwrap(), vec![60, 61, 62, 63]);
    }

    #[test]
    fn policy() {
        assert_eq!(select_kind(FileReadMode::Normal, Compression::Zip), StreamKind::Streamed);
        assert_eq!(select_kind(FileReadMode::Buffer, Compression::Zips), StreamKind::Buffered);
        assert_eq!(
            select_kind(FileReadMode::Mmap, Compression::Dwab),
            StreamKind::Mapped { advertise_mapped: false }
        );
        if cfg!(target_os = "linux") {
            assert_eq!(select_kind(FileReadMode::Default, Compression::Zips), StreamKind::Streamed);
            assert_eq!(
                select_kind(FileReadMode::Default, Compression::Piz),
                StreamKind::Mapped { advertise_mapped: true }
            );
        }
    }
}
