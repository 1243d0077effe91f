//! Raw chunk access shared by the decode engines.
//!
//! One mutex serialises "seek + read raw chunk" on the source stream.
//! Single-line chunks are copied into the calling thread's scratch buffer and
//! decompressed after the lock is released. Multi-line native chunks are
//! decompressed outside the file lock and each thread keeps its last block,
//! so the other lines of the block are served without touching the file
//! again.
//! Library-decoded parts are decoded once and shared.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use byteorder::{LittleEndian, ReadBytesExt};
use tracing::{debug, trace};
use vfx_core::Host;

use crate::catalogue::Catalogue;
use crate::codec::library::DecodedFile;
use crate::codec::{decompress, BlockLayout};
use crate::error::{ReadError, ReadResult};
use crate::header::PartHeader;
use crate::memory::{ScratchPool, UsageGuard, FILE_BUFFER_OWNER};
use crate::stream::{SourceStream, StreamKind};

/// Owner tag for library-decoded parts.
pub const DECODED_OWNER: &str = "exr decoded parts";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Decompressed multi-line block.
#[derive(Debug)]
struct CachedBlock {
    part: usize,
    offset: u64,
    first_y: i32,
    bytes: Vec<u8>,
}

/// Raw deep chunk: packed sample-count table and packed samples.
#[derive(Debug, Clone)]
pub struct DeepChunk {
    /// First file line.
    pub y: i32,
    /// Compressed cumulative count table.
    pub table: Vec<u8>,
    /// Compressed sample data.
    pub samples: Vec<u8>,
    /// Sample data size after decompression.
    pub unpacked_size: usize,
}

fn as_size(value: u64, what: &str) -> ReadResult<usize> {
    usize::try_from(value).map_err(|_| ReadError::Malformed(format!("{what} of {value} bytes")))
}

/// File access for the engines.
pub struct ChunkSource {
    path: Option<PathBuf>,
    multipart: bool,
    stream: Mutex<SourceStream>,
    file_buffer: UsageGuard,
    scratch: ScratchPool,
    blocks: Mutex<HashMap<ThreadId, Arc<Mutex<Option<CachedBlock>>>>>,
    decoded: Mutex<Option<Result<Arc<DecodedFile>, String>>>,
    host: Arc<dyn Host>,
}

impl std::fmt::Debug for ChunkSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkSource")
            .field("path", &self.path)
            .field("multipart", &self.multipart)
            .field("scratch", &self.scratch)
            .finish_non_exhaustive()
    }
}

impl ChunkSource {
    /// Wraps an opened stream. A whole-file buffer is registered with the host.
    pub fn new(stream: SourceStream, path: Option<PathBuf>, multipart: bool, host: Arc<dyn Host>) -> Self {
        let buffered = stream.buffered_bytes();
        if buffered > 0 {
            host.register_memory(FILE_BUFFER_OWNER, buffered);
        }
        Self {
            path,
            multipart,
            stream: Mutex::new(stream),
            file_buffer: UsageGuard::new(),
            scratch: ScratchPool::new(host.clone()),
            blocks: Mutex::new(HashMap::new()),
            decoded: Mutex::new(None),
            host,
        }
    }

    /// File path, if the stream is file backed.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Scratch pool of the scanline engine.
    pub fn scratch(&self) -> &ScratchPool {
        &self.scratch
    }

    /// Runs `f` with the stream locked.
    ///
    /// While the whole-file buffer is being freed, `f` gets a private
    /// streamed handle instead.
    pub fn with_stream<R>(&self, f: impl FnOnce(&mut SourceStream) -> ReadResult<R>) -> ReadResult<R> {
        match self.file_buffer.enter() {
            Some(_token) => f(&mut lock(&self.stream)),
            None => {
                let path = self
                    .path
                    .as_deref()
                    .ok_or_else(|| ReadError::Io(std::io::Error::other("file buffer released")))?;
                trace!(path = %path.display(), "file buffer locked, reading from the file");
                let mut stream = SourceStream::open(path, StreamKind::Streamed, &[])?;
                f(&mut stream)
            }
        }
    }

    /// Seeks to a chunk and reads its part number (multi-part files) and y.
    fn chunk_header(&self, stream: &mut SourceStream, part: usize, offset: u64) -> ReadResult<i32> {
        stream.seek(offset)?;
        let truncated = |e| ReadError::from_read(e, "chunk header");
        if self.multipart {
            let stored = stream.read_i32::<LittleEndian>().map_err(truncated)?;
            if usize::try_from(stored).ok() != Some(part) {
                return Err(ReadError::Malformed(format!(
                    "chunk at offset {offset} belongs to part {stored}, expected {part}"
                )));
            }
        }
        stream.read_i32::<LittleEndian>().map_err(truncated)
    }

    fn chunk_size(stream: &mut SourceStream) -> ReadResult<usize> {
        let size = stream.read_i32::<LittleEndian>().map_err(|e| ReadError::from_read(e, "chunk size"))?;
        usize::try_from(size).map_err(|_| ReadError::Malformed(format!("negative chunk size {size}")))
    }

    /// Reads a flat chunk into the calling thread's scratch and runs `f` on
    /// `(first line, raw bytes)` after the file lock is released.
    pub fn with_raw_chunk<R>(
        &self,
        part: usize,
        offset: u64,
        f: impl FnOnce(i32, &[u8]) -> ReadResult<R>,
    ) -> ReadResult<R> {
        let lease = self.scratch.lease();
        let (y, size) = self.with_stream(|stream| {
            let y = self.chunk_header(stream, part, offset)?;
            let size = Self::chunk_size(stream)?;
            lease.with(size, |buf| stream.read(buf))?;
            Ok((y, size))
        })?;
        lease.read(size, |raw| f(y, raw))
    }

    /// Reads a flat chunk into a new buffer.
    pub fn read_raw_chunk(&self, part: usize, offset: u64) -> ReadResult<(i32, Vec<u8>)> {
        self.with_stream(|stream| {
            let y = self.chunk_header(stream, part, offset)?;
            let size = Self::chunk_size(stream)?;
            Ok((y, stream.read_vec(size)?))
        })
    }

    /// Runs `f` on the decompressed multi-line block at `offset`.
    ///
    /// Each thread keeps the most recent block it decompressed for its next
    /// call; only the raw read takes the file lock.
    pub fn with_block<R>(
        &self,
        part: usize,
        offset: u64,
        header: &PartHeader,
        f: impl FnOnce(&BlockLayout<'_>, &[u8]) -> ReadResult<R>,
    ) -> ReadResult<R> {
        let slot = lock(&self.blocks).entry(thread::current().id()).or_default().clone();
        let mut cached = lock(&slot);
        let hit = matches!(&*cached, Some(block) if block.part == part && block.offset == offset);
        if !hit {
            let (y, raw) = self.read_raw_chunk(part, offset)?;
            let layout = BlockLayout::new(header, y);
            let bytes = decompress(header.compression, &raw, layout.byte_size())?.into_owned();
            *cached = Some(CachedBlock { part, offset, first_y: y, bytes });
        }
        match &*cached {
            Some(block) => f(&BlockLayout::new(header, block.first_y), &block.bytes),
            None => Err(ReadError::Malformed(format!("no block at offset {offset}"))),
        }
    }

    /// Reads and decompresses a flat chunk without touching shared caches.
    pub fn decode_chunk(&self, part: usize, offset: u64, header: &PartHeader) -> ReadResult<(i32, Vec<u8>)> {
        let (y, raw) = self.read_raw_chunk(part, offset)?;
        let size = BlockLayout::new(header, y).byte_size();
        let bytes = decompress(header.compression, &raw, size)?.into_owned();
        Ok((y, bytes))
    }

    /// Reads a deep scanline chunk.
    pub fn read_deep_chunk(&self, part: usize, offset: u64) -> ReadResult<DeepChunk> {
        self.with_stream(|stream| {
            let y = self.chunk_header(stream, part, offset)?;
            let truncated = |e| ReadError::from_read(e, "deep chunk header");
            let table_size = as_size(stream.read_u64::<LittleEndian>().map_err(truncated)?, "sample table")?;
            let packed_size = as_size(stream.read_u64::<LittleEndian>().map_err(truncated)?, "packed samples")?;
            let unpacked_size = as_size(stream.read_u64::<LittleEndian>().map_err(truncated)?, "unpacked samples")?;
            let table = stream.read_vec(table_size)?;
            let samples = stream.read_vec(packed_size)?;
            Ok(DeepChunk { y, table, samples, unpacked_size })
        })
    }

    /// Library-decoded parts of `catalogue`'s file, decoded on first use.
    pub fn decoded(&self, catalogue: &Catalogue) -> ReadResult<Arc<DecodedFile>> {
        let mut slot = lock(&self.decoded);
        if slot.is_none() {
            let result = match self.path.as_deref() {
                Some(path) => DecodedFile::from_path(path, catalogue),
                None => self
                    .with_stream(|stream| {
                        stream.seek(0)?;
                        let len = as_size(stream.len(), "file")?;
                        stream.read_vec(len)
                    })
                    .and_then(|bytes| DecodedFile::from_bytes(&bytes, catalogue)),
            };
            *slot = Some(match result {
                Ok(file) => {
                    self.host.register_memory(DECODED_OWNER, file.byte_size());
                    Ok(Arc::new(file))
                }
                Err(err) => Err(err.to_string()),
            });
        }
        match slot.as_ref() {
            Some(Ok(file)) => Ok(file.clone()),
            Some(Err(message)) => Err(ReadError::CodecFailure(message.clone())),
            None => Err(ReadError::CodecFailure("codec library produced nothing".into())),
        }
    }

    /// Threads currently holding a decompressed block.
    pub fn cached_blocks(&self) -> usize {
        lock(&self.blocks).values().filter(|slot| lock(slot).is_some()).count()
    }

    /// Hands reclaimable memory back. Returns the bytes freed now.
    pub fn reclaim(&self) -> usize {
        let mut freed = self.scratch.reclaim();

        if let Some(Ok(file)) = lock(&self.decoded).take() {
            let bytes = file.byte_size();
            self.host.release_memory(DECODED_OWNER, bytes);
            freed += bytes;
        }
        let blocks: Vec<_> = lock(&self.blocks).drain().map(|(_, slot)| slot).collect();
        freed += blocks.iter().filter_map(|slot| lock(slot).take()).map(|b| b.bytes.len()).sum::<usize>();

        if self.path.is_some() && self.file_buffer.lock() {
            self.file_buffer.wait_idle();
            let released = lock(&self.stream).release_buffer();
            self.file_buffer.unlock();
            if released > 0 {
                self.host.release_memory(FILE_BUFFER_OWNER, released);
                freed += released;
            }
        }
        debug!(freed, "reclaimed reader memory");
        freed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::Compression;
    use crate::header::tests::minimal;
    use vfx_core::{Box2i, RecordingHost};

    /// Deinterleave and delta-encode, then deflate.
    fn zip(raw: &[u8]) -> Vec<u8> {
        let mut split: Vec<u8> = raw.iter().step_by(2).chain(raw.iter().skip(1).step_by(2)).copied().collect();
        let mut previous = split[0];
        for byte in split.iter_mut().skip(1) {
            let current = *byte;
            *byte = current.wrapping_sub(previous).wrapping_add(128);
            previous = current;
        }
        miniz_oxide::deflate::compress_to_vec_zlib(&split, 6)
    }

    /// One half channel, one pixel wide, two 16-line ZIP blocks. Every byte of
    /// block `n` is `n + 1`.
    fn two_blocks() -> (PartHeader, Vec<u8>, [u64; 2]) {
        let header = PartHeader::from_attributes(minimal(Box2i::new(0, 0, 0, 31), Compression::Zip), 2).unwrap();
        let mut bytes = vec![0u8; 64];
        let mut offsets = [0u64; 2];
        for (n, offset) in offsets.iter_mut().enumerate() {
            *offset = bytes.len() as u64;
            let data = zip(&[n as u8 + 1; 32]);
            bytes.extend_from_slice(&(n as i32 * 16).to_le_bytes());
            bytes.extend_from_slice(&(data.len() as i32).to_le_bytes());
            bytes.extend_from_slice(&data);
        }
        (header, bytes, offsets)
    }

    #[test]
    fn each_thread_keeps_its_own_block() {
        let (header, bytes, offsets) = two_blocks();
        let source = ChunkSource::new(SourceStream::from_bytes(bytes), None, false, Arc::new(RecordingHost::new()));

        let first = |layout: &BlockLayout<'_>, data: &[u8]| Ok((layout.first_y(), data[0]));
        std::thread::scope(|s| {
            for (n, &offset) in offsets.iter().enumerate() {
                let (source, header) = (&source, &header);
                s.spawn(move || {
                    for _ in 0..3 {
                        assert_eq!(source.with_block(0, offset, header, first).unwrap(), (n as i32 * 16, n as u8 + 1));
                    }
                });
            }
        });
        assert_eq!(source.cached_blocks(), 2);

        assert_eq!(source.with_block(0, offsets[1], &header, first).unwrap(), (16, 2));
        assert_eq!(source.cached_blocks(), 3);
        assert_eq!(source.reclaim(), 3 * 32);
        assert_eq!(source.cached_blocks(), 0);
    }

    #[test]
    fn corrupt_block_is_not_cached() {
        let (header, mut bytes, offsets) = two_blocks();
        let data = offsets[0] as usize + 8;
        bytes[data..data + 4].fill(0xff);
        let source = ChunkSource::new(SourceStream::from_bytes(bytes), None, false, Arc::new(RecordingHost::new()));
        assert!(source.with_block(0, offsets[0], &header, |_, _| Ok(())).is_err());
        assert_eq!(source.cached_blocks(), 0);
    }
}
