//! Append-only on-disk depth cache.
//!
//! One file per (video content, model variant):
//!
//! ```text
//! <cache_dir>/
//!   depth_<model>_<xxh64>.dcache   # records
//!   depth_<model>_<xxh64>.lock     # held exclusively while a run is open
//! ```
//!
//! Layout (little-endian):
//!
//! ```text
//! "PLXDEPTH" u16 version
//! 'D' width:u32 height:u32 bits:u8 len:u32 payload[len] xxh64:u64   (per frame)
//! 'E' count:u64 xxh64:u64                                            (seal)
//! ```
//!
//! Records are appended and flushed one at a time, so an interrupted run
//! leaves a valid prefix that the next run resumes from.

use crate::error::{DepthError, DepthResult};
use parallax_core::{BitDepth, DepthMap};
use std::fs::{File, OpenOptions, TryLockError};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use xxhash_rust::xxh64::{xxh64, Xxh64};

const MAGIC: &[u8; 8] = b"PLXDEPTH";
const VERSION: u16 = 1;
const HEADER_LEN: u64 = 10;
const TAG_DEPTH: u8 = b'D';
const TAG_END: u8 = b'E';
const RECORD_HEAD_LEN: usize = 14;
const CHECKSUM_LEN: usize = 8;
const SEAL_LEN: u64 = 17;
const CHUNK: usize = 64 * 1024;

/// Full xxh64 of a file's contents as 16 hex digits.
pub fn content_key(path: &Path) -> DepthResult<String> {
    let mut file = File::open(path)?;
    let mut hasher = Xxh64::new(0);
    let mut buffer = vec![0u8; CHUNK];
    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(format!("{:016x}", hasher.digest()))
}

/// Identifies one cached depth sequence.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Model identifier, plus a variant suffix for non-default settings.
    pub model: String,
    /// Content hash of the source video.
    pub content: String,
}

impl CacheKey {
    pub fn new(model: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            content: content.into(),
        }
    }

    pub fn file_name(&self) -> String {
        format!("depth_{}_{}.dcache", self.model, self.content)
    }
}

/// What a cache file held when it was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// No usable records.
    Empty,
    /// A valid prefix of `n` records from an interrupted run.
    Partial(u64),
    /// A sealed sequence of `n` records.
    Complete(u64),
}

/// Directory holding depth cache files.
#[derive(Debug, Clone)]
pub struct DepthCache {
    dir: PathBuf,
}

impl DepthCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(key.file_name())
    }

    /// Lock, validate, and open the cache file for `key`.
    ///
    /// A torn final record is truncated away and the prefix kept. Any other
    /// damage discards the file. Fails with `CacheBusy` if another run holds
    /// the lock.
    pub fn open(&self, key: &CacheKey) -> DepthResult<CacheEntry> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(key);
        let lock_path = path.with_extension("lock");
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)?;
        match lock.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => return Err(DepthError::CacheBusy(path)),
            Err(TryLockError::Error(e)) => return Err(e.into()),
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let mut recovered = None;
        let scan = if file.metadata()?.len() == 0 {
            Scan::Valid {
                records: 0,
                record_len: None,
                sealed: false,
            }
        } else {
            scan(&file)?
        };
        let (records, record_len, sealed) = match scan {
            Scan::Valid {
                records,
                record_len,
                sealed,
            } => (records, record_len, sealed),
            Scan::Torn {
                records,
                record_len,
                reason,
            } => {
                let err = DepthError::corrupt(&path, reason);
                warn!(error = %err, records, "Truncating torn depth cache tail");
                recovered = Some(err.to_string());
                (records, record_len, false)
            }
            Scan::Corrupt(reason) => {
                let err = DepthError::corrupt(&path, reason);
                warn!(error = %err, "Discarding depth cache");
                recovered = Some(err.to_string());
                drop(file);
                std::fs::remove_file(&path)?;
                file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(&path)?;
                (0, None, false)
            }
        };

        let mut entry = CacheEntry {
            path,
            file,
            _lock: lock,
            records,
            record_len,
            sealed,
            read_index: 0,
            status: CacheStatus::Empty,
            recovered,
        };
        if records == 0 && !sealed {
            entry.reset()?;
        } else if !sealed {
            entry.file.set_len(entry.offset_of(records))?;
        }
        entry.status = match (records, sealed) {
            (n, true) => CacheStatus::Complete(n),
            (0, false) => CacheStatus::Empty,
            (n, false) => CacheStatus::Partial(n),
        };
        info!(path = %entry.path.display(), status = ?entry.status, "Depth cache opened");
        Ok(entry)
    }
}

/// An open, locked cache file with a read cursor and an append position.
///
/// Records are read strictly in order; appending is only allowed once every
/// existing record has been read (or the tail has been truncated).
pub struct CacheEntry {
    path: PathBuf,
    file: File,
    _lock: File,
    records: u64,
    record_len: Option<u64>,
    sealed: bool,
    read_index: u64,
    status: CacheStatus,
    recovered: Option<String>,
}

impl CacheEntry {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// State found when the file was opened.
    pub fn status(&self) -> CacheStatus {
        self.status
    }

    /// The corruption that was recovered from on open, if any.
    pub fn recovered(&self) -> Option<&str> {
        self.recovered.as_deref()
    }

    /// Number of valid records currently in the file.
    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Index of the next record [`CacheEntry::next_cached`] returns.
    pub fn read_index(&self) -> u64 {
        self.read_index
    }

    fn offset_of(&self, index: u64) -> u64 {
        HEADER_LEN + index * self.record_len.unwrap_or(0)
    }

    /// Read the next cached record, or `None` past the last one.
    pub fn next_cached(&mut self) -> DepthResult<Option<DepthMap>> {
        if self.read_index >= self.records {
            return Ok(None);
        }
        let index = self.read_index;
        let map = self
            .read_record(index)
            .map_err(|e| DepthError::corrupt(&self.path, format!("record {index}: {e}")))?;
        self.read_index += 1;
        Ok(Some(map))
    }

    fn read_record(&mut self, index: u64) -> std::io::Result<DepthMap> {
        use std::io::{Error, ErrorKind};

        self.file.seek(SeekFrom::Start(self.offset_of(index)))?;
        let mut head = [0u8; RECORD_HEAD_LEN];
        self.file.read_exact(&mut head)?;
        let head = RecordHead::parse(&head).map_err(|e| Error::new(ErrorKind::InvalidData, e))?;
        let mut payload = vec![0u8; head.len as usize];
        self.file.read_exact(&mut payload)?;
        let mut checksum = [0u8; CHECKSUM_LEN];
        self.file.read_exact(&mut checksum)?;

        let mut hasher = Xxh64::new(0);
        hasher.update(&head.bytes);
        hasher.update(&payload);
        if hasher.digest() != u64::from_le_bytes(checksum) {
            return Err(Error::new(ErrorKind::InvalidData, "checksum mismatch"));
        }
        decode_payload(&head, &payload).map_err(|e| Error::new(ErrorKind::InvalidData, e))
    }

    /// Append one record and flush it.
    pub fn append(&mut self, map: &DepthMap) -> DepthResult<()> {
        if self.read_index != self.records {
            return Err(DepthError::corrupt(
                &self.path,
                format!(
                    "append at {} while {} cached records remain unread",
                    self.read_index,
                    self.records - self.read_index
                ),
            ));
        }
        let bytes = encode_record(map);
        match self.record_len {
            None => self.record_len = Some(bytes.len() as u64),
            Some(len) if len != bytes.len() as u64 => {
                return Err(DepthError::corrupt(
                    &self.path,
                    format!("record size {} differs from cached {len}", bytes.len()),
                ))
            }
            Some(_) => {}
        }
        let offset = self.offset_of(self.records);
        if self.sealed {
            self.file.set_len(offset)?;
            self.sealed = false;
        }
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(&bytes)?;
        self.file.flush()?;
        self.records += 1;
        self.read_index = self.records;
        debug!(record = self.records - 1, "Depth record cached");
        Ok(())
    }

    /// Drop every record from `index` on.
    pub fn truncate_from(&mut self, index: u64) -> DepthResult<()> {
        if index >= self.records && !self.sealed {
            return Ok(());
        }
        let keep = index.min(self.records);
        info!(path = %self.path.display(), keep, "Truncating depth cache");
        if keep == 0 {
            self.reset()?;
        } else {
            self.file.set_len(self.offset_of(keep))?;
        }
        self.records = keep;
        self.read_index = self.read_index.min(keep);
        self.sealed = false;
        Ok(())
    }

    /// Mark the sequence complete. Idempotent.
    pub fn seal(&mut self) -> DepthResult<()> {
        if self.sealed {
            return Ok(());
        }
        let offset = self.offset_of(self.records);
        self.file.set_len(offset)?;
        self.file.seek(SeekFrom::Start(offset))?;
        let mut seal = Vec::with_capacity(SEAL_LEN as usize);
        seal.push(TAG_END);
        seal.extend_from_slice(&self.records.to_le_bytes());
        let checksum = xxh64(&seal, 0);
        seal.extend_from_slice(&checksum.to_le_bytes());
        self.file.write_all(&seal)?;
        self.file.sync_all()?;
        self.sealed = true;
        info!(path = %self.path.display(), records = self.records, "Depth cache sealed");
        Ok(())
    }

    /// Rewrite the file as a bare header.
    fn reset(&mut self) -> DepthResult<()> {
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        let mut header = Vec::with_capacity(HEADER_LEN as usize);
        header.extend_from_slice(MAGIC);
        header.extend_from_slice(&VERSION.to_le_bytes());
        self.file.write_all(&header)?;
        self.file.flush()?;
        self.records = 0;
        self.record_len = None;
        self.read_index = 0;
        self.sealed = false;
        Ok(())
    }
}

struct RecordHead {
    bytes: [u8; RECORD_HEAD_LEN],
    width: u32,
    height: u32,
    bit_depth: BitDepth,
    len: u32,
}

impl RecordHead {
    fn parse(bytes: &[u8; RECORD_HEAD_LEN]) -> Result<Self, String> {
        if bytes[0] != TAG_DEPTH {
            return Err(format!("unknown record tag {:#04x}", bytes[0]));
        }
        let width = u32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
        let height = u32::from_le_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]);
        let bit_depth = BitDepth::from_bits(bytes[9]).map_err(|e| e.to_string())?;
        let len = u32::from_le_bytes([bytes[10], bytes[11], bytes[12], bytes[13]]);
        if width == 0 || height == 0 {
            return Err(format!("empty record {width}x{height}"));
        }
        let expected = u64::from(width) * u64::from(height) * bit_depth.sample_size() as u64;
        if u64::from(len) != expected {
            return Err(format!(
                "payload of {len} bytes for {width}x{height} at {} bits",
                bit_depth.bits()
            ));
        }
        Ok(Self {
            bytes: *bytes,
            width,
            height,
            bit_depth,
            len,
        })
    }

    fn record_len(&self) -> u64 {
        (RECORD_HEAD_LEN + CHECKSUM_LEN) as u64 + u64::from(self.len)
    }
}

fn encode_record(map: &DepthMap) -> Vec<u8> {
    let payload_len = map.samples().len() * map.bit_depth.sample_size();
    let mut out = Vec::with_capacity(RECORD_HEAD_LEN + payload_len + CHECKSUM_LEN);
    out.push(TAG_DEPTH);
    out.extend_from_slice(&map.width.to_le_bytes());
    out.extend_from_slice(&map.height.to_le_bytes());
    out.push(map.bit_depth.bits());
    out.extend_from_slice(&(payload_len as u32).to_le_bytes());
    match map.bit_depth {
        BitDepth::Eight => out.extend(map.samples().iter().map(|&v| v as u8)),
        BitDepth::Sixteen if cfg!(target_endian = "little") => {
            out.extend_from_slice(bytemuck::cast_slice(map.samples()))
        }
        BitDepth::Sixteen => out.extend(map.samples().iter().flat_map(|v| v.to_le_bytes())),
    }
    let checksum = xxh64(&out, 0);
    out.extend_from_slice(&checksum.to_le_bytes());
    out
}

fn decode_payload(head: &RecordHead, payload: &[u8]) -> Result<DepthMap, String> {
    let samples = match head.bit_depth {
        BitDepth::Eight => payload.iter().map(|&b| u16::from(b)).collect(),
        BitDepth::Sixteen => payload
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect(),
    };
    DepthMap::from_samples(head.width, head.height, head.bit_depth, samples)
        .map_err(|e| e.to_string())
}

enum Scan {
    Valid {
        records: u64,
        record_len: Option<u64>,
        sealed: bool,
    },
    Torn {
        records: u64,
        record_len: Option<u64>,
        reason: String,
    },
    Corrupt(String),
}

/// Validate framing and checksums of every record, streaming payloads.
fn scan(file: &File) -> std::io::Result<Scan> {
    let len = file.metadata()?.len();
    let mut reader = BufReader::new(file);
    reader.seek(SeekFrom::Start(0))?;

    if len < HEADER_LEN {
        return Ok(Scan::Corrupt("truncated header".into()));
    }
    let mut header = [0u8; HEADER_LEN as usize];
    reader.read_exact(&mut header)?;
    if &header[..8] != MAGIC {
        return Ok(Scan::Corrupt("bad magic".into()));
    }
    let version = u16::from_le_bytes([header[8], header[9]]);
    if version != VERSION {
        return Ok(Scan::Corrupt(format!("unsupported version {version}")));
    }

    let mut pos = HEADER_LEN;
    let mut records = 0u64;
    let mut record_len: Option<u64> = None;
    let mut shape: Option<(u32, u32, BitDepth)> = None;
    let mut chunk = vec![0u8; CHUNK];

    loop {
        let remaining = len - pos;
        if remaining == 0 {
            return Ok(Scan::Valid {
                records,
                record_len,
                sealed: false,
            });
        }
        let torn = move |reason: &str| Scan::Torn {
            records,
            record_len,
            reason: format!("record {records}: {reason}"),
        };

        let mut tag = [0u8; 1];
        reader.read_exact(&mut tag)?;
        match tag[0] {
            TAG_DEPTH => {
                if remaining < RECORD_HEAD_LEN as u64 {
                    return Ok(torn("truncated record header"));
                }
                let mut head = [0u8; RECORD_HEAD_LEN];
                head[0] = TAG_DEPTH;
                reader.read_exact(&mut head[1..])?;
                let head = match RecordHead::parse(&head) {
                    Ok(h) => h,
                    Err(e) => return Ok(Scan::Corrupt(format!("record {records}: {e}"))),
                };
                let this_shape = (head.width, head.height, head.bit_depth);
                if shape.is_some_and(|s| s != this_shape) {
                    return Ok(Scan::Corrupt(format!(
                        "record {records}: shape changed mid-sequence"
                    )));
                }
                shape = Some(this_shape);
                if remaining < head.record_len() {
                    return Ok(torn("truncated payload"));
                }

                let mut hasher = Xxh64::new(0);
                hasher.update(&head.bytes);
                let mut left = head.len as usize;
                while left > 0 {
                    let n = left.min(CHUNK);
                    reader.read_exact(&mut chunk[..n])?;
                    hasher.update(&chunk[..n]);
                    left -= n;
                }
                let mut checksum = [0u8; CHECKSUM_LEN];
                reader.read_exact(&mut checksum)?;
                if hasher.digest() != u64::from_le_bytes(checksum) {
                    return Ok(Scan::Corrupt(format!("record {records}: checksum mismatch")));
                }
                record_len = Some(head.record_len());
                pos += head.record_len();
                records += 1;
            }
            TAG_END => {
                if remaining < SEAL_LEN {
                    return Ok(torn("truncated seal"));
                }
                let mut body = [0u8; 16];
                reader.read_exact(&mut body)?;
                let mut sealed = [0u8; 9];
                sealed[0] = TAG_END;
                sealed[1..].copy_from_slice(&body[..8]);
                let count = u64::from_le_bytes([
                    body[0], body[1], body[2], body[3], body[4], body[5], body[6], body[7],
                ]);
                let checksum = u64::from_le_bytes([
                    body[8], body[9], body[10], body[11], body[12], body[13], body[14], body[15],
                ]);
                if xxh64(&sealed, 0) != checksum {
                    return Ok(Scan::Corrupt("seal checksum mismatch".into()));
                }
                if count != records {
                    return Ok(Scan::Corrupt(format!(
                        "seal counts {count} records, found {records}"
                    )));
                }
                if remaining > SEAL_LEN {
                    return Ok(Scan::Corrupt("data after seal".into()));
                }
                return Ok(Scan::Valid {
                    records,
                    record_len,
                    sealed: true,
                });
            }
            other => {
                return Ok(Scan::Corrupt(format!(
                    "record {records}: unknown tag {other:#04x}"
                )))
            }
        }
    }
}
