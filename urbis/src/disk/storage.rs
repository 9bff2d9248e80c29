//! On-disk file layout: header slot, reserved index slot, fixed page slots.
//!
//! The file begins with a 4 KiB-aligned header, followed by one reserved
//! index slot of `page_size` bytes, followed by the page slots. Page slot
//! `k` (for `page_id = k`, k ≥ 1) lives at `data_offset + (k − 1) ·
//! page_size`. All fields are little-endian. Readers honour the header's
//! `page_size` and `pages_per_track` values, never their own compile-time
//! constants.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{Buf, BufMut, BytesMut};
use parking_lot::RwLock;

use super::constants::{HEADER_SLOT_SIZE, MAGIC, VERSION};
use crate::bounding_box::BoundingBox;
use crate::error::{UrbisError, UrbisResult};

/// Encoded header length before zero-padding to the header slot.
const HEADER_ENCODED_SIZE: usize = 4 * 4 + 8 + 4 * 8 + 2 * 8 + 2 * 4 + 2 * 8 + RESERVED_SIZE;

/// Reserved trailing bytes for future header fields.
const RESERVED_SIZE: usize = 64;

/// Seconds since the Unix epoch; 0 when the clock is unavailable.
fn unix_time() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// The persisted index file header.
#[derive(Debug, Clone, PartialEq)]
pub struct FileHeader {
    pub magic: u32,
    pub version: u32,
    pub page_count: u32,
    pub track_count: u32,
    pub object_count: u64,
    pub bounds: BoundingBox,
    pub created_time: u64,
    pub modified_time: u64,
    pub page_size: u32,
    pub pages_per_track: u32,
    pub index_offset: u64,
    pub data_offset: u64,
}

impl FileHeader {
    /// Fresh header for a new file with the given layout parameters.
    pub fn new(page_size: u32, pages_per_track: u32) -> Self {
        let now = unix_time();
        Self {
            magic: MAGIC,
            version: VERSION,
            page_count: 0,
            track_count: 0,
            object_count: 0,
            bounds: BoundingBox::empty(),
            created_time: now,
            modified_time: now,
            page_size,
            pages_per_track,
            index_offset: HEADER_SLOT_SIZE as u64,
            data_offset: HEADER_SLOT_SIZE as u64 + page_size as u64,
        }
    }

    /// Rejects foreign files and versions newer than this reader supports.
    pub fn validate(&self) -> UrbisResult<()> {
        if self.magic != MAGIC {
            return Err(UrbisError::Corrupt(format!(
                "bad file magic {:#010x}",
                self.magic
            )));
        }
        if self.version > VERSION {
            return Err(UrbisError::Version {
                found: self.version,
                supported: VERSION,
            });
        }
        Ok(())
    }

    /// Encodes the header into its zero-padded slot.
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(HEADER_SLOT_SIZE);
        buf.put_u32_le(self.magic);
        buf.put_u32_le(self.version);
        buf.put_u32_le(self.page_count);
        buf.put_u32_le(self.track_count);
        buf.put_u64_le(self.object_count);
        buf.put_f64_le(self.bounds.min_x);
        buf.put_f64_le(self.bounds.min_y);
        buf.put_f64_le(self.bounds.max_x);
        buf.put_f64_le(self.bounds.max_y);
        buf.put_u64_le(self.created_time);
        buf.put_u64_le(self.modified_time);
        buf.put_u32_le(self.page_size);
        buf.put_u32_le(self.pages_per_track);
        buf.put_u64_le(self.index_offset);
        buf.put_u64_le(self.data_offset);
        buf.put_bytes(0, RESERVED_SIZE);
        buf.put_bytes(0, HEADER_SLOT_SIZE - HEADER_ENCODED_SIZE);
        buf
    }

    /// Decodes a header slot.
    ///
    /// # Errors
    /// Returns `Corrupt` for a truncated buffer.
    pub fn decode(buf: &[u8]) -> UrbisResult<FileHeader> {
        if buf.len() < HEADER_ENCODED_SIZE {
            return Err(UrbisError::Corrupt(format!(
                "file header truncated to {} bytes",
                buf.len()
            )));
        }
        let mut cursor = buf;
        Ok(FileHeader {
            magic: cursor.get_u32_le(),
            version: cursor.get_u32_le(),
            page_count: cursor.get_u32_le(),
            track_count: cursor.get_u32_le(),
            object_count: cursor.get_u64_le(),
            bounds: BoundingBox::new(
                cursor.get_f64_le(),
                cursor.get_f64_le(),
                cursor.get_f64_le(),
                cursor.get_f64_le(),
            ),
            created_time: cursor.get_u64_le(),
            modified_time: cursor.get_u64_le(),
            page_size: cursor.get_u32_le(),
            pages_per_track: cursor.get_u32_le(),
            index_offset: cursor.get_u64_le(),
            data_offset: cursor.get_u64_le(),
        })
    }

    /// Stamps the modification time to now.
    pub fn touch_modified(&mut self) {
        self.modified_time = unix_time();
    }
}

/// Handles slot-granular reads and writes against the backing file.
pub struct Storage {
    file: RwLock<File>,
    path: PathBuf,
    page_size: usize,
    data_offset: u64,
}

impl Storage {
    /// Creates (truncating) a new backing file for the given layout.
    pub fn create(path: &Path, page_size: usize) -> UrbisResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Self {
            file: RwLock::new(file),
            path: path.to_path_buf(),
            page_size,
            data_offset: HEADER_SLOT_SIZE as u64 + page_size as u64,
        })
    }

    /// Opens an existing file and returns its validated header.
    ///
    /// The layout (page size, data offset) is taken from the header, not
    /// from compile-time defaults.
    pub fn open(path: &Path) -> UrbisResult<(Self, FileHeader)> {
        if !path.exists() {
            return Err(UrbisError::NotFound(format!(
                "index file {}",
                path.display()
            )));
        }
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;

        let mut buf = vec![0u8; HEADER_SLOT_SIZE];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut buf)
            .map_err(|_| UrbisError::Corrupt("file too short for a header".to_string()))?;
        let header = FileHeader::decode(&buf)?;
        header.validate()?;

        Ok((
            Self {
                file: RwLock::new(file),
                path: path.to_path_buf(),
                page_size: header.page_size as usize,
                data_offset: header.data_offset,
            },
            header,
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Writes the header into its slot at offset 0.
    pub fn write_header(&self, header: &FileHeader) -> UrbisResult<()> {
        let encoded = header.encode();
        let mut file = self.file.write();
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&encoded)?;
        Ok(())
    }

    /// Re-reads the header slot.
    pub fn read_header(&self) -> UrbisResult<FileHeader> {
        let mut buf = vec![0u8; HEADER_SLOT_SIZE];
        let mut file = self.file.write();
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut buf)
            .map_err(|_| UrbisError::Corrupt("file too short for a header".to_string()))?;
        FileHeader::decode(&buf)
    }

    fn slot_offset(&self, page_id: u32) -> UrbisResult<u64> {
        if page_id == 0 {
            return Err(UrbisError::InvalidArg(
                "page id 0 is reserved".to_string(),
            ));
        }
        Ok(self.data_offset + (page_id as u64 - 1) * self.page_size as u64)
    }

    /// Reads one page slot.
    ///
    /// # Errors
    /// Returns `NotFound` when the slot lies beyond the end of the file.
    pub fn read_slot(&self, page_id: u32) -> UrbisResult<Vec<u8>> {
        let offset = self.slot_offset(page_id)?;
        let mut buf = vec![0u8; self.page_size];
        let mut file = self.file.write();
        file.seek(SeekFrom::Start(offset))?;
        match file.read_exact(&mut buf) {
            Ok(()) => Ok(buf),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(UrbisError::NotFound(
                format!("page slot {} in {}", page_id, self.path.display()),
            )),
            Err(e) => Err(e.into()),
        }
    }

    /// Writes one page slot, zero-padding short data.
    pub fn write_slot(&self, page_id: u32, data: &[u8]) -> UrbisResult<()> {
        if data.len() > self.page_size {
            return Err(UrbisError::Alloc(format!(
                "slot data of {} bytes exceeds page size {}",
                data.len(),
                self.page_size
            )));
        }
        let offset = self.slot_offset(page_id)?;
        let mut file = self.file.write();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        if data.len() < self.page_size {
            let padding = vec![0u8; self.page_size - data.len()];
            file.write_all(&padding)?;
        }
        Ok(())
    }

    /// Flushes file contents and metadata to stable storage.
    pub fn sync(&self) -> UrbisResult<()> {
        self.file.write().sync_all()?;
        Ok(())
    }

    /// Current length of the backing file in bytes.
    pub fn file_size(&self) -> UrbisResult<u64> {
        Ok(self.file.read().metadata()?.len())
    }
}
