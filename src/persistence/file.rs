//! Single-file persistence backend.
//!
//! File layout:
//!
//! ```text
//! magic "BRS\0" | version u8 | format u8 | payload len u64 LE | payload | crc32 u32 LE
//! ```
//!
//! Saves go to a sibling temp file which is then renamed over the target.
//! An exclusive lock on a sibling `.lock` file is held for the backend's
//! lifetime, so only one process writes a given file.

use super::codec::{decode_json, decode_msgpack, encode_json, encode_msgpack};
use super::{Persistence, PersistedState};
use crate::error::{Result, StoreError};
use fs2::FileExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Magic bytes for the store file.
const FILE_MAGIC: &[u8; 4] = b"BRS\0";

/// Current file framing version.
const FILE_VERSION: u8 = 1;

/// Bytes outside the payload: magic, version, format, length and crc32.
const FRAME_OVERHEAD: u64 = 4 + 1 + 1 + 8 + 4;

/// Payload encoding inside the file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    #[default]
    Json,
    MessagePack,
}

impl FileFormat {
    fn tag(self) -> u8 {
        match self {
            FileFormat::Json => 0,
            FileFormat::MessagePack => 1,
        }
    }

    fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(FileFormat::Json),
            1 => Ok(FileFormat::MessagePack),
            other => Err(StoreError::InvalidFormat(format!(
                "Unknown payload format: {}",
                other
            ))),
        }
    }
}

/// Persists the store state to one file.
pub struct FileBackend {
    path: PathBuf,
    format: FileFormat,

    /// Lock file for exclusive access.
    _lock_file: File,

    /// Serializes writers within this process.
    write_lock: Mutex<()>,
}

impl FileBackend {
    /// Open (or prepare to create) the store file at `path`.
    pub fn open(path: impl AsRef<Path>, format: FileFormat) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let lock_file = Self::acquire_lock(&path)?;

        Ok(Self {
            path,
            format,
            _lock_file: lock_file,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> FileFormat {
        self.format
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(sibling(path, "lock"))?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| StoreError::Locked)?;

        Ok(lock_file)
    }

    fn read_file(&self) -> Result<PersistedState> {
        let mut file = File::open(&self.path)?;

        // Read magic
        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != FILE_MAGIC {
            return Err(StoreError::InvalidFormat("Invalid store file magic".into()));
        }

        // Read version
        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != FILE_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "Unsupported store file version: {}",
                version[0]
            )));
        }

        let mut format = [0u8; 1];
        file.read_exact(&mut format)?;
        let format = FileFormat::from_tag(format[0])?;

        // Read payload
        let mut len_bytes = [0u8; 8];
        file.read_exact(&mut len_bytes)?;
        let len = u64::from_le_bytes(len_bytes);

        // Never trust the header for the allocation size
        let available = file.metadata()?.len().saturating_sub(FRAME_OVERHEAD);
        if len > available {
            return Err(StoreError::InvalidFormat(
                "payload length exceeds file size".into(),
            ));
        }

        let mut payload = vec![0u8; len as usize];
        file.read_exact(&mut payload)?;

        // Read and verify checksum
        let mut checksum_bytes = [0u8; 4];
        file.read_exact(&mut checksum_bytes)?;
        let stored_checksum = u32::from_le_bytes(checksum_bytes);
        let computed_checksum = crc32fast::hash(&payload);

        if stored_checksum != computed_checksum {
            return Err(StoreError::ChecksumMismatch {
                expected: stored_checksum,
                got: computed_checksum,
            });
        }

        match format {
            FileFormat::Json => decode_json(&payload),
            FileFormat::MessagePack => decode_msgpack(&payload),
        }
    }
}

impl Persistence for FileBackend {
    fn save(&self, state: &PersistedState) -> Result<()> {
        let payload = match self.format {
            FileFormat::Json => encode_json(state)?,
            FileFormat::MessagePack => encode_msgpack(state)?,
        };

        let _guard = self.write_lock.lock();
        let tmp_path = sibling(&self.path, "tmp");
        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)?;

            file.write_all(FILE_MAGIC)?;
            file.write_all(&[FILE_VERSION, self.format.tag()])?;
            file.write_all(&(payload.len() as u64).to_le_bytes())?;
            file.write_all(&payload)?;
            file.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;

        debug!(path = %self.path.display(), bytes = payload.len(), "store saved");
        Ok(())
    }

    fn load(&self) -> Result<Option<PersistedState>> {
        if !self.path.exists() {
            return Ok(None);
        }
        self.read_file().map(Some)
    }
}

/// `path` with `.ext` appended to its file name.
fn sibling(path: &Path, ext: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}
