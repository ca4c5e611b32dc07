use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

pub const BYTES_IN_MIB: u64 = 1024 * 1024;

/// Why a bytecode image could not be loaded. Every variant is fatal at startup.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to open wasm image {}: {source}", path.display())]
    NotFound { path: PathBuf, source: io::Error },

    #[error(
        "wasm image {} is too large ({size} bytes), exceeding max size of {limit_mib} MiB",
        path.display()
    )]
    TooLarge {
        path: PathBuf,
        size: u64,
        limit_mib: u64,
    },

    #[error("failed to read wasm image {}: {source}", path.display())]
    ReadFailed { path: PathBuf, source: io::Error },
}

/// An immutable, size-checked wasm binary read from disk.
#[derive(Debug, Clone)]
pub struct BytecodeImage {
    bytes: Vec<u8>,
}

impl BytecodeImage {
    /// Wraps bytes already in memory (tests, embedded images).
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    pub fn size_bytes(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Reads the image at `path`, refusing anything larger than `max_size_mib`.
///
/// The size is taken from file metadata before any content is read, so an
/// oversized image is rejected without being pulled into memory. The file
/// handle is dropped on every return path.
pub fn load(path: impl AsRef<Path>, max_size_mib: u64) -> Result<BytecodeImage, LoadError> {
    let path = path.as_ref();

    let mut file = File::open(path).map_err(|source| match source.kind() {
        io::ErrorKind::NotFound => LoadError::NotFound {
            path: path.to_path_buf(),
            source,
        },
        _ => LoadError::ReadFailed {
            path: path.to_path_buf(),
            source,
        },
    })?;

    let size = file
        .metadata()
        .map_err(|source| LoadError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?
        .len();

    if size > max_size_mib.saturating_mul(BYTES_IN_MIB) {
        return Err(LoadError::TooLarge {
            path: path.to_path_buf(),
            size,
            limit_mib: max_size_mib,
        });
    }

    let mut bytes = Vec::with_capacity(size as usize);
    file.read_to_end(&mut bytes)
        .map_err(|source| LoadError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;

    info!("Loaded wasm image {} ({} bytes)", path.display(), bytes.len());
    Ok(BytecodeImage { bytes })
}
