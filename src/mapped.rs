//! Read-only memory-mapped safetensors files.
//!
//! Requires the `mmap` feature.

use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use tracing::debug;

use crate::error::{Error, IoContext};
use crate::metadata::Metadata;
use crate::models::N_LEN;
use crate::reader::{TensorSource, read_metadata, slice_payload};

/// A safetensors file mapped read-only into memory.
///
/// Tensor views borrow the `MappedFile`, so it cannot be closed or dropped
/// while any of them is alive. Dropping it unmaps the file and then closes
/// the handle.
pub struct MappedFile {
    metadata: Metadata,
    header_len: usize,
    // Field order matters: the mapping is released before the handle.
    mmap: Mmap,
    _file: File,
    path: PathBuf,
}

impl MappedFile {
    /// Opens `path`, maps it and validates the whole container.
    ///
    /// On failure everything acquired so far is released before returning.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        // SAFETY: the map is read-only. Callers must not truncate or rewrite the
        // file while it is mapped.
        let mmap = unsafe { Mmap::map(&file) }
            .with_context(|| format!("mapping {}", path.display()))?;
        let (header_len, metadata) = read_metadata(&mmap)?;

        debug!(
            path = %path.display(),
            tensors = metadata.len(),
            bytes = mmap.len(),
            "mapped safetensors file"
        );
        Ok(Self {
            metadata,
            header_len,
            mmap,
            _file: file,
            path: path.to_path_buf(),
        })
    }

    /// Unmaps the file and closes its handle.
    ///
    /// Neither release can report failure through `memmap2` or `std::fs`, so
    /// there is no error to return; the handle is gone once this returns.
    pub fn close(self) {
        debug!(path = %self.path.display(), "closing mapped safetensors file");
        let Self { mmap, _file: file, .. } = self;
        drop(mmap);
        drop(file);
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Header length in bytes, padding included, prefix excluded.
    pub fn header_len(&self) -> usize {
        self.header_len
    }

    /// The complete mapped file.
    pub fn as_bytes(&self) -> &[u8] {
        &self.mmap
    }

    fn payload(&self) -> &[u8] {
        &self.mmap[N_LEN + self.header_len..]
    }
}

impl TensorSource for MappedFile {
    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn tensor_bytes(&self, index: usize) -> &[u8] {
        slice_payload(self.payload(), &self.metadata.tensors()[index].1)
    }
}
