//! Write stream for a pack file.

use crate::error::DfsError;
use crate::traits::DfsOutputStream;
use bytes::{Bytes, BytesMut};
use gitkv_store::{PackDescription, PackExt, PackStore};
use std::io::{self, Write};
use std::sync::Arc;

/// Accumulates one pack file in memory and stores it whole.
///
/// Each finalization (flush or close) after new writes performs exactly one
/// store write of every byte written so far. Finalizing again without new
/// writes does nothing. Dropping a stream that was never finalized discards
/// its bytes.
pub struct PackOutputStream {
    store: Arc<PackStore>,
    desc: PackDescription,
    ext: PackExt,
    buffer: BytesMut,
    persisted: bool,
    closed: bool,
}

impl PackOutputStream {
    pub(crate) fn new(store: Arc<PackStore>, desc: PackDescription, ext: PackExt) -> Self {
        Self {
            store,
            desc,
            ext,
            buffer: BytesMut::new(),
            persisted: false,
            closed: false,
        }
    }

    /// Name of the file being written.
    pub fn file_name(&self) -> String {
        self.desc.file_name(self.ext)
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns true if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    fn persist(&mut self) -> io::Result<()> {
        if self.persisted {
            return Ok(());
        }
        let data = Bytes::copy_from_slice(&self.buffer);
        self.store
            .write_file(&self.desc, self.ext, data)
            .map_err(DfsError::from)?;
        self.persisted = true;
        Ok(())
    }
}

impl Write for PackOutputStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(DfsError::ClosedStream(self.file_name()).into());
        }
        self.buffer.extend_from_slice(buf);
        if !buf.is_empty() {
            self.persisted = false;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.persist()
    }
}

impl DfsOutputStream for PackOutputStream {
    fn read_at(&self, position: u64, dst: &mut [u8]) -> io::Result<usize> {
        let len = self.buffer.len() as u64;
        if position >= len {
            return Ok(0);
        }
        let start = position as usize;
        let n = dst.len().min(self.buffer.len() - start);
        dst[..n].copy_from_slice(&self.buffer[start..start + n]);
        Ok(n)
    }

    fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.persist()?;
        self.closed = true;
        Ok(())
    }
}

impl Drop for PackOutputStream {
    fn drop(&mut self) {
        if !self.persisted {
            tracing::warn!(
                file = %self.file_name(),
                bytes = self.buffer.len(),
                "pack output stream dropped without flush; data discarded"
            );
        }
    }
}

impl std::fmt::Debug for PackOutputStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackOutputStream")
            .field("file", &self.file_name())
            .field("bytes", &self.buffer.len())
            .field("persisted", &self.persisted)
            .field("closed", &self.closed)
            .finish()
    }
}
