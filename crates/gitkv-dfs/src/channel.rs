//! Read channel over a pack file fetched from storage.

use crate::error::DfsError;
use crate::traits::ReadableChannel;
use bytes::Bytes;
use std::io::{self, Read, Seek, SeekFrom};

/// Positioned reader over bytes returned by the pack store.
///
/// The whole file is held in memory. The store exposes no block alignment,
/// so [`ReadableChannel::block_size`] is 0.
#[derive(Debug, Clone)]
pub struct BlobChannel {
    name: String,
    data: Bytes,
    position: u64,
    open: bool,
}

impl BlobChannel {
    /// Wraps the bytes of the file called `name`.
    pub fn new(name: impl Into<String>, data: Bytes) -> Self {
        Self {
            name: name.into(),
            data,
            position: 0,
            open: true,
        }
    }

    /// Name of the underlying file.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn ensure_open(&self) -> io::Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(DfsError::ClosedStream(self.name.clone()).into())
        }
    }
}

impl Read for BlobChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.ensure_open()?;
        let len = self.data.len() as u64;
        if self.position >= len {
            return Ok(0);
        }
        // position < len, so it fits in usize
        let start = self.position as usize;
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        self.position += n as u64;
        Ok(n)
    }
}

impl Seek for BlobChannel {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.ensure_open()?;
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => self.size().checked_add_signed(delta),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
        };
        match target {
            Some(position) => {
                self.position = position;
                Ok(position)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid seek in {}", self.name),
            )),
        }
    }
}

impl ReadableChannel for BlobChannel {
    fn position(&self) -> u64 {
        self.position
    }

    fn set_position(&mut self, position: u64) -> io::Result<()> {
        self.ensure_open()?;
        self.position = position;
        Ok(())
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn block_size(&self) -> usize {
        0
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn close(&mut self) {
        self.open = false;
    }
}
