//! Typed data pipe endpoints and their two-phase windows.

use std::ops::{Deref, DerefMut};
use std::slice;

use tracing::warn;

use crate::handle::{impl_handle, BaseHandle};
use crate::result::{MojoError, MojoResult, Result};
use crate::thunks::RawBuffer;
use crate::types::{MojoReadDataFlags, MojoWriteDataFlags};

/// Write end of a data pipe.
pub struct ProducerHandle {
    base: BaseHandle,
}

impl_handle!(ProducerHandle);

impl ProducerHandle {
    pub(crate) fn from_base(base: BaseHandle) -> Self {
        Self { base }
    }

    /// Copy as much of `data` as fits; returns the number of bytes accepted.
    pub fn write_data(&self, data: &[u8], flags: MojoWriteDataFlags) -> Result<usize> {
        let written = self
            .base
            .core
            .thunks()
            .write_data(self.base.value, data, flags)
            .map_err(MojoError::new)?;
        Ok(written as usize)
    }

    /// Borrow the next contiguous free span of the pipe. Nothing becomes
    /// readable until [`WriteDataBuffer::commit`].
    pub fn begin_write_data(&mut self, flags: MojoWriteDataFlags) -> Result<WriteDataBuffer<'_>> {
        let buffer = self
            .base
            .core
            .thunks()
            .begin_write_data(self.base.value, flags)
            .map_err(MojoError::new)?;
        Ok(WriteDataBuffer {
            base: &self.base,
            buffer,
            finished: false,
        })
    }
}

/// Read end of a data pipe.
pub struct ConsumerHandle {
    base: BaseHandle,
}

impl_handle!(ConsumerHandle);

impl ConsumerHandle {
    pub(crate) fn from_base(base: BaseHandle) -> Self {
        Self { base }
    }

    fn read_raw(&self, buf: &mut [u8], flags: MojoReadDataFlags) -> Result<usize> {
        let n = self
            .base
            .core
            .thunks()
            .read_data(self.base.value, buf, flags)
            .map_err(MojoError::new)?;
        Ok(n as usize)
    }

    /// Bytes currently readable.
    pub fn query_data(&self) -> Result<usize> {
        self.read_raw(&mut [], MojoReadDataFlags::QUERY)
    }

    /// Read everything currently available. `QUERY` is ignored here; use
    /// [`ConsumerHandle::query_data`].
    pub fn read_data(&self, flags: MojoReadDataFlags) -> Result<Vec<u8>> {
        let flags = flags.difference(MojoReadDataFlags::QUERY);
        let available = self.query_data()?;
        let mut buf = vec![0u8; available];
        let n = self.read_raw(&mut buf, flags)?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Read into a caller-owned buffer; returns the number of bytes filled.
    pub fn read_data_into(&self, buf: &mut [u8], flags: MojoReadDataFlags) -> Result<usize> {
        self.read_raw(buf, flags)
    }

    /// Drop up to `num_bytes` without copying them out.
    pub fn discard_data(&self, num_bytes: usize, flags: MojoReadDataFlags) -> Result<usize> {
        let num_bytes = match u32::try_from(num_bytes) {
            Ok(n) => n,
            // No pipe holds that much.
            Err(_) if flags.contains(MojoReadDataFlags::ALL_OR_NONE) => {
                return Err(MojoError::new(MojoResult::OutOfRange))
            }
            Err(_) => self.query_data()? as u32,
        };
        let n = self
            .base
            .core
            .thunks()
            .discard_data(self.base.value, num_bytes, flags)
            .map_err(MojoError::new)?;
        Ok(n as usize)
    }

    /// Borrow the next contiguous readable span. It stays in the pipe until
    /// [`ReadDataBuffer::commit`].
    pub fn begin_read_data(&mut self, flags: MojoReadDataFlags) -> Result<ReadDataBuffer<'_>> {
        let buffer = self
            .base
            .core
            .thunks()
            .begin_read_data(self.base.value, flags)
            .map_err(MojoError::new)?;
        Ok(ReadDataBuffer {
            base: &self.base,
            buffer,
            finished: false,
        })
    }
}

/// Two-phase write window. Dropping it without committing commits zero bytes.
pub struct WriteDataBuffer<'a> {
    base: &'a BaseHandle,
    buffer: RawBuffer,
    finished: bool,
}

impl WriteDataBuffer<'_> {
    /// Publish the first `num_bytes` of the window.
    pub fn commit(mut self, num_bytes: usize) -> Result<()> {
        let thunks = self.base.core.thunks();
        self.finished = true;
        match u32::try_from(num_bytes) {
            Ok(num_bytes) => thunks.end_write_data(self.base.value, num_bytes).into_result(),
            Err(_) => {
                // Larger than any window: close it empty and report the bad count.
                let result = thunks.end_write_data(self.base.value, 0);
                if !result.is_ok() {
                    warn!(handle = self.base.value, %result, "Failed to close write window");
                }
                Err(MojoError::new(MojoResult::InvalidArgument))
            }
        }
    }
}

impl Deref for WriteDataBuffer<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // Safety: the window is reserved for this guard until end_write_data.
        unsafe { slice::from_raw_parts(self.buffer.ptr.as_ptr(), self.buffer.len) }
    }
}

impl DerefMut for WriteDataBuffer<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        // Safety: as above; the producer is mutably borrowed for our lifetime.
        unsafe { slice::from_raw_parts_mut(self.buffer.ptr.as_ptr(), self.buffer.len) }
    }
}

impl Drop for WriteDataBuffer<'_> {
    fn drop(&mut self) {
        if !self.finished {
            let result = self.base.core.thunks().end_write_data(self.base.value, 0);
            if !result.is_ok() {
                warn!(handle = self.base.value, %result, "Abandoned write window");
            }
        }
    }
}

/// Two-phase read window. Dropping it without committing consumes nothing.
pub struct ReadDataBuffer<'a> {
    base: &'a BaseHandle,
    buffer: RawBuffer,
    finished: bool,
}

impl ReadDataBuffer<'_> {
    /// Consume the first `num_bytes` of the window.
    pub fn commit(mut self, num_bytes: usize) -> Result<()> {
        let thunks = self.base.core.thunks();
        self.finished = true;
        match u32::try_from(num_bytes) {
            Ok(num_bytes) => thunks.end_read_data(self.base.value, num_bytes).into_result(),
            Err(_) => {
                // Larger than any window: close it empty and report the bad count.
                let result = thunks.end_read_data(self.base.value, 0);
                if !result.is_ok() {
                    warn!(handle = self.base.value, %result, "Failed to close read window");
                }
                Err(MojoError::new(MojoResult::InvalidArgument))
            }
        }
    }
}

impl Deref for ReadDataBuffer<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // Safety: the producer never writes into a span that is still readable.
        unsafe { slice::from_raw_parts(self.buffer.ptr.as_ptr(), self.buffer.len) }
    }
}

impl Drop for ReadDataBuffer<'_> {
    fn drop(&mut self) {
        if !self.finished {
            let result = self.base.core.thunks().end_read_data(self.base.value, 0);
            if !result.is_ok() {
                warn!(handle = self.base.value, %result, "Abandoned read window");
            }
        }
    }
}
