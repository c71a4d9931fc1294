//! Shared buffer handles and their mappings.

use std::ptr;

use tracing::{trace, warn};

use crate::core::Core;
use crate::handle::{impl_handle, BaseHandle};
use crate::result::{MojoError, MojoResult, Result};
use crate::thunks::RawBuffer;
use crate::types::{DuplicateBufferHandleOptions, MojoMapBufferFlags};

/// A handle to a region of memory that can be mapped by several holders.
pub struct SharedBufferHandle {
    base: BaseHandle,
}

impl_handle!(SharedBufferHandle);

impl SharedBufferHandle {
    pub(crate) fn from_base(base: BaseHandle) -> Self {
        Self { base }
    }

    /// A second handle to the same memory.
    pub fn duplicate_buffer_handle(
        &self,
        options: Option<&DuplicateBufferHandleOptions>,
    ) -> Result<SharedBufferHandle> {
        let handle = self
            .base
            .core
            .thunks()
            .duplicate_buffer_handle(self.base.value, options)
            .map_err(MojoError::new)?;
        Ok(Self::from_base(BaseHandle::new(self.base.core.clone(), handle)))
    }

    /// Map `num_bytes` starting at `offset`. The mapping stays valid after
    /// this handle is closed.
    pub fn map_buffer(
        &self,
        offset: u64,
        num_bytes: u64,
        flags: MojoMapBufferFlags,
    ) -> Result<BufferMapping> {
        let buffer = self
            .base
            .core
            .thunks()
            .map_buffer(self.base.value, offset, num_bytes, flags)
            .map_err(MojoError::new)?;
        trace!(handle = self.base.value, offset, num_bytes, "Mapped buffer");
        Ok(BufferMapping {
            core: self.base.core.clone(),
            buffer,
            mapped: true,
        })
    }
}

/// A live window onto shared memory.
///
/// Other holders may write the same bytes at any time, so access is by copy
/// only; coordinating concurrent writers is up to the caller.
pub struct BufferMapping {
    core: Core,
    buffer: RawBuffer,
    mapped: bool,
}

impl BufferMapping {
    pub fn len(&self) -> usize {
        self.buffer.len
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.len == 0
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.buffer.ptr.as_ptr()
    }

    fn check(&self, offset: usize, len: usize) -> Result<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.buffer.len => Ok(()),
            _ => Err(MojoError::new(MojoResult::InvalidArgument)),
        }
    }

    /// Copy `dst.len()` bytes out, starting at `offset`.
    pub fn read_at(&self, offset: usize, dst: &mut [u8]) -> Result<()> {
        self.check(offset, dst.len())?;
        // Safety: bounds checked; the core keeps the region alive while mapped.
        unsafe {
            ptr::copy_nonoverlapping(self.as_ptr().add(offset), dst.as_mut_ptr(), dst.len());
        }
        Ok(())
    }

    /// Copy `src` in, starting at `offset`.
    pub fn write_at(&self, offset: usize, src: &[u8]) -> Result<()> {
        self.check(offset, src.len())?;
        // Safety: as in read_at.
        unsafe {
            ptr::copy_nonoverlapping(src.as_ptr(), self.as_ptr().add(offset), src.len());
        }
        Ok(())
    }

    pub fn unmap(mut self) -> Result<()> {
        self.mapped = false;
        self.core.thunks().unmap_buffer(self.buffer).into_result()
    }
}

impl Drop for BufferMapping {
    fn drop(&mut self) {
        if self.mapped {
            let result = self.core.thunks().unmap_buffer(self.buffer);
            if !result.is_ok() {
                warn!(%result, len = self.buffer.len, "Failed to unmap buffer");
            }
        }
    }
}

impl std::fmt::Debug for BufferMapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferMapping")
            .field("len", &self.buffer.len)
            .finish()
    }
}
