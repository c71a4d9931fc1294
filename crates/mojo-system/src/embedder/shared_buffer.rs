//! Shared memory regions backed by anonymous maps.

use std::ptr::NonNull;
use std::sync::Arc;

use memmap2::MmapMut;
use tracing::warn;

use super::{Dispatcher, State};
use crate::result::MojoResult;
use crate::thunks::RawBuffer;
use crate::types::MojoHandle;

/// Anonymous shared memory. Kept alive by every handle and every mapping
/// that refers to it.
pub(super) struct SharedRegion {
    _map: MmapMut,
    base: NonNull<u8>,
    len: usize,
}

// Safety: the region is shared memory by definition; the core only hands out
// addresses, never references.
unsafe impl Send for SharedRegion {}
unsafe impl Sync for SharedRegion {}

impl SharedRegion {
    pub(super) fn new(len: usize) -> Result<Self, MojoResult> {
        let mut map = MmapMut::map_anon(len).map_err(|e| {
            warn!(len, error = %e, "Failed to map anonymous region");
            MojoResult::ResourceExhausted
        })?;
        let base = NonNull::new(map.as_mut_ptr()).ok_or(MojoResult::Internal)?;
        Ok(Self {
            _map: map,
            base,
            len,
        })
    }

    pub(super) fn span(&self, offset: u64, num_bytes: u64) -> Result<RawBuffer, MojoResult> {
        let offset = usize::try_from(offset).map_err(|_| MojoResult::InvalidArgument)?;
        let num_bytes = usize::try_from(num_bytes).map_err(|_| MojoResult::InvalidArgument)?;
        let end = offset
            .checked_add(num_bytes)
            .ok_or(MojoResult::InvalidArgument)?;
        if num_bytes == 0 || end > self.len {
            return Err(MojoResult::InvalidArgument);
        }
        // Safety: offset + num_bytes <= len.
        let ptr = unsafe { NonNull::new_unchecked(self.base.as_ptr().add(offset)) };
        Ok(RawBuffer {
            ptr,
            len: num_bytes,
        })
    }
}

impl std::fmt::Debug for SharedRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedRegion").field("len", &self.len).finish()
    }
}

impl State {
    pub(super) fn region(&self, handle: MojoHandle) -> Result<Arc<SharedRegion>, MojoResult> {
        match self.handles.get(&handle) {
            Some(Dispatcher::SharedBuffer { region }) => Ok(Arc::clone(region)),
            _ => Err(MojoResult::InvalidArgument),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::embedder::Embedder;
    use crate::result::MojoResult;
    use crate::thunks::SystemThunks;
    use crate::types::MojoMapBufferFlags;

    #[test]
    fn test_duplicate_shares_memory() {
        let core = Embedder::default();
        let a = core.create_shared_buffer(None, 4096).unwrap();
        let b = core.duplicate_buffer_handle(a, None).unwrap();
        assert_ne!(a, b);

        let wa = core.map_buffer(a, 0, 4096, MojoMapBufferFlags::NONE).unwrap();
        let wb = core.map_buffer(b, 16, 8, MojoMapBufferFlags::NONE).unwrap();
        // Safety: both windows are live mappings of the same region.
        unsafe {
            *wa.ptr.as_ptr().add(16) = 0xAB;
            assert_eq!(*wb.ptr.as_ptr(), 0xAB);
        }
        assert_eq!(core.unmap_buffer(wa), MojoResult::Ok);
        assert_eq!(core.unmap_buffer(wb), MojoResult::Ok);
        assert_eq!(core.unmap_buffer(wb), MojoResult::InvalidArgument);
    }

    #[test]
    fn test_mapping_outlives_handle() {
        let core = Embedder::default();
        let h = core.create_shared_buffer(None, 64).unwrap();
        let window = core.map_buffer(h, 0, 64, MojoMapBufferFlags::NONE).unwrap();
        assert_eq!(core.close(h), MojoResult::Ok);
        // Safety: the mapping keeps the region alive until unmapped.
        unsafe { *window.ptr.as_ptr() = 1 };
        assert_eq!(core.unmap_buffer(window), MojoResult::Ok);
    }

    #[test]
    fn test_map_out_of_bounds() {
        let core = Embedder::default();
        let h = core.create_shared_buffer(None, 64).unwrap();
        assert_eq!(
            core.map_buffer(h, 60, 8, MojoMapBufferFlags::NONE),
            Err(MojoResult::InvalidArgument)
        );
        assert_eq!(
            core.map_buffer(h, 0, 0, MojoMapBufferFlags::NONE),
            Err(MojoResult::InvalidArgument)
        );
    }

    #[test]
    fn test_zero_sized_buffer_rejected() {
        let core = Embedder::default();
        assert_eq!(
            core.create_shared_buffer(None, 0),
            Err(MojoResult::InvalidArgument)
        );
    }

    #[test]
    fn test_buffer_over_limit() {
        let core = Embedder::default();
        let limit = core.config().max_shared_buffer_num_bytes;
        assert_eq!(
            core.create_shared_buffer(None, limit + 1),
            Err(MojoResult::ResourceExhausted)
        );
    }
}
