//! Typed message pipe endpoint.

use crate::handle::{impl_handle, BaseHandle, Handle, UntypedHandle};
use crate::result::{MojoResult, Result};
use crate::types::{MojoReadMessageFlags, MojoWriteMessageFlags, INVALID_HANDLE};

/// One endpoint of a bidirectional message pipe.
pub struct MessagePipeHandle {
    base: BaseHandle,
}

impl_handle!(MessagePipeHandle);

impl MessagePipeHandle {
    pub(crate) fn from_base(base: BaseHandle) -> Self {
        Self { base }
    }

    /// Read the next message without blocking.
    ///
    /// Returns SHOULD_WAIT when the queue is empty and FAILED_PRECONDITION once
    /// it is empty for good. The message size is queried first so the payload
    /// is never truncated.
    pub fn read_message(&self, flags: MojoReadMessageFlags) -> Result<(Vec<u8>, Vec<UntypedHandle>)> {
        let thunks = self.base.core.thunks();
        loop {
            let (result, sizes) =
                thunks.read_message(self.base.value, None, None, MojoReadMessageFlags::NONE);
            match result {
                // Empty message, already consumed.
                MojoResult::Ok => return Ok((Vec::new(), Vec::new())),
                MojoResult::ResourceExhausted => {}
                other => return Err(other.into()),
            }

            let mut bytes = vec![0u8; sizes.num_bytes as usize];
            let mut raw = vec![INVALID_HANDLE; sizes.num_handles as usize];
            let (result, got) =
                thunks.read_message(self.base.value, Some(&mut bytes), Some(&mut raw), flags);
            match result {
                MojoResult::Ok => {
                    bytes.truncate(got.num_bytes as usize);
                    raw.truncate(got.num_handles as usize);
                    let handles = raw
                        .into_iter()
                        .map(|h| self.base.core.acquire_native_handle(h))
                        .collect();
                    return Ok((bytes, handles));
                }
                // Someone read the queried message first and the next one is larger.
                MojoResult::ResourceExhausted
                    if !flags.contains(MojoReadMessageFlags::MAY_DISCARD) => {}
                other => return Err(other.into()),
            }
        }
    }

    /// Write a message, moving `handles` to the peer.
    ///
    /// On success the handles belong to whoever reads the message. On failure
    /// they are closed when dropped here.
    pub fn write_message(
        &self,
        bytes: &[u8],
        handles: Vec<UntypedHandle>,
        flags: MojoWriteMessageFlags,
    ) -> Result<()> {
        let raw: Vec<_> = handles.iter().map(|h| h.native_handle()).collect();
        self.base
            .core
            .thunks()
            .write_message(self.base.value, bytes, &raw, flags)
            .into_result()?;
        for handle in handles {
            handle.release_native_handle();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Core;
    use crate::types::{MojoHandleSignals, DEADLINE_INDEFINITE};

    #[test]
    fn test_read_before_write_should_wait() {
        let core = Core::embedded();
        let (_h0, h1) = core.create_message_pipe(None).unwrap();
        let err = h1.read_message(MojoReadMessageFlags::NONE).unwrap_err();
        assert_eq!(err.result(), MojoResult::ShouldWait);
    }

    #[test]
    fn test_full_payload_after_size_query() {
        let core = Core::embedded();
        let (h0, h1) = core.create_message_pipe(None).unwrap();
        h0.write_message(b"0123456789", Vec::new(), MojoWriteMessageFlags::NONE)
            .unwrap();
        let (bytes, _) = h1.read_message(MojoReadMessageFlags::NONE).unwrap();
        assert_eq!(bytes.len(), 10);
        assert_eq!(bytes, b"0123456789");
    }

    #[test]
    fn test_empty_message() {
        let core = Core::embedded();
        let (h0, h1) = core.create_message_pipe(None).unwrap();
        h0.write_message(b"", Vec::new(), MojoWriteMessageFlags::NONE)
            .unwrap();
        let (bytes, handles) = h1.read_message(MojoReadMessageFlags::NONE).unwrap();
        assert!(bytes.is_empty());
        assert!(handles.is_empty());
        let err = h1.read_message(MojoReadMessageFlags::NONE).unwrap_err();
        assert_eq!(err.result(), MojoResult::ShouldWait);
    }

    #[test]
    fn test_handles_arrive_in_order() {
        let core = Core::embedded();
        let (h0, h1) = core.create_message_pipe(None).unwrap();
        let (a0, a1) = core.create_message_pipe(None).unwrap();
        let (b0, b1) = core.create_message_pipe(None).unwrap();

        h0.write_message(
            b"two handles",
            vec![a1.to_untyped_handle(), b1.to_untyped_handle()],
            MojoWriteMessageFlags::NONE,
        )
        .unwrap();

        let (bytes, mut handles) = h1.read_message(MojoReadMessageFlags::NONE).unwrap();
        assert_eq!(bytes, b"two handles");
        assert_eq!(handles.len(), 2);
        assert!(handles.iter().all(|h| h.is_valid()));

        let b1 = handles.pop().unwrap().to_message_pipe_handle();
        let a1 = handles.pop().unwrap().to_message_pipe_handle();
        a0.write_message(b"a", Vec::new(), MojoWriteMessageFlags::NONE)
            .unwrap();
        b0.write_message(b"b", Vec::new(), MojoWriteMessageFlags::NONE)
            .unwrap();
        assert_eq!(a1.read_message(MojoReadMessageFlags::NONE).unwrap().0, b"a");
        assert_eq!(b1.read_message(MojoReadMessageFlags::NONE).unwrap().0, b"b");
    }

    #[test]
    fn test_failed_write_closes_attachments() {
        let core = Core::embedded();
        let (h0, h1) = core.create_message_pipe(None).unwrap();
        let (t0, t1) = core.create_message_pipe(None).unwrap();
        drop(h1);

        let err = h0
            .write_message(b"", vec![t1.to_untyped_handle()], MojoWriteMessageFlags::NONE)
            .unwrap_err();
        assert_eq!(err.result(), MojoResult::FailedPrecondition);
        let outcome = t0.wait(MojoHandleSignals::PEER_CLOSED, DEADLINE_INDEFINITE);
        assert_eq!(outcome.result, MojoResult::Ok);
    }

    #[test]
    fn test_closed_handle_fails_fast() {
        let core = Core::embedded();
        let (mut h0, _h1) = core.create_message_pipe(None).unwrap();
        h0.close().unwrap();
        assert_eq!(
            h0.read_message(MojoReadMessageFlags::NONE)
                .unwrap_err()
                .result(),
            MojoResult::InvalidArgument
        );
        assert_eq!(
            h0.write_message(b"x", Vec::new(), MojoWriteMessageFlags::NONE)
                .unwrap_err()
                .result(),
            MojoResult::InvalidArgument
        );
    }
}
