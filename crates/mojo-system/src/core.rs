//! Construction point for fresh handles and the monotonic clock.

use std::fmt;
use std::sync::Arc;

use crate::config::EmbedderConfig;
use crate::data_pipe::{ConsumerHandle, ProducerHandle};
use crate::embedder::Embedder;
use crate::handle::{BaseHandle, Handle, UntypedHandle};
use crate::message_pipe::MessagePipeHandle;
use crate::result::{MojoError, Result};
use crate::shared_buffer::SharedBufferHandle;
use crate::thunks::{SystemThunks, WaitManyOutcome};
use crate::types::{
    DataPipeOptions, MessagePipeOptions, MojoDeadline, MojoHandle, MojoHandleSignals,
    MojoTimeTicks, SharedBufferOptions,
};

/// Facade over one native core. Cheap to clone; every handle keeps the core
/// it was created from.
#[derive(Clone)]
pub struct Core {
    thunks: Arc<dyn SystemThunks>,
}

impl Core {
    pub fn new(thunks: Arc<dyn SystemThunks>) -> Self {
        Self { thunks }
    }

    /// A core backed by a fresh in-process [`Embedder`] with default limits.
    pub fn embedded() -> Self {
        Self::with_config(EmbedderConfig::default())
    }

    pub fn with_config(config: EmbedderConfig) -> Self {
        Self::new(Arc::new(Embedder::new(config)))
    }

    pub fn thunks(&self) -> &Arc<dyn SystemThunks> {
        &self.thunks
    }

    /// Take ownership of a raw identifier obtained elsewhere.
    pub fn acquire_native_handle(&self, handle: MojoHandle) -> UntypedHandle {
        UntypedHandle::from_base(BaseHandle::new(self.clone(), handle))
    }

    pub fn get_time_ticks_now(&self) -> MojoTimeTicks {
        self.thunks.get_time_ticks_now()
    }

    /// Wait until any `handles[i]` satisfies `signals[i]`.
    pub fn wait_many(
        &self,
        handles: &[&dyn Handle],
        signals: &[MojoHandleSignals],
        deadline: MojoDeadline,
    ) -> WaitManyOutcome {
        let raw: Vec<MojoHandle> = handles.iter().map(|h| h.native_handle()).collect();
        self.wait_many_native(&raw, signals, deadline)
    }

    /// [`Core::wait_many`] over identifiers the caller does not own.
    pub fn wait_many_native(
        &self,
        handles: &[MojoHandle],
        signals: &[MojoHandleSignals],
        deadline: MojoDeadline,
    ) -> WaitManyOutcome {
        self.thunks.wait_many(handles, signals, deadline)
    }

    pub fn create_message_pipe(
        &self,
        options: Option<&MessagePipeOptions>,
    ) -> Result<(MessagePipeHandle, MessagePipeHandle)> {
        let (h0, h1) = self
            .thunks
            .create_message_pipe(options)
            .map_err(MojoError::new)?;
        Ok((
            MessagePipeHandle::from_base(BaseHandle::new(self.clone(), h0)),
            MessagePipeHandle::from_base(BaseHandle::new(self.clone(), h1)),
        ))
    }

    pub fn create_data_pipe(
        &self,
        options: Option<&DataPipeOptions>,
    ) -> Result<(ProducerHandle, ConsumerHandle)> {
        let (producer, consumer) = self
            .thunks
            .create_data_pipe(options)
            .map_err(MojoError::new)?;
        Ok((
            ProducerHandle::from_base(BaseHandle::new(self.clone(), producer)),
            ConsumerHandle::from_base(BaseHandle::new(self.clone(), consumer)),
        ))
    }

    pub fn create_shared_buffer(
        &self,
        options: Option<&SharedBufferOptions>,
        num_bytes: u64,
    ) -> Result<SharedBufferHandle> {
        let handle = self
            .thunks
            .create_shared_buffer(options, num_bytes)
            .map_err(MojoError::new)?;
        Ok(SharedBufferHandle::from_base(BaseHandle::new(
            self.clone(),
            handle,
        )))
    }
}

impl fmt::Debug for Core {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Core").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::MojoResult;
    use crate::types::{MojoCreateDataPipeOptionsFlags, DEADLINE_INDEFINITE};

    #[test]
    fn test_create_pipe_write_read() {
        let core = Core::embedded();
        let (h0, h1) = core.create_message_pipe(None).unwrap();
        h0.write_message(b"ping", Vec::new(), Default::default())
            .unwrap();
        let (bytes, handles) = h1.read_message(Default::default()).unwrap();
        assert_eq!(bytes, b"ping");
        assert!(handles.is_empty());
    }

    #[test]
    fn test_default_options_equal_none() {
        let core = Core::embedded();
        let explicit = DataPipeOptions {
            flags: MojoCreateDataPipeOptionsFlags::NONE,
            element_num_bytes: 1,
            capacity_num_bytes: 0,
        };
        let (p1, _c1) = core.create_data_pipe(None).unwrap();
        let (p2, _c2) = core.create_data_pipe(Some(&explicit)).unwrap();
        let data = vec![7u8; 2 * 1024 * 1024];
        // Both pipes get the configured default capacity.
        assert_eq!(
            p1.write_data(&data, Default::default()).unwrap(),
            p2.write_data(&data, Default::default()).unwrap()
        );
    }

    #[test]
    fn test_rejects_zero_element_size() {
        let core = Core::embedded();
        let options = DataPipeOptions {
            element_num_bytes: 0,
            ..Default::default()
        };
        let err = core.create_data_pipe(Some(&options)).unwrap_err();
        assert_eq!(err.result(), MojoResult::InvalidArgument);
    }

    #[test]
    fn test_wait_many_over_typed_handles() {
        let core = Core::embedded();
        let (a0, _a1) = core.create_message_pipe(None).unwrap();
        let (b0, b1) = core.create_message_pipe(None).unwrap();
        drop(b1);

        let outcome = core.wait_many(
            &[&a0, &b0],
            &[MojoHandleSignals::READABLE, MojoHandleSignals::READABLE],
            DEADLINE_INDEFINITE,
        );
        assert_eq!(outcome.result, MojoResult::FailedPrecondition);
        assert_eq!(outcome.index, Some(1));
        assert_eq!(outcome.states.map(|s| s.len()), Some(2));
    }

    #[test]
    fn test_clock_is_monotonic() {
        let core = Core::embedded();
        let a = core.get_time_ticks_now();
        let b = core.get_time_ticks_now();
        assert!(b >= a);
    }
}
