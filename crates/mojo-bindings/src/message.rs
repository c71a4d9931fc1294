//! The unit a connector reads and writes.

use mojo_system::UntypedHandle;

/// A payload and the handles that travel with it, in transfer order.
#[derive(Debug, Default)]
pub struct Message {
    pub payload: Vec<u8>,
    pub handles: Vec<UntypedHandle>,
}

impl Message {
    pub fn new(payload: Vec<u8>, handles: Vec<UntypedHandle>) -> Self {
        Self { payload, handles }
    }

    pub fn from_payload(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            handles: Vec::new(),
        }
    }
}
