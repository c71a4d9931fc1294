//! Primitive types of the native call surface: identifiers, signals, flags,
//! deadlines and creation options.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Native identifier of one endpoint. Opaque to everything but the core.
pub type MojoHandle = u32;

/// Never names a live object.
pub const INVALID_HANDLE: MojoHandle = 0;

/// Relative deadline in microseconds.
pub type MojoDeadline = u64;

/// Wait without a deadline.
pub const DEADLINE_INDEFINITE: MojoDeadline = u64::MAX;

/// Microseconds on the core's monotonic clock.
pub type MojoTimeTicks = i64;

bitflags! {
    /// Readiness conditions a handle can be waited on.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct MojoHandleSignals: u32 {
        const NONE = 0;
        const READABLE = 1 << 0;
        const WRITABLE = 1 << 1;
        const PEER_CLOSED = 1 << 2;
    }
}

/// Snapshot of a handle's signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SignalsState {
    /// Conditions that hold right now.
    pub satisfied: MojoHandleSignals,
    /// Conditions that may still become true.
    pub satisfiable: MojoHandleSignals,
}

impl SignalsState {
    pub fn new(satisfied: MojoHandleSignals, satisfiable: MojoHandleSignals) -> Self {
        Self {
            satisfied,
            satisfiable,
        }
    }

    /// True if any of `signals` is satisfied.
    pub fn is_satisfied(&self, signals: MojoHandleSignals) -> bool {
        self.satisfied.intersects(signals)
    }

    /// True if none of `signals` can ever be satisfied.
    pub fn is_unsatisfiable(&self, signals: MojoHandleSignals) -> bool {
        !self.satisfiable.intersects(signals)
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MojoWriteMessageFlags: u32 {
        const NONE = 0;
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MojoReadMessageFlags: u32 {
        const NONE = 0;
        /// Drop a message that does not fit the supplied buffers.
        const MAY_DISCARD = 1 << 0;
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MojoWriteDataFlags: u32 {
        const NONE = 0;
        const ALL_OR_NONE = 1 << 0;
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MojoReadDataFlags: u32 {
        const NONE = 0;
        const ALL_OR_NONE = 1 << 0;
        const DISCARD = 1 << 1;
        /// Report the readable byte count without reading.
        const QUERY = 1 << 2;
        /// Copy without consuming.
        const PEEK = 1 << 3;
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct MojoCreateMessagePipeOptionsFlags: u32 {
        const NONE = 0;
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct MojoCreateDataPipeOptionsFlags: u32 {
        const NONE = 0;
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct MojoCreateSharedBufferOptionsFlags: u32 {
        const NONE = 0;
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct MojoDuplicateBufferHandleOptionsFlags: u32 {
        const NONE = 0;
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MojoMapBufferFlags: u32 {
        const NONE = 0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagePipeOptions {
    pub flags: MojoCreateMessagePipeOptionsFlags,
}

/// Data pipe sizing. A zero capacity selects the core's default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataPipeOptions {
    pub flags: MojoCreateDataPipeOptionsFlags,
    pub element_num_bytes: u32,
    pub capacity_num_bytes: u32,
}

impl Default for DataPipeOptions {
    fn default() -> Self {
        Self {
            flags: MojoCreateDataPipeOptionsFlags::NONE,
            element_num_bytes: 1,
            capacity_num_bytes: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SharedBufferOptions {
    pub flags: MojoCreateSharedBufferOptionsFlags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DuplicateBufferHandleOptions {
    pub flags: MojoDuplicateBufferHandleOptionsFlags,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_bits_are_independent() {
        let both = MojoHandleSignals::READABLE | MojoHandleSignals::PEER_CLOSED;
        assert_eq!(both.bits(), 0b101);
        assert!(both.contains(MojoHandleSignals::READABLE));
        assert!(!both.contains(MojoHandleSignals::WRITABLE));
    }

    #[test]
    fn test_signals_state_queries() {
        let state = SignalsState::new(
            MojoHandleSignals::WRITABLE,
            MojoHandleSignals::READABLE | MojoHandleSignals::WRITABLE,
        );
        assert!(state.is_satisfied(MojoHandleSignals::WRITABLE));
        assert!(!state.is_satisfied(MojoHandleSignals::READABLE));
        assert!(state.is_unsatisfiable(MojoHandleSignals::PEER_CLOSED));
    }

    #[test]
    fn test_data_pipe_options_defaults_from_json() {
        let opts: DataPipeOptions = serde_json::from_str(r#"{"capacity_num_bytes": 64}"#).unwrap();
        assert_eq!(opts.element_num_bytes, 1);
        assert_eq!(opts.capacity_num_bytes, 64);
        assert_eq!(opts.flags, MojoCreateDataPipeOptionsFlags::NONE);
    }
}
