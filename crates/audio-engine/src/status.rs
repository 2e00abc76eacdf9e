use std::sync::atomic::{AtomicU8, Ordering};

use serde::Serialize;

/// Lifecycle of the engine's output stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Uninitialized,
    /// A stream is open but not (yet) started.
    StreamOpen,
    Running,
    /// The device reported a disconnect; a restart is about to run.
    ErrorDisconnected,
    Restarting,
    /// Shut down, or left without a stream after a failed open/restart.
    Closed,
}

impl EngineState {
    fn as_u8(self) -> u8 {
        match self {
            Self::Uninitialized => 0,
            Self::StreamOpen => 1,
            Self::Running => 2,
            Self::ErrorDisconnected => 3,
            Self::Restarting => 4,
            Self::Closed => 5,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::StreamOpen,
            2 => Self::Running,
            3 => Self::ErrorDisconnected,
            4 => Self::Restarting,
            5 => Self::Closed,
            _ => Self::Uninitialized,
        }
    }
}

/// Lock-free cell holding the current [`EngineState`].
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new(state: EngineState) -> Self {
        Self(AtomicU8::new(state.as_u8()))
    }

    pub(crate) fn get(&self) -> EngineState {
        EngineState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, state: EngineState) {
        let prev = EngineState::from_u8(self.0.swap(state.as_u8(), Ordering::AcqRel));
        if prev != state {
            tracing::debug!(from = ?prev, to = ?state, "engine state");
        }
    }
}

/// Point-in-time view of the engine, suitable for logs and JSON output.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EngineStatus {
    pub state: EngineState,
    pub playing: bool,
    /// Frames in the installed buffer; `None` when nothing is installed or the lock was busy.
    pub total_frames: Option<usize>,
    pub read_frame_index: Option<usize>,
    pub frames_per_burst: Option<u32>,
    pub buffer_size_frames: Option<u32>,
    /// Callback invocations skipped because a buffer swap held the lock.
    pub skipped_callbacks: u64,
    pub restarts_performed: u64,
    pub restarts_skipped: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_cell_roundtrips_every_state() {
        let cell = StateCell::new(EngineState::Uninitialized);
        for state in [
            EngineState::StreamOpen,
            EngineState::Running,
            EngineState::ErrorDisconnected,
            EngineState::Restarting,
            EngineState::Closed,
            EngineState::Uninitialized,
        ] {
            cell.set(state);
            assert_eq!(cell.get(), state);
        }
    }

    #[test]
    fn status_serializes_snake_case_state() {
        let status = EngineStatus {
            state: EngineState::ErrorDisconnected,
            playing: true,
            total_frames: Some(10),
            read_frame_index: Some(4),
            frames_per_burst: Some(192),
            buffer_size_frames: Some(192),
            skipped_callbacks: 1,
            restarts_performed: 2,
            restarts_skipped: 3,
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "error_disconnected");
        assert_eq!(json["playing"], true);
        assert_eq!(json["frames_per_burst"], 192);
        assert_eq!(json["restarts_skipped"], 3);
    }
}
