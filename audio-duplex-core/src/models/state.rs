/// Device session state machine.
///
/// State transitions:
/// ```text
/// idle → activating → initializing → running
///                                       ↓
///                  stop_requested → stopping → stopped → (start again)
/// any step → faulted (activation/format failure; inert until a fresh start)
/// ```
///
/// Only the session machine mutates this; pipelines request transitions and
/// observe the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Activating,
    Initializing,
    Running,
    StopRequested,
    Stopping,
    Stopped,
    Faulted,
}

impl SessionState {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// True while the asynchronous start path is still in flight.
    pub fn is_starting(&self) -> bool {
        matches!(self, Self::Activating | Self::Initializing)
    }

    pub fn is_stopping(&self) -> bool {
        matches!(self, Self::StopRequested | Self::Stopping)
    }

    /// States from which a `start()` may launch a new activation.
    pub fn can_start(&self) -> bool {
        matches!(self, Self::Idle | Self::Stopped | Self::Faulted)
    }
}
