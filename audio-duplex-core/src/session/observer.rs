use crate::models::error::AudioError;
use crate::models::state::SessionState;

/// Observational callbacks from a device session and its pipelines.
///
/// All methods fire on audio worker threads, never the caller's thread;
/// implementations marshal to a UI thread themselves if they need one.
/// Everything is informational — there is no back-pressure through this
/// trait.
pub trait SessionObserver: Send + Sync {
    /// The session machine moved to a new state.
    fn on_state_changed(&self, _state: SessionState) {}

    /// Roughly once a second: mean absolute amplitude of drained audio.
    fn on_level(&self, _volume: f32) {}

    /// A fatal session error; the machine is now `Faulted`.
    fn on_fault(&self, _error: &AudioError) {}
}

/// Observer that ignores everything.
pub struct NullObserver;

impl SessionObserver for NullObserver {}
