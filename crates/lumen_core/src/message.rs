//! Engine Events
//!
//! Events flow from the audio and render threads to whoever drives the
//! engine (the daemon, a control surface).

use serde::{Deserialize, Serialize};

/// Events sent from the engine's worker threads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Event {
    /// Render loop started
    RenderStarted,

    /// Render loop stopped
    RenderStopped,

    /// Audio capture opened and analysis running
    AudioStarted { device: String },

    /// Audio capture stopped on request
    AudioStopped,

    /// Audio capture unavailable; snapshots are published disabled
    AudioDisabled { reason: String },

    /// An effect instance failed to render (reported once per instance)
    EffectFault { key: String, message: String },

    /// The strip rejected a frame
    SinkError { message: String },
}

impl Event {
    /// Create a sink error event from any error type
    pub fn sink_error<E: std::fmt::Display>(err: E) -> Self {
        Event::SinkError {
            message: err.to_string(),
        }
    }
}
