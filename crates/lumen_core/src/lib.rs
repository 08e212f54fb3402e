//! Lumen Core - LED Engine
//!
//! This crate turns microphone audio into frames on an addressable LED strip:
//! - Audio capture via CPAL, analysis on a dedicated thread
//! - Effect registry with procedural, particle and audio-reactive effects
//! - Segment compositor with per-instance fault isolation and post filters
//! - Paced render loop pushing frames to a [`lumen_strip::StripSink`]
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Control Surface                        │
//! │   (daemon / UI) ──update_state──▶ LedEngine ◀──events──     │
//! └─────────────────────────────────────────────────────────────┘
//!          │ Mutex<EngineState>            │ Mutex<AnalyzerSettings>
//!          ▼                               ▼
//! ┌──────────────────────┐      ┌──────────────────────────────┐
//! │    Render Thread     │      │         Audio Thread          │
//! │  Compositor ─▶ Post  │◀─────│ cpal ──rtrb──▶ SpectralAnalyzer│
//! │        │             │ArcSwap                                │
//! │        ▼             │      └──────────────────────────────┘
//! │     StripSink        │
//! └──────────────────────┘
//! ```

mod audio_loop;
mod compositor;
mod config;
mod device;
pub mod effects;
mod engine;
mod error;
mod message;
mod post;
mod render_loop;
mod state;
mod stream;
mod worker;

pub use compositor::Compositor;
pub use config::{CaptureConfig, EngineConfig};
pub use device::AudioDevice;
pub use effects::{Effect, EffectContext, EffectDescriptor, EffectError, EffectInfo, EffectRegistry};
pub use engine::LedEngine;
pub use error::{EngineError, EngineResult};
pub use message::Event;
pub use post::PostFilter;
pub use state::{
    Direction, EngineSnapshot, EngineState, LivePatch, LiveParams, Params, Segment, StatePatch,
};
pub use stream::{CaptureBackend, CaptureFault, CaptureStream, CpalBackend, SharedAudioSettings};

// Re-export analysis and strip types for convenience
pub use lumen_dsp::{AnalyzerSettings, AudioSettingsPatch, AudioSnapshot};
pub use lumen_strip::{Rgb, StripConfig, StripSink};
