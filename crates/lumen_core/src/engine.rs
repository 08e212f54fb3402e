//! LED Engine - Main Entry Point
//!
//! `LedEngine` owns the shared state and the two worker threads, and is the
//! control surface used by the daemon (or any other front end).
//!
//! ```text
//!   control calls ──► EngineState (Mutex) ──clone per tick──► render loop ──► StripSink
//!                      SharedAudioSettings (mutex) ──► audio loop
//!   audio loop ──► ArcSwap<AudioSnapshot> ──load per tick──► render loop
//!   both loops ──► Event channel ──► poll_event / wait_event
//! ```

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::info;

use crate::audio_loop::AudioLoop;
use crate::config::EngineConfig;
use crate::device::AudioDevice;
use crate::effects::{EffectInfo, EffectRegistry};
use crate::error::{EngineError, EngineResult};
use crate::message::Event;
use crate::render_loop::RenderLoop;
use crate::state::{EngineSnapshot, EngineState, Segment, StatePatch};
use crate::stream::{CaptureBackend, CpalBackend, SharedAudioSettings};
use crate::worker::Worker;
use lumen_dsp::{AnalyzerSettings, AudioSettingsPatch, AudioSnapshot};
use lumen_strip::{Rgb, StripSink};

const RENDER_THREAD: &str = "lumen-render";
const AUDIO_THREAD: &str = "lumen-audio";

/// The LED engine controller
pub struct LedEngine {
    config: EngineConfig,
    state: Arc<Mutex<EngineState>>,
    registry: Arc<ArcSwap<EffectRegistry>>,
    sink: Arc<Mutex<Box<dyn StripSink>>>,
    audio_feed: Arc<ArcSwap<AudioSnapshot>>,
    preview: Arc<ArcSwap<Vec<Rgb>>>,
    audio_settings: Arc<SharedAudioSettings>,
    backend: Arc<dyn CaptureBackend>,
    render_worker: Mutex<Option<Worker>>,
    audio_worker: Mutex<Option<Worker>>,
    event_sender: Sender<Event>,
    event_receiver: Receiver<Event>,
}

impl LedEngine {
    /// Create an engine driving `sink`, capturing from the configured cpal
    /// input. Fails if the configuration is invalid or the strip cannot be
    /// initialized.
    pub fn new(config: EngineConfig, sink: Box<dyn StripSink>) -> EngineResult<Self> {
        Self::with_backend(config, sink, Arc::new(CpalBackend))
    }

    /// Create an engine with a custom capture backend
    pub fn with_backend(
        config: EngineConfig,
        mut sink: Box<dyn StripSink>,
        backend: Arc<dyn CaptureBackend>,
    ) -> EngineResult<Self> {
        config.validate().map_err(EngineError::ConfigError)?;
        sink.begin()?;
        info!(strip = sink.name(), pixels = sink.pixel_count(), "Strip initialized");

        let (event_sender, event_receiver) = unbounded();

        Ok(Self {
            state: Arc::new(Mutex::new(config.initial_state())),
            registry: Arc::new(ArcSwap::from_pointee(EffectRegistry::builtin())),
            sink: Arc::new(Mutex::new(sink)),
            audio_feed: Arc::new(ArcSwap::from_pointee(AudioSnapshot::disabled(1.0, None))),
            preview: Arc::new(ArcSwap::from_pointee(Vec::new())),
            audio_settings: Arc::new(SharedAudioSettings::new(config.analyzer)),
            backend,
            render_worker: Mutex::new(None),
            audio_worker: Mutex::new(None),
            event_sender,
            event_receiver,
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Merge a partial update into the state and return the result
    pub fn update_state(&self, patch: StatePatch) -> EngineState {
        let mut state = self.state.lock();
        state.apply(patch);
        state.clone()
    }

    /// Replace the segment layout. Effect instances are rebuilt.
    pub fn set_segments(&self, segments: Vec<Segment>) -> Vec<Segment> {
        self.state.lock().set_segments(segments).to_vec()
    }

    /// Current state with the last rendered frame
    pub fn snapshot(&self) -> EngineSnapshot {
        let state = self.state.lock().clone();
        EngineSnapshot {
            params: state.effect_params.clone(),
            state,
            frame_preview: self.preview.load().to_vec(),
        }
    }

    /// Merge a partial update into the analyzer settings. Takes effect on the
    /// next analysis frame.
    pub fn update_audio_settings(&self, patch: AudioSettingsPatch) -> AnalyzerSettings {
        self.audio_settings.update(&patch)
    }

    pub fn audio_settings(&self) -> AnalyzerSettings {
        self.audio_settings.load()
    }

    pub fn list_effects(&self) -> Vec<EffectInfo> {
        self.registry.load().list()
    }

    /// Replace the effect registry. Segments using a replaced entry get a
    /// fresh instance on the next tick.
    pub fn set_registry(&self, registry: EffectRegistry) {
        self.registry.store(Arc::new(registry));
    }

    /// Latest published audio features
    pub fn audio_snapshot(&self) -> Arc<AudioSnapshot> {
        self.audio_feed.load_full()
    }

    /// Last rendered frame
    pub fn frame_preview(&self) -> Arc<Vec<Rgb>> {
        self.preview.load_full()
    }

    /// Get all capture devices
    pub fn list_devices(&self) -> EngineResult<Vec<AudioDevice>> {
        AudioDevice::enumerate_inputs()
    }

    /// Start rendering, and audio capture if enabled in the config
    pub fn start(&self) -> EngineResult<()> {
        self.start_render()?;
        if self.config.audio_enabled {
            self.start_audio()?;
        }
        Ok(())
    }

    /// Stop both loops
    pub fn stop(&self) {
        self.stop_audio();
        self.stop_render();
    }

    /// Start the render loop. No-op while it is running.
    pub fn start_render(&self) -> EngineResult<()> {
        let mut slot = self.render_worker.lock();
        if !Self::reap(&mut slot, self.config.join_timeout()) {
            return Ok(());
        }

        let render = RenderLoop {
            state: Arc::clone(&self.state),
            registry: Arc::clone(&self.registry),
            sink: Arc::clone(&self.sink),
            audio: Arc::clone(&self.audio_feed),
            preview: Arc::clone(&self.preview),
            events: self.event_sender.clone(),
        };
        *slot = Some(Worker::spawn(RENDER_THREAD, move |stop| render.run(stop))?);
        Ok(())
    }

    pub fn stop_render(&self) {
        if let Some(worker) = self.render_worker.lock().take() {
            worker.stop(self.config.join_timeout());
        }
    }

    /// Start audio capture and analysis. No-op while it is running. A
    /// missing device is not an error: audio is published disabled.
    pub fn start_audio(&self) -> EngineResult<()> {
        let mut slot = self.audio_worker.lock();
        if !Self::reap(&mut slot, self.config.join_timeout()) {
            return Ok(());
        }

        let audio = AudioLoop {
            backend: Arc::clone(&self.backend),
            config: self.config.capture.clone(),
            agc_target: self.config.agc_target,
            settings: Arc::clone(&self.audio_settings),
            feed: Arc::clone(&self.audio_feed),
            events: self.event_sender.clone(),
        };
        *slot = Some(Worker::spawn(AUDIO_THREAD, move |stop| audio.run(stop))?);
        Ok(())
    }

    pub fn stop_audio(&self) {
        if let Some(worker) = self.audio_worker.lock().take() {
            worker.stop(self.config.join_timeout());
        }
    }

    pub fn is_rendering(&self) -> bool {
        self.render_worker.lock().as_ref().is_some_and(Worker::is_running)
    }

    /// Whether the audio thread is alive (it exits when capture is disabled)
    pub fn is_capturing(&self) -> bool {
        self.audio_worker.lock().as_ref().is_some_and(Worker::is_running)
    }

    /// Get next event (non-blocking)
    pub fn poll_event(&self) -> Option<Event> {
        self.event_receiver.try_recv().ok()
    }

    /// Get next event, waiting up to `timeout`
    pub fn wait_event(&self, timeout: Duration) -> Option<Event> {
        self.event_receiver.recv_timeout(timeout).ok()
    }

    /// Clear a slot whose worker has exited. Returns false if the worker is
    /// still running.
    fn reap(slot: &mut Option<Worker>, timeout: Duration) -> bool {
        match slot.take() {
            Some(worker) if worker.is_running() => {
                *slot = Some(worker);
                false
            }
            Some(worker) => {
                worker.stop(timeout);
                true
            }
            None => true,
        }
    }
}

impl Drop for LedEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CaptureConfig;
    use crate::effects::{params, Effect, EffectContext, EffectDescriptor, EffectError};
    use crate::state::{LiveParams, Params};
    use crate::stream::CaptureStream;
    use lumen_strip::{MemoryStrip, MemoryStripHandle};
    use serde_json::json;
    use std::thread;

    struct MissingDevice;

    impl CaptureBackend for MissingDevice {
        fn open(&self, _config: &CaptureConfig) -> EngineResult<Box<dyn CaptureStream>> {
            Err(EngineError::DeviceNotFound("Test Mic".into()))
        }
    }

    fn engine(pixels: usize, audio_enabled: bool) -> (LedEngine, MemoryStripHandle) {
        let strip = MemoryStrip::new(pixels);
        let handle = strip.handle();
        let mut config = EngineConfig {
            audio_enabled,
            ..EngineConfig::default()
        };
        config.strip.led_count = pixels;
        config.strip.fake = true;
        let engine = LedEngine::with_backend(config, Box::new(strip), Arc::new(MissingDevice)).unwrap();
        (engine, handle)
    }

    fn neutral(engine: &LedEngine, effect: &str, color: [u8; 3]) {
        engine.update_state(StatePatch {
            brightness: Some(255.0),
            effect: Some(effect.into()),
            fps: Some(240.0),
            effect_params: Some(params(json!({ "color": color }))),
            live: Some(crate::state::LivePatch {
                frame_blend: Some(0.0),
                dither: Some(false),
                ..Default::default()
            }),
            ..Default::default()
        });
    }

    fn wait_for(mut done: impl FnMut() -> bool) -> bool {
        for _ in 0..400 {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = EngineConfig::default();
        config.capture.frame_size = 1000;
        let result = LedEngine::new(config, Box::new(MemoryStrip::new(4)));
        assert!(matches!(result, Err(EngineError::ConfigError(_))));
    }

    #[test]
    fn test_engine_not_running_initially() {
        let (engine, _) = engine(8, false);
        assert!(!engine.is_rendering());
        assert!(!engine.is_capturing());
        assert!(!engine.audio_snapshot().enabled);
        assert!(engine.frame_preview().is_empty());
    }

    #[test]
    fn test_update_state_and_snapshot() {
        let (engine, _) = engine(8, false);
        let state = engine.update_state(StatePatch {
            brightness: Some(999.0),
            params: Some(params(json!({ "speed": 2.0 }))),
            ..Default::default()
        });
        assert_eq!(state.brightness, 255);

        let snapshot = engine.snapshot();
        assert_eq!(snapshot.params["speed"], json!(2.0));
        assert_eq!(snapshot.state.effect_params, snapshot.params);

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["brightness"], json!(255));
        assert!(json["frame_preview"].is_array());
    }

    #[test]
    fn test_audio_settings_patch() {
        let (engine, _) = engine(8, false);
        let settings = engine.update_audio_settings(AudioSettingsPatch {
            gain: Some(1000.0),
            enabled: Some(false),
            ..Default::default()
        });
        assert_eq!(settings.gain, 100.0);
        assert!(!settings.enabled);
        assert_eq!(engine.audio_settings(), settings);
        assert_eq!(settings.smoothing, AnalyzerSettings::default().smoothing);
    }

    #[test]
    fn test_list_effects() {
        let (engine, _) = engine(8, false);
        let effects = engine.list_effects();
        assert_eq!(effects.len(), 17);
        assert!(effects.iter().any(|e| e.id == "beat_wave" && e.category == "music"));
    }

    #[test]
    fn test_start_stop_render() {
        let (engine, strip) = engine(6, false);
        neutral(&engine, "solid", [0, 0, 255]);

        engine.start().unwrap();
        assert!(engine.is_rendering());
        // Second start is a no-op
        engine.start_render().unwrap();
        assert_eq!(engine.wait_event(Duration::from_secs(1)), Some(Event::RenderStarted));

        assert!(wait_for(|| strip.pixels() == vec![Rgb(0, 0, 255); 6]));
        assert_eq!(engine.frame_preview().len(), 6);

        engine.stop();
        assert!(!engine.is_rendering());
        let shows = strip.show_count();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(strip.show_count(), shows);

        let events: Vec<Event> = std::iter::from_fn(|| engine.poll_event()).collect();
        assert_eq!(events, vec![Event::RenderStopped]);
    }

    #[test]
    fn test_missing_audio_device_is_not_fatal() {
        let (engine, strip) = engine(4, true);
        engine.start().unwrap();

        assert!(wait_for(|| engine.audio_snapshot().error.is_some()));
        let audio = engine.audio_snapshot();
        assert!(!audio.enabled);
        assert!(audio.error.as_deref().unwrap_or("").contains("Test Mic"));
        assert!(audio.is_well_formed());

        // Rendering continues without audio
        let before = strip.show_count();
        assert!(wait_for(|| strip.show_count() > before + 2));
        assert!(engine.is_rendering());
        assert!(wait_for(|| !engine.is_capturing()));

        let disabled = std::iter::from_fn(|| engine.poll_event())
            .any(|e| matches!(e, Event::AudioDisabled { .. }));
        assert!(disabled);

        // Restart after the audio thread gave up
        engine.start_audio().unwrap();
        assert_eq!(
            engine.wait_event(Duration::from_secs(1)),
            Some(Event::AudioDisabled {
                reason: "Device not found: Test Mic".into()
            })
        );
    }

    #[test]
    fn test_segments_shape_the_frame() {
        let (engine, strip) = engine(10, false);
        neutral(&engine, "solid", [255, 0, 0]);
        let segments = engine.set_segments(vec![
            Segment::new("left", 0, 3),
            Segment::new("right", 6, 9).with_params(params(json!({ "color": [0, 255, 0] }))),
        ]);
        assert_eq!(segments.len(), 2);

        engine.start_render().unwrap();
        let expected: Vec<Rgb> = (0..10)
            .map(|i| match i {
                0..=3 => Rgb(255, 0, 0),
                6..=9 => Rgb(0, 255, 0),
                _ => Rgb::BLACK,
            })
            .collect();
        assert!(wait_for(|| strip.pixels() == expected));

        // Turning off blanks the strip
        engine.update_state(StatePatch {
            on: Some(false),
            ..Default::default()
        });
        assert!(wait_for(|| strip.pixels().iter().all(|c| c.is_black())));
        engine.stop();
    }

    #[test]
    fn test_set_registry_swaps_effects() {
        struct Amber;
        impl Effect for Amber {
            fn render(&mut self, ctx: &EffectContext<'_>) -> Result<Vec<Rgb>, EffectError> {
                Ok(vec![Rgb(255, 191, 0); ctx.length])
            }
        }

        let (engine, strip) = engine(3, false);
        neutral(&engine, "solid", [0, 0, 0]);
        engine.start_render().unwrap();

        let mut registry = EffectRegistry::builtin();
        registry.register(EffectDescriptor::new("solid", "Amber", "test", "", Params::new, || {
            Box::new(Amber)
        }));
        engine.set_registry(registry);

        assert!(wait_for(|| strip.pixels() == vec![Rgb(255, 191, 0); 3]));
        assert_eq!(engine.list_effects()[0].label, "Amber");
        engine.stop();
    }

    #[test]
    fn test_drop_stops_threads() {
        let (engine, strip) = engine(3, false);
        engine.start().unwrap();
        assert!(wait_for(|| strip.show_count() > 0));
        drop(engine);
        let shows = strip.show_count();
        thread::sleep(Duration::from_millis(30));
        assert_eq!(strip.show_count(), shows);
    }

    #[test]
    #[ignore = "requires audio hardware"]
    fn test_microphone_capture() {
        let strip = MemoryStrip::new(30);
        let engine = LedEngine::new(EngineConfig::default(), Box::new(strip)).unwrap();
        engine.start().unwrap();
        thread::sleep(Duration::from_millis(500));
        assert!(engine.is_capturing());
        assert!(engine.audio_snapshot().enabled);
        engine.stop();
        assert!(!engine.audio_snapshot().enabled);
    }

    #[test]
    fn test_live_params_reach_render() {
        let (engine, strip) = engine(4, false);
        neutral(&engine, "solid", [100, 100, 100]);
        engine.update_state(StatePatch {
            live: Some(crate::state::LivePatch {
                gamma: Some(LiveParams::default().gamma + 1.0),
                ..Default::default()
            }),
            ..Default::default()
        });
        engine.start_render().unwrap();
        assert!(wait_for(|| strip.show_count() > 0));
        assert!(strip.pixels()[0].0 > 100);
        engine.stop();
    }
}
