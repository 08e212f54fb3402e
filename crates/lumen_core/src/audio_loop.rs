//! Audio Loop
//!
//! Body of the `lumen-audio` thread: pulls mono frames from the capture
//! stream, runs them through the analyzer and publishes each snapshot with a
//! single atomic swap. Any capture failure disables audio instead of
//! stopping the engine.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use crossbeam_channel::Sender;
use tracing::{debug, info, warn};

use crate::config::CaptureConfig;
use crate::message::Event;
use crate::stream::{CaptureBackend, CaptureFault, SharedAudioSettings};
use lumen_dsp::{AudioSnapshot, SpectralAnalyzer};

/// Wait between polls while the ring holds less than a frame
const IDLE_WAIT: Duration = Duration::from_millis(2);

pub(crate) struct AudioLoop {
    pub backend: Arc<dyn CaptureBackend>,
    pub config: CaptureConfig,
    pub agc_target: f32,
    pub settings: Arc<SharedAudioSettings>,
    pub feed: Arc<ArcSwap<AudioSnapshot>>,
    pub events: Sender<Event>,
}

impl AudioLoop {
    pub fn run(self, stop: Arc<AtomicBool>) {
        let mut stream = match self.backend.open(&self.config) {
            Ok(stream) => stream,
            Err(e) => return self.disable(e.to_string(), 1.0),
        };

        let mut analyzer = match SpectralAnalyzer::with_target(
            stream.sample_rate() as f32,
            self.config.frame_size,
            self.agc_target,
        ) {
            Ok(analyzer) => analyzer,
            Err(e) => return self.disable(e.to_string(), 1.0),
        };
        analyzer.set_settings(self.settings.load());

        info!(
            device = stream.device_name(),
            sample_rate = stream.sample_rate(),
            frame_size = self.config.frame_size,
            "Audio loop started"
        );
        let _ = self.events.send(Event::AudioStarted {
            device: stream.device_name().to_string(),
        });

        let mut frame = vec![0.0_f32; self.config.frame_size];
        let started = Instant::now();

        while !stop.load(Ordering::SeqCst) {
            match stream.read_frame(&mut frame) {
                Ok(true) => {
                    analyzer.set_settings(self.settings.load());
                    match analyzer.process_frame(&frame, started.elapsed()) {
                        Ok(snapshot) => self.feed.store(Arc::new(snapshot)),
                        Err(e) => debug!("Frame skipped: {}", e),
                    }
                }
                Ok(false) => thread::sleep(IDLE_WAIT),
                Err(CaptureFault::Transient(reason)) => debug!("Capture fault, frame skipped: {}", reason),
                Err(CaptureFault::DeviceLost(reason)) => return self.disable(reason, analyzer.agc_gain()),
            }
        }

        self.feed
            .store(Arc::new(AudioSnapshot::disabled(analyzer.agc_gain(), None)));
        let _ = self.events.send(Event::AudioStopped);
        info!("Audio loop stopped");
    }

    fn disable(&self, reason: String, agc_gain: f32) {
        warn!("Audio disabled: {}", reason);
        self.feed
            .store(Arc::new(AudioSnapshot::disabled(agc_gain, Some(reason.clone()))));
        let _ = self.events.send(Event::AudioDisabled { reason });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EngineError, EngineResult};
    use crate::stream::CaptureStream;
    use crate::worker::Worker;
    use crossbeam_channel::Receiver;
    use lumen_dsp::AnalyzerSettings;
    use std::f32::consts::TAU;

    struct MissingDevice;

    impl CaptureBackend for MissingDevice {
        fn open(&self, _config: &CaptureConfig) -> EngineResult<Box<dyn CaptureStream>> {
            Err(EngineError::NoDevicesFound)
        }
    }

    /// Endless 220 Hz tone, optionally lost after `frames_until_lost`
    struct ToneBackend {
        frames_until_lost: Option<usize>,
    }

    struct ToneStream {
        phase: f32,
        remaining: Option<usize>,
    }

    impl CaptureBackend for ToneBackend {
        fn open(&self, _config: &CaptureConfig) -> EngineResult<Box<dyn CaptureStream>> {
            Ok(Box::new(ToneStream {
                phase: 0.0,
                remaining: self.frames_until_lost,
            }))
        }
    }

    impl CaptureStream for ToneStream {
        fn device_name(&self) -> &str {
            "Test Tone"
        }

        fn sample_rate(&self) -> u32 {
            44100
        }

        fn read_frame(&mut self, frame: &mut [f32]) -> Result<bool, CaptureFault> {
            if let Some(remaining) = self.remaining.as_mut() {
                if *remaining == 0 {
                    return Err(CaptureFault::DeviceLost("unplugged".into()));
                }
                *remaining -= 1;
            }
            thread::sleep(Duration::from_millis(1));
            for sample in frame.iter_mut() {
                *sample = 0.5 * self.phase.sin();
                self.phase = (self.phase + TAU * 220.0 / 44100.0) % TAU;
            }
            Ok(true)
        }
    }

    fn setup(
        backend: Arc<dyn CaptureBackend>,
        settings: AnalyzerSettings,
    ) -> (AudioLoop, Arc<ArcSwap<AudioSnapshot>>, Receiver<Event>) {
        let feed = Arc::new(ArcSwap::from_pointee(AudioSnapshot::disabled(1.0, None)));
        let (tx, rx) = crossbeam_channel::unbounded();
        let audio = AudioLoop {
            backend,
            config: CaptureConfig::default(),
            agc_target: lumen_dsp::AGC_DEFAULT_TARGET,
            settings: Arc::new(SharedAudioSettings::new(settings)),
            feed: Arc::clone(&feed),
            events: tx,
        };
        (audio, feed, rx)
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
    fn test_missing_device_disables_audio() {
        let (audio, feed, rx) = setup(Arc::new(MissingDevice), AnalyzerSettings::default());
        audio.run(Arc::new(AtomicBool::new(false)));

        let snapshot = feed.load_full();
        assert!(!snapshot.enabled);
        assert!(snapshot.error.as_deref().unwrap_or("").contains("No audio devices"));
        assert!(snapshot.is_well_formed());
        assert!(matches!(rx.try_recv(), Ok(Event::AudioDisabled { .. })));
    }

    #[test]
    fn test_tone_is_published_then_stop_disables() {
        let (audio, feed, rx) = setup(
            Arc::new(ToneBackend { frames_until_lost: None }),
            AnalyzerSettings::default(),
        );
        let worker = Worker::spawn("test-audio", move |stop| audio.run(stop)).unwrap();

        assert!(wait_for(|| {
            let snapshot = feed.load_full();
            snapshot.enabled && snapshot.vol > 0.0
        }));
        let live = feed.load_full();
        assert!(live.is_well_formed());
        assert!(live.rms > 0.0);

        assert!(worker.stop(Duration::from_secs(1)));
        let stopped = feed.load_full();
        assert!(!stopped.enabled);
        assert!(stopped.error.is_none());

        let events: Vec<Event> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                Event::AudioStarted {
                    device: "Test Tone".into()
                },
                Event::AudioStopped
            ]
        );
    }

    #[test]
    fn test_device_loss_disables_audio() {
        let (audio, feed, rx) = setup(
            Arc::new(ToneBackend {
                frames_until_lost: Some(5),
            }),
            AnalyzerSettings::default(),
        );
        audio.run(Arc::new(AtomicBool::new(false)));

        let snapshot = feed.load_full();
        assert!(!snapshot.enabled);
        assert_eq!(snapshot.error.as_deref(), Some("unplugged"));
        let events: Vec<Event> = rx.try_iter().collect();
        assert_eq!(
            events.last(),
            Some(&Event::AudioDisabled {
                reason: "unplugged".into()
            })
        );
    }

    #[test]
    fn test_disabled_settings_publish_silence() {
        let settings = AnalyzerSettings {
            enabled: false,
            ..AnalyzerSettings::default()
        };
        let (audio, feed, _rx) = setup(Arc::new(ToneBackend { frames_until_lost: None }), settings);
        let worker = Worker::spawn("test-audio-off", move |stop| audio.run(stop)).unwrap();

        // The AGC keeps running, so a moving gain shows the analyzer published
        assert!(wait_for(|| feed.load().agc_gain != 1.0));
        let snapshot = feed.load_full();
        assert!(!snapshot.enabled);
        assert!(snapshot.error.is_none());
        assert_eq!(snapshot.bands, [0.0; lumen_dsp::BAND_COUNT]);
        assert!(!snapshot.beat);

        assert!(worker.stop(Duration::from_secs(1)));
    }
}
