//! Render Loop
//!
//! Body of the `lumen-render` thread. Each tick clones the engine state
//! under its lock, renders outside it, publishes a preview and pushes the
//! frame to the strip, then sleeps out the rest of the frame period.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::compositor::Compositor;
use crate::effects::EffectRegistry;
use crate::message::Event;
use crate::state::EngineState;
use lumen_dsp::AudioSnapshot;
use lumen_strip::{Rgb, StripError, StripSink};

pub(crate) struct RenderLoop {
    pub state: Arc<Mutex<EngineState>>,
    pub registry: Arc<ArcSwap<EffectRegistry>>,
    pub sink: Arc<Mutex<Box<dyn StripSink>>>,
    pub audio: Arc<ArcSwap<AudioSnapshot>>,
    pub preview: Arc<ArcSwap<Vec<Rgb>>>,
    pub events: Sender<Event>,
}

impl RenderLoop {
    pub fn run(self, stop: Arc<AtomicBool>) {
        info!("Render loop started");
        let _ = self.events.send(Event::RenderStarted);

        let mut compositor = Compositor::new(self.registry.load_full()).with_events(self.events.clone());
        let mut last = Instant::now();
        let mut failing = false;

        while !stop.load(Ordering::SeqCst) {
            let tick = Instant::now();
            let dt = tick.duration_since(last).as_secs_f32();
            last = tick;

            let state = self.state.lock().clone();
            let audio = self.audio.load_full();
            compositor.set_registry(self.registry.load_full());

            let pixel_count = self.sink.lock().pixel_count();
            let frame = Arc::new(compositor.render(&state, &audio, dt, pixel_count));
            self.preview.store(Arc::clone(&frame));

            // No sink writes once stop has been requested
            if stop.load(Ordering::SeqCst) {
                break;
            }

            let result = push_frame(self.sink.lock().as_mut(), &frame);
            match result {
                Ok(()) if failing => {
                    info!("Strip accepted frames again");
                    failing = false;
                }
                Ok(()) => {}
                Err(e) => {
                    if !failing {
                        warn!("Strip show failed: {}", e);
                        let _ = self.events.send(Event::sink_error(&e));
                    }
                    failing = true;
                }
            }

            let period = Duration::from_secs_f32(1.0 / EngineState::clamp_fps(state.fps));
            if let Some(rest) = period.checked_sub(tick.elapsed()) {
                thread::sleep(rest);
            }
        }

        let _ = self.events.send(Event::RenderStopped);
        info!("Render loop stopped");
    }
}

/// Write `frame` to the strip, blank everything past it, latch
fn push_frame(sink: &mut dyn StripSink, frame: &[Rgb]) -> Result<(), StripError> {
    for (i, &color) in frame.iter().enumerate() {
        sink.set_pixel(i, color);
    }
    for i in frame.len()..sink.pixel_count() {
        sink.set_pixel(i, Rgb::BLACK);
    }
    sink.show()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::Worker;
    use crossbeam_channel::Receiver;
    use lumen_strip::{MemoryStrip, MemoryStripHandle};

    fn setup(
        state: EngineState,
        pixels: usize,
    ) -> (RenderLoop, MemoryStripHandle, Arc<ArcSwap<Vec<Rgb>>>, Receiver<Event>) {
        let strip = MemoryStrip::new(pixels);
        let handle = strip.handle();
        let sink: Box<dyn StripSink> = Box::new(strip);
        let preview = Arc::new(ArcSwap::from_pointee(Vec::new()));
        let (tx, rx) = crossbeam_channel::unbounded();
        let render = RenderLoop {
            state: Arc::new(Mutex::new(state)),
            registry: Arc::new(ArcSwap::from_pointee(EffectRegistry::builtin())),
            sink: Arc::new(Mutex::new(sink)),
            audio: Arc::new(ArcSwap::from_pointee(AudioSnapshot::disabled(1.0, None))),
            preview: Arc::clone(&preview),
            events: tx,
        };
        (render, handle, preview, rx)
    }

    fn white_state(max_leds: usize) -> EngineState {
        EngineState {
            brightness: 255,
            effect: "solid".into(),
            fps: 240.0,
            max_leds,
            live: crate::state::LiveParams::neutral(),
            ..EngineState::default()
        }
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
    fn test_push_frame_blanks_tail() {
        let mut strip = MemoryStrip::new(5);
        let handle = strip.handle();
        push_frame(&mut strip, &[Rgb::WHITE, Rgb::WHITE]).unwrap();
        assert_eq!(
            handle.pixels(),
            vec![Rgb::WHITE, Rgb::WHITE, Rgb::BLACK, Rgb::BLACK, Rgb::BLACK]
        );
        assert_eq!(handle.show_count(), 1);
    }

    #[test]
    fn test_loop_drives_strip_until_stopped() {
        let (render, handle, preview, rx) = setup(white_state(4), 6);
        let worker = Worker::spawn("test-render", move |stop| render.run(stop)).unwrap();

        assert!(wait_for(|| handle.show_count() >= 3));
        assert_eq!(handle.pixels()[..4], [Rgb::WHITE; 4]);
        assert_eq!(handle.pixels()[4..], [Rgb::BLACK; 2]);
        assert_eq!(preview.load().len(), 4);

        assert!(worker.stop(Duration::from_secs(1)));
        let shows = handle.show_count();
        thread::sleep(Duration::from_millis(30));
        assert_eq!(handle.show_count(), shows);

        let events: Vec<Event> = rx.try_iter().collect();
        assert_eq!(events.first(), Some(&Event::RenderStarted));
        assert_eq!(events.last(), Some(&Event::RenderStopped));
    }

    #[test]
    fn test_show_failure_is_reported_once_per_streak() {
        let (render, handle, _preview, rx) = setup(white_state(3), 3);
        handle.set_fail_shows(true);
        let worker = Worker::spawn("test-render-fail", move |stop| render.run(stop)).unwrap();

        // The loop keeps trying while the strip fails
        thread::sleep(Duration::from_millis(60));
        handle.set_fail_shows(false);
        assert!(wait_for(|| handle.show_count() >= 2));
        assert!(worker.stop(Duration::from_secs(1)));

        let sink_errors = rx
            .try_iter()
            .filter(|e| matches!(e, Event::SinkError { .. }))
            .count();
        assert_eq!(sink_errors, 1);
    }
}
