//! Frame Compositor
//!
//! Turns the engine state and the latest audio snapshot into one frame:
//! renders every segment with its effect instance, applies intensity and
//! brightness, then runs the post filters.
//!
//! Effect instances live in an arena keyed by `(effect, start, end)`. The
//! arena is cleared whenever the segment layout generation changes, and an
//! instance is rebuilt when the registry entry it was built from has been
//! replaced.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crossbeam_channel::Sender;
use tracing::{debug, warn};

use crate::effects::{Effect, EffectContext, EffectDescriptor, EffectRegistry};
use crate::message::Event;
use crate::post::PostFilter;
use crate::state::{EngineState, Params, Segment};
use lumen_dsp::AudioSnapshot;
use lumen_strip::Rgb;

/// Identity of an effect instance
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct InstanceKey {
    effect: String,
    start: usize,
    end: usize,
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}-{}", self.effect, self.start, self.end)
    }
}

struct Slot {
    descriptor: Arc<EffectDescriptor>,
    effect: Box<dyn Effect>,
    tick: u64,
}

/// Renders frames from engine state
pub struct Compositor {
    registry: Arc<EffectRegistry>,
    instances: HashMap<InstanceKey, Slot>,
    generation: u64,
    tick: u64,
    timeline: f64,
    post: PostFilter,
    faulted: HashSet<InstanceKey>,
    unknown_warned: HashSet<String>,
    events: Option<Sender<Event>>,
}

impl Compositor {
    pub fn new(registry: Arc<EffectRegistry>) -> Self {
        Self {
            registry,
            instances: HashMap::new(),
            generation: 0,
            tick: 0,
            timeline: 0.0,
            post: PostFilter::new(),
            faulted: HashSet::new(),
            unknown_warned: HashSet::new(),
            events: None,
        }
    }

    /// Report effect faults on `events`
    pub fn with_events(mut self, events: Sender<Event>) -> Self {
        self.events = Some(events);
        self
    }

    /// Swap the effect registry. Instances built from replaced entries are
    /// rebuilt on their next render.
    pub fn set_registry(&mut self, registry: Arc<EffectRegistry>) {
        if !Arc::ptr_eq(&self.registry, &registry) {
            self.registry = registry;
            self.unknown_warned.clear();
        }
    }

    /// Speed-scaled seconds rendered so far
    pub fn timeline(&self) -> f64 {
        self.timeline
    }

    /// Number of live effect instances
    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    /// Render one frame for a strip of `pixel_count` pixels. The result has
    /// exactly `min(pixel_count, max(1, state.max_leds))` entries.
    pub fn render(&mut self, state: &EngineState, audio: &AudioSnapshot, dt: f32, pixel_count: usize) -> Vec<Rgb> {
        if state.layout_generation() != self.generation {
            debug!(generation = state.layout_generation(), "Segment layout changed, rebuilding effects");
            self.generation = state.layout_generation();
            self.instances.clear();
            self.faulted.clear();
        }

        let live = state.live.sanitized();
        let dt = if dt.is_finite() { dt.max(0.0) * live.master_speed } else { 0.0 };
        self.timeline += f64::from(dt);
        self.tick = self.tick.wrapping_add(1);

        let active = pixel_count.min(state.max_leds.max(1));
        let mut frame = vec![Rgb::BLACK; active];
        if active == 0 {
            return frame;
        }
        if !state.on {
            self.post.reset();
            return frame;
        }

        let implicit;
        let segments: &[Segment] = if state.segments.is_empty() {
            implicit = [Segment::whole_strip(active)];
            &implicit
        } else {
            &state.segments
        };

        let boost = if state.intensity_boost.is_finite() {
            state.intensity_boost.clamp(0.1, 3.0)
        } else {
            1.0
        };

        for segment in segments {
            let end = segment.end.min(active - 1);
            if end < segment.start {
                continue;
            }
            let effect_id = segment.effect.as_deref().unwrap_or(&state.effect);
            let Some(descriptor) = self.registry.get(effect_id).cloned() else {
                if self.unknown_warned.insert(effect_id.to_string()) {
                    warn!(effect = effect_id, segment = %segment.name, "Unknown effect, segment left black");
                }
                continue;
            };

            let key = InstanceKey {
                effect: effect_id.to_string(),
                start: segment.start,
                end,
            };
            let length = end - segment.start + 1;

            let mut params: Params = state.effect_params.clone();
            params.extend(segment.params.iter().map(|(k, v)| (k.clone(), v.clone())));
            let intensity = params
                .get("intensity")
                .and_then(serde_json::Value::as_f64)
                .map(|v| v as f32)
                .filter(|v| v.is_finite())
                .unwrap_or(1.0)
                .max(0.0)
                * boost;

            let ctx = EffectContext {
                time: self.timeline,
                dt,
                length,
                params: &params,
                audio,
                state,
                segment,
                live: &live,
                master_speed: live.master_speed,
            };

            let slot = self.instances.entry(key.clone()).or_insert_with(|| Slot {
                descriptor: Arc::clone(&descriptor),
                effect: descriptor.create(),
                tick: 0,
            });
            if !Arc::ptr_eq(&slot.descriptor, &descriptor) {
                debug!(instance = %key, "Effect entry replaced, rebuilding instance");
                slot.descriptor = Arc::clone(&descriptor);
                slot.effect = descriptor.create();
            }
            slot.tick = self.tick;

            let outcome = panic::catch_unwind(AssertUnwindSafe(|| slot.effect.render(&ctx)));
            let colors = match outcome {
                Ok(Ok(colors)) => colors,
                Ok(Err(err)) => {
                    self.report_fault(&key, err.to_string());
                    continue;
                }
                Err(payload) => {
                    self.instances.remove(&key);
                    self.report_fault(&key, format!("panicked: {}", panic_message(payload.as_ref())));
                    continue;
                }
            };

            let fitted = fit_length(colors, length);
            for (px, color) in frame[segment.start..=end].iter_mut().zip(fitted) {
                *px = color.scale(intensity);
            }
        }

        let tick = self.tick;
        self.instances.retain(|_, slot| slot.tick == tick);

        let level = f32::from(state.brightness) / 255.0;
        if state.brightness < u8::MAX {
            for px in frame.iter_mut() {
                *px = px.scale(level);
            }
        }
        self.post.apply(&mut frame, &live);
        frame
    }

    fn report_fault(&mut self, key: &InstanceKey, message: String) {
        if !self.faulted.insert(key.clone()) {
            return;
        }
        warn!(instance = %key, "Effect failed: {}", message);
        if let Some(events) = &self.events {
            let _ = events.send(Event::EffectFault {
                key: key.to_string(),
                message,
            });
        }
    }
}

/// Repeat short output, truncate long output, black for empty output
fn fit_length(colors: Vec<Rgb>, length: usize) -> Vec<Rgb> {
    if colors.is_empty() {
        return vec![Rgb::BLACK; length];
    }
    colors.iter().cycle().take(length).copied().collect()
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::EffectError;
    use crate::state::LiveParams;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter {
        frames: u8,
    }

    impl Effect for Counter {
        fn render(&mut self, ctx: &EffectContext<'_>) -> Result<Vec<Rgb>, EffectError> {
            self.frames = self.frames.saturating_add(1);
            Ok(vec![Rgb(self.frames, 0, 0); ctx.length])
        }
    }

    struct Failing;

    impl Effect for Failing {
        fn render(&mut self, _ctx: &EffectContext<'_>) -> Result<Vec<Rgb>, EffectError> {
            Err(EffectError::Failed("broken".into()))
        }
    }

    static PANIC_BUILDS: AtomicUsize = AtomicUsize::new(0);

    struct Panicking;

    impl Effect for Panicking {
        fn render(&mut self, _ctx: &EffectContext<'_>) -> Result<Vec<Rgb>, EffectError> {
            panic!("effect exploded");
        }
    }

    struct Short;

    impl Effect for Short {
        fn render(&mut self, _ctx: &EffectContext<'_>) -> Result<Vec<Rgb>, EffectError> {
            Ok(vec![Rgb(1, 0, 0), Rgb(2, 0, 0)])
        }
    }

    fn registry() -> Arc<EffectRegistry> {
        let mut registry = EffectRegistry::builtin();
        registry.register(EffectDescriptor::new("counter", "Counter", "test", "", Params::new, || {
            Box::new(Counter { frames: 0 })
        }));
        registry.register(EffectDescriptor::new("failing", "Failing", "test", "", Params::new, || {
            Box::new(Failing)
        }));
        registry.register(EffectDescriptor::new("panicking", "Panicking", "test", "", Params::new, || {
            PANIC_BUILDS.fetch_add(1, Ordering::SeqCst);
            Box::new(Panicking)
        }));
        registry.register(EffectDescriptor::new("short", "Short", "test", "", Params::new, || {
            Box::new(Short)
        }));
        Arc::new(registry)
    }

    fn neutral_state(effect: &str) -> EngineState {
        EngineState {
            brightness: 255,
            effect: effect.to_string(),
            live: LiveParams::neutral(),
            ..EngineState::default()
        }
    }

    fn solid(color: [u8; 3]) -> Params {
        crate::effects::params(serde_json::json!({ "color": color }))
    }

    #[test]
    fn test_output_length_matches_active_count() {
        let mut compositor = Compositor::new(registry());
        let audio = AudioSnapshot::default();
        let mut state = neutral_state("rainbow");

        let layouts = vec![
            vec![],
            vec![Segment::new("a", 0, 9), Segment::new("b", 5, 400)],
            vec![Segment::new("gone", 200, 250)],
            vec![Segment::new("inverted", 9, 3)],
            vec![Segment::new("one", 0, 0).with_effect("comet")],
        ];
        for layout in layouts {
            state.set_segments(layout);
            for (pixels, max_leds) in [(60, 300), (60, 20), (60, 0), (0, 10), (1, 1)] {
                state.max_leds = max_leds;
                let frame = compositor.render(&state, &audio, 0.016, pixels);
                assert_eq!(frame.len(), pixels.min(max_leds.max(1)));
            }
        }
    }

    #[test]
    fn test_neutral_post_is_identity() {
        let mut compositor = Compositor::new(registry());
        let mut state = neutral_state("solid");
        state.effect_params = solid([10, 20, 30]);
        let frame = compositor.render(&state, &AudioSnapshot::default(), 0.016, 8);
        assert_eq!(frame, vec![Rgb(10, 20, 30); 8]);
    }

    #[test]
    fn test_off_is_black() {
        let mut compositor = Compositor::new(registry());
        let mut state = neutral_state("solid");
        state.effect_params = solid([255, 255, 255]);
        state.live.frame_blend = 0.9;
        compositor.render(&state, &AudioSnapshot::default(), 0.016, 4);

        state.on = false;
        let frame = compositor.render(&state, &AudioSnapshot::default(), 0.016, 4);
        assert!(frame.iter().all(|c| c.is_black()));

        // History was reset: turning back on shows the color without a fade-in
        state.on = true;
        let frame = compositor.render(&state, &AudioSnapshot::default(), 0.016, 4);
        assert_eq!(frame[0], Rgb::WHITE);
    }

    #[test]
    fn test_brightness_and_intensity_scale() {
        let mut compositor = Compositor::new(registry());
        let mut state = neutral_state("solid");
        state.effect_params = solid([200, 100, 0]);
        state.effect_params.insert("intensity".into(), serde_json::json!(0.5));
        let frame = compositor.render(&state, &AudioSnapshot::default(), 0.016, 2);
        assert_eq!(frame[0], Rgb(100, 50, 0));

        state.intensity_boost = 2.0;
        state.brightness = 51;
        let frame = compositor.render(&state, &AudioSnapshot::default(), 0.016, 2);
        assert_eq!(frame[0], Rgb(40, 20, 0));
    }

    #[test]
    fn test_later_segment_wins_overlap() {
        let mut compositor = Compositor::new(registry());
        let mut state = neutral_state("solid");
        state.set_segments(vec![
            Segment::new("red", 0, 5).with_params(solid([255, 0, 0])),
            Segment::new("blue", 3, 7).with_params(solid([0, 0, 255])),
        ]);
        let frame = compositor.render(&state, &AudioSnapshot::default(), 0.016, 10);
        assert_eq!(frame[2], Rgb(255, 0, 0));
        assert_eq!(frame[3], Rgb(0, 0, 255));
        assert_eq!(frame[7], Rgb(0, 0, 255));
        assert!(frame[8].is_black());
    }

    #[test]
    fn test_unknown_effect_leaves_black() {
        let mut compositor = Compositor::new(registry());
        let mut state = neutral_state("solid");
        state.effect_params = solid([255, 255, 255]);
        state.set_segments(vec![
            Segment::new("known", 0, 1),
            Segment::new("unknown", 2, 3).with_effect("does_not_exist"),
        ]);
        let frame = compositor.render(&state, &AudioSnapshot::default(), 0.016, 4);
        assert_eq!(frame[..2], [Rgb::WHITE, Rgb::WHITE]);
        assert_eq!(frame[2..], [Rgb::BLACK, Rgb::BLACK]);
    }

    #[test]
    fn test_short_output_is_repeated() {
        let mut compositor = Compositor::new(registry());
        let state = neutral_state("short");
        let frame = compositor.render(&state, &AudioSnapshot::default(), 0.016, 5);
        assert_eq!(
            frame,
            vec![Rgb(1, 0, 0), Rgb(2, 0, 0), Rgb(1, 0, 0), Rgb(2, 0, 0), Rgb(1, 0, 0)]
        );
    }

    #[test]
    fn test_failing_effect_is_isolated() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut compositor = Compositor::new(registry()).with_events(tx);
        let mut state = neutral_state("solid");
        state.effect_params = solid([0, 255, 0]);
        state.set_segments(vec![
            Segment::new("bad", 0, 4).with_effect("failing"),
            Segment::new("good", 5, 9),
        ]);
        let audio = AudioSnapshot::default();

        for _ in 0..1000 {
            let frame = compositor.render(&state, &audio, 0.016, 10);
            assert_eq!(frame.len(), 10);
            assert!(frame[..5].iter().all(|c| c.is_black()));
            assert!(frame[5..].iter().all(|&c| c == Rgb(0, 255, 0)));
        }

        let faults: Vec<Event> = rx.try_iter().collect();
        assert_eq!(faults.len(), 1);
        assert!(matches!(&faults[0], Event::EffectFault { key, .. } if key == "failing@0-4"));
    }

    #[test]
    fn test_panicking_effect_is_rebuilt() {
        let mut compositor = Compositor::new(registry());
        let state = neutral_state("panicking");
        let before = PANIC_BUILDS.load(Ordering::SeqCst);
        for _ in 0..3 {
            let frame = compositor.render(&state, &AudioSnapshot::default(), 0.016, 6);
            assert!(frame.iter().all(|c| c.is_black()));
        }
        assert!(PANIC_BUILDS.load(Ordering::SeqCst) - before >= 3);
        assert_eq!(compositor.instance_count(), 0);
    }

    #[test]
    fn test_layout_change_resets_instances() {
        let mut compositor = Compositor::new(registry());
        let mut state = neutral_state("counter");
        let audio = AudioSnapshot::default();

        compositor.render(&state, &audio, 0.016, 3);
        let frame = compositor.render(&state, &audio, 0.016, 3);
        assert_eq!(frame[0], Rgb(2, 0, 0));

        state.set_segments(vec![]);
        let frame = compositor.render(&state, &audio, 0.016, 3);
        assert_eq!(frame[0], Rgb(1, 0, 0));
    }

    #[test]
    fn test_replaced_registry_entry_rebuilds_instance() {
        let mut compositor = Compositor::new(registry());
        let state = neutral_state("counter");
        let audio = AudioSnapshot::default();
        compositor.render(&state, &audio, 0.016, 3);
        compositor.render(&state, &audio, 0.016, 3);

        // Same registry again: instance kept
        compositor.set_registry(Arc::clone(&compositor.registry));
        assert_eq!(compositor.render(&state, &audio, 0.016, 3)[0], Rgb(3, 0, 0));

        compositor.set_registry(registry());
        assert_eq!(compositor.render(&state, &audio, 0.016, 3)[0], Rgb(1, 0, 0));
    }

    #[test]
    fn test_master_speed_scales_timeline() {
        let mut compositor = Compositor::new(registry());
        let mut state = neutral_state("solid");
        state.live.master_speed = 2.0;
        compositor.render(&state, &AudioSnapshot::default(), 0.5, 1);
        assert!((compositor.timeline() - 1.0).abs() < 1e-9);

        compositor.render(&state, &AudioSnapshot::default(), f32::NAN, 1);
        assert!((compositor.timeline() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_fit_length() {
        assert_eq!(fit_length(vec![], 3), vec![Rgb::BLACK; 3]);
        assert_eq!(fit_length(vec![Rgb::WHITE; 9], 2), vec![Rgb::WHITE; 2]);
    }
}
