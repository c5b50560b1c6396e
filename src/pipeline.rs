use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use serde::Serialize;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::control::{Command, ResolutionCycle, SensitivityPreset};
use crate::counter::GateCounter;
use crate::detection::{DetectionRecord, DetectionSource, SourceSettings, SourceTick};
use crate::gate::{GateGeometry, GateRegion};
use crate::rate::RateEstimator;
use crate::sink::EventSink;

/// Continuously-readable session summary.
#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub total: u64,
    pub gate: GateRegion,
    pub fps: f64,
    pub sensitivity: SensitivityPreset,
    pub resolution: u32,
    pub dropped_malformed: u64,
    pub degraded_sink: bool,
}

/// The tick loop. One logical tick owns, in order: pull a batch, drain
/// pending commands, run the crossing detector, sweep stale tracks,
/// update the rate estimate, forward events to the sink. All counting
/// state lives here, single-writer; the capture thread only moves
/// batches over a bounded channel.
pub struct Pipeline<K: EventSink> {
    gate: GateGeometry,
    counter: GateCounter,
    rate: RateEstimator,
    sink: K,
    sensitivity: SensitivityPreset,
    resolution: ResolutionCycle,
    /// Detector-facing knobs, shared with the capture thread.
    settings: Arc<Mutex<SourceSettings>>,
    /// Timestamp of the last non-empty batch, reused for sweeps when a
    /// batch arrives empty after filtering.
    last_now: f64,
}

impl<K: EventSink> Pipeline<K> {
    pub fn new(cfg: &Config, frame_size: (u32, u32), sink: K) -> Self {
        let mut gate = GateGeometry::for_frame(frame_size.0, frame_size.1);
        if let Some([x1, y1, x2, y2]) = cfg.gate {
            if let Err(e) = gate.set_region(GateRegion { x1, y1, x2, y2 }) {
                error!(error = %e, "ignoring configured gate override");
            }
        }
        let sensitivity = SensitivityPreset::Day;
        let resolution = ResolutionCycle::new(cfg.resolutions.clone(), cfg.image_size);
        let settings = Arc::new(Mutex::new(SourceSettings {
            min_confidence: sensitivity.confidence(),
            image_size: resolution.current(),
        }));
        Pipeline {
            gate,
            counter: GateCounter::new(cfg.ttl_sec, cfg.counted_cap),
            rate: RateEstimator::new(),
            sink,
            sensitivity,
            resolution,
            settings,
            last_now: 0.0,
        }
    }

    /// Shared handle the capture thread reads before every pull.
    pub fn settings_handle(&self) -> Arc<Mutex<SourceSettings>> {
        Arc::clone(&self.settings)
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    pub fn summary(&self) -> Summary {
        Summary {
            total: self.counter.total(),
            gate: self.gate.snapshot(),
            fps: self.rate.fps(),
            sensitivity: self.sensitivity,
            resolution: self.resolution.current(),
            dropped_malformed: self.counter.dropped_malformed(),
            degraded_sink: self.sink.degraded(),
        }
    }

    // The settings cell holds plain copyable values, so a poisoned
    // lock is still usable: recover the guard instead of panicking or
    // dropping the update.
    fn publish_settings(&self) {
        let mut s = self.settings.lock().unwrap_or_else(|e| e.into_inner());
        s.min_confidence = self.sensitivity.confidence();
        s.image_size = self.resolution.current();
    }

    /// Apply one control command. Returns true for `Quit`.
    pub fn apply_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Reset => {
                self.counter.reset();
                info!("counters reset");
            }
            Command::MoveGate(dir, step) => {
                let (dx, dy) = dir.delta(step);
                self.gate.shift(dx, dy);
                debug!(gate = ?self.gate.snapshot(), "gate moved");
            }
            Command::ResizeGate(delta) => {
                self.gate.resize(delta);
                debug!(gate = ?self.gate.snapshot(), "gate resized");
            }
            Command::ToggleSensitivity => {
                self.sensitivity = self.sensitivity.toggle();
                self.publish_settings();
                info!(preset = ?self.sensitivity, "sensitivity toggled");
            }
            Command::CycleResolution => {
                let size = self.resolution.advance();
                self.publish_settings();
                info!(size, "resolution cycled");
            }
            Command::Quit => return true,
        }
        false
    }

    /// Drain every pending command atomically. Returns true if a `Quit`
    /// was among them.
    pub fn drain_commands(&mut self, commands: &Receiver<Command>) -> bool {
        let mut quit = false;
        while let Ok(cmd) = commands.try_recv() {
            quit |= self.apply_command(cmd);
        }
        quit
    }

    /// Steps 3-6 of one tick: detect crossings, sweep, update the rate
    /// estimate (when `wall_dt` is known), forward events.
    pub fn tick(&mut self, batch: &[DetectionRecord], wall_dt: Option<f64>) {
        let now = batch.first().map(|d| d.timestamp).unwrap_or(self.last_now);
        self.last_now = now;

        let gate = self.gate.snapshot();
        let events = self.counter.process(&gate, batch, now);
        self.counter.sweep(now);
        if let Some(dt) = wall_dt {
            self.rate.update(dt);
        }
        self.sink.write_events(&events);
    }

    /// Drive the full session: spawn the capture thread, loop ticks
    /// until the source is exhausted or a `Quit` arrives, then flush
    /// and join.
    pub fn run<S>(
        &mut self,
        source: S,
        commands: &Receiver<Command>,
        queue_capacity: usize,
        tick_wait: Duration,
    ) -> anyhow::Result<Summary>
    where
        S: DetectionSource + Send + 'static,
    {
        let (batch_tx, batch_rx) = bounded::<Vec<DetectionRecord>>(queue_capacity);
        let settings = self.settings_handle();

        // Capture stays on its own thread; backpressure is the bounded
        // channel blocking the sender.
        let capture = thread::spawn(move || -> Result<(), crate::error::SourceError> {
            let mut source = source;
            loop {
                let current = *settings.lock().unwrap_or_else(|e| e.into_inner());
                match source.next_batch(&current)? {
                    SourceTick::Batch(batch) => {
                        if batch_tx.send(batch).is_err() {
                            // Receiver gone: the tick loop quit first.
                            return Ok(());
                        }
                    }
                    SourceTick::Exhausted => {
                        info!("detection source exhausted");
                        return Ok(());
                    }
                }
            }
        });

        let mut t_prev: Option<Instant> = None;
        let mut ticks: u64 = 0;
        loop {
            match batch_rx.recv_timeout(tick_wait) {
                Ok(batch) => {
                    let quit = self.drain_commands(commands);
                    let wall_dt = t_prev.map(|t| t.elapsed().as_secs_f64());
                    self.tick(&batch, wall_dt);
                    t_prev = Some(Instant::now());
                    ticks += 1;
                    if ticks % 100 == 0 {
                        let s = self.summary();
                        info!(
                            total = s.total,
                            fps = %format_args!("{:.1}", s.fps),
                            gate = ?s.gate,
                            "session summary"
                        );
                    }
                    if quit {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    // Skipped tick: no counting, no rate update. Commands
                    // are still honored so a stalled source cannot wedge
                    // the control surface.
                    if self.drain_commands(commands) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        self.sink.flush();
        drop(batch_rx);
        match capture.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => anyhow::bail!("capture thread panicked"),
        }
        Ok(self.summary())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::VecSink;
    use crossbeam_channel::unbounded;

    fn det(id: i64, cx: f32, cy: f32, ts: f64) -> DetectionRecord {
        DetectionRecord {
            track_id: id,
            class_id: 2,
            confidence: 0.9,
            bbox: [cx - 5.0, cy - 5.0, cx + 5.0, cy + 5.0],
            timestamp: ts,
        }
    }

    fn pipeline() -> Pipeline<VecSink> {
        let cfg = Config {
            gate: Some([100, 100, 300, 300]),
            ..Config::default()
        };
        Pipeline::new(&cfg, (1920, 1080), VecSink::default())
    }

    struct ScriptedSource {
        batches: Vec<Vec<DetectionRecord>>,
        seen_settings: Arc<Mutex<Vec<SourceSettings>>>,
    }

    impl DetectionSource for ScriptedSource {
        fn frame_size(&self) -> (u32, u32) {
            (1920, 1080)
        }

        fn next_batch(
            &mut self,
            settings: &SourceSettings,
        ) -> Result<SourceTick, crate::error::SourceError> {
            self.seen_settings
                .lock()
                .unwrap()
                .push(*settings);
            if self.batches.is_empty() {
                Ok(SourceTick::Exhausted)
            } else {
                Ok(SourceTick::Batch(self.batches.remove(0)))
            }
        }
    }

    #[test]
    fn test_tick_counts_and_forwards_all_events() {
        let mut p = pipeline();
        p.tick(&[det(1, 200.0, 200.0, 0.0)], None);
        p.tick(&[det(1, 400.0, 400.0, 1.0)], Some(0.1));
        let s = p.summary();
        assert_eq!(s.total, 1);
        assert_eq!(p.sink().events.len(), 2);
        assert!(p.sink().events[1].crossed);
        assert!(s.fps > 0.0);
    }

    #[test]
    fn test_commands_apply_before_processing() {
        let (tx, rx) = unbounded();
        let mut p = pipeline();
        // Latch id 1 half-way: inside as of tick one.
        p.tick(&[det(1, 200.0, 200.0, 0.0)], None);
        // A reset drained at tick start wipes inside_prev, so the
        // outside observation in the same tick must not count.
        tx.send(Command::Reset).unwrap();
        let quit = p.drain_commands(&rx);
        assert!(!quit);
        p.tick(&[det(1, 400.0, 400.0, 1.0)], None);
        assert_eq!(p.summary().total, 0);
    }

    #[test]
    fn test_gate_commands_change_snapshot_only_between_ticks() {
        let mut p = pipeline();
        let before = p.summary().gate;
        p.apply_command(Command::MoveGate(crate::control::Direction::Right, 5));
        p.apply_command(Command::ResizeGate(3));
        let after = p.summary().gate;
        assert_eq!(after.x1, before.x1 + 5);
        assert_eq!(after.y2, before.y2 + 3);
    }

    #[test]
    fn test_sensitivity_and_resolution_published_to_settings() {
        let mut p = pipeline();
        let handle = p.settings_handle();
        assert_eq!(handle.lock().unwrap().min_confidence, 0.25);
        assert_eq!(handle.lock().unwrap().image_size, 960);

        p.apply_command(Command::ToggleSensitivity);
        p.apply_command(Command::CycleResolution);
        let s = *handle.lock().unwrap();
        assert_eq!(s.min_confidence, 0.15);
        assert_eq!(s.image_size, 1280);
    }

    #[test]
    fn test_settings_survive_poisoned_lock() {
        let mut p = pipeline();
        let handle = p.settings_handle();

        // Poison the mutex: panic while holding the guard.
        let poisoner = Arc::clone(&handle);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("poison");
        })
        .join();
        assert!(handle.lock().is_err());

        // Updates and reads still go through via guard recovery.
        p.apply_command(Command::ToggleSensitivity);
        let s = *handle.lock().unwrap_or_else(|e| e.into_inner());
        assert_eq!(s.min_confidence, 0.15);
    }

    #[test]
    fn test_empty_batch_does_not_update_rate() {
        let mut p = pipeline();
        p.tick(&[], None);
        assert_eq!(p.summary().fps, 0.0);
    }

    #[test]
    fn test_run_to_exhaustion() {
        let (_tx, rx) = unbounded::<Command>();
        let mut p = pipeline();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let source = ScriptedSource {
            batches: vec![
                vec![det(1, 200.0, 200.0, 0.0)],
                vec![det(1, 400.0, 400.0, 1.0)],
            ],
            seen_settings: Arc::clone(&seen),
        };
        let summary = p
            .run(source, &rx, 4, Duration::from_millis(50))
            .unwrap();
        assert_eq!(summary.total, 1);
        assert_eq!(p.sink().events.len(), 2);
        // One settings read per pull, including the exhausted one.
        assert_eq!(seen.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_run_quit_command_stops_loop() {
        let (tx, rx) = unbounded();
        let mut p = pipeline();
        tx.send(Command::Quit).unwrap();
        let source = ScriptedSource {
            // Endless-ish supply; quit must win.
            batches: vec![vec![det(1, 200.0, 200.0, 0.0)]; 64],
            seen_settings: Arc::new(Mutex::new(Vec::new())),
        };
        let summary = p
            .run(source, &rx, 2, Duration::from_millis(50))
            .unwrap();
        // Quit completed the in-flight tick, then stopped.
        assert!(p.sink().events.len() >= 1);
        assert_eq!(summary.total, 0);
    }
}
