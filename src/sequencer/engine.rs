// Sequencer - the real-time part of playback
// Solves distance = velocity * time: distance in ticks, velocity in bpm.
// MIDI only supports instantaneous transitions between constant tempos, so
// total distance is the accumulation of a series of linear segments. The
// engine thread wakes about every millisecond, measures elapsed time, and
// lets the active clock turn it into tick advances.

use crate::midi::target::MidiTransport;
use crate::sequencer::clock::{Clock, ExternalClock, MasterClock, SlaveClock, SlaveShared};
use crate::sequencer::mtc::{FrameRate, MtcGenerator, MtcShared};
use crate::sequencer::source::Source;
use crate::sequencer::state::{SharedState, SynchronousControl, DEFAULT_BPM};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors surfaced by sequencer control operations.
/// The real-time thread itself never surfaces errors, it absorbs them so
/// playback continues.
#[derive(Debug, Error)]
pub enum SequencerError {
    #[error("no source is set")]
    NoSource,
    #[error("can't {0} while playing")]
    Running(&'static str),
    #[error("clocks per quarter {clocks} does not divide resolution {resolution}")]
    ClockDivision { clocks: u32, resolution: u32 },
    #[error("drop frame is not supported")]
    DropFrame,
    #[error("no MTC output is configured")]
    MtcNotConfigured,
    #[error("external clock requires clocks per quarter > 0")]
    NotSlaved,
}

/// Run-state listener, called synchronously on the thread that performs
/// the transition: `play` on the caller, stopped on the engine thread
/// after it has drained
pub trait TransportObserver: Send + Sync {
    fn transport_changed(&self, running: bool);
}

type ObserverList = Arc<Mutex<Vec<Arc<dyn TransportObserver>>>>;

struct MtcLayer {
    shared: Arc<MtcShared>,
    generator: Arc<Mutex<MtcGenerator>>,
}

/// Real-time MIDI sequencer
///
/// Plays events from a [`Source`] against an internal tempo clock, or
/// locked to external clock pulses when clocks per quarter is set. Cannot
/// chase controllers or loop by itself; a source that wants those provides
/// them through its `sync` window.
pub struct Sequencer {
    shared: Arc<SharedState>,
    source: Option<Arc<Mutex<Box<dyn Source>>>>,
    source_name: String,
    ticks_per_quarter: u32,
    clocks_per_quarter: u32,
    slave: Option<Arc<SlaveShared>>,
    mtc: Option<MtcLayer>,
    observers: ObserverList,
    engine: Option<PlayEngine>,
}

impl Sequencer {
    pub fn new() -> Self {
        Self {
            shared: SharedState::new(),
            source: None,
            source_name: String::new(),
            ticks_per_quarter: 0,
            clocks_per_quarter: 0,
            slave: None,
            mtc: None,
            observers: Arc::new(Mutex::new(Vec::new())),
            engine: None,
        }
    }

    /// A sequencer that also generates MTC quarter frames to `port`.
    /// Generation starts disabled, at 25 fps.
    pub fn with_mtc(port: Box<dyn MidiTransport>) -> Self {
        let mut sequencer = Self::new();
        let shared = MtcShared::new();
        sequencer.mtc = Some(MtcLayer {
            shared: shared.clone(),
            generator: Arc::new(Mutex::new(MtcGenerator::new(shared, port))),
        });
        sequencer
    }

    /// Bind a source. Resets tempo to 120 bpm, the position to zero,
    /// rewinds the source and flushes any notes it had sounding.
    pub fn set_source(&mut self, mut source: Box<dyn Source>) -> Result<(), SequencerError> {
        if self.is_running() {
            return Err(SequencerError::Running("set source"));
        }
        let resolution = source.resolution();
        self.check_division(self.clocks_per_quarter, resolution)?;

        self.shared.set_bpm(DEFAULT_BPM);
        self.shared.set_tick_position(0);
        self.shared.set_micros_position(0);
        self.ticks_per_quarter = resolution;
        self.source_name = source.name().to_string();

        source.control(SynchronousControl::new(self.shared.clone()));
        source.return_to_zero(); // just in case it isn't
        source.stopped(); // flush anything left sounding
        self.source = Some(Arc::new(Mutex::new(source)));
        Ok(())
    }

    /// Select the clock domain. 0 is the internal master clock; a positive
    /// value locks playback to that many external pulses per quarter note
    /// and must divide the source resolution exactly.
    pub fn set_clocks_per_quarter(&mut self, clocks: u32) -> Result<(), SequencerError> {
        if self.is_running() {
            return Err(SequencerError::Running("change clocks per quarter"));
        }
        if clocks > 0 && self.source.is_some() {
            self.check_division(clocks, self.ticks_per_quarter)?;
        }
        self.clocks_per_quarter = clocks;
        self.slave = (clocks > 0).then(SlaveShared::new);
        Ok(())
    }

    pub fn clocks_per_quarter(&self) -> u32 {
        self.clocks_per_quarter
    }

    /// Producer handle for feeding external clock pulses, available once a
    /// source is bound in slave mode. Obtain it after configuration; it
    /// captures the current clock multiplier.
    pub fn external_clock(&self) -> Result<ExternalClock, SequencerError> {
        let slave = self.slave.as_ref().ok_or(SequencerError::NotSlaved)?;
        if self.source.is_none() {
            return Err(SequencerError::NoSource);
        }
        Ok(ExternalClock::new(
            self.shared.clone(),
            slave.clone(),
            self.clocks_per_quarter,
            self.ticks_per_quarter / self.clocks_per_quarter,
        ))
    }

    /// Start playing. A no-op when already running.
    pub fn play(&mut self) -> Result<(), SequencerError> {
        let source = self
            .source
            .as_ref()
            .ok_or(SequencerError::NoSource)?
            .clone();
        if self.is_running() {
            return Ok(());
        }

        let clock = match &self.slave {
            None => Clock::Master(MasterClock::new(self.shared.clone(), self.ticks_per_quarter)),
            Some(slave) => {
                slave.reset(self.shared.tick_position());
                Clock::Slave(SlaveClock::new(
                    self.shared.clone(),
                    slave.clone(),
                    self.ticks_per_quarter,
                    self.ticks_per_quarter / self.clocks_per_quarter,
                ))
            }
        };

        log::info!("sequencer playing: {}", self.source_name);
        self.shared.set_running(true);
        notify_observers(&self.observers, true);
        self.engine = Some(PlayEngine::start(
            &self.source_name,
            self.shared.clone(),
            source,
            clock,
            self.mtc
                .as_ref()
                .map(|layer| (layer.shared.clone(), layer.generator.clone())),
            self.observers.clone(),
        ));
        Ok(())
    }

    /// Commence stopping. The engine thread drains within about a
    /// millisecond, turns active notes off, then notifies observers.
    /// A no-op when not running.
    pub fn stop(&mut self) -> Result<(), SequencerError> {
        if self.source.is_none() {
            return Err(SequencerError::NoSource);
        }
        if let Some(engine) = &self.engine {
            engine.stop();
        }
        Ok(())
    }

    /// As if the source had just been bound: rewind, reset tempo and
    /// position. Sends a full MTC frame when MTC is configured.
    pub fn return_to_zero(&mut self) -> Result<(), SequencerError> {
        let source = self.source.as_ref().ok_or(SequencerError::NoSource)?;
        if self.is_running() {
            return Err(SequencerError::Running("return to zero"));
        }
        if let Ok(mut source) = source.lock() {
            source.return_to_zero();
        }
        self.shared.set_bpm(DEFAULT_BPM);
        self.shared.set_tick_position(0);
        self.shared.set_micros_position(0);
        if let Some(layer) = &self.mtc {
            if let Ok(mut generator) = layer.generator.lock() {
                generator.send_full_frame();
            }
        }
        Ok(())
    }

    /// True while playing or stopping
    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Current position in ticks since the last rewind
    pub fn tick_position(&self) -> i64 {
        self.shared.tick_position()
    }

    /// Current position in milliseconds of elapsed playback
    pub fn millisecond_position(&self) -> u64 {
        self.shared.micros_position() / 1000
    }

    /// Tempo in beats per minute. Writable at any time; a write starts a
    /// new linear segment immediately. In slave mode the smoothed external
    /// tempo overwrites it on every pulse.
    pub fn bpm(&self) -> f64 {
        self.shared.bpm()
    }

    pub fn set_bpm(&self, bpm: f64) {
        self.shared.set_bpm(bpm);
    }

    /// Playback rate multiplier on top of the master tempo, ignored when
    /// clocked externally
    pub fn tempo_factor(&self) -> f64 {
        self.shared.tempo_factor()
    }

    pub fn set_tempo_factor(&self, factor: f64) {
        self.shared.set_tempo_factor(factor);
    }

    /// Stop automatically once every track is exhausted, default off
    pub fn set_stop_on_empty(&self, stop: bool) {
        self.shared.set_stop_on_empty(stop);
    }

    pub fn add_observer(&mut self, observer: Arc<dyn TransportObserver>) {
        if let Ok(mut observers) = self.observers.lock() {
            observers.push(observer);
        }
    }

    /// Enable or disable MTC generation, allowed while running
    pub fn set_mtc_enabled(&self, enabled: bool) -> Result<(), SequencerError> {
        let layer = self.mtc.as_ref().ok_or(SequencerError::MtcNotConfigured)?;
        layer.shared.set_enabled(enabled);
        Ok(())
    }

    pub fn is_mtc_enabled(&self) -> bool {
        self.mtc
            .as_ref()
            .map(|layer| layer.shared.is_enabled())
            .unwrap_or(false)
    }

    /// Set the MTC frame rate. Drop frame is rejected. When stopped the
    /// change takes effect immediately; while running it is deferred and
    /// swapped in by the real-time thread.
    pub fn set_mtc_frame_rate(&self, rate: FrameRate) -> Result<(), SequencerError> {
        if rate.is_drop_frame() {
            return Err(SequencerError::DropFrame);
        }
        let layer = self.mtc.as_ref().ok_or(SequencerError::MtcNotConfigured)?;
        layer.shared.request_rate(rate);
        if !self.is_running() {
            if let Ok(mut generator) = layer.generator.lock() {
                generator.apply_rate(rate);
            }
        }
        Ok(())
    }

    pub fn mtc_frame_rate(&self) -> Option<FrameRate> {
        self.mtc.as_ref().map(|layer| layer.shared.requested_rate())
    }

    fn check_division(&self, clocks: u32, resolution: u32) -> Result<(), SequencerError> {
        if clocks > 0 && (resolution < clocks || resolution % clocks != 0) {
            return Err(SequencerError::ClockDivision { clocks, resolution });
        }
        Ok(())
    }
}

impl Default for Sequencer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Sequencer {
    fn drop(&mut self) {
        if let Some(engine) = &self.engine {
            engine.stop();
        }
    }
}

fn notify_observers(observers: &ObserverList, running: bool) {
    if let Ok(observers) = observers.lock() {
        for observer in observers.iter() {
            observer.transport_changed(running);
        }
    }
}

/// The real-time thread for one play session
struct PlayEngine {
    run: Arc<AtomicBool>,
}

impl PlayEngine {
    fn start(
        name: &str,
        shared: Arc<SharedState>,
        source: Arc<Mutex<Box<dyn Source>>>,
        clock: Clock,
        mtc: Option<(Arc<MtcShared>, Arc<Mutex<MtcGenerator>>)>,
        observers: ObserverList,
    ) -> Self {
        let run = Arc::new(AtomicBool::new(true));
        let context = EngineContext {
            run: run.clone(),
            shared: shared.clone(),
            source,
            clock,
            mtc,
            observers: observers.clone(),
        };
        let builder = thread::Builder::new().name(format!("sequencer - {}", name));
        // spawn only fails when the OS is out of threads, treat it as a
        // session that stopped immediately
        if let Err(e) = builder.spawn(move || context.run()) {
            log::warn!("failed to spawn engine thread: {}", e);
            run.store(false, Ordering::Relaxed);
            shared.set_running(false);
            notify_observers(&observers, false);
        }
        Self { run }
    }

    fn stop(&self) {
        self.run.store(false, Ordering::Relaxed);
    }
}

struct EngineContext {
    run: Arc<AtomicBool>,
    shared: Arc<SharedState>,
    source: Arc<Mutex<Box<dyn Source>>>,
    clock: Clock,
    mtc: Option<(Arc<MtcShared>, Arc<Mutex<MtcGenerator>>)>,
    observers: ObserverList,
}

impl EngineContext {
    fn run(mut self) {
        let epoch = Instant::now();
        let mut prev_micros = 0u64;

        // position the source before the first timing interval elapses
        self.sync();

        while self.run.load(Ordering::Relaxed) {
            // the only suspension point in the loop
            thread::sleep(Duration::from_millis(1));
            let now = epoch.elapsed().as_micros() as u64;
            let delta = now - prev_micros;
            prev_micros = now;
            self.shared.add_micros(delta);

            if self.clock.interval(delta) {
                let empty = self.sync();
                if empty && self.shared.stop_on_empty() {
                    break;
                }
            }
            self.check_mtc();
        }

        // drain: balance notes and reset controllers before anyone
        // observes the stop
        if let Ok(mut source) = self.source.lock() {
            source.stopped();
        }
        self.shared.set_running(false);
        log::info!("sequencer stopped");
        notify_observers(&self.observers, false);
    }

    /// Give the source its mutation window, apply any reposition it asks
    /// for, then pump events up to the current tick. Returns true when
    /// every track is exhausted.
    fn sync(&mut self) -> bool {
        let Ok(mut source) = self.source.lock() else {
            return true;
        };
        let offset = source.sync(self.shared.tick_position());
        if offset != 0 {
            let tick = self.shared.add_ticks(offset);
            self.clock.repositioned(tick);
        }
        source.play_to_tick(self.shared.tick_position());
        source.exhausted()
    }

    fn check_mtc(&mut self) {
        let Some((shared, generator)) = &self.mtc else {
            return;
        };
        if !shared.is_enabled() {
            return;
        }
        if let Ok(mut generator) = generator.lock() {
            generator.check(self.shared.micros_position() / 1000);
        }
    }
}
