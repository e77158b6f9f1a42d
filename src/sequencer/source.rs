// Source and Track contracts
// A Source is a composite event iterator over track based representations
// of music. The engine drives it without knowing anything about the
// underlying representation, which may be edited while playing or even
// generated on the fly.

use crate::sequencer::state::SynchronousControl;

/// Tick value returned by an exhausted track
pub const MAX_TICK: i64 = i64::MAX;

/// Lazy cursor over one voice of tick-ordered events
///
/// There is deliberately no `has_next`; another event may appear at any
/// time, and when there is a next event the engine needs its tick in order
/// to decide whether it is due. Ticks must be monotonically non-decreasing
/// along the cursor.
pub trait Track: Send {
    /// Tick of the next event without advancing, [`MAX_TICK`] if exhausted.
    /// Called on every pump, so it must be cheap.
    fn next_tick(&self) -> i64;

    /// Play the next event and advance the cursor
    fn play_next(&mut self);

    /// Turn this track off, silencing its active notes.
    /// `stop` true also resets controllers, false is a mute.
    fn off(&mut self, stop: bool);

    /// Name, unique within the owning source
    fn name(&self) -> &str;
}

/// The contract a sequencer requires from any track based representation
///
/// The engine calls `sync` once per iteration that advances the tick; that
/// call is the only window in which the implementation may mutate its track
/// list or cursors. `play_to_tick` and `exhausted` are the engine's only
/// view of the tracks, each track being driven through the [`Track`]
/// contract.
pub trait Source: Send {
    /// Name of this source
    fn name(&self) -> &str;

    /// Resolution in ticks per quarter note, fixed for the lifetime of the
    /// source binding
    fn resolution(&self) -> u32;

    /// Receive the control capability. Called once when the source is
    /// bound; the source keeps the handle for tempo changes.
    fn control(&mut self, control: SynchronousControl);

    /// Mutation window, called synchronously before events are pumped.
    /// Returns a signed tick offset to apply to the engine position, 0 for
    /// no reposition.
    fn sync(&mut self, current_tick: i64) -> i64;

    /// Drain every track while its `next_tick()` is due, at or before
    /// `target_tick`. Events are tick-ordered per track; ordering across
    /// tracks at equal ticks is unspecified.
    fn play_to_tick(&mut self, target_tick: i64);

    /// True when every track reports [`MAX_TICK`]
    fn exhausted(&self) -> bool;

    /// Rewind all cursors and tempo-map state. Only the engine calls this.
    fn return_to_zero(&mut self);

    /// Playback has stopped, turn tracks off with controller reset
    fn stopped(&mut self);
}
