/// Pure state machine core
mod machine;
/// Observer trait, owned events and subscriptions
pub mod observer;
/// Dot/dash signal type
pub mod signal;

pub use observer::{ChannelObserver, DecoderEvent, DecoderObserver, Subscription};
pub use signal::Signal;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use thiserror::Error;
use tracing::{debug, error};

use crate::code_table::CodeTable;
use crate::config::DecoderConfig;
use crate::timer::{Clock, Timer, TimerError, TimerId, TimerKind, TokioTimer};
use machine::{Command, Machine};

/// Signals buffered before a letter is committed without waiting for the letter gap
pub const MAX_SIGNALS_PER_LETTER: usize = 6;

/// Source of unique timer owner ids, one per decoder instance
static NEXT_DECODER_ID: AtomicU64 = AtomicU64::new(1);

/// Errors surfaced by the decoder
#[derive(Debug, Error)]
pub enum DecoderError {
    /// Thresholds violate `0 < dot_max_ms < letter_gap_ms < word_gap_ms`
    #[error("invalid decoder configuration: {reason}")]
    ConfigurationInvalid {
        /// What was wrong
        reason: String,
    },

    /// The timer refused to schedule a deadline; the event was rolled back
    #[error("timer failure")]
    Timer(#[from] TimerError),
}

/// Decoder state as seen by observers and snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DecoderState {
    /// No press in progress and no letter pending
    #[default]
    Idle,
    /// Key is down
    Pressing,
    /// Key is up, waiting for the next press or a gap timeout
    AwaitingNext,
}

impl fmt::Display for DecoderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Pressing => write!(f, "pressing"),
            Self::AwaitingNext => write!(f, "awaiting next"),
        }
    }
}

/// Immutable copy of the decoder's visible state
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Snapshot {
    /// In-progress letter as '.' and '-'
    pub buffer: String,
    /// Decoded text so far
    pub text: String,
    /// Current state
    pub state: DecoderState,
}

/// Validated timing thresholds in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    dot_max_ms: u64,
    letter_gap_ms: u64,
    word_gap_ms: u64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            dot_max_ms: 150,
            letter_gap_ms: 800,
            word_gap_ms: 1500,
        }
    }
}

impl Thresholds {
    /// Validate a threshold triple
    ///
    /// # Errors
    /// Returns [`DecoderError::ConfigurationInvalid`] unless
    /// `0 < dot_max_ms < letter_gap_ms < word_gap_ms`
    pub fn new(dot_max_ms: u64, letter_gap_ms: u64, word_gap_ms: u64) -> Result<Self, DecoderError> {
        let invalid = |reason: String| DecoderError::ConfigurationInvalid { reason };

        if dot_max_ms == 0 {
            return Err(invalid("dot_max_ms must be > 0".to_owned()));
        }
        if dot_max_ms >= letter_gap_ms {
            return Err(invalid(format!(
                "dot_max_ms ({dot_max_ms}) must be less than letter_gap_ms ({letter_gap_ms})"
            )));
        }
        if letter_gap_ms >= word_gap_ms {
            return Err(invalid(format!(
                "letter_gap_ms ({letter_gap_ms}) must be less than word_gap_ms ({word_gap_ms})"
            )));
        }

        Ok(Self {
            dot_max_ms,
            letter_gap_ms,
            word_gap_ms,
        })
    }

    /// Longest press still read as a dot
    #[must_use]
    pub const fn dot_max_ms(&self) -> u64 {
        self.dot_max_ms
    }

    /// Silence after a release that commits the letter
    #[must_use]
    pub const fn letter_gap_ms(&self) -> u64 {
        self.letter_gap_ms
    }

    /// Silence after a release that ends the word
    #[must_use]
    pub const fn word_gap_ms(&self) -> u64 {
        self.word_gap_ms
    }
}

impl TryFrom<&DecoderConfig> for Thresholds {
    type Error = DecoderError;

    fn try_from(config: &DecoderConfig) -> Result<Self, Self::Error> {
        Self::new(config.dot_max_ms, config.letter_gap_ms, config.word_gap_ms)
    }
}

/// Clock that reads the decoder's timer, used when no clock is injected
struct TimerClock(Arc<dyn Timer>);

impl Clock for TimerClock {
    fn now_ms(&self) -> u64 {
        self.0.now()
    }
}

/// State shared between decoder handles and pending timer callbacks
pub(crate) struct Shared {
    id: u64,
    /// Serializes whole events: mutation, timer commands and notification
    gate: Mutex<()>,
    machine: Mutex<Machine>,
    observers: Mutex<Vec<(u64, Arc<dyn DecoderObserver>)>>,
    next_subscription: AtomicU64,
    timer: Arc<dyn Timer>,
    clock: Arc<dyn Clock>,
    table: Arc<CodeTable>,
    thresholds: Thresholds,
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    const fn timer_id(&self, kind: TimerKind) -> TimerId {
        TimerId::new(self.id, kind)
    }

    /// Run one event through the machine, then notify observers
    fn process<F>(self: &Arc<Self>, handler: F) -> Result<(), DecoderError>
    where
        F: FnOnce(&mut Machine) -> Vec<Command>,
    {
        let _gate = lock(&self.gate);

        let events = {
            let mut machine = lock(&self.machine);
            let before = machine.clone();
            let commands = handler(&mut *machine);
            match self.execute(commands) {
                Ok(events) => events,
                Err(e) => {
                    *machine = before;
                    return Err(e);
                }
            }
        };

        if !events.is_empty() {
            let observers: Vec<Arc<dyn DecoderObserver>> = lock(&self.observers)
                .iter()
                .map(|(_, observer)| Arc::clone(observer))
                .collect();
            for event in &events {
                for observer in &observers {
                    event.notify(observer.as_ref());
                }
            }
        }
        Ok(())
    }

    /// Carry out timer commands, collecting events; undoes this event's schedules on failure
    fn execute(self: &Arc<Self>, commands: Vec<Command>) -> Result<Vec<DecoderEvent>, DecoderError> {
        let mut events = Vec::new();
        let mut scheduled = Vec::new();

        for command in commands {
            match command {
                Command::Cancel(kind) => self.timer.cancel(self.timer_id(kind)),
                Command::Schedule {
                    kind,
                    deadline_ms,
                    epoch,
                } => {
                    let id = self.timer_id(kind);
                    let weak = Arc::downgrade(self);
                    let callback = Box::new(move || fire(&weak, kind, epoch));
                    if let Err(e) = self.timer.schedule(id, deadline_ms, callback) {
                        error!(error = %e, id = %id, deadline_ms, "failed to schedule decoder timer");
                        for kind in scheduled {
                            self.timer.cancel(self.timer_id(kind));
                        }
                        return Err(e.into());
                    }
                    scheduled.push(kind);
                }
                Command::Emit(event) => events.push(event),
            }
        }
        Ok(events)
    }

    pub(crate) fn remove_observer(&self, id: u64) {
        lock(&self.observers).retain(|(sub, _)| *sub != id);
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.timer.cancel(self.timer_id(TimerKind::LetterCommit));
        self.timer.cancel(self.timer_id(TimerKind::WordBreak));
    }
}

/// Timer callback body: route a deadline back into its decoder, if still alive
fn fire(decoder: &Weak<Shared>, kind: TimerKind, epoch: u64) {
    let Some(shared) = decoder.upgrade() else {
        debug!(?kind, "decoder dropped before timer fired");
        return;
    };
    let result = shared.process(|machine| match kind {
        TimerKind::LetterCommit => machine.letter_gap_elapsed(epoch),
        TimerKind::WordBreak => machine.word_gap_elapsed(epoch),
    });
    // Gap handlers never schedule, so there is nothing to fail
    if let Err(e) = result {
        error!(error = %e, ?kind, "decoder timer handling failed");
    }
}

/// Morse key decoder
///
/// Turns timed press/release edges into dots and dashes, letters and words.
/// Cheap to clone; all clones drive the same decoder.
#[derive(Clone)]
pub struct Decoder {
    shared: Arc<Shared>,
}

impl fmt::Debug for Decoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Decoder")
            .field("id", &self.shared.id)
            .field("thresholds", &self.shared.thresholds)
            .field("snapshot", &self.snapshot())
            .finish_non_exhaustive()
    }
}

impl Decoder {
    /// Start configuring a decoder
    #[must_use]
    pub fn builder() -> DecoderBuilder {
        DecoderBuilder::default()
    }

    /// Decoder with default thresholds and code table driven by `timer`
    ///
    /// # Errors
    /// Never fails with the default thresholds; kept fallible to match [`DecoderBuilder::build`]
    pub fn with_timer(timer: Arc<dyn Timer>) -> Result<Self, DecoderError> {
        Self::builder().timer(timer).build()
    }

    /// Key pressed at `t_ms`
    pub fn press_down(&self, t_ms: u64) {
        // Only cancels timers, which cannot fail
        if let Err(e) = self.shared.process(|machine| machine.press_down(t_ms)) {
            error!(error = %e, "press down failed");
        }
    }

    /// Key released at `t_ms`
    ///
    /// # Errors
    /// Returns [`DecoderError::Timer`] if the gap deadlines cannot be scheduled;
    /// the decoder is left exactly as it was before the call
    pub fn press_up(&self, t_ms: u64) -> Result<(), DecoderError> {
        self.shared.process(|machine| machine.press_up(t_ms))
    }

    /// Key pressed now, according to the decoder's clock
    pub fn press_down_now(&self) {
        self.press_down(self.shared.clock.now_ms());
    }

    /// Key released now, according to the decoder's clock
    ///
    /// # Errors
    /// See [`Decoder::press_up`]
    pub fn press_up_now(&self) -> Result<(), DecoderError> {
        self.press_up(self.shared.clock.now_ms())
    }

    /// Clear the buffer and text, cancel pending deadlines and notify observers
    pub fn reset(&self) {
        if let Err(e) = self.shared.process(Machine::reset) {
            error!(error = %e, "reset failed");
        }
    }

    /// Copy of the current buffer, text and state
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        lock(&self.shared.machine).snapshot()
    }

    /// Register an observer for all future notifications
    pub fn subscribe(&self, observer: Arc<dyn DecoderObserver>) -> Subscription {
        let id = self.shared.next_subscription.fetch_add(1, Ordering::Relaxed);
        lock(&self.shared.observers).push((id, observer));
        debug!(subscription = id, "observer subscribed");
        Subscription {
            id,
            decoder: Arc::downgrade(&self.shared),
        }
    }

    /// Thresholds this decoder was built with
    #[must_use]
    pub fn thresholds(&self) -> Thresholds {
        self.shared.thresholds
    }

    /// Code table used to resolve letters
    #[must_use]
    pub fn code_table(&self) -> &CodeTable {
        &self.shared.table
    }

    /// Reading of the decoder's clock in milliseconds
    #[must_use]
    pub fn now_ms(&self) -> u64 {
        self.shared.clock.now_ms()
    }
}

/// Builder for [`Decoder`]; every option has a default
#[derive(Default)]
pub struct DecoderBuilder {
    dot_max_ms: Option<u64>,
    letter_gap_ms: Option<u64>,
    word_gap_ms: Option<u64>,
    clock: Option<Arc<dyn Clock>>,
    timer: Option<Arc<dyn Timer>>,
    code_table: Option<CodeTable>,
}

impl DecoderBuilder {
    /// Longest press read as a dot (default 150)
    #[must_use]
    pub fn dot_max_ms(mut self, ms: u64) -> Self {
        self.dot_max_ms = Some(ms);
        self
    }

    /// Silence that commits a letter (default 800)
    #[must_use]
    pub fn letter_gap_ms(mut self, ms: u64) -> Self {
        self.letter_gap_ms = Some(ms);
        self
    }

    /// Silence that ends a word (default 1500)
    #[must_use]
    pub fn word_gap_ms(mut self, ms: u64) -> Self {
        self.word_gap_ms = Some(ms);
        self
    }

    /// Take all three thresholds from a config section
    #[must_use]
    pub fn config(self, config: &DecoderConfig) -> Self {
        self.dot_max_ms(config.dot_max_ms)
            .letter_gap_ms(config.letter_gap_ms)
            .word_gap_ms(config.word_gap_ms)
    }

    /// Clock for [`Decoder::press_down_now`] (default: the timer's clock)
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Timer for gap deadlines (default: [`TokioTimer`] on the current runtime)
    #[must_use]
    pub fn timer(mut self, timer: Arc<dyn Timer>) -> Self {
        self.timer = Some(timer);
        self
    }

    /// Code table (default: International Morse letters and digits)
    #[must_use]
    pub fn code_table(mut self, table: CodeTable) -> Self {
        self.code_table = Some(table);
        self
    }

    /// Validate the options and create the decoder
    ///
    /// # Errors
    /// Returns [`DecoderError::ConfigurationInvalid`] for bad thresholds, or
    /// [`DecoderError::Timer`] if no timer was given and no tokio runtime is running
    pub fn build(self) -> Result<Decoder, DecoderError> {
        let defaults = Thresholds::default();
        let thresholds = Thresholds::new(
            self.dot_max_ms.unwrap_or(defaults.dot_max_ms),
            self.letter_gap_ms.unwrap_or(defaults.letter_gap_ms),
            self.word_gap_ms.unwrap_or(defaults.word_gap_ms),
        )?;

        let timer: Arc<dyn Timer> = match self.timer {
            Some(timer) => timer,
            None => Arc::new(TokioTimer::current()?),
        };
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(TimerClock(Arc::clone(&timer))));
        let table = Arc::new(self.code_table.unwrap_or_default());
        let id = NEXT_DECODER_ID.fetch_add(1, Ordering::Relaxed);

        debug!(
            decoder = id,
            dot_max_ms = thresholds.dot_max_ms,
            letter_gap_ms = thresholds.letter_gap_ms,
            word_gap_ms = thresholds.word_gap_ms,
            code_table_len = table.len(),
            "decoder created"
        );

        Ok(Decoder {
            shared: Arc::new(Shared {
                id,
                gate: Mutex::new(()),
                machine: Mutex::new(Machine::new(thresholds, Arc::clone(&table))),
                observers: Mutex::new(Vec::new()),
                next_subscription: AtomicU64::new(1),
                timer,
                clock,
                table,
                thresholds,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::{MockTimer, VirtualTimer};
    use super::observer::MockDecoderObserver;
    use super::Signal::{Dash, Dot};
    use mockall::Sequence;

    #[test]
    fn test_thresholds_validation() {
        assert!(Thresholds::new(150, 800, 1500).is_ok());
        assert!(matches!(
            Thresholds::new(0, 800, 1500),
            Err(DecoderError::ConfigurationInvalid { .. })
        ));
        assert!(matches!(
            Thresholds::new(800, 800, 1500),
            Err(DecoderError::ConfigurationInvalid { .. })
        ));
        assert!(matches!(
            Thresholds::new(150, 1500, 1500),
            Err(DecoderError::ConfigurationInvalid { .. })
        ));
        assert!(matches!(
            Thresholds::new(150, 2000, 1500),
            Err(DecoderError::ConfigurationInvalid { .. })
        ));
    }

    #[test]
    fn test_build_rejects_invalid_thresholds() {
        let result = Decoder::builder()
            .timer(Arc::new(VirtualTimer::new()))
            .letter_gap_ms(100)
            .dot_max_ms(200)
            .build();
        assert!(matches!(
            result,
            Err(DecoderError::ConfigurationInvalid { .. })
        ));
    }

    #[test]
    fn test_build_without_timer_outside_runtime_fails() {
        let result = Decoder::builder().build();
        assert!(matches!(
            result,
            Err(DecoderError::Timer(TimerError::NoRuntime))
        ));
    }

    #[test]
    fn test_build_from_config() {
        let config = DecoderConfig {
            dot_max_ms: 100,
            letter_gap_ms: 400,
            word_gap_ms: 900,
        };
        let decoder = Decoder::builder()
            .timer(Arc::new(VirtualTimer::new()))
            .config(&config)
            .build()
            .unwrap();
        assert_eq!(decoder.thresholds(), Thresholds::new(100, 400, 900).unwrap());
    }

    #[test]
    fn test_timer_failure_rolls_back() {
        let mut timer = MockTimer::new();
        timer.expect_cancel().return_const(());
        timer.expect_now().return_const(0_u64);
        timer.expect_schedule().returning(|_, _, _| {
            Err(TimerError::Unavailable {
                reason: "shut down".to_owned(),
            })
        });

        let mut observer = MockDecoderObserver::new();
        observer.expect_signal_appended().never();

        let decoder = Decoder::with_timer(Arc::new(timer)).unwrap();
        decoder.subscribe(Arc::new(observer));

        decoder.press_down(0);
        let before = decoder.snapshot();
        let result = decoder.press_up(50);

        assert!(matches!(result, Err(DecoderError::Timer(_))));
        assert_eq!(decoder.snapshot(), before);
        assert_eq!(before.state, DecoderState::Pressing);
    }

    #[test]
    fn test_partial_schedule_failure_cancels_letter_timer() {
        let mut timer = MockTimer::new();
        // press_down, rollback and drop each cancel the letter timer
        timer
            .expect_cancel()
            .withf(|id| id.kind == TimerKind::LetterCommit)
            .times(3)
            .return_const(());
        timer
            .expect_cancel()
            .withf(|id| id.kind == TimerKind::WordBreak)
            .times(2)
            .return_const(());
        timer
            .expect_schedule()
            .withf(|id, deadline, _| id.kind == TimerKind::LetterCommit && *deadline == 850)
            .times(1)
            .returning(|_, _, _| Ok(()));
        timer
            .expect_schedule()
            .withf(|id, _, _| id.kind == TimerKind::WordBreak)
            .times(1)
            .returning(|_, _, _| {
                Err(TimerError::Unavailable {
                    reason: "full".to_owned(),
                })
            });

        let decoder = Decoder::with_timer(Arc::new(timer)).unwrap();
        decoder.press_down(0);
        assert!(decoder.press_up(50).is_err());
        assert_eq!(decoder.snapshot().buffer, "");
        assert_eq!(decoder.snapshot().state, DecoderState::Pressing);
    }

    #[test]
    fn test_observer_receives_events_in_order() {
        let timer = Arc::new(VirtualTimer::new());
        let decoder = Decoder::with_timer(timer.clone()).unwrap();

        let mut observer = MockDecoderObserver::new();
        let mut seq = Sequence::new();
        observer
            .expect_signal_appended()
            .withf(|signal, buffer| *signal == Dot && buffer.to_vec() == [Dot])
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());
        observer
            .expect_signal_appended()
            .withf(|signal, buffer| *signal == Dash && buffer.to_vec() == [Dot, Dash])
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());
        observer
            .expect_letter_committed()
            .withf(|letter, signals| *letter == 'A' && signals.to_vec() == [Dot, Dash])
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());
        observer
            .expect_word_break()
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());
        observer
            .expect_letter_committed()
            .withf(|letter, _| *letter == 'E')
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());
        observer
            .expect_reset()
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());
        decoder.subscribe(Arc::new(observer));

        decoder.press_down(0);
        decoder.press_up(50).unwrap();
        timer.advance_to(100);
        decoder.press_down(100);
        decoder.press_up(400).unwrap();
        timer.advance_to(3000);

        decoder.press_down(3000);
        decoder.press_up(3050).unwrap();
        timer.advance_to(4000);
        assert_eq!(decoder.snapshot().text, "A E");

        decoder.reset();
    }

    #[test]
    fn test_unknown_letter_follows_question_mark_commit() {
        let timer = Arc::new(VirtualTimer::new());
        let decoder = Decoder::with_timer(timer.clone()).unwrap();

        let mut observer = MockDecoderObserver::new();
        let mut seq = Sequence::new();
        observer.expect_signal_appended().times(4).return_const(());
        observer
            .expect_letter_committed()
            .withf(|letter, signals| *letter == '?' && signals.to_vec() == [Dash; 4])
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());
        observer
            .expect_unknown_letter()
            .withf(|signals| signals.to_vec() == [Dash; 4])
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());
        decoder.subscribe(Arc::new(observer));

        for start in [0, 400, 800, 1200] {
            decoder.press_down(start);
            decoder.press_up(start + 300).unwrap();
        }
        timer.advance_to(2400);
        assert_eq!(decoder.snapshot().text, "?");
    }

    #[test]
    fn test_unsubscribe_stops_notifications() {
        let timer = Arc::new(VirtualTimer::new());
        let decoder = Decoder::with_timer(timer).unwrap();

        let mut observer = MockDecoderObserver::new();
        observer.expect_signal_appended().times(1).return_const(());
        let subscription = decoder.subscribe(Arc::new(observer));

        decoder.press_down(0);
        decoder.press_up(50).unwrap();
        subscription.unsubscribe();
        decoder.press_down(100);
        decoder.press_up(150).unwrap();
    }

    #[test]
    fn test_dropped_decoder_cancels_timers() {
        let timer = Arc::new(VirtualTimer::new());
        let decoder = Decoder::with_timer(timer.clone()).unwrap();

        decoder.press_down(0);
        decoder.press_up(50).unwrap();
        assert_eq!(timer.pending(), 2);

        drop(decoder);
        assert_eq!(timer.pending(), 0);
        assert_eq!(timer.advance_to(5000), 0);
    }

    #[test]
    fn test_press_now_uses_injected_clock() {
        let timer = Arc::new(VirtualTimer::new());
        let clock = Arc::new(VirtualTimer::new());
        let decoder = Decoder::builder()
            .timer(timer.clone())
            .clock(clock.clone())
            .build()
            .unwrap();

        clock.advance_to(1000);
        decoder.press_down_now();
        clock.advance_to(1400);
        decoder.press_up_now().unwrap();

        assert_eq!(decoder.snapshot().buffer, "-");
        let letter = TimerId::new(decoder.shared.id, TimerKind::LetterCommit);
        assert_eq!(timer.deadline_of(letter), Some(2200));
    }
}
