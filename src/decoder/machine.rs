use std::sync::Arc;
use tracing::{debug, info};

use super::observer::DecoderEvent;
use super::signal::{self, Signal};
use super::{DecoderState, Snapshot, Thresholds, MAX_SIGNALS_PER_LETTER};
use crate::code_table::CodeTable;
use crate::timer::TimerKind;

/// Side effect requested by the machine, carried out by the decoder shell
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum Command {
    Cancel(TimerKind),
    Schedule {
        kind: TimerKind,
        deadline_ms: u64,
        epoch: u64,
    },
    Emit(DecoderEvent),
}

/// Timing-driven decoder core (pure, testable)
///
/// Holds all mutable decoder state. Every handler returns the commands the
/// shell must execute, in order. Cloned before each event so a failed timer
/// operation can restore the previous state.
#[derive(Debug, Clone)]
pub(super) struct Machine {
    thresholds: Thresholds,
    table: Arc<CodeTable>,
    state: DecoderState,
    press_start: u64,
    buffer: Vec<Signal>,
    text: String,
    /// Word gap elapsed; a space goes in before the next committed letter
    space_pending: bool,
    epoch: u64,
}

impl Machine {
    pub(super) fn new(thresholds: Thresholds, table: Arc<CodeTable>) -> Self {
        Self {
            thresholds,
            table,
            state: DecoderState::Idle,
            press_start: 0,
            buffer: Vec::with_capacity(MAX_SIGNALS_PER_LETTER),
            text: String::new(),
            space_pending: false,
            epoch: 0,
        }
    }

    #[cfg(test)]
    pub(super) const fn epoch(&self) -> u64 {
        self.epoch
    }

    pub(super) fn snapshot(&self) -> Snapshot {
        Snapshot {
            buffer: signal::render(&self.buffer),
            text: self.text.clone(),
            state: self.state,
        }
    }

    pub(super) fn press_down(&mut self, t_ms: u64) -> Vec<Command> {
        match self.state {
            DecoderState::Pressing => {
                debug!(t_ms, "key down while pressing (ignored)");
                Vec::new()
            }
            DecoderState::Idle | DecoderState::AwaitingNext => {
                debug!(t_ms, from = ?self.state, "key down: → Pressing");
                self.state = DecoderState::Pressing;
                self.press_start = t_ms;
                self.epoch += 1;
                vec![
                    Command::Cancel(TimerKind::LetterCommit),
                    Command::Cancel(TimerKind::WordBreak),
                ]
            }
        }
    }

    pub(super) fn press_up(&mut self, t_ms: u64) -> Vec<Command> {
        if self.state != DecoderState::Pressing {
            debug!(t_ms, state = ?self.state, "key up without key down (dropped)");
            return Vec::new();
        }

        // A clock that went backwards counts as a zero-length press
        let duration = t_ms.saturating_sub(self.press_start);
        let signal = Signal::from_duration(duration, self.thresholds.dot_max_ms());
        self.buffer.push(signal);
        self.state = DecoderState::AwaitingNext;
        debug!(
            duration_ms = duration,
            signal = %signal,
            buffer = %signal::render(&self.buffer),
            "key up: Pressing → AwaitingNext"
        );

        let mut commands = vec![Command::Emit(DecoderEvent::SignalAppended {
            signal,
            buffer: self.buffer.clone(),
        })];

        if self.buffer.len() >= MAX_SIGNALS_PER_LETTER {
            debug!("signal buffer full, committing immediately");
            self.flush_letter(&mut commands);
        } else {
            commands.push(Command::Schedule {
                kind: TimerKind::LetterCommit,
                deadline_ms: t_ms.saturating_add(self.thresholds.letter_gap_ms()),
                epoch: self.epoch,
            });
        }
        commands.push(Command::Schedule {
            kind: TimerKind::WordBreak,
            deadline_ms: t_ms.saturating_add(self.thresholds.word_gap_ms()),
            epoch: self.epoch,
        });
        commands
    }

    pub(super) fn letter_gap_elapsed(&mut self, epoch: u64) -> Vec<Command> {
        if epoch != self.epoch || self.state != DecoderState::AwaitingNext {
            debug!(epoch, current = self.epoch, "stale letter timer (discarded)");
            return Vec::new();
        }

        let mut commands = Vec::new();
        self.flush_letter(&mut commands);
        commands
    }

    pub(super) fn word_gap_elapsed(&mut self, epoch: u64) -> Vec<Command> {
        if epoch != self.epoch || self.state != DecoderState::AwaitingNext {
            debug!(epoch, current = self.epoch, "stale word timer (discarded)");
            return Vec::new();
        }

        let mut commands = Vec::new();
        self.flush_letter(&mut commands);
        if !self.text.is_empty() && !self.text.ends_with(' ') {
            self.space_pending = true;
        }
        self.state = DecoderState::Idle;
        debug!(space_pending = self.space_pending, "word gap: AwaitingNext → Idle");
        commands
    }

    pub(super) fn reset(&mut self) -> Vec<Command> {
        info!(
            text_len = self.text.len(),
            buffer = %signal::render(&self.buffer),
            "decoder reset"
        );
        self.state = DecoderState::Idle;
        self.buffer.clear();
        self.text.clear();
        self.space_pending = false;
        self.epoch += 1;
        vec![
            Command::Cancel(TimerKind::LetterCommit),
            Command::Cancel(TimerKind::WordBreak),
            Command::Emit(DecoderEvent::Reset),
        ]
    }

    /// Consume the buffer as one letter; no-op if empty
    fn flush_letter(&mut self, commands: &mut Vec<Command>) {
        if self.buffer.is_empty() {
            return;
        }

        if self.space_pending {
            self.space_pending = false;
            self.text.push(' ');
            commands.push(Command::Emit(DecoderEvent::WordBreak));
            debug!("word break");
        }

        let signals = std::mem::take(&mut self.buffer);
        match self.table.decode(&signals) {
            Some(letter) => {
                info!(letter = %letter, code = %signal::render(&signals), "letter committed");
                self.text.push(letter);
                commands.push(Command::Emit(DecoderEvent::LetterCommitted { letter, signals }));
            }
            None => {
                info!(code = %signal::render(&signals), "unrecognized signal sequence");
                self.text.push('?');
                commands.push(Command::Emit(DecoderEvent::LetterCommitted {
                    letter: '?',
                    signals: signals.clone(),
                }));
                commands.push(Command::Emit(DecoderEvent::UnknownLetter { signals }));
            }
        }
    }
}
