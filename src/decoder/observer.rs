use std::sync::Weak;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

use super::signal::Signal;
use super::Shared;

/// Receiver of decoder notifications
///
/// Called after the decoder has released its state lock, so implementations may
/// call [`super::Decoder::snapshot`]. Feeding edges back into the same decoder
/// from inside a notification deadlocks.
#[cfg_attr(test, mockall::automock)]
pub trait DecoderObserver: Send + Sync {
    /// A release produced `signal`; `buffer` is the in-progress letter including it
    fn signal_appended(&self, _signal: Signal, _buffer: &[Signal]) {}

    /// `letter` was appended to the text (`'?'` for unrecognized `signals`)
    fn letter_committed(&self, _letter: char, _signals: &[Signal]) {}

    /// `signals` matched no table entry; follows the `'?'` commit
    fn unknown_letter(&self, _signals: &[Signal]) {}

    /// A space was appended to the text
    fn word_break(&self) {}

    /// All state was cleared
    fn reset(&self) {}
}

/// Owned form of one decoder notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecoderEvent {
    /// See [`DecoderObserver::signal_appended`]
    SignalAppended {
        /// New signal
        signal: Signal,
        /// Buffer after the append
        buffer: Vec<Signal>,
    },
    /// See [`DecoderObserver::letter_committed`]
    LetterCommitted {
        /// Appended character
        letter: char,
        /// Signals the character was decoded from
        signals: Vec<Signal>,
    },
    /// See [`DecoderObserver::unknown_letter`]
    UnknownLetter {
        /// Unrecognized signals
        signals: Vec<Signal>,
    },
    /// See [`DecoderObserver::word_break`]
    WordBreak,
    /// See [`DecoderObserver::reset`]
    Reset,
}

impl DecoderEvent {
    /// Deliver this event to the matching observer method
    pub fn notify(&self, observer: &dyn DecoderObserver) {
        match self {
            Self::SignalAppended { signal, buffer } => observer.signal_appended(*signal, buffer),
            Self::LetterCommitted { letter, signals } => {
                observer.letter_committed(*letter, signals);
            }
            Self::UnknownLetter { signals } => observer.unknown_letter(signals),
            Self::WordBreak => observer.word_break(),
            Self::Reset => observer.reset(),
        }
    }
}

/// Observer forwarding every notification into a tokio channel
pub struct ChannelObserver {
    sender: UnboundedSender<DecoderEvent>,
}

impl ChannelObserver {
    /// Create the observer and the receiving end of its channel
    #[must_use]
    pub fn new() -> (Self, UnboundedReceiver<DecoderEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    fn forward(&self, event: DecoderEvent) {
        if self.sender.send(event).is_err() {
            debug!("decoder event receiver dropped, discarding event");
        }
    }
}

impl DecoderObserver for ChannelObserver {
    fn signal_appended(&self, signal: Signal, buffer: &[Signal]) {
        self.forward(DecoderEvent::SignalAppended {
            signal,
            buffer: buffer.to_vec(),
        });
    }

    fn letter_committed(&self, letter: char, signals: &[Signal]) {
        self.forward(DecoderEvent::LetterCommitted {
            letter,
            signals: signals.to_vec(),
        });
    }

    fn unknown_letter(&self, signals: &[Signal]) {
        self.forward(DecoderEvent::UnknownLetter {
            signals: signals.to_vec(),
        });
    }

    fn word_break(&self) {
        self.forward(DecoderEvent::WordBreak);
    }

    fn reset(&self) {
        self.forward(DecoderEvent::Reset);
    }
}

/// Handle returned by [`super::Decoder::subscribe`]
///
/// Dropping the handle keeps the observer registered; call
/// [`Subscription::unsubscribe`] to remove it.
#[derive(Debug)]
pub struct Subscription {
    pub(super) id: u64,
    pub(super) decoder: Weak<Shared>,
}

impl Subscription {
    /// Stop delivering notifications to the observer
    ///
    /// No-op if the decoder has already been dropped.
    pub fn unsubscribe(self) {
        if let Some(shared) = self.decoder.upgrade() {
            shared.remove_observer(self.id);
        }
    }
}
