//! Decoder shared between tasks on a multi-thread runtime while gap timers fire

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use morse_key::{Decoder, DecoderObserver, DecoderState, Signal};
use tokio::time::sleep;

/// Rebuilds the text from notifications and flags overlapping calls
#[derive(Default)]
struct Recorder {
    busy: AtomicBool,
    overlapped: AtomicBool,
    text: Mutex<String>,
}

impl Recorder {
    fn record(&self, update: impl FnOnce(&mut String)) {
        if self.busy.swap(true, Ordering::SeqCst) {
            self.overlapped.store(true, Ordering::SeqCst);
        }
        // Widen the window in which a second notification could sneak in
        std::thread::sleep(Duration::from_micros(200));
        update(&mut self.text.lock().unwrap());
        self.busy.store(false, Ordering::SeqCst);
    }
}

impl DecoderObserver for Recorder {
    fn signal_appended(&self, _signal: Signal, _buffer: &[Signal]) {
        self.record(|_| {});
    }

    fn letter_committed(&self, letter: char, _signals: &[Signal]) {
        self.record(|text| text.push(letter));
    }

    fn word_break(&self) {
        self.record(|text| text.push(' '));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_notifications_never_interleave() {
    let decoder = Decoder::builder()
        .dot_max_ms(4)
        .letter_gap_ms(8)
        .word_gap_ms(20)
        .build()
        .unwrap();
    let recorder = Arc::new(Recorder::default());
    let _subscription = decoder.subscribe(recorder.clone());

    let mut tasks = Vec::new();
    for worker in 0..4_u64 {
        let decoder = decoder.clone();
        tasks.push(tokio::spawn(async move {
            for i in 0..40_u64 {
                decoder.press_down_now();
                sleep(Duration::from_millis((i + worker) % 3 * 4)).await;
                decoder.press_up_now().unwrap();
                sleep(Duration::from_millis((i * 7 + worker) % 30)).await;
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    sleep(Duration::from_millis(200)).await;

    let snapshot = decoder.snapshot();
    assert!(!recorder.overlapped.load(Ordering::SeqCst));
    assert_eq!(snapshot.state, DecoderState::Idle);
    assert_eq!(snapshot.buffer, "");
    assert!(!snapshot.text.is_empty());
    assert!(!snapshot.text.starts_with(' '));
    assert!(!snapshot.text.contains("  "));
    assert_eq!(*recorder.text.lock().unwrap(), snapshot.text);
}
