//! Demo driver: type `d`/`u` lines to key, decoded text is printed as it commits.

use anyhow::{Context, Result};
use morse_key::config::Config;
use morse_key::decoder::signal::render;
use morse_key::decoder::ChannelObserver;
use morse_key::{telemetry, Decoder, DecoderEvent, TokioTimer};
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

/// One line of stdin input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Down,
    Up,
    Reset,
    Snapshot,
    Quit,
}

fn parse_command(line: &str) -> Option<Command> {
    match line.trim().to_ascii_lowercase().as_str() {
        "d" | "down" => Some(Command::Down),
        "u" | "up" => Some(Command::Up),
        "r" | "reset" => Some(Command::Reset),
        "s" | "snapshot" => Some(Command::Snapshot),
        "q" | "quit" => Some(Command::Quit),
        _ => None,
    }
}

#[allow(clippy::print_stdout)]
fn print_event(event: &DecoderEvent) {
    match event {
        DecoderEvent::SignalAppended { signal, .. } => print!("{signal}"),
        DecoderEvent::LetterCommitted { letter, .. } => println!(" => {letter}"),
        DecoderEvent::UnknownLetter { signals } => {
            println!("    (no letter for {})", render(signals));
        }
        DecoderEvent::WordBreak => println!("[space]"),
        DecoderEvent::Reset => println!("[cleared]"),
    }
    if let Err(e) = std::io::stdout().flush() {
        debug!(error = %e, "stdout flush failed");
    }
}

#[tokio::main]
#[allow(clippy::print_stdout)]
async fn main() -> Result<()> {
    let config = Config::load()?;
    telemetry::init(&config.telemetry)?;
    tracing::info!("morse-key starting");

    let timer = Arc::new(TokioTimer::current().context("failed to create timer")?);
    let decoder = Decoder::builder()
        .config(&config.decoder)
        .timer(timer)
        .build()
        .context("failed to build decoder")?;

    let (observer, mut events) = ChannelObserver::new();
    let _subscription = decoder.subscribe(Arc::new(observer));

    let thresholds = decoder.thresholds();
    println!(
        "Keying: d = key down, u = key up, r = reset, s = snapshot, q = quit \
         (dot <= {} ms, letter gap {} ms, word gap {} ms)",
        thresholds.dot_max_ms(),
        thresholds.letter_gap_ms(),
        thresholds.word_gap_ms()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };
                match parse_command(&line) {
                    Some(Command::Down) => decoder.press_down_now(),
                    Some(Command::Up) => decoder.press_up_now()?,
                    Some(Command::Reset) => decoder.reset(),
                    Some(Command::Snapshot) => {
                        let snapshot = decoder.snapshot();
                        println!(
                            "text={:?} buffer={:?} state={}",
                            snapshot.text, snapshot.buffer, snapshot.state
                        );
                    }
                    Some(Command::Quit) => break,
                    None => debug!(line = %line, "unrecognized command"),
                }
            }
            Some(event) = events.recv() => print_event(&event),
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received");
                break;
            }
        }
    }

    println!("\n{}", decoder.snapshot().text);
    tracing::info!("morse-key exiting");
    Ok(())
}
