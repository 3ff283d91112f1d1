// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands for the playback engine
//!
//! This module provides command-line functionality for:
//! - Playing files to the virtual devices with an interactive console
//! - Listing supported formats
//! - Reporting virtual device availability
//! - Probing a single source

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::time::Duration;
use streamforge::backends::decoder::GstSourceFactory;
use streamforge::backends::devices;
use streamforge::backends::sink;
use streamforge::backends::virtual_camera::VirtualCameraSink;
use streamforge::backends::virtual_microphone::VirtualMicrophoneSink;
use streamforge::constants::{VirtualCameraOutput, timing};
use streamforge::media::{FORMAT_TABLE, MediaSource, SourceFactory, classify};
use streamforge::{Config, PlaybackController};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Options for the `play` command
pub struct PlayOptions {
    pub paths: Vec<PathBuf>,
    pub looping: bool,
    pub shuffle: bool,
    pub output: Option<String>,
    pub config: Option<PathBuf>,
}

/// A parsed console line
#[derive(Debug, Clone, PartialEq)]
enum ConsoleCommand {
    Play,
    Pause,
    Next,
    Previous,
    Stop,
    Seek(Duration),
    Status,
    List,
    Reset,
    Loop(bool),
    Shuffle(bool),
    Help,
    Quit,
}

const CONSOLE_HELP: &str = "commands: play, pause, next, prev, stop, seek <secs>, status, \
                            list, reset, loop on|off, shuffle on|off, help, quit";

fn parse_switch(arg: Option<&str>) -> Result<bool, String> {
    match arg {
        Some("on") => Ok(true),
        Some("off") => Ok(false),
        _ => Err("expected 'on' or 'off'".into()),
    }
}

fn parse_command(line: &str) -> Result<ConsoleCommand, String> {
    let mut words = line.split_whitespace();
    let Some(command) = words.next() else {
        return Err("empty command".into());
    };
    let arg = words.next();

    match command {
        "play" => Ok(ConsoleCommand::Play),
        "pause" => Ok(ConsoleCommand::Pause),
        "next" => Ok(ConsoleCommand::Next),
        "prev" | "previous" => Ok(ConsoleCommand::Previous),
        "stop" => Ok(ConsoleCommand::Stop),
        "seek" => {
            let secs: f64 = arg
                .ok_or("seek needs a position in seconds")?
                .parse()
                .map_err(|_| "seek position must be a number".to_string())?;
            if !secs.is_finite() || secs < 0.0 {
                return Err("seek position must be non-negative".into());
            }
            Ok(ConsoleCommand::Seek(Duration::from_secs_f64(secs)))
        }
        "status" => Ok(ConsoleCommand::Status),
        "list" | "ls" => Ok(ConsoleCommand::List),
        "reset" => Ok(ConsoleCommand::Reset),
        "loop" => parse_switch(arg).map(ConsoleCommand::Loop),
        "shuffle" => parse_switch(arg).map(ConsoleCommand::Shuffle),
        "help" | "?" => Ok(ConsoleCommand::Help),
        "quit" | "exit" | "q" => Ok(ConsoleCommand::Quit),
        other => Err(format!("unknown command '{}'", other)),
    }
}

fn load_config(options: &PlayOptions) -> CliResult<Config> {
    let mut config = match options.config.as_deref() {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if options.looping {
        config.playlist.looping = true;
    }
    if options.shuffle {
        config.playlist.shuffle = true;
    }
    if let Some(output) = options.output.as_deref() {
        config.output = output.parse::<VirtualCameraOutput>()?;
    }
    config.validate()?;
    Ok(config)
}

/// Play files to the virtual devices and run the console until quit or Ctrl+C
pub fn play(options: PlayOptions) -> CliResult<()> {
    let config = load_config(&options)?;

    if let Some(reason) = devices::unavailable_reason(config.output) {
        eprintln!(
            "Warning: {} output unavailable: {}",
            config.output.display_name(),
            reason
        );
    }

    let factory = Arc::new(GstSourceFactory::new(&config));
    let video_sink = sink::shared(VirtualCameraSink::new(&config));
    let audio_sink = sink::shared(VirtualMicrophoneSink::new(&config));
    let controller = PlaybackController::new(config, factory, video_sink, audio_sink)?;

    let report = controller.load(options.paths.as_slice());
    println!("{}", serde_json::to_string_pretty(&report)?);
    if report.accepted.is_empty() {
        return Err("No playable entries".into());
    }
    if let Err(e) = controller.play() {
        eprintln!("play: {}", e);
    }

    // Set up Ctrl+C handler
    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_flag_clone = stop_flag.clone();
    ctrlc::set_handler(move || {
        stop_flag_clone.store(true, Ordering::SeqCst);
    })?;

    // stdin blocks, so lines arrive from a reader thread
    let (lines_tx, lines) = mpsc::channel();
    std::thread::Builder::new()
        .name("console-input".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if lines_tx.send(line).is_err() {
                    break;
                }
            }
        })?;

    println!("{}", CONSOLE_HELP);
    let mut status = controller.subscribe();
    let mut last_state = status.borrow().state;

    loop {
        if stop_flag.load(Ordering::SeqCst) {
            println!();
            println!("Stopping...");
            break;
        }

        if status.has_changed().unwrap_or(false) {
            let snapshot = status.borrow_and_update().clone();
            if snapshot.state != last_state {
                last_state = snapshot.state;
                match &snapshot.error {
                    Some(error) => {
                        println!("[{}] {:?}: {}", snapshot.state, error.reason, error.message)
                    }
                    None => println!("[{}]", snapshot.state),
                }
            }
        }

        let line = match lines.recv_timeout(timing::STATUS_REFRESH_INTERVAL) {
            Ok(line) => line,
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            // stdin closed; keep playing until Ctrl+C
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                std::thread::sleep(timing::STATUS_REFRESH_INTERVAL);
                continue;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let command = match parse_command(&line) {
            Ok(command) => command,
            Err(e) => {
                eprintln!("{}", e);
                continue;
            }
        };

        let result = match command {
            ConsoleCommand::Play => controller.play(),
            ConsoleCommand::Pause => controller.pause(),
            ConsoleCommand::Next => controller.next(),
            ConsoleCommand::Previous => controller.previous(),
            ConsoleCommand::Stop => controller.stop(),
            ConsoleCommand::Seek(position) => controller.seek(position),
            ConsoleCommand::Reset => controller.reset(),
            ConsoleCommand::Loop(on) => {
                controller.set_loop(on);
                Ok(())
            }
            ConsoleCommand::Shuffle(on) => {
                controller.set_shuffle(on);
                Ok(())
            }
            ConsoleCommand::Status => {
                println!("{}", serde_json::to_string_pretty(&controller.status())?);
                Ok(())
            }
            ConsoleCommand::List => {
                for entry in controller.entries() {
                    println!(
                        "  {} {} [{}]{}{}",
                        entry.id,
                        entry.descriptor.path.display(),
                        entry.descriptor.kind,
                        if entry.repeat { " repeat" } else { "" },
                        if entry.skip { " skip" } else { "" }
                    );
                }
                Ok(())
            }
            ConsoleCommand::Help => {
                println!("{}", CONSOLE_HELP);
                Ok(())
            }
            ConsoleCommand::Quit => break,
        };
        if let Err(e) = result {
            eprintln!("{:?}: {}", e.kind(), e);
        }
    }

    controller.stop()?;
    Ok(())
}

/// Print the allow-list table
pub fn list_formats() -> CliResult<()> {
    println!("Supported formats:");
    println!();
    for rule in FORMAT_TABLE {
        println!(
            "  .{:<6} {:<6} {}",
            rule.extension,
            rule.kind.to_string(),
            rule.decoder_hint
        );
    }
    println!();
    println!("  /dev/video*  camera v4l2src");
    Ok(())
}

/// Report virtual device availability and list video device nodes
pub fn list_devices() -> CliResult<()> {
    println!("Virtual camera outputs:");
    for output in VirtualCameraOutput::ALL {
        match devices::unavailable_reason(output) {
            None => println!("  {:<14} available", output.display_name()),
            Some(reason) => println!("  {:<14} unavailable ({})", output.display_name(), reason),
        }
    }
    println!();
    println!(
        "Virtual microphone: {}",
        if devices::pipewire_available() {
            "available"
        } else {
            "unavailable (GStreamer pipewiresink plugin not found)"
        }
    );
    println!();

    let video_devices = devices::video_devices();
    if video_devices.is_empty() {
        println!("No video devices found.");
        return Ok(());
    }
    println!("Video devices:");
    for device in video_devices {
        println!(
            "  {} {}{}",
            device.path.display(),
            device.name,
            if device.loopback { " (loopback)" } else { "" }
        );
    }
    Ok(())
}

/// Open one source and print what the decoder found
pub fn probe(path: &Path, config: Option<&Path>) -> CliResult<()> {
    let config = match config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if !path.exists() {
        return Err(format!("{} does not exist", path.display()).into());
    }

    let descriptor = classify(path)?;
    let factory = GstSourceFactory::new(&config);
    let mut media = factory.open(&descriptor)?;

    println!("Path:     {}", descriptor.path.display());
    println!("Kind:     {}", descriptor.kind);
    println!("Decoder:  {}", descriptor.decoder_hint);
    match media.duration {
        Some(duration) => println!("Duration: {:.3}s", duration.as_secs_f64()),
        None => println!("Duration: unknown"),
    }
    println!("Seekable: {}", media.seekable());
    println!(
        "Streams:  {}{}",
        if media.video.is_some() { "video " } else { "" },
        if media.audio.is_some() { "audio" } else { "" }
    );

    if let Some(video) = media.video.as_mut() {
        video.close();
    }
    if let Some(audio) = media.audio.as_mut() {
        audio.close();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse_command("play"), Ok(ConsoleCommand::Play));
        assert_eq!(parse_command("  prev "), Ok(ConsoleCommand::Previous));
        assert_eq!(
            parse_command("seek 1.5"),
            Ok(ConsoleCommand::Seek(Duration::from_millis(1500)))
        );
        assert_eq!(parse_command("loop on"), Ok(ConsoleCommand::Loop(true)));
        assert_eq!(parse_command("shuffle off"), Ok(ConsoleCommand::Shuffle(false)));
    }

    #[test]
    fn test_parse_rejects_bad_arguments() {
        assert!(parse_command("seek").is_err());
        assert!(parse_command("seek -3").is_err());
        assert!(parse_command("loop maybe").is_err());
        assert!(parse_command("rewind").is_err());
        assert!(parse_command("").is_err());
    }
}
