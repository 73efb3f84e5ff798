// src/main.rs

use anyhow::Result;
use ringbuf::HeapRb;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use stomploop::audio_engine::{spill, Looper, LooperHandle};
use stomploop::audio_io;
use stomploop::looper::SAMPLE_RATE;
use stomploop::settings;

fn main() -> Result<()> {
    let settings = settings::load_settings();

    let host_id = settings
        .host_name
        .as_deref()
        .and_then(|name| {
            cpal::available_hosts()
                .into_iter()
                .find(|id| id.name() == name)
        })
        .unwrap_or_else(|| cpal::default_host().id());

    let spill_parts = if settings.spill_to_disk {
        let dir = settings
            .data_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("loops"));
        println!("Spilling loops to {}", dir.display());
        Some(spill::create(&dir, settings.num_loops)?)
    } else {
        None
    };
    let (spill_handles, spill_worker) = match spill_parts {
        Some((handles, worker)) => (Some(handles), Some(worker)),
        None => (None, None),
    };

    let (engine, mut handle) =
        Looper::create(settings.num_loops, settings.arena_samples, spill_handles);

    if let Some(mut worker) = spill_worker {
        thread::Builder::new()
            .name("spill-maintenance".into())
            .spawn(move || loop {
                worker.poll();
                thread::sleep(Duration::from_millis(5));
            })?;
    }

    // One second of captured audio between the input and output callbacks.
    let input_rb = HeapRb::<i16>::new(SAMPLE_RATE as usize);
    let (input_producer, input_consumer) = input_rb.split();
    let xrun_count = Arc::new(AtomicUsize::new(0));

    let (_input_stream, _output_stream, active_sr, active_bs) = audio_io::init_and_run_streams(
        host_id,
        settings.input_device.clone(),
        settings.output_device.clone(),
        settings.sample_rate.or(Some(SAMPLE_RATE)),
        settings.buffer_size,
        input_producer,
        input_consumer,
        engine,
        xrun_count.clone(),
    )?;

    println!(
        "stomploop: {} tracks at {} Hz (host buffer {} samples)",
        settings.num_loops, active_sr, active_bs
    );
    print_help();

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let mut parts = line.split_whitespace();
        match parts.next() {
            None | Some("t") => handle.trigger(),
            Some("r") => handle.reset(),
            Some("o") => match parts.next().and_then(|s| s.parse::<usize>().ok()) {
                Some(track) => handle.toggle_overdub(track),
                None => println!("usage: o <track>"),
            },
            Some("m") => {
                let track = parts.next().and_then(|s| s.parse::<usize>().ok());
                let muted = parts.next().map(|s| s == "on");
                match (track, muted) {
                    (Some(track), Some(muted)) => handle.mute(track, muted),
                    _ => println!("usage: m <track> on|off"),
                }
            }
            Some("v") => {
                let track = parts.next().and_then(|s| s.parse::<usize>().ok());
                let gain = parts.next().and_then(|s| s.parse::<f32>().ok());
                match (track, gain) {
                    (Some(track), Some(gain)) => handle.set_volume(track, gain),
                    _ => println!("usage: v <track> <gain>"),
                }
            }
            Some("d") => match parts.next().and_then(|s| s.parse::<f32>().ok()) {
                Some(p) => handle.smart_mute(p.clamp(0.0, 1.0)),
                None => println!("usage: d <0.0..1.0>"),
            },
            Some("s") => print_status(&handle, &xrun_count),
            Some("q") => break,
            Some(other) => println!("unknown command '{}'", other),
        }
    }

    settings::save_settings(&settings);
    Ok(())
}

fn print_help() {
    println!("commands:");
    println!("  t (or enter)  trigger (record / play / next layer / stop)");
    println!("  r             reset everything");
    println!("  o <n>         toggle overdub on track n");
    println!("  m <n> on|off  mute / unmute track n");
    println!("  v <n> <gain>  set track n volume");
    println!("  d <p>         loop depth knob (0.0 = only track 0)");
    println!("  s             status");
    println!("  q             quit");
}

fn print_status(handle: &LooperHandle, xrun_count: &Arc<AtomicUsize>) {
    let state = if handle.is_idle() {
        "idle"
    } else if handle.is_recording() {
        "recording"
    } else if handle.is_playing() {
        "playing"
    } else {
        "stopped"
    };
    let waiting = if handle.is_waiting() { " (waiting)" } else { "" };
    println!(
        "{}{} | playhead {}/{} blocks | xruns {}",
        state,
        waiting,
        handle.playhead(),
        handle.timeline(),
        xrun_count.load(Ordering::Relaxed)
    );
    for i in 0..handle.num_tracks() {
        let blocks = handle.track_timeline_blocks(i);
        if blocks == 0 {
            continue;
        }
        println!(
            "  track {}: {:?}, {} blocks{}",
            i,
            handle.track_state(i),
            blocks,
            if handle.track_is_muted(i) { ", muted" } else { "" }
        );
    }
}
