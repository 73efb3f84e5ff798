// src/audio_engine/spill.rs
//
// Disk-spill storage tier. During Record the audio thread pushes finished
// blocks into a per-track input ring; during Play it pops blocks from a
// per-track output ring. A worker on the maintenance thread moves data
// between the rings and one flat file per track, so the audio callback never
// touches the filesystem.

use crate::looper::{AudioBlock, BLOCK_SAMPLES, SILENT_BLOCK};
use anyhow::{Context, Result};
use ringbuf::{HeapConsumer, HeapProducer, HeapRb};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Blocks moved per file operation. 32 blocks is 8 KiB, a comfortable unit
/// for flash/SD-class storage.
pub const SPILL_BATCH_BLOCKS: usize = 32;

/// Capacity of each input/output ring, in blocks (~370 ms at 44.1 kHz).
pub const SPILL_RING_BLOCKS: usize = 128;

const BLOCK_BYTES: usize = BLOCK_SAMPLES * 2;

/// Flags and counters crossing between the audio thread and the worker.
/// Relaxed ordering is enough: each side only samples these between whole
/// blocks or whole batches.
pub struct SpillShared {
    loop_closed: AtomicBool,
    restart: AtomicBool,
    clear: AtomicBool,
    file_blocks: AtomicUsize,
}

impl SpillShared {
    fn new() -> Self {
        Self {
            loop_closed: AtomicBool::new(false),
            restart: AtomicBool::new(false),
            clear: AtomicBool::new(false),
            file_blocks: AtomicUsize::new(0),
        }
    }

    pub fn is_loop_closed(&self) -> bool {
        self.loop_closed.load(Ordering::Relaxed)
    }

    pub fn file_blocks(&self) -> usize {
        self.file_blocks.load(Ordering::Relaxed)
    }
}

/// The audio-thread end of one track's spill storage.
pub struct TrackSpill {
    input_tx: HeapProducer<AudioBlock>,
    output_rx: HeapConsumer<AudioBlock>,
    shared: Arc<SpillShared>,
}

impl TrackSpill {
    /// Queue a recorded block for the worker. Returns false when the ring is
    /// full and the block was dropped (audio is sacrificed, never realtime).
    pub fn push_recorded(&mut self, block: AudioBlock) -> bool {
        self.input_tx.push(block).is_ok()
    }

    /// Next playback block, or silence on underrun.
    pub fn pop_playback(&mut self) -> AudioBlock {
        self.output_rx.pop().unwrap_or(SILENT_BLOCK)
    }

    /// A fresh take is starting: wipe the file and any stale playback data.
    pub fn begin_recording(&mut self) {
        self.shared.loop_closed.store(false, Ordering::Relaxed);
        self.shared.clear.store(true, Ordering::Relaxed);
        self.drain_output();
    }

    /// The take is finished; once the worker has flushed the input ring the
    /// file becomes the loop and the read cursor wraps at its end.
    pub fn finish_recording(&mut self) {
        self.shared.loop_closed.store(true, Ordering::Relaxed);
    }

    /// Rewind playback to the top of the loop.
    pub fn restart_playback(&mut self) {
        self.drain_output();
        self.shared.restart.store(true, Ordering::Relaxed);
    }

    pub fn clear(&mut self) {
        self.shared.loop_closed.store(false, Ordering::Relaxed);
        self.shared.clear.store(true, Ordering::Relaxed);
        self.drain_output();
    }

    fn drain_output(&mut self) {
        while self.output_rx.pop().is_some() {}
    }
}

/// The worker's end of one track's spill storage.
struct SpillLane {
    index: usize,
    input_rx: HeapConsumer<AudioBlock>,
    output_tx: HeapProducer<AudioBlock>,
    shared: Arc<SpillShared>,
    file: File,
    write_blocks: usize,
    read_block: usize,
    closed: bool,
}

pub struct SpillWorker {
    lanes: Vec<SpillLane>,
}

/// Build the spill tier: one (audio side, worker lane) pair per track.
/// Stale `track_*.bin` files from previous sessions are deleted first.
pub fn create(data_dir: &Path, num_tracks: usize) -> Result<(Vec<TrackSpill>, SpillWorker)> {
    fs::create_dir_all(data_dir)
        .with_context(|| format!("creating spill dir {}", data_dir.display()))?;
    remove_stale_files(data_dir)?;

    let mut handles = Vec::with_capacity(num_tracks);
    let mut lanes = Vec::with_capacity(num_tracks);

    for index in 0..num_tracks {
        let path = data_dir.join(format!("track_{}.bin", index));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .with_context(|| format!("opening {}", path.display()))?;

        let (input_tx, input_rx) = HeapRb::<AudioBlock>::new(SPILL_RING_BLOCKS).split();
        let (output_tx, output_rx) = HeapRb::<AudioBlock>::new(SPILL_RING_BLOCKS).split();
        let shared = Arc::new(SpillShared::new());

        handles.push(TrackSpill {
            input_tx,
            output_rx,
            shared: shared.clone(),
        });
        lanes.push(SpillLane {
            index,
            input_rx,
            output_tx,
            shared,
            file,
            write_blocks: 0,
            read_block: 0,
            closed: false,
        });
    }

    Ok((handles, SpillWorker { lanes }))
}

fn remove_stale_files(data_dir: &Path) -> Result<()> {
    for entry in fs::read_dir(data_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with("track_") && name.ends_with(".bin") {
            fs::remove_file(entry.path()).ok();
        }
    }
    Ok(())
}

impl SpillWorker {
    /// One maintenance pass over every lane. Called from the maintenance
    /// thread; file errors are reported and absorbed here, never propagated
    /// toward the audio path.
    pub fn poll(&mut self) {
        for lane in &mut self.lanes {
            if let Err(e) = lane.service() {
                eprintln!("spill: track {}: {}", lane.index, e);
            }
        }
    }
}

impl SpillLane {
    fn service(&mut self) -> Result<()> {
        if self.shared.clear.swap(false, Ordering::Relaxed) {
            self.file.set_len(0)?;
            self.write_blocks = 0;
            self.read_block = 0;
            self.closed = false;
            self.shared.file_blocks.store(0, Ordering::Relaxed);
        }

        self.drain_input()?;

        if !self.closed && self.shared.is_loop_closed() && self.input_rx.is_empty() {
            self.closed = true;
            println!(
                "spill: track {} loop closed ({} blocks)",
                self.index, self.write_blocks
            );
        }

        if self.shared.restart.swap(false, Ordering::Relaxed) {
            self.read_block = 0;
        }

        self.refill_output()?;
        Ok(())
    }

    /// Input ring -> file, in whole batches.
    fn drain_input(&mut self) -> Result<()> {
        let mut buf = [0u8; BLOCK_BYTES * SPILL_BATCH_BLOCKS];
        while !self.input_rx.is_empty() {
            let mut batched = 0;
            while batched < SPILL_BATCH_BLOCKS {
                match self.input_rx.pop() {
                    Some(block) => {
                        let at = batched * BLOCK_BYTES;
                        for (i, s) in block.iter().enumerate() {
                            buf[at + 2 * i..at + 2 * i + 2].copy_from_slice(&s.to_le_bytes());
                        }
                        batched += 1;
                    }
                    None => break,
                }
            }
            if batched == 0 {
                break;
            }
            self.file
                .seek(SeekFrom::Start((self.write_blocks * BLOCK_BYTES) as u64))?;
            self.file.write_all(&buf[..batched * BLOCK_BYTES])?;
            self.write_blocks += batched;
            self.shared
                .file_blocks
                .store(self.write_blocks, Ordering::Relaxed);
        }
        Ok(())
    }

    /// File -> output ring, wrapping the read cursor once the loop is closed.
    fn refill_output(&mut self) -> Result<()> {
        let mut buf = [0u8; BLOCK_BYTES * SPILL_BATCH_BLOCKS];
        loop {
            if self.write_blocks == 0 {
                break;
            }
            let space = self.output_tx.free_len();
            if space == 0 {
                break;
            }
            if self.read_block >= self.write_blocks {
                if self.closed {
                    self.read_block = 0;
                } else {
                    break; // still recording, wait for more data
                }
            }
            let want = space
                .min(SPILL_BATCH_BLOCKS)
                .min(self.write_blocks - self.read_block);
            if want == 0 {
                break;
            }
            self.file
                .seek(SeekFrom::Start((self.read_block * BLOCK_BYTES) as u64))?;
            self.file.read_exact(&mut buf[..want * BLOCK_BYTES])?;
            for b in 0..want {
                let at = b * BLOCK_BYTES;
                let mut block = [0i16; BLOCK_SAMPLES];
                for (i, s) in block.iter_mut().enumerate() {
                    *s = i16::from_le_bytes([buf[at + 2 * i], buf[at + 2 * i + 1]]);
                }
                if self.output_tx.push(block).is_err() {
                    break;
                }
            }
            self.read_block += want;
        }
        Ok(())
    }
}
