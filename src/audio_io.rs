// src/audio_io.rs

use crate::audio_engine::Looper;
use crate::looper::{AudioBlock, BLOCK_SAMPLES, SILENT_BLOCK};
use anyhow::Result;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, Device, FromSample, HostId, Sample, SampleFormat, Stream, StreamConfig};
use ringbuf::{HeapConsumer, HeapProducer};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Captured audio allowed to queue between the input and output callbacks;
/// older samples are skipped so monitor latency stays bounded.
const MAX_QUEUED_INPUT_SAMPLES: usize = BLOCK_SAMPLES * 8;

#[allow(clippy::too_many_arguments)]
pub fn init_and_run_streams(
    host_id: HostId,
    input_device_name: Option<String>,
    output_device_name: Option<String>,
    requested_sample_rate: Option<u32>,
    requested_buffer_size: Option<u32>,
    audio_input_producer: HeapProducer<i16>,
    audio_input_consumer: HeapConsumer<i16>,
    engine: Looper,
    xrun_count: Arc<AtomicUsize>,
) -> Result<(Stream, Stream, u32, u32)> {
    let host = cpal::host_from_id(host_id)?;
    let input_device = if let Some(name) = &input_device_name {
        host.input_devices()?
            .find(|d| d.name().ok().as_ref() == Some(name))
            .ok_or_else(|| anyhow::anyhow!("Input device not found: {}", name))?
    } else {
        host.default_input_device()
            .ok_or_else(|| anyhow::anyhow!("No default input device"))?
    };
    let output_device = if let Some(name) = &output_device_name {
        host.output_devices()?
            .find(|d| d.name().ok().as_ref() == Some(name))
            .ok_or_else(|| anyhow::anyhow!("Output device not found: {}", name))?
    } else {
        host.default_output_device()
            .ok_or_else(|| anyhow::anyhow!("No default output device"))?
    };
    println!("Using input device: {}", input_device.name()?);
    println!("Using output device: {}", output_device.name()?);

    let default_input_config = input_device.default_input_config()?;
    let default_output_config = output_device.default_output_config()?;

    let sample_format = default_output_config.sample_format();

    let mut final_input_config: StreamConfig = default_input_config.into();
    if let Some(sr) = requested_sample_rate {
        final_input_config.sample_rate = cpal::SampleRate(sr);
    }
    if let Some(bs) = requested_buffer_size {
        final_input_config.buffer_size = BufferSize::Fixed(bs);
    }

    let mut final_output_config: StreamConfig = default_output_config.into();
    if let Some(sr) = requested_sample_rate {
        final_output_config.sample_rate = cpal::SampleRate(sr);
    }
    if let Some(bs) = requested_buffer_size {
        final_output_config.buffer_size = BufferSize::Fixed(bs);
    }

    fn run<T>(
        input_device: &Device,
        input_config: &StreamConfig,
        output_device: &Device,
        output_config: &StreamConfig,
        audio_producer: HeapProducer<i16>,
        audio_consumer: HeapConsumer<i16>,
        engine: Looper,
        xrun_count: Arc<AtomicUsize>,
    ) -> Result<(Stream, Stream)>
    where
        T: Sample + cpal::SizedSample + FromSample<f32>,
        f32: FromSample<T>,
    {
        let input_stream =
            build_input_stream::<T>(input_device, input_config, audio_producer, xrun_count.clone())?;
        let output_stream =
            build_output_stream::<T>(output_device, output_config, audio_consumer, engine, xrun_count)?;
        input_stream.play()?;
        output_stream.play()?;
        Ok((input_stream, output_stream))
    }

    let (input_stream, output_stream) = match sample_format {
        SampleFormat::F32 => run::<f32>(
            &input_device,
            &final_input_config,
            &output_device,
            &final_output_config,
            audio_input_producer,
            audio_input_consumer,
            engine,
            xrun_count,
        )?,
        SampleFormat::I16 => run::<i16>(
            &input_device,
            &final_input_config,
            &output_device,
            &final_output_config,
            audio_input_producer,
            audio_input_consumer,
            engine,
            xrun_count,
        )?,
        SampleFormat::U16 => run::<u16>(
            &input_device,
            &final_input_config,
            &output_device,
            &final_output_config,
            audio_input_producer,
            audio_input_consumer,
            engine,
            xrun_count,
        )?,
        format => return Err(anyhow::anyhow!("Unsupported sample format {}", format)),
    };

    let active_sr = final_output_config.sample_rate.0;
    let active_bs = match final_output_config.buffer_size {
        BufferSize::Fixed(size) => size,
        BufferSize::Default => 512, // A reasonable assumption if default
    };

    println!(
        "Successfully started streams with Sample Rate: {} Hz, Buffer Size: {} Samples",
        active_sr, active_bs
    );

    Ok((input_stream, output_stream, active_sr, active_bs))
}

fn build_input_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut producer: HeapProducer<i16>,
    xrun_count: Arc<AtomicUsize>,
) -> Result<Stream>
where
    T: Sample + cpal::SizedSample,
    f32: FromSample<T>,
{
    let err_fn = {
        let xrun_count_clone = xrun_count.clone();
        move |err| {
            eprintln!("an error occurred on input stream: {}", err);
            xrun_count_clone.fetch_add(1, Ordering::Relaxed);
        }
    };
    let channels = config.channels as usize;

    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            for frame in data.chunks(channels) {
                let mono =
                    frame.iter().map(|s| f32::from_sample(*s)).sum::<f32>() / (channels as f32);
                let sample = (mono * 32767.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
                if producer.push(sample).is_err() {
                    // buffer full, drop sample
                }
            }
        },
        err_fn,
        None,
    )?;
    Ok(stream)
}

fn build_output_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut consumer: HeapConsumer<i16>,
    mut engine: Looper,
    xrun_count: Arc<AtomicUsize>,
) -> Result<Stream>
where
    T: Sample + cpal::SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    let err_fn = {
        let xrun_count_clone = xrun_count.clone();
        move |err| {
            eprintln!("an error occurred on output stream: {}", err);
            xrun_count_clone.fetch_add(1, Ordering::Relaxed);
        }
    };

    // The host hands us buffers of arbitrary length; the engine only speaks
    // whole blocks. Blocks are produced on demand and carried across host
    // buffer boundaries.
    let mut in_buf: AudioBlock = SILENT_BLOCK;
    let mut out_buf: AudioBlock = SILENT_BLOCK;
    let mut carry_pos: usize = BLOCK_SAMPLES;

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            engine.handle_commands();

            let queued = consumer.len();
            if queued > MAX_QUEUED_INPUT_SAMPLES {
                consumer.skip(queued - MAX_QUEUED_INPUT_SAMPLES);
            }

            for frame in data.chunks_mut(channels) {
                if carry_pos >= BLOCK_SAMPLES {
                    let popped = consumer.pop_slice(&mut in_buf);
                    for slot in in_buf[popped..].iter_mut() {
                        *slot = 0;
                    }
                    out_buf = SILENT_BLOCK;
                    if popped > 0 {
                        let filled = in_buf;
                        engine.update(Some(&filled), &mut out_buf);
                    } else {
                        engine.update(None, &mut out_buf);
                    }
                    carry_pos = 0;
                }
                let sample = out_buf[carry_pos] as f32 / 32768.0;
                carry_pos += 1;
                for out in frame.iter_mut() {
                    *out = T::from_sample(sample);
                }
            }
        },
        err_fn,
        None,
    )?;
    Ok(stream)
}
