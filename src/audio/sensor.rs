//! cpal-backed microphone sensor.
//!
//! `cpal::Stream` is not `Send` on every platform, so the stream lives on a
//! dedicated OS thread that owns the whole device lifecycle.  The
//! [`CpalAudioSource`] handle only talks to that thread over a control
//! channel, which keeps the handle itself `Send` and lets it sit inside the
//! recording orchestrator behind an async mutex.
//!
//! Capture runs at the preferred sample rate when the hardware accepts it,
//! otherwise at the device's native default.  `stop()` downmixes to mono
//! and encodes 16-bit PCM WAV at whichever rate was actually used; the
//! remote STT endpoint accepts any rate, so no resampling happens here.

use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use super::{AudioError, AudioSource};

// ---------------------------------------------------------------------------
// WAV encoding
// ---------------------------------------------------------------------------

/// Encode interleaved f32 samples as 16-bit mono PCM WAV.
///
/// Multi-channel input is downmixed by averaging each frame.  Returns an
/// empty buffer for empty input or an encoder failure (logged) — callers
/// treat empty as "nothing captured".
pub fn encode_wav(samples: &[f32], sample_rate: u32, channels: u16) -> Vec<u8> {
    if samples.is_empty() || channels == 0 {
        return Vec::new();
    }

    let mono: Vec<f32> = if channels > 1 {
        samples
            .chunks(channels as usize)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    } else {
        samples.to_vec()
    };

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = match hound::WavWriter::new(&mut cursor, spec) {
            Ok(w) => w,
            Err(e) => {
                log::error!("audio: WAV writer init failed: {e}");
                return Vec::new();
            }
        };
        for sample in mono {
            let pcm = (sample.clamp(-1.0, 1.0) * 32_767.0) as i16;
            if let Err(e) = writer.write_sample(pcm) {
                log::error!("audio: WAV write failed: {e}");
                return Vec::new();
            }
        }
        if let Err(e) = writer.finalize() {
            log::error!("audio: WAV finalize failed: {e}");
            return Vec::new();
        }
    }
    cursor.into_inner()
}

// ---------------------------------------------------------------------------
// Capture worker
// ---------------------------------------------------------------------------

enum Ctl {
    Start(std_mpsc::SyncSender<Result<(), String>>),
    Stop(std_mpsc::SyncSender<Vec<u8>>),
}

/// State the worker thread holds while a capture cycle is open.
struct ActiveCapture {
    _stream: cpal::Stream,
    buffer: Arc<Mutex<Vec<f32>>>,
    sample_rate: u32,
    channels: u16,
}

fn open_capture(preferred_rate: u32) -> Result<ActiveCapture, String> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| "no input device".to_string())?;

    let supported = device
        .default_input_config()
        .map_err(|e| format!("default input config: {e}"))?;
    let channels = supported.channels();
    let native_rate = supported.sample_rate().0;

    let buffer: Arc<Mutex<Vec<f32>>> = Arc::new(Mutex::new(Vec::new()));

    let build = |rate: u32| {
        let config = cpal::StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(rate),
            buffer_size: cpal::BufferSize::Default,
        };
        let sink = Arc::clone(&buffer);
        device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                sink.lock().unwrap().extend_from_slice(data);
            },
            |err: cpal::StreamError| {
                log::error!("cpal stream error: {err}");
            },
            None,
        )
    };

    // Preferred rate first, device native as the fallback.
    let (stream, sample_rate) = match build(preferred_rate) {
        Ok(s) => (s, preferred_rate),
        Err(_) => {
            log::warn!(
                "audio: hardware rejected {preferred_rate} Hz, using native {native_rate} Hz"
            );
            let s = build(native_rate).map_err(|e| format!("build input stream: {e}"))?;
            (s, native_rate)
        }
    };

    stream.play().map_err(|e| format!("start stream: {e}"))?;
    log::info!("audio: capture active ({sample_rate} Hz, {channels} ch)");

    Ok(ActiveCapture {
        _stream: stream,
        buffer,
        sample_rate,
        channels,
    })
}

fn capture_worker(preferred_rate: u32, ctl_rx: std_mpsc::Receiver<Ctl>) {
    let mut active: Option<ActiveCapture> = None;

    while let Ok(ctl) = ctl_rx.recv() {
        match ctl {
            Ctl::Start(ack) => {
                if active.is_some() {
                    let _ = ack.send(Ok(()));
                    continue;
                }
                match open_capture(preferred_rate) {
                    Ok(capture) => {
                        active = Some(capture);
                        let _ = ack.send(Ok(()));
                    }
                    Err(e) => {
                        let _ = ack.send(Err(e));
                    }
                }
            }
            Ctl::Stop(reply) => {
                let bytes = match active.take() {
                    Some(capture) => {
                        // Dropping the stream stops the hardware before we
                        // read the buffer.
                        let ActiveCapture {
                            _stream,
                            buffer,
                            sample_rate,
                            channels,
                        } = capture;
                        drop(_stream);
                        let samples = std::mem::take(&mut *buffer.lock().unwrap());
                        encode_wav(&samples, sample_rate, channels)
                    }
                    None => Vec::new(),
                };
                let _ = reply.send(bytes);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// CpalAudioSource
// ---------------------------------------------------------------------------

/// Production [`AudioSource`] backed by the dedicated capture thread.
pub struct CpalAudioSource {
    ctl_tx: std_mpsc::Sender<Ctl>,
    recording: bool,
}

impl CpalAudioSource {
    /// Spawn the capture worker.  No device is touched until `start()`.
    pub fn new(preferred_rate: u32) -> Self {
        let (ctl_tx, ctl_rx) = std_mpsc::channel();
        std::thread::Builder::new()
            .name("audio-capture".into())
            .spawn(move || capture_worker(preferred_rate, ctl_rx))
            .expect("failed to spawn audio-capture thread");

        Self {
            ctl_tx,
            recording: false,
        }
    }
}

impl AudioSource for CpalAudioSource {
    fn start(&mut self) -> Result<(), AudioError> {
        if self.recording {
            return Ok(());
        }

        let (ack_tx, ack_rx) = std_mpsc::sync_channel(1);
        self.ctl_tx
            .send(Ctl::Start(ack_tx))
            .map_err(|e| AudioError::Worker(e.to_string()))?;

        match ack_rx.recv() {
            Ok(Ok(())) => {
                self.recording = true;
                Ok(())
            }
            Ok(Err(e)) => Err(AudioError::Stream(e)),
            Err(e) => Err(AudioError::Worker(e.to_string())),
        }
    }

    fn stop(&mut self) -> Vec<u8> {
        self.recording = false;

        let (reply_tx, reply_rx) = std_mpsc::sync_channel(1);
        if self.ctl_tx.send(Ctl::Stop(reply_tx)).is_err() {
            return Vec::new();
        }
        reply_rx.recv().unwrap_or_default()
    }

    fn is_recording(&self) -> bool {
        self.recording
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_encodes_to_empty_buffer() {
        assert!(encode_wav(&[], 16_000, 1).is_empty());
        assert!(encode_wav(&[0.5], 16_000, 0).is_empty());
    }

    #[test]
    fn mono_round_trip_preserves_format() {
        let samples = vec![0.0f32; 1600];
        let wav = encode_wav(&samples, 16_000, 1);
        assert!(!wav.is_empty());

        let reader = hound::WavReader::new(std::io::Cursor::new(wav)).expect("valid wav");
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, 16_000);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(reader.len(), 1600);
    }

    #[test]
    fn stereo_input_is_downmixed_to_mono() {
        // 4 stereo frames.
        let samples = vec![0.5, -0.5, 1.0, 1.0, 0.0, 0.0, -1.0, -1.0];
        let wav = encode_wav(&samples, 48_000, 2);

        let mut reader = hound::WavReader::new(std::io::Cursor::new(wav)).expect("valid wav");
        let decoded: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(decoded.len(), 4);
        assert_eq!(decoded[0], 0); // (0.5 + -0.5) / 2
        assert_eq!(decoded[1], 32_767); // clipped full-scale
        assert_eq!(decoded[3], -32_767);
    }

    #[test]
    fn sample_values_are_clamped() {
        let wav = encode_wav(&[2.0, -2.0], 16_000, 1);
        let mut reader = hound::WavReader::new(std::io::Cursor::new(wav)).expect("valid wav");
        let decoded: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(decoded, vec![32_767, -32_767]);
    }
}
