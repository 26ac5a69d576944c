//! Audio sources
//!
//! An [`AudioSource`] is a description of where samples come from. It is
//! opened on the analysis thread, which then owns the resulting
//! [`SampleStream`] until the analyzer is detached.

use super::AudioError;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Something the analyzer can attach to
pub trait AudioSource: Send {
    /// Human readable name for logs and the UI
    fn name(&self) -> String;

    /// Acquire the underlying device or file.
    ///
    /// Called on the analysis thread; the returned stream never leaves it.
    fn open(self: Box<Self>) -> Result<Box<dyn SampleStream>, AudioError>;
}

/// An open source of mono samples
pub trait SampleStream {
    /// Sample rate of the samples produced by [`pull`](Self::pull)
    fn sample_rate(&self) -> u32;

    /// Append every sample captured since the previous call to `out`
    fn pull(&mut self, out: &mut Vec<f32>);
}

// ---------------------------------------------------------------------------
// PushSource
// ---------------------------------------------------------------------------

/// In-memory source fed through a [`SampleSender`]
pub struct PushSource {
    name: String,
    sample_rate: u32,
    receiver: Receiver<Vec<f32>>,
}

/// Feeding end of a [`PushSource`]
#[derive(Clone)]
pub struct SampleSender {
    sender: Sender<Vec<f32>>,
}

impl PushSource {
    /// Create a source and the handle used to feed it
    pub fn new(sample_rate: u32) -> (Self, SampleSender) {
        let (sender, receiver) = unbounded();
        (
            Self {
                name: "push".to_string(),
                sample_rate: sample_rate.max(1),
                receiver,
            },
            SampleSender { sender },
        )
    }

    /// Rename the source
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl SampleSender {
    /// Queue mono samples. Returns false once the source has been dropped.
    pub fn send(&self, samples: &[f32]) -> bool {
        self.sender.send(samples.to_vec()).is_ok()
    }
}

struct PushStream {
    sample_rate: u32,
    receiver: Receiver<Vec<f32>>,
}

impl AudioSource for PushSource {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn open(self: Box<Self>) -> Result<Box<dyn SampleStream>, AudioError> {
        Ok(Box::new(PushStream {
            sample_rate: self.sample_rate,
            receiver: self.receiver,
        }))
    }
}

impl SampleStream for PushStream {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn pull(&mut self, out: &mut Vec<f32>) {
        while let Ok(chunk) = self.receiver.try_recv() {
            out.extend_from_slice(&chunk);
        }
    }
}

// ---------------------------------------------------------------------------
// WavClip
// ---------------------------------------------------------------------------

enum ClipData {
    File(PathBuf),
    Memory(Arc<[u8]>),
}

/// A WAV file played out in real time
pub struct WavClip {
    data: ClipData,
    looping: bool,
}

impl WavClip {
    /// Clip read from `path` when the analyzer opens it
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        Self {
            data: ClipData::File(path.as_ref().to_path_buf()),
            looping: false,
        }
    }

    /// Clip decoded from in-memory WAV bytes
    pub fn from_bytes(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            data: ClipData::Memory(bytes.into()),
            looping: false,
        }
    }

    /// Restart from the beginning after the last sample
    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    fn decode(&self) -> Result<(u32, Vec<f32>), AudioError> {
        match &self.data {
            ClipData::File(path) => {
                let reader = hound::WavReader::open(path).map_err(|e| {
                    AudioError::SourceUnavailable(format!("{}: {}", path.display(), e))
                })?;
                decode_mono(reader)
            }
            ClipData::Memory(bytes) => {
                let reader = hound::WavReader::new(Cursor::new(bytes.as_ref()))
                    .map_err(|e| AudioError::SourceUnavailable(e.to_string()))?;
                decode_mono(reader)
            }
        }
    }
}

/// Decode every sample and average interleaved channels down to mono
fn decode_mono<R: std::io::Read>(reader: hound::WavReader<R>) -> Result<(u32, Vec<f32>), AudioError> {
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(|e| AudioError::SourceUnavailable(e.to_string()))?,
        hound::SampleFormat::Int => {
            let scale = 1.0 / (1i64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<Result<_, _>>()
                .map_err(|e| AudioError::SourceUnavailable(e.to_string()))?
        }
    };

    let mono = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect();

    Ok((spec.sample_rate, mono))
}

struct ClipStream {
    sample_rate: u32,
    samples: Vec<f32>,
    looping: bool,
    started: Instant,
    /// Samples handed out so far (not wrapped)
    emitted: u64,
}

impl AudioSource for WavClip {
    fn name(&self) -> String {
        match &self.data {
            ClipData::File(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
            ClipData::Memory(bytes) => format!("wav clip ({} bytes)", bytes.len()),
        }
    }

    fn open(self: Box<Self>) -> Result<Box<dyn SampleStream>, AudioError> {
        let (sample_rate, samples) = self.decode()?;
        if samples.is_empty() {
            return Err(AudioError::SourceUnavailable(format!(
                "{} contains no samples",
                self.name()
            )));
        }
        info!(
            "Opened WAV clip {}: {} samples at {} Hz",
            self.name(),
            samples.len(),
            sample_rate
        );
        Ok(Box::new(ClipStream {
            sample_rate: sample_rate.max(1),
            samples,
            looping: self.looping,
            started: Instant::now(),
            emitted: 0,
        }))
    }
}

impl SampleStream for ClipStream {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn pull(&mut self, out: &mut Vec<f32>) {
        let due = (self.started.elapsed().as_secs_f64() * self.sample_rate as f64) as u64;
        let len = self.samples.len() as u64;
        let target = if self.looping { due } else { due.min(len) };

        while self.emitted < target {
            let pos = (self.emitted % len) as usize;
            let take = ((target - self.emitted) as usize).min(self.samples.len() - pos);
            out.extend_from_slice(&self.samples[pos..pos + take]);
            self.emitted += take as u64;
            if self.looping && pos + take == self.samples.len() {
                debug!("WAV clip wrapped after {} samples", self.emitted);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn wav_bytes(channels: u16, frames: &[[i16; 2]]) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for frame in frames {
                for sample in frame.iter().take(channels as usize) {
                    writer.write_sample(*sample).unwrap();
                }
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_push_source_delivers_in_order() {
        let (source, sender) = PushSource::new(44_100);
        let mut stream = Box::new(source).open().unwrap();
        assert_eq!(stream.sample_rate(), 44_100);

        assert!(sender.send(&[0.1, 0.2]));
        assert!(sender.send(&[0.3]));
        let mut out = Vec::new();
        stream.pull(&mut out);
        assert_eq!(out, vec![0.1, 0.2, 0.3]);

        out.clear();
        stream.pull(&mut out);
        assert!(out.is_empty());

        drop(stream);
        assert!(!sender.send(&[0.4]));
    }

    #[test]
    fn test_wav_downmix_to_mono() {
        let bytes = wav_bytes(2, &[[16384, 0], [-16384, -16384]]);
        let clip = WavClip::from_bytes(bytes);
        let (rate, samples) = clip.decode().unwrap();
        assert_eq!(rate, 8000);
        assert_eq!(samples.len(), 2);
        assert!((samples[0] - 0.25).abs() < 1e-4);
        assert!((samples[1] + 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_wav_missing_file_is_unavailable() {
        let clip = Box::new(WavClip::from_path("/definitely/not/here.wav"));
        assert_eq!(clip.name(), "here.wav");
        assert!(matches!(clip.open(), Err(AudioError::SourceUnavailable(_))));
    }

    #[test]
    fn test_wav_garbage_is_unavailable() {
        let clip = Box::new(WavClip::from_bytes(vec![1u8, 2, 3, 4]));
        assert!(matches!(clip.open(), Err(AudioError::SourceUnavailable(_))));
    }

    #[test]
    fn test_clip_plays_against_wall_clock() {
        let frames = vec![[1000i16, 0]; 80];
        let mut stream = Box::new(WavClip::from_bytes(wav_bytes(1, &frames)))
            .open()
            .unwrap();

        // 80 samples at 8 kHz last 10 ms
        std::thread::sleep(Duration::from_millis(30));
        let mut out = Vec::new();
        stream.pull(&mut out);
        assert_eq!(out.len(), 80);

        out.clear();
        stream.pull(&mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn test_looping_clip_keeps_producing() {
        let frames = vec![[1000i16, 0]; 80];
        let mut stream = Box::new(WavClip::from_bytes(wav_bytes(1, &frames)).looping(true))
            .open()
            .unwrap();

        std::thread::sleep(Duration::from_millis(30));
        let mut out = Vec::new();
        stream.pull(&mut out);
        assert!(out.len() > 80, "got {}", out.len());
    }
}
