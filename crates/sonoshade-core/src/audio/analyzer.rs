//! Threaded spectrum analyzer
//!
//! The analysis thread owns the open [`SampleStream`](super::SampleStream)
//! and a [`FeatureExtractor`]. Every `analysis_interval` it pulls new samples,
//! and whenever a transform completes it publishes the frame to the
//! lock-free slot and then to subscribers, in that order.

use super::{AnalyzerConfig, AudioError, AudioSource, FeatureExtractor};
use crate::features::AudioFeatureFrame;
use crate::listeners::{Listeners, Subscription};
use arc_swap::ArcSwap;
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use tracing::{debug, info, warn};

struct Worker {
    source_name: String,
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

/// Audio feature producer with a single-writer, multi-reader frame slot
pub struct SpectrumAnalyzer {
    config: AnalyzerConfig,
    latest: Arc<ArcSwap<AudioFeatureFrame>>,
    listeners: Listeners<AudioFeatureFrame>,
    worker: Mutex<Option<Worker>>,
}

impl SpectrumAnalyzer {
    /// Create a detached analyzer
    pub fn new(config: AnalyzerConfig) -> Self {
        Self {
            config: config.sanitized(),
            latest: Arc::new(ArcSwap::from_pointee(AudioFeatureFrame::silent())),
            listeners: Listeners::new(),
            worker: Mutex::new(None),
        }
    }

    /// Open `source` on a new analysis thread and start producing frames.
    ///
    /// Any previously attached source is released first. If the source
    /// cannot be opened the analyzer stays detached.
    pub fn attach(&self, source: Box<dyn AudioSource>) -> Result<(), AudioError> {
        self.detach();

        let source_name = source.name();
        let (ready_tx, ready_rx) = bounded::<Result<u32, AudioError>>(1);
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let config = self.config.clone();
        let latest = Arc::clone(&self.latest);
        let listeners = self.listeners.clone();
        let interval = config.analysis_interval();

        let handle = thread::Builder::new()
            .name("sonoshade-analyzer".to_string())
            .spawn(move || {
                let mut stream = match source.open() {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let sample_rate = stream.sample_rate();
                let _ = ready_tx.send(Ok(sample_rate));

                let mut extractor = FeatureExtractor::new(&config, sample_rate);
                // Sequence numbers continue across re-attach
                let base_sequence = latest.load().sequence;
                let mut buffer = Vec::with_capacity(config.fft_size * 4);

                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }

                    buffer.clear();
                    stream.pull(&mut buffer);
                    if !extractor.process_samples(&buffer) {
                        continue;
                    }

                    let mut frame = extractor.frame();
                    frame.sequence += base_sequence;
                    latest.store(Arc::new(frame));
                    listeners.emit(&frame);
                }

                debug!(
                    "Analysis thread exiting after {} frames",
                    extractor.frames_computed()
                );
            })
            .map_err(|e| AudioError::SourceUnavailable(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(sample_rate)) => {
                info!("Analyzer attached to {} at {} Hz", source_name, sample_rate);
                *self.worker.lock() = Some(Worker {
                    source_name,
                    stop: stop_tx,
                    handle,
                });
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                warn!("Failed to attach {}: {}", source_name, e);
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(AudioError::SourceUnavailable(format!(
                    "analysis thread for {} exited during open",
                    source_name
                )))
            }
        }
    }

    /// Stop analysis and release the source. Idempotent; the last frame
    /// stays readable.
    pub fn detach(&self) {
        let Some(worker) = self.worker.lock().take() else {
            return;
        };

        let _ = worker.stop.send(());
        // A subscriber detaching from inside its callback runs on the worker
        if worker.handle.thread().id() != current_thread_id() && worker.handle.join().is_err() {
            warn!("Analysis thread for {} panicked", worker.source_name);
        }
        info!("Analyzer detached from {}", worker.source_name);
    }

    /// Most recent frame; all-zero before the first analysis. Never blocks.
    pub fn latest_frame(&self) -> AudioFeatureFrame {
        **self.latest.load()
    }

    /// Register a callback invoked on the analysis thread for every new frame
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&AudioFeatureFrame) + Send + Sync + 'static,
    {
        self.listeners.subscribe(callback)
    }

    /// True while a source is attached
    pub fn is_attached(&self) -> bool {
        self.worker.lock().is_some()
    }

    /// Name of the attached source
    pub fn source_name(&self) -> Option<String> {
        self.worker.lock().as_ref().map(|w| w.source_name.clone())
    }

    /// Effective configuration
    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }
}

impl Default for SpectrumAnalyzer {
    fn default() -> Self {
        Self::new(AnalyzerConfig::default())
    }
}

impl Drop for SpectrumAnalyzer {
    fn drop(&mut self) {
        self.detach();
    }
}

fn current_thread_id() -> ThreadId {
    thread::current().id()
}
