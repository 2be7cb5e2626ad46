//! Audio output: the device side of the coordinator.

use std::sync::Mutex;

use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, OutputStreamBuilder, Sink};
use thiserror::Error;
use tracing::{debug, info};

use super::pcm::AudioClip;

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("no audio output available: {0}")]
    OutputUnavailable(String),

    #[error("audio output rejected the buffer: {0}")]
    Rejected(String),
}

/// A single-voice audio device.
///
/// `start` replaces whatever is playing. `is_idle` turns true once the clip
/// has played out or was halted. `halt` never fails.
pub trait AudioOutput: Send + Sync {
    fn start(&self, clip: AudioClip) -> Result<(), PlaybackError>;
    fn is_idle(&self) -> bool;
    fn halt(&self);
}

/// rodio-backed output. The device stream is opened once at construction and
/// kept for the process lifetime.
pub struct RodioOutput {
    // In rodio 0.21, OutputStream is the handle; dropping it closes the device
    stream: Mutex<OutputStream>,
    active_sink: Mutex<Option<Sink>>,
}

impl RodioOutput {
    pub fn new() -> Result<Self, PlaybackError> {
        let mut stream = OutputStreamBuilder::open_default_stream()
            .map_err(|e| PlaybackError::OutputUnavailable(e.to_string()))?;
        stream.log_on_drop(false);
        info!("Audio output opened");
        Ok(Self {
            stream: Mutex::new(stream),
            active_sink: Mutex::new(None),
        })
    }
}

impl AudioOutput for RodioOutput {
    fn start(&self, clip: AudioClip) -> Result<(), PlaybackError> {
        if clip.samples.is_empty() {
            return Err(PlaybackError::Rejected("empty clip".into()));
        }

        let sink = {
            let stream = self
                .stream
                .lock()
                .map_err(|_| PlaybackError::OutputUnavailable("stream lock poisoned".into()))?;
            Sink::connect_new(stream.mixer())
        };
        let duration = clip.duration();
        sink.append(SamplesBuffer::new(clip.channels, clip.sample_rate, clip.samples));

        let mut active = self
            .active_sink
            .lock()
            .map_err(|_| PlaybackError::Rejected("sink lock poisoned".into()))?;
        if let Some(previous) = active.replace(sink) {
            previous.stop();
        }
        debug!("Playing clip ({:.1}s)", duration.as_secs_f64());
        Ok(())
    }

    fn is_idle(&self) -> bool {
        match self.active_sink.lock() {
            Ok(guard) => guard.as_ref().is_none_or(Sink::empty),
            Err(_) => true,
        }
    }

    fn halt(&self) {
        if let Ok(mut guard) = self.active_sink.lock() {
            if let Some(sink) = guard.take() {
                sink.stop();
            }
        }
    }
}
