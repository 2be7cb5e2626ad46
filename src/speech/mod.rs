//! Speech playback: chunked remote TTS with one reading session at a time.
//!
//! Components:
//! - `chunker`: paragraph and step-heading splitting
//! - `synth`: remote synthesis port + Gemini client
//! - `pcm`: base64 PCM16 decoding into playable clips
//! - `output`: audio device port + rodio playback
//! - `coordinator`: the play/stop/subscribe authority

pub mod chunker;
pub mod coordinator;
pub mod output;
pub mod pcm;
pub mod synth;

pub use coordinator::{PlaybackSession, PlaybackSettings, PlaybackState, SpeechCoordinator, Subscription};
