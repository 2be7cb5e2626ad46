//! The speech playback coordinator.
//!
//! One instance owns all spoken output of the process. A new `play` stops the
//! running session before starting its own (stop-before-start, never queued).
//! Chunks are synthesized and played strictly one after another, with a short
//! pause between paragraphs.
//!
//! Session state lives behind a single mutex. Starting a clip re-checks the
//! session id under that mutex, so a superseded session can never become
//! audible again. Listener events are queued under the same mutex and
//! delivered outside it, in order, so listeners may call back into the
//! coordinator.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::chunker::split_paragraphs;
use super::output::{AudioOutput, PlaybackError};
use super::pcm::{decode_pcm16, AudioClip};
use super::synth::SpeechSynthesizer;
use crate::config::SpeechConfig;

/// Called with `(is_speaking, key)` on every state transition.
pub type Listener = Arc<dyn Fn(bool, Option<&str>) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Loading,
    Speaking,
    Stopped,
}

impl PlaybackState {
    pub fn is_active(self) -> bool {
        matches!(self, Self::Loading | Self::Speaking)
    }
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "IDLE"),
            Self::Loading => write!(f, "LOADING"),
            Self::Speaking => write!(f, "SPEAKING"),
            Self::Stopped => write!(f, "STOPPED"),
        }
    }
}

/// One in-flight `play` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackSession {
    pub id: u64,
    pub key: String,
    pub chunks: Vec<String>,
    pub state: PlaybackState,
}

impl PlaybackSession {
    /// Returns `None` when the text has nothing to say.
    fn new(id: u64, key: &str, text: &str) -> Option<Self> {
        let chunks = split_paragraphs(text);
        if chunks.is_empty() {
            return None;
        }
        Some(Self {
            id,
            key: key.to_string(),
            chunks,
            state: PlaybackState::Loading,
        })
    }
}

#[derive(Debug, Clone)]
pub struct PlaybackSettings {
    /// Silence inserted between two chunks.
    pub paragraph_pause: Duration,
    /// Upper bound for one synthesis request; expiry counts as a failed chunk.
    pub chunk_timeout: Duration,
    pub poll_interval: Duration,
    pub sample_rate: u32,
    pub default_language: String,
}

impl From<&SpeechConfig> for PlaybackSettings {
    fn from(config: &SpeechConfig) -> Self {
        Self {
            paragraph_pause: Duration::from_millis(config.paragraph_pause_ms),
            chunk_timeout: Duration::from_secs(config.request_timeout_secs),
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
            sample_rate: config.sample_rate,
            default_language: config.default_language.clone(),
        }
    }
}

struct Event {
    speaking: bool,
    key: Option<String>,
}

struct Inner {
    session: Option<PlaybackSession>,
    last_state: PlaybackState,
    next_id: u64,
    pending: VecDeque<Event>,
}

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: Vec<(u64, Listener)>,
}

/// Handle returned by [`SpeechCoordinator::subscribe`].
pub struct Subscription {
    id: u64,
    listeners: Weak<Mutex<Listeners>>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(listeners) = self.listeners.upgrade() {
            let mut guard = listeners.lock().unwrap_or_else(PoisonError::into_inner);
            guard.entries.retain(|(id, _)| *id != self.id);
        }
    }
}

pub struct SpeechCoordinator {
    synth: Arc<dyn SpeechSynthesizer>,
    output: Arc<dyn AudioOutput>,
    settings: PlaybackSettings,
    inner: Mutex<Inner>,
    listeners: Arc<Mutex<Listeners>>,
    dispatch: Mutex<()>,
}

impl SpeechCoordinator {
    pub fn new(
        synth: Arc<dyn SpeechSynthesizer>,
        output: Arc<dyn AudioOutput>,
        settings: PlaybackSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            synth,
            output,
            settings,
            inner: Mutex::new(Inner {
                session: None,
                last_state: PlaybackState::Idle,
                next_id: 0,
                pending: VecDeque::new(),
            }),
            listeners: Arc::new(Mutex::new(Listeners::default())),
            dispatch: Mutex::new(()),
        })
    }

    /// Read `text` aloud on behalf of `key`, superseding any running session.
    ///
    /// Fire-and-forget: the returned handle may be dropped. Returns `None`
    /// (after stopping the previous session) when `text` is blank.
    pub fn play(self: &Arc<Self>, text: &str, key: &str, language: Option<&str>) -> Option<JoinHandle<()>> {
        let session = {
            let mut inner = self.lock();
            self.end_active(&mut inner, PlaybackState::Stopped);
            inner.pending.push_back(Event {
                speaking: false,
                key: None,
            });

            inner.next_id += 1;
            let session = PlaybackSession::new(inner.next_id, key, text);
            if let Some(session) = &session {
                inner.session = Some(session.clone());
                inner.pending.push_back(Event {
                    speaking: true,
                    key: Some(key.to_string()),
                });
            }
            session
        };
        self.flush_events();

        let Some(session) = session else {
            debug!("Nothing to read for {key}");
            return None;
        };

        let language = language
            .unwrap_or(&self.settings.default_language)
            .to_string();
        info!(
            "Session {} [{key}]: {} chunk(s), language {language}",
            session.id,
            session.chunks.len()
        );

        let coordinator = Arc::clone(self);
        Some(tokio::spawn(async move {
            coordinator.run_session(session, language).await;
        }))
    }

    /// Halt any audio and end the active session. Safe to call at any time.
    pub fn stop(&self) {
        {
            let mut inner = self.lock();
            if !self.end_active(&mut inner, PlaybackState::Stopped) {
                self.output.halt();
            }
            inner.pending.push_back(Event {
                speaking: false,
                key: None,
            });
        }
        self.flush_events();
    }

    /// True while `key` owns the active (loading or speaking) session.
    pub fn is_currently_reading(&self, key: &str) -> bool {
        self.lock()
            .session
            .as_ref()
            .is_some_and(|s| s.key == key && s.state.is_active())
    }

    pub fn is_speaking(&self) -> bool {
        self.lock().session.is_some()
    }

    pub fn state(&self) -> PlaybackState {
        let inner = self.lock();
        inner
            .session
            .as_ref()
            .map_or(inner.last_state, |s| s.state)
    }

    pub fn current_session(&self) -> Option<PlaybackSession> {
        self.lock().session.clone()
    }

    pub fn subscribe(&self, listener: impl Fn(bool, Option<&str>) + Send + Sync + 'static) -> Subscription {
        let mut guard = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        guard.next_id += 1;
        let id = guard.next_id;
        guard.entries.push((id, Arc::new(listener)));
        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    async fn run_session(self: Arc<Self>, session: PlaybackSession, language: String) {
        let id = session.id;
        // Releases the session if this task panics or is aborted.
        let _guard = SessionGuard {
            coordinator: Arc::clone(&self),
            id,
        };
        let total = session.chunks.len();
        let mut played = 0;

        for (i, chunk) in session.chunks.iter().enumerate() {
            if !self.is_current(id) {
                info!("Session {id} superseded before chunk {}/{total}", i + 1);
                return;
            }

            let request = self.synth.synthesize(chunk, &language);
            let payload = match tokio::time::timeout(self.settings.chunk_timeout, request).await {
                Ok(Ok(Some(payload))) => payload,
                Ok(Ok(None)) => {
                    warn!("No audio for chunk {}/{total}, skipping", i + 1);
                    continue;
                }
                Ok(Err(e)) => {
                    warn!("Synthesis failed for chunk {}/{total}: {e}", i + 1);
                    continue;
                }
                Err(_) => {
                    warn!(
                        "Synthesis timed out after {:?} for chunk {}/{total}",
                        self.settings.chunk_timeout,
                        i + 1
                    );
                    continue;
                }
            };

            if !self.is_current(id) {
                info!("Session {id} superseded after synthesizing chunk {}/{total}", i + 1);
                return;
            }

            let clip = match decode_pcm16(&payload, self.settings.sample_rate, 1) {
                Ok(clip) => clip,
                Err(e) => {
                    warn!("Undecodable audio for chunk {}/{total}: {e}", i + 1);
                    continue;
                }
            };

            match self.start_clip(id, clip) {
                Ok(true) => {}
                Ok(false) => return,
                Err(e) => {
                    warn!("Playback failed in session {id}: {e}");
                    self.end_session(id, PlaybackState::Stopped);
                    return;
                }
            }

            if !self.wait_for_clip(id).await {
                info!("Session {id} stopped during chunk {}/{total}", i + 1);
                return;
            }
            played += 1;
            debug!("Chunk {}/{total} of session {id} done", i + 1);

            if i + 1 < total && !self.settings.paragraph_pause.is_zero() {
                tokio::time::sleep(self.settings.paragraph_pause).await;
            }
        }

        if played == 0 {
            warn!("Session {id}: none of {total} chunk(s) produced audio");
        }
        self.end_session(id, PlaybackState::Idle);
    }

    /// Hand the clip to the output unless the session was superseded.
    fn start_clip(&self, id: u64, clip: AudioClip) -> Result<bool, PlaybackError> {
        let mut inner = self.lock();
        let Some(session) = inner.session.as_mut().filter(|s| s.id == id) else {
            return Ok(false);
        };
        self.output.start(clip)?;
        session.state = PlaybackState::Speaking;
        Ok(true)
    }

    /// Returns false if the session ended before the clip finished.
    async fn wait_for_clip(&self, id: u64) -> bool {
        loop {
            if !self.is_current(id) {
                return false;
            }
            if self.output.is_idle() {
                return true;
            }
            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }

    fn is_current(&self, id: u64) -> bool {
        self.lock().session.as_ref().is_some_and(|s| s.id == id)
    }

    /// End session `id` if it is still the active one.
    fn end_session(&self, id: u64, outcome: PlaybackState) {
        {
            let mut inner = self.lock();
            if !inner.session.as_ref().is_some_and(|s| s.id == id) {
                return;
            }
            self.end_active(&mut inner, outcome);
            inner.pending.push_back(Event {
                speaking: false,
                key: None,
            });
        }
        self.flush_events();
    }

    /// Drop the active session, halting output unless it finished naturally.
    fn end_active(&self, inner: &mut Inner, outcome: PlaybackState) -> bool {
        let Some(session) = inner.session.take() else {
            return false;
        };
        if outcome != PlaybackState::Idle {
            self.output.halt();
        }
        inner.last_state = outcome;
        info!("Session {} [{}] -> {outcome}", session.id, session.key);
        true
    }

    fn flush_events(&self) {
        loop {
            // Whoever holds the dispatch lock drains the queue for everyone.
            let dispatching = match self.dispatch.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => return,
            };
            loop {
                // The state lock must not be held while listeners run.
                let next = self.lock().pending.pop_front();
                let Some(event) = next else {
                    break;
                };
                let listeners: Vec<Listener> = self
                    .listeners
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .entries
                    .iter()
                    .map(|(_, l)| Arc::clone(l))
                    .collect();
                for listener in listeners {
                    listener(event.speaking, event.key.as_deref());
                }
            }
            drop(dispatching);
            if self.lock().pending.is_empty() {
                return;
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct SessionGuard {
    coordinator: Arc<SpeechCoordinator>,
    id: u64,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.coordinator.end_session(self.id, PlaybackState::Stopped);
    }
}
