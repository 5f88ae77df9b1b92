//! Verification gate - the entry point the companion app calls
//!
//! Owns the injected collaborators and enforces last-request-wins: at most
//! one attempt is in flight, and starting a new verify/enroll cancels the
//! previous one. A superseded attempt resolves as `Rejected(Cancelled)` and is
//! never published on the decision feed.

use super::decision::{AuthDecision, EnrollDecision, RejectReason};
use super::extractor::{self, FeatureExtractor};
use super::matcher::{CosineMatcher, Matcher};
use super::session::{SessionKind, SessionState, VerificationSession};
use super::store::{StorageError, TemplateStore};
use crate::audio::AudioInput;
use crate::config::{AppConfig, VerificationConfig};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

/// Capacity of the decision feed
const DECISION_FEED_CAPACITY: usize = 16;

/// Collaborators shared by every session
#[derive(Clone)]
pub struct GateContext {
    pub extractor: Arc<dyn FeatureExtractor>,
    pub store: Arc<TemplateStore>,
    pub matcher: Arc<dyn Matcher>,
}

impl GateContext {
    pub fn new(
        extractor: Arc<dyn FeatureExtractor>,
        store: Arc<TemplateStore>,
        matcher: Arc<dyn Matcher>,
    ) -> Self {
        Self {
            extractor,
            store,
            matcher,
        }
    }

    /// Configured extractor and cosine matcher over `store`
    pub fn from_config(config: &AppConfig, store: TemplateStore) -> Self {
        Self::new(
            extractor::from_config(&config.extractor),
            Arc::new(store),
            Arc::new(CosineMatcher),
        )
    }
}

/// Terminal decision published to subscribers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GateDecision {
    Auth(AuthDecision),
    Enroll(EnrollDecision),
}

struct ActiveAttempt {
    id: u64,
    token: CancellationToken,
}

/// Releases the in-flight slot if the attempt future is dropped early
struct AttemptGuard<'a> {
    gate: &'a VoiceGate,
    id: u64,
}

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        let mut active = self.gate.lock_active();
        if active.as_ref().map(|a| a.id) == Some(self.id) {
            if let Some(attempt) = active.take() {
                attempt.token.cancel();
                self.gate.state_tx.send_replace(SessionState::Rejected);
            }
        }
    }
}

pub struct VoiceGate {
    context: GateContext,
    config: VerificationConfig,
    active: Mutex<Option<ActiveAttempt>>,
    next_id: AtomicU64,
    decisions: broadcast::Sender<GateDecision>,
    state_tx: watch::Sender<SessionState>,
}

impl VoiceGate {
    pub fn new(context: GateContext, config: VerificationConfig) -> Self {
        let (decisions, _) = broadcast::channel(DECISION_FEED_CAPACITY);
        let (state_tx, _) = watch::channel(SessionState::Idle);

        log::info!(
            "Voice gate ready: threshold={:.2}, timeout={}ms, dim={}",
            config.threshold,
            config.timeout_ms,
            context.extractor.dim()
        );

        Self {
            context,
            config,
            active: Mutex::new(None),
            next_id: AtomicU64::new(1),
            decisions,
            state_tx,
        }
    }

    pub fn context(&self) -> &GateContext {
        &self.context
    }

    pub fn config(&self) -> &VerificationConfig {
        &self.config
    }

    /// Non-cancelled terminal decisions, in completion order
    pub fn subscribe(&self) -> broadcast::Receiver<GateDecision> {
        self.decisions.subscribe()
    }

    /// State of the most recent attempt
    pub fn state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Whether an attempt is currently in flight
    pub fn is_busy(&self) -> bool {
        self.lock_active().is_some()
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, Option<ActiveAttempt>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the in-flight slot, cancelling whatever held it
    fn begin(&self) -> (AttemptGuard<'_>, CancellationToken) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let token = CancellationToken::new();

        let mut active = self.lock_active();
        if let Some(previous) = active.replace(ActiveAttempt {
            id,
            token: token.clone(),
        }) {
            log::info!(
                "Attempt #{} superseded by #{}, cancelling",
                previous.id,
                id
            );
            previous.token.cancel();
        }

        (AttemptGuard { gate: self, id }, token)
    }

    /// Release the slot if this attempt still owns it, publishing its terminal
    /// state and, unless it was cancelled, its decision. Returns false when a
    /// newer attempt superseded this one; that attempt owns both feeds.
    fn finish(&self, guard: &AttemptGuard<'_>, decision: GateDecision, terminal: SessionState) -> bool {
        let mut active = self.lock_active();
        if active.as_ref().map(|a| a.id) != Some(guard.id) {
            return false;
        }
        active.take();

        // Published under the slot lock so a newer attempt's states come after
        self.state_tx.send_replace(terminal);
        let cancelled = match &decision {
            GateDecision::Auth(auth) => auth.is_cancelled(),
            GateDecision::Enroll(enroll) => enroll.error() == Some(RejectReason::Cancelled),
        };
        if !cancelled {
            // No subscribers is fine
            let _ = self.decisions.send(decision);
        }
        true
    }

    /// Cancel the in-flight attempt, if any
    pub fn cancel(&self) {
        if let Some(attempt) = self.lock_active().as_ref() {
            log::info!("Cancelling attempt #{}", attempt.id);
            attempt.token.cancel();
        }
    }

    fn session(&self, id: u64, kind: SessionKind, token: CancellationToken) -> VerificationSession {
        VerificationSession::new(
            id,
            kind,
            self.context.clone(),
            self.config.clone(),
            token,
            self.state_tx.clone(),
        )
    }

    /// Verify `audio` against the enrolled template
    pub async fn verify(&self, audio: AudioInput) -> AuthDecision {
        let (guard, token) = self.begin();
        let mut session = self.session(guard.id, SessionKind::Verify, token);

        let decision = session.verify(Arc::new(audio)).await;

        if self.finish(&guard, GateDecision::Auth(decision.clone()), session.state()) {
            decision
        } else {
            AuthDecision::rejected(RejectReason::Cancelled, None, self.config.threshold)
        }
    }

    /// Extract an embedding from `audio` and store it as the template.
    ///
    /// A successful result always means the template was written, even when a
    /// newer request arrived after the write; such a late success is returned
    /// to the caller but not published.
    pub async fn enroll(&self, audio: AudioInput) -> EnrollDecision {
        let (guard, token) = self.begin();
        let mut session = self.session(guard.id, SessionKind::Enroll, token);

        let decision = session.enroll(Arc::new(audio)).await;

        let owned = self.finish(&guard, GateDecision::Enroll(decision.clone()), session.state());
        if owned || decision.success() {
            decision
        } else {
            EnrollDecision::failed(RejectReason::Cancelled)
        }
    }

    /// Remove the enrolled template. Idempotent.
    pub async fn delete_template(&self) -> Result<(), StorageError> {
        let store = self.context.store.clone();
        tokio::task::spawn_blocking(move || store.delete())
            .await
            .map_err(|e| StorageError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
    }

    pub async fn is_enrolled(&self) -> Result<bool, StorageError> {
        let store = self.context.store.clone();
        tokio::task::spawn_blocking(move || store.is_enrolled())
            .await
            .map_err(|e| StorageError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
    }

    /// Enrollment time, readable without decrypting the template
    pub async fn enrolled_at(&self) -> Result<Option<DateTime<Utc>>, StorageError> {
        let store = self.context.store.clone();
        tokio::task::spawn_blocking(move || store.enrolled_at())
            .await
            .map_err(|e| StorageError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
    }
}
