//! Verification session state machine
//!
//! One session drives exactly one attempt:
//!
//! ```text
//! verify: Idle -> Extracting -> Loading -> Matching -> Verified | Rejected
//! enroll: Idle -> Extracting -> Saving -> Enrolled | Rejected
//! ```
//!
//! CPU work (extraction, matching) and keystore I/O run on the blocking pool.
//! The cancellation token is checked at every transition and raced against
//! every read-only stage. `Saving` is the one commit point: the store checks
//! the token under its write lock, and the session waits for the outcome.

use super::decision::{AuthDecision, EnrollDecision, RejectReason};
use super::embedding::Embedding;
use super::gate::GateContext;
use crate::audio::AudioInput;
use crate::config::VerificationConfig;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Idle,
    Extracting,
    Loading,
    Matching,
    /// Enroll only: persisting the new template
    Saving,
    Verified,
    /// Enroll only: template persisted
    Enrolled,
    Rejected,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Verified | SessionState::Enrolled | SessionState::Rejected
        )
    }

    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Idle, Extracting) => true,
            // Cancelled before the first stage started
            (Idle, Rejected) => true,
            (Extracting, Loading) | (Extracting, Saving) => true,
            (Loading, Matching) => true,
            (Matching, Verified) => true,
            (Saving, Enrolled) => true,
            // Any in-flight state may fail, be cancelled or time out
            (Extracting | Loading | Matching | Saving, Rejected) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Verify,
    Enroll,
}

/// Why an offloaded stage did not produce a value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupted {
    Cancelled,
    WorkerFailed,
}

impl From<Interrupted> for RejectReason {
    fn from(interrupted: Interrupted) -> Self {
        match interrupted {
            Interrupted::Cancelled => RejectReason::Cancelled,
            Interrupted::WorkerFailed => RejectReason::InternalError,
        }
    }
}

/// A single verify or enroll attempt
pub struct VerificationSession {
    attempt_id: u64,
    kind: SessionKind,
    state: SessionState,
    context: GateContext,
    config: VerificationConfig,
    token: CancellationToken,
    state_tx: watch::Sender<SessionState>,
}

impl VerificationSession {
    pub fn new(
        attempt_id: u64,
        kind: SessionKind,
        context: GateContext,
        config: VerificationConfig,
        token: CancellationToken,
        state_tx: watch::Sender<SessionState>,
    ) -> Self {
        Self {
            attempt_id,
            kind,
            state: SessionState::Idle,
            context,
            config,
            token,
            state_tx,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition_to(&mut self, next: SessionState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {:?} -> {:?}",
            self.state,
            next
        );
        log::debug!(
            "Attempt #{} ({:?}): {:?} -> {:?}",
            self.attempt_id,
            self.kind,
            self.state,
            next
        );

        self.state = next;

        // A superseded attempt no longer owns the shared state feed
        if !self.token.is_cancelled() {
            self.state_tx.send_replace(next);
        }
    }

    /// Enter an in-flight state unless the attempt was cancelled meanwhile
    fn advance(&mut self, next: SessionState) -> Result<(), Interrupted> {
        if self.token.is_cancelled() {
            return Err(Interrupted::Cancelled);
        }
        self.transition_to(next);
        Ok(())
    }

    /// Run `work` on the blocking pool, abandoning it on cancellation
    async fn offload<T, F>(&self, work: F) -> Result<T, Interrupted>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let task = tokio::task::spawn_blocking(work);
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(Interrupted::Cancelled),
            joined = task => joined.map_err(|e| {
                log::error!("Attempt #{} worker failed: {}", self.attempt_id, e);
                Interrupted::WorkerFailed
            }),
        }
    }

    async fn extract(&mut self, audio: Arc<AudioInput>) -> Result<Embedding, RejectReason> {
        self.advance(SessionState::Extracting)?;

        let extractor = self.context.extractor.clone();
        let expected = extractor.dim();
        let extracted = self.offload(move || extractor.extract(&audio)).await?;

        match extracted {
            Ok(embedding) if embedding.dim() == expected => Ok(embedding),
            Ok(embedding) => {
                log::error!(
                    "Attempt #{}: extractor returned {} values, expected {}",
                    self.attempt_id,
                    embedding.dim(),
                    expected
                );
                Err(RejectReason::ExtractionFailed)
            }
            Err(e) => {
                log::info!("Attempt #{}: extraction failed: {}", self.attempt_id, e);
                Err(RejectReason::ExtractionFailed)
            }
        }
    }

    async fn verify_stages(&mut self, audio: Arc<AudioInput>) -> Result<AuthDecision, RejectReason> {
        let probe = self.extract(audio).await?;

        self.advance(SessionState::Loading)?;
        let store = self.context.store.clone();
        let template = match self.offload(move || store.load()).await? {
            Ok(Some(template)) => template,
            Ok(None) => return Err(RejectReason::NotEnrolled),
            Err(e) => {
                log::warn!("Attempt #{}: template load failed: {}", self.attempt_id, e);
                return Err(RejectReason::StorageError);
            }
        };

        self.advance(SessionState::Matching)?;
        let matcher = self.context.matcher.clone();
        let score = self
            .offload(move || matcher.score(&template.embedding, &probe))
            .await?
            .map_err(|e| {
                log::error!("Attempt #{}: matcher failed: {}", self.attempt_id, e);
                RejectReason::InternalError
            })?;

        // Last check before committing a verdict
        if self.token.is_cancelled() {
            return Err(RejectReason::Cancelled);
        }
        Ok(AuthDecision::from_score(score, self.config.threshold))
    }

    /// Run a verification attempt to a terminal state
    pub async fn verify(&mut self, audio: Arc<AudioInput>) -> AuthDecision {
        let threshold = self.config.threshold;
        let outcome =
            tokio::time::timeout(self.config.timeout(), self.verify_stages(audio)).await;

        let decision = match outcome {
            Ok(Ok(decision)) => decision,
            Ok(Err(reason)) => AuthDecision::rejected(reason, None, threshold),
            Err(_) => {
                log::warn!(
                    "Attempt #{}: timed out after {}ms in {:?}",
                    self.attempt_id,
                    self.config.timeout_ms,
                    self.state
                );
                AuthDecision::rejected(RejectReason::Timeout, None, threshold)
            }
        };

        if decision.verified() {
            self.transition_to(SessionState::Verified);
        } else {
            self.transition_to(SessionState::Rejected);
        }

        match decision.reason() {
            Some(RejectReason::Cancelled) => {
                log::info!("Attempt #{}: verification cancelled", self.attempt_id)
            }
            _ => log::info!(
                "Verification attempt #{}: score={}, threshold={:.3}, result={}",
                self.attempt_id,
                decision
                    .score()
                    .map(|s| format!("{:.3}", s))
                    .unwrap_or_else(|| "n/a".to_string()),
                threshold,
                if decision.verified() { "PASS" } else { "FAIL" }
            ),
        }

        decision
    }

    /// Persist the template. Once the save is handed to the store it is
    /// awaited to completion: cancellation and the deadline can only withdraw
    /// it before the record is written, never after.
    async fn commit(&mut self, embedding: Embedding, deadline: Instant) -> Result<(), RejectReason> {
        self.advance(SessionState::Saving)?;

        let withdraw = self.token.child_token();
        let store = self.context.store.clone();
        let save_token = withdraw.clone();
        let mut task =
            tokio::task::spawn_blocking(move || store.save_unless_cancelled(&embedding, &save_token));

        let joined = tokio::select! {
            joined = &mut task => joined,
            _ = tokio::time::sleep_until(deadline) => {
                withdraw.cancel();
                task.await
            }
        };

        match joined {
            Ok(Ok(true)) => Ok(()),
            Ok(Ok(false)) if self.token.is_cancelled() => Err(RejectReason::Cancelled),
            Ok(Ok(false)) => {
                log::warn!(
                    "Attempt #{}: enrollment timed out before the template was written",
                    self.attempt_id
                );
                Err(RejectReason::Timeout)
            }
            Ok(Err(e)) => {
                log::warn!("Attempt #{}: template save failed: {}", self.attempt_id, e);
                Err(RejectReason::StorageError)
            }
            Err(e) => {
                log::error!("Attempt #{} worker failed: {}", self.attempt_id, e);
                Err(RejectReason::InternalError)
            }
        }
    }

    /// Run an enrollment attempt to a terminal state
    pub async fn enroll(&mut self, audio: Arc<AudioInput>) -> EnrollDecision {
        let deadline = Instant::now() + self.config.timeout();

        let outcome = match tokio::time::timeout_at(deadline, self.extract(audio)).await {
            Ok(Ok(embedding)) => self.commit(embedding, deadline).await,
            Ok(Err(reason)) => Err(reason),
            Err(_) => {
                log::warn!(
                    "Attempt #{}: enrollment timed out in {:?}",
                    self.attempt_id,
                    self.state
                );
                Err(RejectReason::Timeout)
            }
        };

        let decision = match outcome {
            Ok(()) => EnrollDecision::enrolled(),
            Err(reason) => EnrollDecision::failed(reason),
        };

        if decision.success() {
            self.transition_to(SessionState::Enrolled);
            log::info!("Enrollment attempt #{} complete", self.attempt_id);
        } else {
            self.transition_to(SessionState::Rejected);
            log::info!(
                "Enrollment attempt #{} failed: {}",
                self.attempt_id,
                decision.error().map(|e| e.code()).unwrap_or("unknown")
            );
        }

        decision
    }
}
