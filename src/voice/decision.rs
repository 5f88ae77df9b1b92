//! Verification and enrollment outcomes

use super::matcher::MatchScore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why an attempt ended in `Rejected`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Audio unreadable, too short or silent
    ExtractionFailed,
    /// No template enrolled
    NotEnrolled,
    /// Keystore I/O, crypto or lock failure
    StorageError,
    /// Legitimate non-match
    BelowThreshold,
    /// Matcher dimension mismatch / zero magnitude, or a worker failure
    InternalError,
    /// Superseded by a newer attempt or cancelled by the caller
    Cancelled,
    /// Attempt exceeded its time budget
    Timeout,
}

impl RejectReason {
    /// Failures where re-enrolling is the sensible remedy
    pub fn suggests_reenroll(&self) -> bool {
        matches!(self, RejectReason::StorageError | RejectReason::InternalError)
    }

    pub fn requires_enrollment(&self) -> bool {
        matches!(self, RejectReason::NotEnrolled)
    }

    /// Stable code for UI layers
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::ExtractionFailed => "extraction_failed",
            RejectReason::NotEnrolled => "not_enrolled",
            RejectReason::StorageError => "storage_error",
            RejectReason::BelowThreshold => "below_threshold",
            RejectReason::InternalError => "internal_error",
            RejectReason::Cancelled => "cancelled",
            RejectReason::Timeout => "timeout",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Outcome of one verification attempt. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthDecision {
    verified: bool,
    score: Option<MatchScore>,
    threshold: f32,
    reason: Option<RejectReason>,
    timestamp: DateTime<Utc>,
}

impl AuthDecision {
    /// Apply the inclusive threshold to a score
    pub fn from_score(score: MatchScore, threshold: f32) -> Self {
        if score >= threshold {
            Self {
                verified: true,
                score: Some(score),
                threshold,
                reason: None,
                timestamp: Utc::now(),
            }
        } else {
            Self::rejected(RejectReason::BelowThreshold, Some(score), threshold)
        }
    }

    pub fn rejected(reason: RejectReason, score: Option<MatchScore>, threshold: f32) -> Self {
        Self {
            verified: false,
            score,
            threshold,
            reason: Some(reason),
            timestamp: Utc::now(),
        }
    }

    pub fn verified(&self) -> bool {
        self.verified
    }

    pub fn score(&self) -> Option<MatchScore> {
        self.score
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn reason(&self) -> Option<RejectReason> {
        self.reason
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn is_cancelled(&self) -> bool {
        self.reason == Some(RejectReason::Cancelled)
    }
}

/// Outcome of one enrollment attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrollDecision {
    success: bool,
    error: Option<RejectReason>,
    timestamp: DateTime<Utc>,
}

impl EnrollDecision {
    pub fn enrolled() -> Self {
        Self {
            success: true,
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(error: RejectReason) -> Self {
        Self {
            success: false,
            error: Some(error),
            timestamp: Utc::now(),
        }
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn error(&self) -> Option<RejectReason> {
        self.error
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}
