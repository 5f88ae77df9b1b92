//! On-device speaker verification gate
//!
//! Matches a freshly captured voice sample against one enrolled, encrypted
//! template and returns an immutable decision.

pub mod audio;
pub mod config;
pub mod paths;
pub mod validation;
pub mod voice;

pub use audio::{AudioInput, PcmBuffer};
pub use config::AppConfig;
pub use voice::{AuthDecision, EnrollDecision, GateContext, RejectReason, VoiceGate};
