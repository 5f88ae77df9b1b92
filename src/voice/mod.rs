//! Voice verification
//!
//! Speaker verification gate: feature extraction, encrypted single-slot
//! template storage, cosine scoring and the session state machine that ties
//! them together.

pub mod decision;
pub mod embedding;
pub mod extractor;
pub mod gate;
pub mod matcher;
pub mod session;
pub mod store;

pub use decision::{AuthDecision, EnrollDecision, RejectReason};
pub use embedding::{Embedding, EMBEDDING_DIM};
pub use extractor::{ExtractionError, FeatureExtractor, SpectralExtractor, StubExtractor};
pub use gate::{GateContext, GateDecision, VoiceGate};
pub use matcher::{cosine_similarity, CosineMatcher, MatchError, MatchScore, Matcher};
pub use session::{SessionState, VerificationSession};
pub use store::{EnrolledTemplate, StorageError, TemplateStore};
