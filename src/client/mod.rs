//! Participant-side half of answer submission: the local guard, the shared countdown with
//! auto-submit, and the transports that reach the scoring service.

/// Wall-clock countdown and expiry auto-submit.
pub mod countdown;
/// Transports to the authoritative scorer.
pub mod endpoint;
/// Local guard around a single answer per question.
pub mod submission;
