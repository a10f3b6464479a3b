use std::{sync::Arc, time::Duration};

use thiserror::Error;
use tokio::{sync::Mutex, time::timeout};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    client::endpoint::ScoringEndpoint,
    dto::room::{RoomPhaseDto, RoomView},
    services::submission_service::{AnswerSubmission, SubmissionOutcome, SubmissionStatus},
};

/// Why a submission did not produce a scoring result.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SubmitError {
    /// No question is open on the last observed room snapshot.
    #[error("no question is open")]
    NoOpenQuestion,
    /// Nothing selected yet.
    #[error("no option selected")]
    NoSelection,
    /// This question was already answered from this client.
    #[error("question {question_index} was already answered")]
    AlreadyAnswered { question_index: u32 },
    /// A request for this question is still pending.
    #[error("a submission is already in flight")]
    InFlight,
    #[error("not authenticated: {0}")]
    NotAuthenticated(String),
    /// The room moved past the question before the answer arrived.
    #[error("question {question_index} is no longer active")]
    StaleQuestion { question_index: u32 },
    /// No answer within the submission timeout. The server may still have scored it.
    #[error("submission timed out")]
    Timeout,
    /// The scorer refused the answer for another reason.
    #[error("{code}: {message}")]
    Rejected { code: String, message: String },
    #[error("submission failed: {0}")]
    Unknown(String),
}

/// What the guard tracks for the open question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionSlot {
    pub room_id: String,
    pub question_index: u32,
    pub selected: Option<usize>,
    /// Idempotency key, reused by every retry for this question.
    pub submission_id: String,
    pub in_flight: bool,
    pub outcome: Option<SubmissionOutcome>,
}

impl QuestionSlot {
    fn new(room_id: &str, question_index: u32) -> Self {
        Self {
            room_id: room_id.to_string(),
            question_index,
            selected: None,
            submission_id: Uuid::new_v4().to_string(),
            in_flight: false,
            outcome: None,
        }
    }
}

/// Sends at most one answer per question from this participant.
///
/// The guard only spares the scorer redundant requests; duplicates that slip through are
/// absorbed server-side through the submission id.
pub struct AnswerSubmitter {
    endpoint: Arc<dyn ScoringEndpoint>,
    token: String,
    timeout: Duration,
    slot: Mutex<Option<QuestionSlot>>,
}

impl AnswerSubmitter {
    pub fn new(
        endpoint: Arc<dyn ScoringEndpoint>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            endpoint,
            token: token.into(),
            timeout,
            slot: Mutex::new(None),
        }
    }

    /// Track the question open on a room snapshot. A new question resets the guard; a
    /// snapshot without an open question clears it.
    pub async fn observe_room(&self, room: &RoomView) {
        let active = match (room.phase, &room.active_question) {
            (RoomPhaseDto::Live, Some(question)) => u32::try_from(question.index).ok(),
            _ => None,
        };
        match active {
            Some(index) => self.begin_question(&room.room_id, index).await,
            None => {
                *self.slot.lock().await = None;
            }
        }
    }

    /// Start tracking `question_index`, keeping the current slot if it already tracks it.
    pub async fn begin_question(&self, room_id: &str, question_index: u32) {
        let mut slot = self.slot.lock().await;
        let same = slot.as_ref().is_some_and(|current| {
            current.room_id == room_id && current.question_index == question_index
        });
        if !same {
            debug!(room_id, question = question_index, "tracking new question");
            *slot = Some(QuestionSlot::new(room_id, question_index));
        }
    }

    /// Record the chosen option; refused once an answer was recorded.
    pub async fn select(&self, answer_index: usize) -> Result<(), SubmitError> {
        let mut slot = self.slot.lock().await;
        let Some(slot) = slot.as_mut() else {
            return Err(SubmitError::NoOpenQuestion);
        };
        if slot.outcome.is_some() {
            return Err(SubmitError::AlreadyAnswered {
                question_index: slot.question_index,
            });
        }
        slot.selected = Some(answer_index);
        Ok(())
    }

    pub async fn snapshot(&self) -> Option<QuestionSlot> {
        self.slot.lock().await.clone()
    }

    /// Submit the selected option for the tracked question.
    ///
    /// `AlreadySubmitted` replies count as success. On timeout the in-flight flag is
    /// cleared so the participant may retry with the same submission id.
    pub async fn submit(&self) -> Result<SubmissionOutcome, SubmitError> {
        let submission = {
            let mut guard = self.slot.lock().await;
            let Some(slot) = guard.as_mut() else {
                return Err(SubmitError::NoOpenQuestion);
            };
            if slot.outcome.is_some() {
                return Err(SubmitError::AlreadyAnswered {
                    question_index: slot.question_index,
                });
            }
            if slot.in_flight {
                return Err(SubmitError::InFlight);
            }
            let Some(answer_index) = slot.selected else {
                return Err(SubmitError::NoSelection);
            };
            slot.in_flight = true;
            AnswerSubmission {
                room_id: slot.room_id.clone(),
                question_index: slot.question_index,
                answer_index,
                submission_id: slot.submission_id.clone(),
            }
        };

        let room_id = submission.room_id.clone();
        let question_index = submission.question_index;
        let submission_id = submission.submission_id.clone();
        let pending = self.endpoint.submit(&self.token, submission);
        let result = match timeout(self.timeout, pending).await {
            Ok(result) => result,
            Err(_) => Err(SubmitError::Timeout),
        };

        let mut guard = self.slot.lock().await;
        let slot = guard.as_mut().filter(|slot| slot.submission_id == submission_id);
        match (&result, slot) {
            (Ok(outcome), Some(slot)) => {
                slot.in_flight = false;
                slot.outcome = Some(outcome.clone());
            }
            (Err(_), Some(slot)) => slot.in_flight = false,
            // The room moved on while the request was pending; the new slot is untouched.
            (_, None) => {}
        }

        match &result {
            Ok(outcome) if outcome.status == SubmissionStatus::AlreadySubmitted => {
                info!(room_id = %room_id, question = question_index, "answer was already recorded");
            }
            Ok(outcome) => info!(
                room_id = %room_id,
                question = question_index,
                correct = outcome.correct,
                points = outcome.points_awarded,
                "answer accepted"
            ),
            Err(err) => warn!(
                room_id = %room_id,
                question = question_index,
                error = %err,
                "answer submission failed"
            ),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::future::BoxFuture;
    use tokio::time::sleep;

    use super::*;

    /// Scripted scorer that records every submission it receives.
    struct ScriptedEndpoint {
        delay: Duration,
        status: SubmissionStatus,
        calls: AtomicUsize,
        seen: std::sync::Mutex<Vec<AnswerSubmission>>,
    }

    impl ScriptedEndpoint {
        fn new(delay: Duration, status: SubmissionStatus) -> Arc<Self> {
            Arc::new(Self {
                delay,
                status,
                calls: AtomicUsize::new(0),
                seen: std::sync::Mutex::new(Vec::new()),
            })
        }
    }

    impl ScoringEndpoint for ScriptedEndpoint {
        fn submit(
            &self,
            _token: &str,
            submission: AnswerSubmission,
        ) -> BoxFuture<'static, Result<SubmissionOutcome, SubmitError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(submission.clone());
            let delay = self.delay;
            let status = self.status;
            Box::pin(async move {
                sleep(delay).await;
                Ok(SubmissionOutcome {
                    status,
                    correct: submission.answer_index == 1,
                    points_awarded: if submission.answer_index == 1 { 10 } else { 0 },
                    correct_index: 1,
                    score: 10,
                })
            })
        }
    }

    fn submitter(endpoint: Arc<ScriptedEndpoint>) -> AnswerSubmitter {
        AnswerSubmitter::new(endpoint, "tok", Duration::from_secs(8))
    }

    #[tokio::test]
    async fn refuses_without_question_or_selection() {
        let endpoint = ScriptedEndpoint::new(Duration::ZERO, SubmissionStatus::Accepted);
        let submitter = submitter(endpoint.clone());

        assert_eq!(submitter.submit().await, Err(SubmitError::NoOpenQuestion));
        submitter.begin_question("QUIZ42", 0).await;
        assert_eq!(submitter.submit().await, Err(SubmitError::NoSelection));
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn second_submit_for_the_same_question_is_refused_locally() {
        let endpoint = ScriptedEndpoint::new(Duration::ZERO, SubmissionStatus::Accepted);
        let submitter = submitter(endpoint.clone());
        submitter.begin_question("QUIZ42", 0).await;
        submitter.select(1).await.unwrap();

        let outcome = submitter.submit().await.unwrap();
        assert!(outcome.correct);
        assert_eq!(
            submitter.submit().await,
            Err(SubmitError::AlreadyAnswered { question_index: 0 })
        );
        assert_eq!(
            submitter.select(0).await,
            Err(SubmitError::AlreadyAnswered { question_index: 0 })
        );
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_submit_hits_the_in_flight_flag() {
        let endpoint = ScriptedEndpoint::new(Duration::from_secs(1), SubmissionStatus::Accepted);
        let submitter = Arc::new(submitter(endpoint.clone()));
        submitter.begin_question("QUIZ42", 0).await;
        submitter.select(1).await.unwrap();

        let first = tokio::spawn({
            let submitter = submitter.clone();
            async move { submitter.submit().await }
        });
        tokio::task::yield_now().await;
        while !submitter.snapshot().await.unwrap().in_flight {
            tokio::task::yield_now().await;
        }

        assert_eq!(submitter.submit().await, Err(SubmitError::InFlight));
        assert!(first.await.unwrap().is_ok());
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_clears_the_flag_and_retries_reuse_the_submission_id() {
        let endpoint = ScriptedEndpoint::new(Duration::from_secs(30), SubmissionStatus::Accepted);
        let submitter = submitter(endpoint.clone());
        submitter.begin_question("QUIZ42", 2).await;
        submitter.select(0).await.unwrap();

        assert_eq!(submitter.submit().await, Err(SubmitError::Timeout));
        let slot = submitter.snapshot().await.unwrap();
        assert!(!slot.in_flight);
        assert!(slot.outcome.is_none());

        assert_eq!(submitter.submit().await, Err(SubmitError::Timeout));
        let seen = endpoint.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].submission_id, seen[1].submission_id);
        assert_eq!(seen[0].question_index, 2);
    }

    #[tokio::test]
    async fn already_submitted_reply_counts_as_success() {
        let endpoint = ScriptedEndpoint::new(Duration::ZERO, SubmissionStatus::AlreadySubmitted);
        let submitter = submitter(endpoint);
        submitter.begin_question("QUIZ42", 0).await;
        submitter.select(1).await.unwrap();

        let outcome = submitter.submit().await.unwrap();
        assert_eq!(outcome.status, SubmissionStatus::AlreadySubmitted);
        assert!(submitter.snapshot().await.unwrap().outcome.is_some());
    }

    #[tokio::test]
    async fn a_new_question_resets_the_guard() {
        let endpoint = ScriptedEndpoint::new(Duration::ZERO, SubmissionStatus::Accepted);
        let submitter = submitter(endpoint);
        submitter.begin_question("QUIZ42", 0).await;
        submitter.select(1).await.unwrap();
        submitter.submit().await.unwrap();
        let first_id = submitter.snapshot().await.unwrap().submission_id;

        submitter.begin_question("QUIZ42", 0).await;
        assert!(submitter.snapshot().await.unwrap().outcome.is_some());

        submitter.begin_question("QUIZ42", 1).await;
        let slot = submitter.snapshot().await.unwrap();
        assert_eq!(slot.question_index, 1);
        assert_eq!(slot.selected, None);
        assert!(slot.outcome.is_none());
        assert_ne!(slot.submission_id, first_id);
    }
}
