use futures::future::BoxFuture;
use serde_json::Value;

use crate::{
    client::submission::SubmitError,
    dto::submission::SubmissionResponse,
    error::{ErrorBody, ServiceError},
    services::submission_service::{self, AnswerSubmission, SubmissionOutcome},
    state::SharedState,
};

/// Where answers are sent to be scored.
pub trait ScoringEndpoint: Send + Sync {
    fn submit(
        &self,
        token: &str,
        submission: AnswerSubmission,
    ) -> BoxFuture<'static, Result<SubmissionOutcome, SubmitError>>;
}

/// Scores in-process against the shared application state.
#[derive(Clone)]
pub struct LocalScoringEndpoint {
    state: SharedState,
}

impl LocalScoringEndpoint {
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }
}

impl ScoringEndpoint for LocalScoringEndpoint {
    fn submit(
        &self,
        token: &str,
        submission: AnswerSubmission,
    ) -> BoxFuture<'static, Result<SubmissionOutcome, SubmitError>> {
        let state = self.state.clone();
        let token = token.to_string();
        Box::pin(async move {
            submission_service::submit_answer(&state, &token, submission)
                .await
                .map_err(SubmitError::from)
        })
    }
}

impl From<ServiceError> for SubmitError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::NotAuthenticated(message) => SubmitError::NotAuthenticated(message),
            ServiceError::StaleQuestion { submitted, .. } => SubmitError::StaleQuestion {
                question_index: submitted,
            },
            ServiceError::Timeout => SubmitError::Timeout,
            other => SubmitError::Rejected {
                code: other.code().to_string(),
                message: other.to_string(),
            },
        }
    }
}

/// Turn a scoring reply into an outcome. `409` carries either the original result of a
/// duplicate (success) or an error body.
pub fn interpret_reply(
    status: u16,
    body: &str,
    question_index: u32,
) -> Result<SubmissionOutcome, SubmitError> {
    let parsed: Option<Value> = serde_json::from_str(body).ok();

    if matches!(status, 200 | 409)
        && let Some(outcome) = parsed
            .clone()
            .and_then(|value| serde_json::from_value::<SubmissionResponse>(value).ok())
    {
        return Ok(outcome.into());
    }

    let error = parsed.and_then(|value| serde_json::from_value::<ErrorBody>(value).ok());
    match (status, error) {
        (401, error) => Err(SubmitError::NotAuthenticated(
            error.map(|error| error.message).unwrap_or_default(),
        )),
        (_, Some(error)) if error.code == "stale_question" => {
            Err(SubmitError::StaleQuestion { question_index })
        }
        (_, Some(error)) if error.code == "timeout" => Err(SubmitError::Timeout),
        (_, Some(error)) => Err(SubmitError::Rejected {
            code: error.code,
            message: error.message,
        }),
        (status, None) => Err(SubmitError::Unknown(format!(
            "unexpected reply with status {status}"
        ))),
    }
}

#[cfg(feature = "http-client")]
pub use remote::HttpScoringEndpoint;

#[cfg(feature = "http-client")]
mod remote {
    use reqwest::Client;

    use super::*;
    use crate::dto::submission::SubmitAnswerRequest;

    /// Scores through the `POST /rooms/{id}/answers` route of a remote server.
    #[derive(Clone)]
    pub struct HttpScoringEndpoint {
        client: Client,
        base_url: String,
    }

    impl HttpScoringEndpoint {
        pub fn new(base_url: &str) -> Self {
            Self::with_client(Client::new(), base_url)
        }

        pub fn with_client(client: Client, base_url: &str) -> Self {
            Self {
                client,
                base_url: base_url.trim_end_matches('/').to_string(),
            }
        }
    }

    impl ScoringEndpoint for HttpScoringEndpoint {
        fn submit(
            &self,
            token: &str,
            submission: AnswerSubmission,
        ) -> BoxFuture<'static, Result<SubmissionOutcome, SubmitError>> {
            let client = self.client.clone();
            let url = format!("{}/rooms/{}/answers", self.base_url, submission.room_id);
            let token = token.to_string();
            let question_index = submission.question_index;
            let payload = SubmitAnswerRequest {
                question_index: submission.question_index,
                answer_index: submission.answer_index,
                submission_id: submission.submission_id,
            };

            Box::pin(async move {
                let response = client
                    .post(url)
                    .bearer_auth(token)
                    .json(&payload)
                    .send()
                    .await
                    .map_err(transport_error)?;
                let status = response.status().as_u16();
                let body = response.text().await.map_err(transport_error)?;
                interpret_reply(status, &body, question_index)
            })
        }
    }

    fn transport_error(err: reqwest::Error) -> SubmitError {
        if err.is_timeout() {
            SubmitError::Timeout
        } else {
            SubmitError::Unknown(err.to_string())
        }
    }
}
