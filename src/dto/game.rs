use serde::Deserialize;
use utoipa::ToSchema;
use validator::Validate;

/// Answer picked by this device's player.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct SubmitAnswerRequest {
    /// One of the options of the open question, verbatim.
    #[validate(length(min = 1))]
    pub answer: String,
}
