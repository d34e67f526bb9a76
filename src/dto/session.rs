use serde::Deserialize;
use utoipa::ToSchema;
use validator::Validate;

use crate::dto::validation::{validate_game_code, validate_player_name};

/// Request to create a session hosted by this device.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct CreateSessionRequest {
    /// Host display name.
    #[validate(custom(function = "validate_player_name"))]
    pub name: String,
    /// Game code to use; a random one is generated when omitted.
    #[serde(default)]
    #[validate(custom(function = "validate_game_code"))]
    pub code: Option<String>,
}

/// Request to join an existing session.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct JoinSessionRequest {
    /// Player display name.
    #[validate(custom(function = "validate_player_name"))]
    pub name: String,
    /// Game code as shown on the host screen, any case.
    #[validate(custom(function = "validate_game_code"))]
    pub code: String,
}
