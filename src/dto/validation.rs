//! Validation helpers for DTOs.

use validator::ValidationError;

/// Shortest accepted game code.
pub const MIN_GAME_CODE_LEN: usize = 4;
/// Longest accepted game code.
pub const MAX_GAME_CODE_LEN: usize = 12;

/// Validates a game code as typed by a player: ASCII alphanumeric, 4 to 12 characters once
/// surrounding whitespace is trimmed. Case does not matter.
///
/// # Examples
///
/// ```ignore
/// validate_game_code("abcd")   // Ok
/// validate_game_code(" ABCD ") // Ok
/// validate_game_code("AB-CD")  // Err - punctuation
/// validate_game_code("ABC")    // Err - too short
/// ```
pub fn validate_game_code(code: &str) -> Result<(), ValidationError> {
    let code = code.trim();
    if !(MIN_GAME_CODE_LEN..=MAX_GAME_CODE_LEN).contains(&code.len()) {
        let mut err = ValidationError::new("game_code_length");
        err.message = Some(
            format!(
                "Game code must be {MIN_GAME_CODE_LEN} to {MAX_GAME_CODE_LEN} characters (got {})",
                code.len()
            )
            .into(),
        );
        return Err(err);
    }

    if !code.chars().all(|c| c.is_ascii_alphanumeric()) {
        let mut err = ValidationError::new("game_code_format");
        err.message = Some("Game code must contain only letters and digits".into());
        return Err(err);
    }

    Ok(())
}

/// Validates a display name: non-blank once trimmed.
pub fn validate_player_name(name: &str) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        let mut err = ValidationError::new("player_name_blank");
        err.message = Some("Name must not be blank".into());
        return Err(err);
    }
    Ok(())
}
