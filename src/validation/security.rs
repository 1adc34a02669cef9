use crate::error::{AppError, Result};

/// Longest session id accepted at the API boundary.
const MAX_SESSION_ID_LEN: usize = 128;
/// Longest code accepted at the API boundary.
const MAX_CODE_LEN: usize = 256;
/// Longest user id accepted at the API boundary.
const MAX_USER_ID_LEN: usize = 255;

/// Returns a required field as presented, or `None` when it is absent or
/// blank. The value itself is never trimmed: codes are compared exactly.
pub fn required(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// Validates the parameters of a validation request.
///
/// # Returns
///
/// The `(session_id, forward_code, backward_code)` exactly as presented.
pub fn validate_code_presentation<'a>(
    session_id: Option<&'a str>,
    forward_code: Option<&'a str>,
    backward_code: Option<&'a str>,
) -> Result<(&'a str, &'a str, &'a str)> {
    let (Some(session_id), Some(forward_code), Some(backward_code)) = (
        required(session_id),
        required(forward_code),
        required(backward_code),
    ) else {
        return Err(AppError::Validation(
            "Missing required security parameters".to_string(),
        ));
    };

    validate_session_id(session_id)?;

    if forward_code.len() > MAX_CODE_LEN || backward_code.len() > MAX_CODE_LEN {
        return Err(AppError::Validation(
            "Security codes are too long".to_string(),
        ));
    }

    Ok((session_id, forward_code, backward_code))
}

/// Validates a session id.
pub fn validate_session_id(session_id: &str) -> Result<()> {
    if session_id.len() > MAX_SESSION_ID_LEN {
        return Err(AppError::Validation(
            "Session ID is too long".to_string(),
        ));
    }

    Ok(())
}

/// Validates an optional user id. Blank ids are treated as absent.
pub fn validate_user_id(user_id: Option<&str>) -> Result<Option<&str>> {
    match required(user_id) {
        Some(id) if id.len() > MAX_USER_ID_LEN => Err(AppError::Validation(
            "User ID must be at most 255 characters".to_string(),
        )),
        other => Ok(other),
    }
}
