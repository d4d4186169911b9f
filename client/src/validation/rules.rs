//! Common validation rules shared across credential payloads.

use validator::ValidationError;

/// Length of the numeric one-time codes issued by the identity provider.
pub const OTP_CODE_LENGTH: usize = 6;

/// Minimum length accepted when replacing a temporary password.
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Validates a one-time code.
///
/// Requirements:
/// - Exactly six ASCII digits
pub fn validate_otp_code(code: &str) -> Result<(), ValidationError> {
    if code.len() != OTP_CODE_LENGTH || !code.chars().all(|c| c.is_ascii_digit()) {
        return Err(ValidationError::new("otp_code_invalid")
            .with_message("Enter the 6-digit code from your email".into()));
    }
    Ok(())
}

/// Validates a replacement password.
///
/// Requirements:
/// - At least eight characters
/// - At least one letter and one digit
pub fn validate_password_strength(password: &str) -> Result<(), ValidationError> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(ValidationError::new("password_too_short")
            .with_message("Password must be at least 8 characters".into()));
    }
    let has_letter = password.chars().any(|c| c.is_alphabetic());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    if !has_letter || !has_digit {
        return Err(ValidationError::new("password_too_weak")
            .with_message("Password must contain letters and digits".into()));
    }
    Ok(())
}

/// Trims and lower-cases an email before it is sent anywhere.
pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

/// Strips whitespace users paste around or inside a one-time code.
pub fn normalize_otp_code(raw: &str) -> String {
    raw.chars().filter(|c| !c.is_whitespace()).collect()
}
