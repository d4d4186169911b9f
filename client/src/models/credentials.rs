//! Transient credential payloads. None of these are ever persisted.

use std::fmt;

use validator::Validate;

use crate::types::OrganizationId;
use crate::validation::rules;

#[derive(Clone, Validate)]
/// Email + password sign-in, optionally scoped to an organization.
pub struct PasswordCredentials {
    #[validate(email(message = "Enter a valid email address"))]
    pub email: String,
    #[validate(length(min = 1, message = "Enter your password"))]
    pub password: String,
}

impl PasswordCredentials {
    pub fn new(email: &str, password: &str) -> Self {
        Self {
            email: rules::normalize_email(email),
            password: password.to_string(),
        }
    }
}

impl fmt::Debug for PasswordCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasswordCredentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Validate)]
/// First phase of the passwordless flow.
pub struct OtpRequest {
    #[validate(email(message = "Enter a valid email address"))]
    pub email: String,
    pub organization_id: OrganizationId,
}

impl OtpRequest {
    pub fn new(email: &str, organization_id: OrganizationId) -> Self {
        Self {
            email: rules::normalize_email(email),
            organization_id,
        }
    }
}

#[derive(Clone, Validate)]
/// Second phase of the passwordless flow: the code received by email.
pub struct OtpVerification {
    #[validate(email(message = "Enter a valid email address"))]
    pub email: String,
    #[validate(custom(function = "rules::validate_otp_code"))]
    pub code: String,
    pub organization_id: OrganizationId,
}

impl OtpVerification {
    pub fn new(email: &str, code: &str, organization_id: OrganizationId) -> Self {
        Self {
            email: rules::normalize_email(email),
            code: rules::normalize_otp_code(code),
            organization_id,
        }
    }
}

impl fmt::Debug for OtpVerification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OtpVerification")
            .field("email", &self.email)
            .field("code", &"<redacted>")
            .field("organization_id", &self.organization_id)
            .finish()
    }
}

#[derive(Clone, Validate)]
/// Replacement for a temporary password.
pub struct PasswordChange {
    #[validate(custom(function = "rules::validate_password_strength"))]
    pub new_password: String,
}

impl fmt::Debug for PasswordChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PasswordChange { new_password: <redacted> }")
    }
}
