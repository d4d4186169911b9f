//! Models that represent user profiles and role metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::types::{DepartmentId, OrganizationId, UserId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Application-level user record stored in the `users` table.
///
/// The identity provider only knows the bare account; role, tenant and names
/// live here.
pub struct UserProfile {
    /// Identifier shared with the identity provider account.
    pub id: UserId,
    /// Login email address.
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    /// Role describing the user's privileges.
    pub role: UserRole,
    /// Tenant the user belongs to.
    pub organization_id: OrganizationId,
    /// Optional department inside the organization.
    #[serde(default)]
    pub department_id: Option<DepartmentId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set when an administrator provisioned the account with a temporary password.
    #[serde(default)]
    pub requires_password_change: bool,
}

impl UserProfile {
    /// Returns "First Last", falling back to the email when both names are blank.
    pub fn full_name(&self) -> String {
        let name = format!("{} {}", self.first_name.trim(), self.last_name.trim());
        let name = name.trim();
        if name.is_empty() {
            self.email.clone()
        } else {
            name.to_string()
        }
    }

    /// Returns `true` when the user holds the administrative super-role tier.
    pub fn is_administrative(&self) -> bool {
        self.role.is_administrative()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
/// Fixed set of roles stored in the `users.role` column.
pub enum UserRole {
    /// Platform owner; holds every permission.
    Root,
    /// Administrative super-role across organizations.
    SuperAdmin,
    /// Administrator of a single organization, scoped by its permission set.
    OrgAdmin,
    /// Can review colleagues inside feedback cycles.
    Reviewer,
    /// Regular member of an organization.
    #[default]
    Employee,
    /// Read-only access.
    Subscriber,
}

impl UserRole {
    pub const ALL: [UserRole; 6] = [
        UserRole::Root,
        UserRole::SuperAdmin,
        UserRole::OrgAdmin,
        UserRole::Reviewer,
        UserRole::Employee,
        UserRole::Subscriber,
    ];

    /// Returns the canonical snake_case representation of the role.
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Root => "root",
            UserRole::SuperAdmin => "super_admin",
            UserRole::OrgAdmin => "org_admin",
            UserRole::Reviewer => "reviewer",
            UserRole::Employee => "employee",
            UserRole::Subscriber => "subscriber",
        }
    }

    /// Parses a stored role, tolerating kebab-case and upper-case spellings.
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase().replace('-', "_");
        UserRole::ALL
            .into_iter()
            .find(|role| role.as_str() == normalized)
    }

    /// Super-admins and root are allowed through the admin console and hold
    /// every permission.
    pub fn is_administrative(&self) -> bool {
        matches!(self, UserRole::Root | UserRole::SuperAdmin)
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for UserRole {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for UserRole {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        UserRole::parse(&s).ok_or_else(|| {
            serde::de::Error::unknown_variant(
                &s,
                &[
                    "root",
                    "super_admin",
                    "org_admin",
                    "reviewer",
                    "employee",
                    "subscriber",
                ],
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn user_role_serde_accepts_and_emits_snake_case() {
        let r: UserRole = serde_json::from_str("\"super_admin\"").unwrap();
        assert_eq!(r, UserRole::SuperAdmin);

        // Tolerate legacy spellings
        let r2: UserRole = serde_json::from_str("\"org-admin\"").unwrap();
        let r3: UserRole = serde_json::from_str("\"SUBSCRIBER\"").unwrap();
        assert_eq!(r2, UserRole::OrgAdmin);
        assert_eq!(r3, UserRole::Subscriber);

        let emitted = serde_json::to_value(UserRole::OrgAdmin).unwrap();
        assert_eq!(emitted, Value::String("org_admin".into()));
    }

    #[test]
    fn user_role_rejects_unknown_values() {
        let result = serde_json::from_str::<UserRole>("\"owner\"");
        assert!(result.is_err());
    }

    #[test]
    fn only_root_and_super_admin_are_administrative() {
        let admins: Vec<UserRole> = UserRole::ALL
            .into_iter()
            .filter(UserRole::is_administrative)
            .collect();
        assert_eq!(admins, vec![UserRole::Root, UserRole::SuperAdmin]);
    }

    #[test]
    fn profile_deserializes_from_users_row() {
        let row = json!({
            "id": "0b9d5a54-34a4-4f7e-9d1b-9c1f3f0f6d11",
            "email": "ana@example.com",
            "first_name": "Ana",
            "last_name": "Silva",
            "role": "reviewer",
            "organization_id": "6f1c2a9e-3b7d-4c55-9a0e-2b4f8d1e7c33",
            "department_id": null,
            "created_at": "2025-01-02T10:00:00Z",
            "updated_at": "2025-01-02T10:00:00Z"
        });
        let profile: UserProfile = serde_json::from_value(row).unwrap();
        assert_eq!(profile.role, UserRole::Reviewer);
        assert!(!profile.requires_password_change);
        assert!(profile.department_id.is_none());
        assert_eq!(profile.full_name(), "Ana Silva");
    }

    #[test]
    fn full_name_falls_back_to_email() {
        let row = json!({
            "id": "0b9d5a54-34a4-4f7e-9d1b-9c1f3f0f6d11",
            "email": "ops@example.com",
            "first_name": " ",
            "last_name": "",
            "role": "employee",
            "organization_id": "6f1c2a9e-3b7d-4c55-9a0e-2b4f8d1e7c33",
            "created_at": "2025-01-02T10:00:00Z",
            "updated_at": "2025-01-02T10:00:00Z"
        });
        let profile: UserProfile = serde_json::from_value(row).unwrap();
        assert_eq!(profile.full_name(), "ops@example.com");
    }
}
