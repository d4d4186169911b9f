//! Organization (tenant) records.

use serde::{Deserialize, Serialize};

use crate::types::OrganizationId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Row of the `organizations` table.
pub struct Organization {
    pub id: OrganizationId,
    pub name: String,
    /// Permission names granted to the organization's `org_admin` users.
    #[serde(default)]
    pub admin_permissions: Vec<String>,
}

impl Organization {
    /// Exact-name lookup in the configured admin permission set.
    pub fn grants_admin_permission(&self, permission: &str) -> bool {
        self.admin_permissions.iter().any(|p| p == permission)
    }
}
