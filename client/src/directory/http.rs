use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::json;

use super::{Directory, DirectoryError};
use crate::{
    config::ClientConfig,
    identity::HostedIdentityClient,
    models::{Organization, UserProfile},
    types::{OrganizationId, UserId},
};

const ORGANIZATION_COLUMNS: &str = "id,name,admin_permissions";
const USER_COLUMNS: &str = "id,email,first_name,last_name,role,organization_id,department_id,created_at,updated_at,requires_password_change";

/// PostgREST-style client for the hosted datastore.
///
/// Requests carry the signed-in user's access token when an identity client
/// is attached, so row-level security sees the caller; otherwise the public
/// API key is used.
pub struct HostedDirectory {
    http: Client,
    base_url: String,
    api_key: String,
    identity: Option<Arc<HostedIdentityClient>>,
}

impl HostedDirectory {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            identity: None,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.backend_url.clone(), config.api_key.clone())
    }

    pub fn with_identity(mut self, identity: Arc<HostedIdentityClient>) -> Self {
        self.identity = Some(identity);
        self
    }

    fn table(&self, name: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, name)
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        let bearer = self
            .identity
            .as_ref()
            .and_then(|identity| identity.access_token())
            .unwrap_or_else(|| self.api_key.clone());
        builder.header("apikey", &self.api_key).bearer_auth(bearer)
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, DirectoryError> {
        let response = self
            .authorize(builder)
            .send()
            .await
            .map_err(|e| DirectoryError::Transport(e.to_string()))?;
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status().as_u16();
            let message = response
                .json::<serde_json::Value>()
                .await
                .ok()
                .and_then(|body| body.get("message").and_then(|m| m.as_str()).map(String::from))
                .unwrap_or_else(|| "Request failed".to_string());
            Err(DirectoryError::Http { status, message })
        }
    }

    async fn fetch_rows<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
    ) -> Result<Vec<T>, DirectoryError> {
        self.send(builder)
            .await?
            .json()
            .await
            .map_err(|e| DirectoryError::Decode(e.to_string()))
    }

    async fn fetch_one<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
    ) -> Result<Option<T>, DirectoryError> {
        Ok(self.fetch_rows(builder).await?.into_iter().next())
    }
}

/// Case-insensitive exact-match pattern for an `ilike` filter.
fn ilike_literal(value: &str) -> String {
    let mut pattern = String::with_capacity(value.len() + 8);
    for c in value.chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    format!("ilike.{}", pattern)
}

#[async_trait]
impl Directory for HostedDirectory {
    #[tracing::instrument(name = "directory.find_organization", skip(self))]
    async fn find_organization(
        &self,
        id: OrganizationId,
    ) -> Result<Option<Organization>, DirectoryError> {
        let builder = self.http.get(self.table("organizations")).query(&[
            ("id", format!("eq.{}", id)),
            ("select", ORGANIZATION_COLUMNS.to_string()),
            ("limit", "1".to_string()),
        ]);
        self.fetch_one(builder).await
    }

    #[tracing::instrument(name = "directory.find_user_by_id", skip(self))]
    async fn find_user_by_id(&self, id: UserId) -> Result<Option<UserProfile>, DirectoryError> {
        let builder = self.http.get(self.table("users")).query(&[
            ("id", format!("eq.{}", id)),
            ("select", USER_COLUMNS.to_string()),
            ("limit", "1".to_string()),
        ]);
        self.fetch_one(builder).await
    }

    #[tracing::instrument(name = "directory.find_user_by_email", skip(self, email))]
    async fn find_user_by_email(
        &self,
        email: &str,
        organization_id: OrganizationId,
    ) -> Result<Option<UserProfile>, DirectoryError> {
        // Stored addresses keep whatever case they were registered with.
        let builder = self.http.get(self.table("users")).query(&[
            ("email", ilike_literal(email)),
            ("organization_id", format!("eq.{}", organization_id)),
            ("select", USER_COLUMNS.to_string()),
        ]);
        let rows: Vec<UserProfile> = self.fetch_rows(builder).await?;
        // `*` is still a wildcard to the data API.
        Ok(rows
            .into_iter()
            .find(|user| user.email.eq_ignore_ascii_case(email)))
    }

    #[tracing::instrument(name = "directory.clear_password_change_flag", skip(self))]
    async fn clear_password_change_flag(&self, id: UserId) -> Result<(), DirectoryError> {
        let builder = self
            .http
            .patch(self.table("users"))
            .query(&[("id", format!("eq.{}", id))])
            .header("Prefer", "return=minimal")
            .json(&json!({ "requires_password_change": false }));
        self.send(builder).await.map(|_| ())
    }
}
