use anyhow::{anyhow, Context};
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use std::{env, time::Duration};

use crate::{models::SessionPolicy, retry::RetryPolicy};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub backend_url: String,
    pub api_key: String,
    pub session_idle_timeout_minutes: i64,
    pub session_max_age_hours: i64,
    pub profile_fetch_attempts: u32,
    pub profile_fetch_delay_ms: u64,
}

impl ClientConfig {
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let backend_url = env::var("BACKEND_URL")
            .map_err(|_| anyhow!("BACKEND_URL is not set; the hosted backend is unavailable"))?;
        let backend_url = backend_url.trim().trim_end_matches('/').to_string();
        if !backend_url.starts_with("http://") && !backend_url.starts_with("https://") {
            return Err(anyhow!("Invalid BACKEND_URL value: {}", backend_url));
        }

        let api_key = env::var("BACKEND_API_KEY")
            .map_err(|_| anyhow!("BACKEND_API_KEY is not set"))?;

        let session_idle_timeout_minutes = parse_var("SESSION_IDLE_TIMEOUT_MINUTES", 30)?;
        let session_max_age_hours = parse_var("SESSION_MAX_AGE_HOURS", 12)?;
        let profile_fetch_attempts = parse_var("PROFILE_FETCH_ATTEMPTS", 3)?;
        let profile_fetch_delay_ms = parse_var("PROFILE_FETCH_DELAY_MS", 1000)?;

        if session_idle_timeout_minutes <= 0 || session_max_age_hours <= 0 {
            return Err(anyhow!("Session timeouts must be positive"));
        }
        if TimeDelta::try_minutes(session_idle_timeout_minutes).is_none() {
            return Err(anyhow!(
                "SESSION_IDLE_TIMEOUT_MINUTES is out of range: {}",
                session_idle_timeout_minutes
            ));
        }
        if TimeDelta::try_hours(session_max_age_hours).is_none() {
            return Err(anyhow!(
                "SESSION_MAX_AGE_HOURS is out of range: {}",
                session_max_age_hours
            ));
        }

        Ok(ClientConfig {
            backend_url,
            api_key,
            session_idle_timeout_minutes,
            session_max_age_hours,
            profile_fetch_attempts,
            profile_fetch_delay_ms,
        })
    }

    /// Values `load` would reject saturate instead of panicking.
    pub fn session_policy(&self) -> SessionPolicy {
        SessionPolicy {
            idle_timeout: TimeDelta::try_minutes(self.session_idle_timeout_minutes)
                .unwrap_or(TimeDelta::MAX),
            max_age: TimeDelta::try_hours(self.session_max_age_hours).unwrap_or(TimeDelta::MAX),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.profile_fetch_attempts,
            delay: Duration::from_millis(self.profile_fetch_delay_ms),
        }
    }
}

fn parse_var<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid {} value: {}", name, raw)),
        Err(_) => Ok(default),
    }
}
