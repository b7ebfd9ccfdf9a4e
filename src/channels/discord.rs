//! Discord REST client
//!
//! Posts level-up/reward messages and removes expired roles through the
//! Discord HTTP API. Gateway events are consumed elsewhere.

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};

use super::{ChannelError, Notifier, RoleManager};

const API_BASE: &str = "https://discord.com/api/v10";
const AUDIT_LOG_REASON: &str = "Timed role grant expired";

pub struct DiscordClient {
    client: Client,
    token: String,
    base_url: String,
}

impl DiscordClient {
    pub fn new(token: &str) -> Result<Self, ChannelError> {
        Self::with_base_url(token, API_BASE)
    }

    pub fn with_base_url(token: &str, base_url: &str) -> Result<Self, ChannelError> {
        if token.trim().is_empty() {
            return Err(ChannelError::NotConfigured("discord".to_string()));
        }

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| ChannelError::NotConfigured(e.to_string()))?;

        Ok(Self {
            client,
            token: token.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn api_url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    fn auth_header(&self) -> String {
        format!("Bot {}", self.token)
    }

    /// Check the bot token by fetching the current user
    pub async fn verify(&self) -> Result<(), ChannelError> {
        let response = self
            .client
            .get(self.api_url("/users/@me"))
            .header("Authorization", self.auth_header())
            .send()
            .await
            .map_err(|e| ChannelError::AuthenticationFailed(e.to_string()))?;

        if response.status().is_success() {
            tracing::info!("Discord client authenticated");
            Ok(())
        } else {
            Err(ChannelError::AuthenticationFailed("Invalid bot token".to_string()))
        }
    }
}

fn rate_limited(response: &Response) -> Option<ChannelError> {
    if response.status() != StatusCode::TOO_MANY_REQUESTS {
        return None;
    }
    let retry_after = response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");
    Some(ChannelError::RateLimited(format!("retry after {}s", retry_after)))
}

#[async_trait]
impl Notifier for DiscordClient {
    async fn notify(&self, channel: &str, text: &str) -> Result<(), ChannelError> {
        let url = self.api_url(&format!("/channels/{}/messages", channel));
        let body = serde_json::json!({
            "content": text,
            "allowed_mentions": { "parse": ["users"] }
        });

        let response = self
            .client
            .post(&url)
            .header("Authorization", self.auth_header())
            .json(&body)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed(e.to_string()))?;

        if let Some(err) = rate_limited(&response) {
            return Err(err);
        }
        if response.status().is_success() {
            Ok(())
        } else {
            Err(ChannelError::SendFailed(format!("Status: {}", response.status())))
        }
    }
}

#[async_trait]
impl RoleManager for DiscordClient {
    async fn remove_role(
        &self,
        group_id: &str,
        member_id: &str,
        role_id: &str,
    ) -> Result<(), ChannelError> {
        let url = self.api_url(&format!(
            "/guilds/{}/members/{}/roles/{}",
            group_id, member_id, role_id
        ));

        let response = self
            .client
            .delete(&url)
            .header("Authorization", self.auth_header())
            .header("X-Audit-Log-Reason", AUDIT_LOG_REASON)
            .send()
            .await
            .map_err(|e| ChannelError::RoleRemovalFailed(e.to_string()))?;

        if let Some(err) = rate_limited(&response) {
            return Err(err);
        }
        // 204 on success
        if response.status().is_success() {
            Ok(())
        } else {
            Err(ChannelError::RoleRemovalFailed(format!("Status: {}", response.status())))
        }
    }
}
