//! Chat platform collaborators
//!
//! The engine talks to the platform through two narrow traits:
//! - [`Notifier`] posts text into a channel (fire-and-forget for callers)
//! - [`RoleManager`] removes a role from a member when a timed grant expires
//!
//! [`DiscordClient`] implements both over the Discord REST API. [`LogNotifier`]
//! and [`LogRoleManager`] stand in when no bot token is configured.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod discord;
#[cfg(test)]
pub mod testing;

pub use discord::DiscordClient;

// ============================================================================
// Collaborator Traits
// ============================================================================

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Post `text` into `channel`
    async fn notify(&self, channel: &str, text: &str) -> Result<(), ChannelError>;
}

#[async_trait]
pub trait RoleManager: Send + Sync {
    /// Remove `role_id` from `member_id` in `group_id`
    async fn remove_role(
        &self,
        group_id: &str,
        member_id: &str,
        role_id: &str,
    ) -> Result<(), ChannelError>;
}

/// Post to an optional channel, swallowing failures.
/// A missing channel is silently ignored.
pub async fn notify_best_effort(notifier: &dyn Notifier, channel: Option<&str>, text: &str) {
    let Some(channel) = channel else {
        return;
    };
    if let Err(e) = notifier.notify(channel, text).await {
        tracing::warn!("Notification to channel {} failed: {}", channel, e);
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChannelError {
    NotConfigured(String),
    SendFailed(String),
    RoleRemovalFailed(String),
    AuthenticationFailed(String),
    RateLimited(String),
}

impl std::fmt::Display for ChannelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelError::NotConfigured(c) => write!(f, "Channel {} not configured", c),
            ChannelError::SendFailed(msg) => write!(f, "Send failed: {}", msg),
            ChannelError::RoleRemovalFailed(msg) => write!(f, "Role removal failed: {}", msg),
            ChannelError::AuthenticationFailed(msg) => write!(f, "Authentication failed: {}", msg),
            ChannelError::RateLimited(msg) => write!(f, "Rate limited: {}", msg),
        }
    }
}

impl std::error::Error for ChannelError {}

// ============================================================================
// Log-only Implementations
// ============================================================================

/// Notifier that only logs; used when no bot token is configured
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, channel: &str, text: &str) -> Result<(), ChannelError> {
        tracing::info!("[channel {}] {}", channel, text);
        Ok(())
    }
}

/// Role manager that only logs; expiries still clear the durable set
pub struct LogRoleManager;

#[async_trait]
impl RoleManager for LogRoleManager {
    async fn remove_role(
        &self,
        group_id: &str,
        member_id: &str,
        role_id: &str,
    ) -> Result<(), ChannelError> {
        tracing::info!(
            "Would remove role {} from member {} in group {}",
            role_id,
            member_id,
            group_id
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingNotifier;
    use super::*;

    #[tokio::test]
    async fn test_notify_best_effort_skips_missing_channel() {
        let notifier = RecordingNotifier::default();
        notify_best_effort(&notifier, None, "hello").await;
        assert!(notifier.messages().is_empty());

        notify_best_effort(&notifier, Some("42"), "hello").await;
        assert_eq!(notifier.messages(), vec![("42".to_string(), "hello".to_string())]);
    }

    #[tokio::test]
    async fn test_notify_best_effort_swallows_failure() {
        let notifier = RecordingNotifier::failing();
        notify_best_effort(&notifier, Some("42"), "hello").await;
        assert!(notifier.messages().is_empty());
    }

    #[test]
    fn test_error_display() {
        let err = ChannelError::RoleRemovalFailed("Status: 403".to_string());
        assert_eq!(err.to_string(), "Role removal failed: Status: 403");
    }
}
