//! Recording fakes for the collaborator traits

use async_trait::async_trait;
use std::sync::Mutex;

use super::{ChannelError, Notifier, RoleManager};

#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<(String, String)>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn messages(&self) -> Vec<(String, String)> {
        self.messages.lock().map(|m| m.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, channel: &str, text: &str) -> Result<(), ChannelError> {
        if self.fail {
            return Err(ChannelError::SendFailed("offline".to_string()));
        }
        if let Ok(mut messages) = self.messages.lock() {
            messages.push((channel.to_string(), text.to_string()));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingRoleManager {
    removals: Mutex<Vec<(String, String, String)>>,
    fail: bool,
    panic_on_role: Option<String>,
}

impl RecordingRoleManager {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Records every call, then panics when asked to remove `role_id`
    pub fn panicking_on(role_id: &str) -> Self {
        Self {
            panic_on_role: Some(role_id.to_string()),
            ..Self::default()
        }
    }

    /// Every attempted removal as (group, member, role), failed ones included
    pub fn removals(&self) -> Vec<(String, String, String)> {
        self.removals.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl RoleManager for RecordingRoleManager {
    async fn remove_role(
        &self,
        group_id: &str,
        member_id: &str,
        role_id: &str,
    ) -> Result<(), ChannelError> {
        if let Ok(mut removals) = self.removals.lock() {
            removals.push((group_id.to_string(), member_id.to_string(), role_id.to_string()));
        }
        if self.panic_on_role.as_deref() == Some(role_id) {
            panic!("role manager crashed removing {}", role_id);
        }
        if self.fail {
            Err(ChannelError::RoleRemovalFailed("Status: 403 Forbidden".to_string()))
        } else {
            Ok(())
        }
    }
}
