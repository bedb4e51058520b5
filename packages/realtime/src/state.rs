use serde::{Deserialize, Serialize};

use crate::channel::{ChannelKind, ChannelSocket, ChannelStatus, SocketId};

/// Who the connection manager should be connected as.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: Option<String>,
    pub is_authenticated: bool,
}

impl Identity {
    #[must_use]
    pub fn authenticated(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            is_authenticated: true,
        }
    }

    #[must_use]
    pub const fn anonymous() -> Self {
        Self {
            user_id: None,
            is_authenticated: false,
        }
    }

    /// The user to connect as: only authenticated identities with a
    /// non-empty user id qualify.
    #[must_use]
    pub fn active_user(&self) -> Option<&str> {
        self.user_id
            .as_deref()
            .filter(|id| self.is_authenticated && !id.is_empty())
    }
}

/// Raw view of one channel's current connection instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSnapshot {
    pub socket: Option<SocketId>,
    pub status: ChannelStatus,
}

impl From<Option<&ChannelSocket>> for ChannelSnapshot {
    fn from(value: Option<&ChannelSocket>) -> Self {
        value.map_or_else(Self::default, |socket| Self {
            socket: Some(socket.id()),
            status: socket.status(),
        })
    }
}

/// What collaborators can observe about the connection pair.
///
/// `connected` follows the chat channel only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionState {
    pub user_id: Option<String>,
    pub chat: ChannelSnapshot,
    pub notifications: ChannelSnapshot,
    pub connected: bool,
    pub reconnect_attempts: u32,
}

impl ConnectionState {
    #[must_use]
    pub const fn channel(&self, kind: ChannelKind) -> &ChannelSnapshot {
        match kind {
            ChannelKind::Chat => &self.chat,
            ChannelKind::Notifications => &self.notifications,
        }
    }
}
