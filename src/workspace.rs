use crate::history::HistoryProvider;
use serde::Deserialize;
use serde_json::Value;

/// The three kinds of conversation a workspace exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConversationKind {
    PublicChannel,
    PrivateChannel,
    DirectMessage,
}

impl ConversationKind {
    pub const ALL: [ConversationKind; 3] = [
        ConversationKind::PublicChannel,
        ConversationKind::PrivateChannel,
        ConversationKind::DirectMessage,
    ];

    /// Value of the `types` filter for `conversations.list`.
    pub fn api_type(self) -> &'static str {
        match self {
            ConversationKind::PublicChannel => "public_channel",
            ConversationKind::PrivateChannel => "private_channel",
            ConversationKind::DirectMessage => "im",
        }
    }

    /// Directory (under the output root) holding this kind's snapshots.
    pub fn dir_name(self) -> &'static str {
        match self {
            ConversationKind::PublicChannel => "channels",
            ConversationKind::PrivateChannel => "private_channels",
            ConversationKind::DirectMessage => "direct_messages",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ConversationKind::PublicChannel => "Channels",
            ConversationKind::PrivateChannel => "Private channels",
            ConversationKind::DirectMessage => "Direct messages",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
}

/// Listing entry. Channels carry `name`, direct messages carry the peer `user`.
#[derive(Debug, Clone, Deserialize)]
pub struct Conversation {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
}

/// Result of `auth.test`. `raw` is stored verbatim in `metadata.json`.
#[derive(Debug, Clone)]
pub struct AuthInfo {
    pub team: String,
    pub user: String,
    pub user_id: String,
    pub raw: Value,
}

/// Everything the backup driver needs from the remote side.
pub trait Workspace: HistoryProvider + Sync {
    fn auth_test(&self) -> Result<AuthInfo, Self::Error>;

    fn users(&self) -> Result<Vec<User>, Self::Error>;

    fn conversations(&self, kind: ConversationKind) -> Result<Vec<Conversation>, Self::Error>;

    /// Current metadata for a channel, embedded as `channel_info`.
    fn conversation_info(&self, conversation_id: &str) -> Result<Value, Self::Error>;
}
