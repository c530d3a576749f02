use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Change notifications pushed over `/api/events`. Every event belongs to
/// exactly one user and is only delivered to that user's streams.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum StoreEvent {
    /// A record was created or replaced in a collection
    RecordUpserted { collection: String, id: Uuid },

    /// A record was removed from a collection
    RecordDeleted { collection: String, id: Uuid },

    SettingsUpdated,

    /// Any notification mutation; clients refetch the list
    NotificationsChanged { unread: usize },

    /// A chat tab gained a message or changed shape
    ChatChanged { tab_id: Option<String> },

    /// The chat backend started or finished working on a tab
    ChatTyping { tab_id: String, typing: bool },
}

/// An event addressed to a user, as carried on the dispatcher.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub user_id: Uuid,
    pub event: StoreEvent,
}
