//! Durable snapshot of one mailer.

use {
    herald_common::{ChatSet, Context, MailerSettings},
    serde::{Deserialize, Serialize},
};

/// Everything needed to rebuild a mailer after a restart.
///
/// `content` is the serialized content description; the storage layer never
/// looks inside it. Status is derived on restore from `chats`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageRecord {
    pub chats: ChatSet,
    pub content: serde_json::Value,
    #[serde(default)]
    pub settings: MailerSettings,
    pub bot_id: i64,
    #[serde(default)]
    pub context: Context,
}
