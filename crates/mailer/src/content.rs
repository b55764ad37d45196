//! What a mailer sends, and the concrete API call built per recipient.

use std::{collections::BTreeMap, sync::Arc};

use {
    async_trait::async_trait,
    herald_common::{Context, RecipientId},
    serde::{Deserialize, Serialize},
    serde_json::Value,
};

use crate::{Error, Result};

/// Text formatting mode understood by the Bot API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParseMode {
    #[serde(rename = "HTML")]
    Html,
    MarkdownV2,
    Markdown,
}

/// One Bot API request, fully addressed to a single recipient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "camelCase")]
pub enum OutboundCall {
    SendMessage {
        chat_id: RecipientId,
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parse_mode: Option<ParseMode>,
        #[serde(default)]
        disable_notification: bool,
    },
    SendPhoto {
        chat_id: RecipientId,
        /// URL or file id.
        photo: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parse_mode: Option<ParseMode>,
    },
    SendDocument {
        chat_id: RecipientId,
        /// URL or file id.
        document: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parse_mode: Option<ParseMode>,
    },
    CopyMessage {
        chat_id: RecipientId,
        from_chat_id: RecipientId,
        message_id: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parse_mode: Option<ParseMode>,
    },
    ForwardMessage {
        chat_id: RecipientId,
        from_chat_id: RecipientId,
        message_id: i32,
    },
}

impl OutboundCall {
    pub fn chat_id(&self) -> RecipientId {
        match self {
            Self::SendMessage { chat_id, .. }
            | Self::SendPhoto { chat_id, .. }
            | Self::SendDocument { chat_id, .. }
            | Self::CopyMessage { chat_id, .. }
            | Self::ForwardMessage { chat_id, .. } => *chat_id,
        }
    }

    /// Bot API method name, e.g. `sendMessage`.
    pub fn method(&self) -> &'static str {
        match self {
            Self::SendMessage { .. } => "sendMessage",
            Self::SendPhoto { .. } => "sendPhoto",
            Self::SendDocument { .. } => "sendDocument",
            Self::CopyMessage { .. } => "copyMessage",
            Self::ForwardMessage { .. } => "forwardMessage",
        }
    }

    /// The user-visible text (message text or caption), if the call has one.
    pub fn text_mut(&mut self) -> Option<&mut String> {
        match self {
            Self::SendMessage { text, .. } => Some(text),
            Self::SendPhoto { caption, .. }
            | Self::SendDocument { caption, .. }
            | Self::CopyMessage { caption, .. } => caption.as_mut(),
            Self::ForwardMessage { .. } => None,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            Self::SendMessage { text, .. } => Some(text),
            Self::SendPhoto { caption, .. }
            | Self::SendDocument { caption, .. }
            | Self::CopyMessage { caption, .. } => caption.as_deref(),
            Self::ForwardMessage { .. } => None,
        }
    }
}

/// Builds the call for one recipient.
#[async_trait]
pub trait ContentResolver: Send + Sync {
    async fn resolve(&self, recipient: RecipientId, context: &Context) -> Result<OutboundCall>;

    /// Serialized description stored with the mailer so it can be rebuilt
    /// after a restart.
    fn to_value(&self) -> Result<Value>;
}

/// Turns a stored description back into a resolver.
pub type ContentDecoder = Arc<dyn Fn(Value) -> Result<Arc<dyn ContentResolver>> + Send + Sync>;

/// Built-in content shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Content {
    Text {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parse_mode: Option<ParseMode>,
        #[serde(default)]
        disable_notification: bool,
    },
    Photo {
        photo: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parse_mode: Option<ParseMode>,
    },
    Document {
        document: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parse_mode: Option<ParseMode>,
    },
    /// Copy an existing message without the "forwarded from" header.
    Copy {
        from_chat_id: RecipientId,
        message_id: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parse_mode: Option<ParseMode>,
    },
    Forward {
        from_chat_id: RecipientId,
        message_id: i32,
    },
    /// Pick a variant by the string value of `context_key` (for instance the
    /// recipient's language), falling back to `default`.
    Keyed {
        context_key: String,
        variants: BTreeMap<String, Content>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<Box<Content>>,
    },
}

impl Content {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            parse_mode: None,
            disable_notification: false,
        }
    }

    /// Default [`ContentDecoder`]: deserialize a [`Content`].
    pub fn decode(value: Value) -> Result<Arc<dyn ContentResolver>> {
        let content: Content = serde_json::from_value(value)?;
        Ok(Arc::new(content))
    }

    /// Follow `Keyed` selections until a concrete shape is reached.
    fn select<'a>(&'a self, context: &Context) -> Result<&'a Content> {
        let mut current = self;
        while let Self::Keyed {
            context_key,
            variants,
            default,
        } = current
        {
            let key = match context.get(context_key) {
                Some(Value::String(s)) => Some(s.clone()),
                Some(Value::Number(n)) => Some(n.to_string()),
                Some(Value::Bool(b)) => Some(b.to_string()),
                _ => None,
            };
            current = match key.as_deref().and_then(|k| variants.get(k)) {
                Some(variant) => variant,
                None => default.as_deref().ok_or_else(|| {
                    Error::content(format!(
                        "no variant for {context_key}={} and no default",
                        key.as_deref().unwrap_or("<missing>")
                    ))
                })?,
            };
        }
        Ok(current)
    }

    fn to_call(&self, chat_id: RecipientId) -> Result<OutboundCall> {
        let call = match self.clone() {
            Self::Text {
                text,
                parse_mode,
                disable_notification,
            } => OutboundCall::SendMessage {
                chat_id,
                text,
                parse_mode,
                disable_notification,
            },
            Self::Photo {
                photo,
                caption,
                parse_mode,
            } => OutboundCall::SendPhoto {
                chat_id,
                photo,
                caption,
                parse_mode,
            },
            Self::Document {
                document,
                caption,
                parse_mode,
            } => OutboundCall::SendDocument {
                chat_id,
                document,
                caption,
                parse_mode,
            },
            Self::Copy {
                from_chat_id,
                message_id,
                caption,
                parse_mode,
            } => OutboundCall::CopyMessage {
                chat_id,
                from_chat_id,
                message_id,
                caption,
                parse_mode,
            },
            Self::Forward {
                from_chat_id,
                message_id,
            } => OutboundCall::ForwardMessage {
                chat_id,
                from_chat_id,
                message_id,
            },
            Self::Keyed { .. } => return Err(Error::content("unresolved keyed content")),
        };
        Ok(call)
    }
}

#[async_trait]
impl ContentResolver for Content {
    async fn resolve(&self, recipient: RecipientId, context: &Context) -> Result<OutboundCall> {
        self.select(context)?.to_call(recipient)
    }

    fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest, serde_json::json};

    fn keyed() -> Content {
        Content::Keyed {
            context_key: "language".into(),
            variants: BTreeMap::from([
                ("en".to_string(), Content::text("Hello")),
                ("de".to_string(), Content::text("Hallo")),
            ]),
            default: Some(Box::new(Content::text("Hi"))),
        }
    }

    #[tokio::test]
    async fn text_resolves_to_send_message() {
        let call = Content::text("hey")
            .resolve(RecipientId(5), &Context::new())
            .await
            .unwrap();
        assert_eq!(call, OutboundCall::SendMessage {
            chat_id: RecipientId(5),
            text: "hey".into(),
            parse_mode: None,
            disable_notification: false,
        });
        assert_eq!(call.method(), "sendMessage");
    }

    #[rstest]
    #[case(Some("de"), "Hallo")]
    #[case(Some("en"), "Hello")]
    #[case(Some("fr"), "Hi")]
    #[case(None, "Hi")]
    #[tokio::test]
    async fn keyed_selects_by_context(#[case] language: Option<&str>, #[case] expected: &str) {
        let mut context = Context::new();
        if let Some(language) = language {
            context.insert("language".into(), json!(language));
        }
        let call = keyed().resolve(RecipientId(1), &context).await.unwrap();
        assert_eq!(call.text(), Some(expected));
    }

    #[tokio::test]
    async fn keyed_without_default_fails_on_unknown_key() {
        let content = Content::Keyed {
            context_key: "language".into(),
            variants: BTreeMap::new(),
            default: None,
        };
        let err = content
            .resolve(RecipientId(1), &Context::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Content { .. }));
    }

    #[test]
    fn content_round_trips_through_decoder() {
        let value = keyed().to_value().unwrap();
        assert_eq!(value["type"], "keyed");
        assert!(Content::decode(value).is_ok());
        assert!(Content::decode(json!({ "type": "carrierPigeon" })).is_err());
    }

    #[test]
    fn outbound_call_wire_shape() {
        let call = OutboundCall::CopyMessage {
            chat_id: RecipientId(1),
            from_chat_id: RecipientId(-100),
            message_id: 42,
            caption: Some("c".into()),
            parse_mode: Some(ParseMode::Html),
        };
        let value = serde_json::to_value(&call).unwrap();
        assert_eq!(value["method"], "copyMessage");
        assert_eq!(value["from_chat_id"], -100);
        assert_eq!(value["parse_mode"], "HTML");
    }

    #[test]
    fn text_mut_targets_caption() {
        let mut photo = OutboundCall::SendPhoto {
            chat_id: RecipientId(1),
            photo: "https://example.com/a.png".into(),
            caption: Some("old".into()),
            parse_mode: None,
        };
        *photo.text_mut().unwrap() = "new".into();
        assert_eq!(photo.text(), Some("new"));

        let mut forward = OutboundCall::ForwardMessage {
            chat_id: RecipientId(1),
            from_chat_id: RecipientId(2),
            message_id: 3,
        };
        assert!(forward.text_mut().is_none());
    }
}
