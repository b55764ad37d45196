//! [`Transport`] over a `teloxide` bot.

use std::{path::PathBuf, time::Duration};

use {
    async_trait::async_trait,
    herald_mailer::{OutboundCall, ParseMode, Transport, TransportError},
    secrecy::{ExposeSecret, Secret},
    serde::Serialize,
    serde_json::Value,
    teloxide::{
        RequestError,
        payloads::{CopyMessageSetters, SendDocumentSetters, SendMessageSetters, SendPhotoSetters},
        prelude::*,
        types::{ChatId, InputFile, MessageId, ParseMode as TgParseMode},
    },
    tracing::debug,
};

use crate::{Error, Result};

/// Sends mailer calls through the Telegram Bot API.
#[derive(Clone)]
pub struct TelegramTransport {
    bot: Bot,
}

impl TelegramTransport {
    pub fn new(token: &Secret<String>) -> Self {
        Self {
            bot: Bot::new(token.expose_secret()),
        }
    }

    /// Wrap an already configured bot (custom client or API url).
    pub fn with_bot(bot: Bot) -> Self {
        Self { bot }
    }

    /// Point the bot at another Bot API server (a self-hosted one).
    #[must_use]
    pub fn with_api_url(self, url: reqwest::Url) -> Self {
        Self {
            bot: self.bot.set_api_url(url),
        }
    }

    pub fn bot(&self) -> &Bot {
        &self.bot
    }

    /// Numeric id of the bot account, used to tag stored mailers.
    pub async fn bot_id(&self) -> Result<i64> {
        let me = self.bot.get_me().await?;
        i64::try_from(me.id.0).map_err(|e| Error::external("bot id out of range", e))
    }
}

fn parse_mode(mode: ParseMode) -> TgParseMode {
    match mode {
        ParseMode::Html => TgParseMode::Html,
        ParseMode::MarkdownV2 => TgParseMode::MarkdownV2,
        #[allow(deprecated)]
        ParseMode::Markdown => TgParseMode::Markdown,
    }
}

/// `http(s)://` references are fetched by Telegram; anything else is
/// uploaded from the local filesystem.
fn input_file(reference: &str) -> std::result::Result<InputFile, TransportError> {
    if reference.starts_with("http://") || reference.starts_with("https://") {
        let url = reference
            .parse::<reqwest::Url>()
            .map_err(|e| TransportError::api(format!("invalid file url {reference}: {e}")))?;
        Ok(InputFile::url(url))
    } else {
        Ok(InputFile::file(PathBuf::from(reference)))
    }
}

fn retry_after_duration(error: &RequestError) -> Option<Duration> {
    match error {
        RequestError::RetryAfter(wait) => Some(wait.duration()),
        _ => None,
    }
}

fn map_error(error: RequestError) -> TransportError {
    match retry_after_duration(&error) {
        Some(retry_after) => TransportError::rate_limited(retry_after),
        None => TransportError::api(error.to_string()),
    }
}

fn into_response<T: Serialize>(
    result: std::result::Result<T, RequestError>,
) -> std::result::Result<Value, TransportError> {
    let response = result.map_err(map_error)?;
    serde_json::to_value(response)
        .map_err(|e| TransportError::api(format!("unreadable response: {e}")))
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn send(&self, call: &OutboundCall) -> std::result::Result<Value, TransportError> {
        let chat_id = ChatId(call.chat_id().0);
        debug!(chat_id = chat_id.0, method = call.method(), "sending telegram request");

        match call {
            OutboundCall::SendMessage {
                text,
                parse_mode: mode,
                disable_notification,
                ..
            } => {
                let mut req = self
                    .bot
                    .send_message(chat_id, text)
                    .disable_notification(*disable_notification);
                if let Some(mode) = mode {
                    req = req.parse_mode(parse_mode(*mode));
                }
                into_response(req.await)
            },
            OutboundCall::SendPhoto {
                photo,
                caption,
                parse_mode: mode,
                ..
            } => {
                let mut req = self.bot.send_photo(chat_id, input_file(photo)?);
                if let Some(caption) = caption {
                    req = req.caption(caption);
                }
                if let Some(mode) = mode {
                    req = req.parse_mode(parse_mode(*mode));
                }
                into_response(req.await)
            },
            OutboundCall::SendDocument {
                document,
                caption,
                parse_mode: mode,
                ..
            } => {
                let mut req = self.bot.send_document(chat_id, input_file(document)?);
                if let Some(caption) = caption {
                    req = req.caption(caption);
                }
                if let Some(mode) = mode {
                    req = req.parse_mode(parse_mode(*mode));
                }
                into_response(req.await)
            },
            OutboundCall::CopyMessage {
                from_chat_id,
                message_id,
                caption,
                parse_mode: mode,
                ..
            } => {
                let mut req = self.bot.copy_message(
                    chat_id,
                    ChatId(from_chat_id.0),
                    MessageId(*message_id),
                );
                if let Some(caption) = caption {
                    req = req.caption(caption);
                }
                if let Some(mode) = mode {
                    req = req.parse_mode(parse_mode(*mode));
                }
                into_response(req.await)
            },
            OutboundCall::ForwardMessage {
                from_chat_id,
                message_id,
                ..
            } => into_response(
                self.bot
                    .forward_message(chat_id, ChatId(from_chat_id.0), MessageId(*message_id))
                    .await,
            ),
        }
    }
}
