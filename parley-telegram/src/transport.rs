//! Bot API transport.
//!
//! A turn's visible message is created with `sendMessage` and then edited in
//! place with `editMessageText`. Structured updates are rendered to HTML and
//! sent with `parse_mode: HTML`; plain ones are sent verbatim.

use async_trait::async_trait;
use parley_common::TelegramConfig;
use parley_engine::{MarkupKind, SessionHandle, Transport, TransportError};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::Envelope;
use crate::format::to_telegram_html;

const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Telegram's answer when HTML is malformed.
const PARSE_FAILURE: &str = "can't parse entities";
/// Telegram's answer when an edit would not change the message.
const NOT_MODIFIED: &str = "message is not modified";

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

/// [`Transport`] over the Telegram Bot API. Targets are chat IDs.
pub struct TelegramTransport {
    client: reqwest::Client,
    api_base: String,
    bot_token: String,
}

impl TelegramTransport {
    pub fn new(bot_token: impl Into<String>) -> Self {
        Self::with_api_base(bot_token, DEFAULT_API_BASE)
    }

    /// Use another Bot API server, such as a self-hosted one.
    pub fn with_api_base(bot_token: impl Into<String>, api_base: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            bot_token: bot_token.into(),
        }
    }

    pub fn from_config(config: &TelegramConfig) -> anyhow::Result<Self> {
        if config.bot_token.is_empty() {
            anyhow::bail!("telegram.bot_token is not set (config file or BOT_TOKEN)");
        }
        Ok(Self::with_api_base(&config.bot_token, &config.api_base))
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_base, self.bot_token)
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, body: &Value) -> Result<T, TransportError> {
        let resp = self
            .client
            .post(self.api_url(method))
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout
                } else {
                    TransportError::Failed(format!("{method}: {e}"))
                }
            })?;

        let status = resp.status();
        let envelope: Envelope<T> = resp.json().await.map_err(|e| {
            TransportError::Failed(format!("{method} returned HTTP {status}: {e}"))
        })?;

        envelope.into_result().map_err(|description| {
            tracing::debug!(method, status = %status, description = %description, "Bot API call failed");
            if description.contains(PARSE_FAILURE) {
                TransportError::MarkupRejected(description)
            } else {
                TransportError::Failed(format!("{method} failed: {description}"))
            }
        })
    }

    async fn send_message(
        &self,
        chat_id: &str,
        text: &str,
        markup: MarkupKind,
    ) -> Result<SessionHandle, TransportError> {
        let sent: SentMessage = self
            .call("sendMessage", &message_body(chat_id, text, markup))
            .await?;
        Ok(SessionHandle {
            target: chat_id.to_string(),
            message_id: sent.message_id,
        })
    }
}

/// Request body for `sendMessage` / `editMessageText`.
fn message_body(chat_id: &str, text: &str, markup: MarkupKind) -> Value {
    let mut body = json!({
        "chat_id": chat_id,
        "link_preview_options": { "is_disabled": true },
    });
    match markup {
        MarkupKind::Structured => {
            body["text"] = json!(to_telegram_html(text));
            body["parse_mode"] = json!("HTML");
        }
        MarkupKind::Plain => body["text"] = json!(text),
    }
    body
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn begin(&self, target: &str, placeholder: &str) -> Result<SessionHandle, TransportError> {
        self.send_message(target, placeholder, MarkupKind::Plain).await
    }

    async fn update_visible(
        &self,
        handle: &SessionHandle,
        text: &str,
        markup: MarkupKind,
    ) -> Result<(), TransportError> {
        let mut body = message_body(&handle.target, text, markup);
        body["message_id"] = json!(handle.message_id);

        match self.call::<Value>("editMessageText", &body).await {
            Ok(_) => Ok(()),
            Err(TransportError::Failed(reason)) if reason.contains(NOT_MODIFIED) => {
                tracing::debug!(message_id = handle.message_id, "Edit was a no-op");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn send_followup(
        &self,
        handle: &SessionHandle,
        text: &str,
        markup: MarkupKind,
    ) -> Result<SessionHandle, TransportError> {
        self.send_message(&handle.target, text, markup).await
    }
}
