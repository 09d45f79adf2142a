use std::time::Duration;

use core_model::{Notifier, NotifyError};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";
/// Bot API limit for one message, in characters.
pub const MAX_MESSAGE_CHARS: usize = 4096;

/// Sends messages through the Telegram bot API `sendMessage` method.
pub struct TelegramNotifier {
    client: reqwest::blocking::Client,
    api_base: String,
    token: String,
    chat_id: String,
}

impl std::fmt::Debug for TelegramNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramNotifier")
            .field("api_base", &self.api_base)
            .field("token", &"***")
            .field("chat_id", &self.chat_id)
            .finish()
    }
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    disable_web_page_preview: bool,
}

#[derive(Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

impl TelegramNotifier {
    pub fn new(token: String, chat_id: String) -> Result<Self, NotifyError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| NotifyError::ClientInit(e.to_string()))?;
        Ok(Self {
            client,
            api_base: DEFAULT_API_BASE.to_string(),
            token,
            chat_id,
        })
    }

    #[must_use]
    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/bot{}/sendMessage", self.api_base, self.token)
    }
}

impl Notifier for TelegramNotifier {
    fn channel(&self) -> &'static str {
        "telegram"
    }

    fn send(&self, text: &str) -> Result<(), NotifyError> {
        let text = truncate_message(text);
        let response = self
            .client
            .post(self.endpoint())
            .json(&SendMessage {
                chat_id: &self.chat_id,
                text: &text,
                disable_web_page_preview: true,
            })
            .send()
            // the URL carries the bot token
            .map_err(|e| NotifyError::Transport(e.without_url().to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .unwrap_or_else(|_| "could not read response body".to_string());
        classify_response(status, &body)?;
        debug!(chat_id = %self.chat_id, chars = text.chars().count(), "telegram message sent");
        Ok(())
    }
}

fn truncate_message(text: &str) -> String {
    if text.chars().count() <= MAX_MESSAGE_CHARS {
        return text.to_string();
    }
    warn!(limit = MAX_MESSAGE_CHARS, "message too long for telegram; truncating");
    let mut out: String = text.chars().take(MAX_MESSAGE_CHARS - 1).collect();
    out.push('…');
    out
}

fn classify_response(status: u16, body: &str) -> Result<(), NotifyError> {
    let parsed: Option<ApiResponse> = serde_json::from_str(body).ok();
    let description = parsed
        .as_ref()
        .and_then(|r| r.description.clone())
        .unwrap_or_else(|| body.chars().take(200).collect());
    match status {
        200..=299 if parsed.as_ref().is_none_or(|r| r.ok) => Ok(()),
        200..=299 => Err(NotifyError::Rejected { description }),
        401 | 403 => Err(NotifyError::Unauthorized { status }),
        400 | 404 => Err(NotifyError::Rejected { description }),
        _ => Err(NotifyError::Status {
            status,
            body: description,
        }),
    }
}
