//! Telegram Bot API sink.
//!
//! Uses `sendMessage`, `sendMediaGroup` and `sendDocument`. 429 responses
//! are retried after the `parameters.retry_after` delay the API returns.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder};
use report_render::{Attachment, ParseMode};
use serde_json::json;
use tracing::{debug, warn};

use super::{Chat, TelegramSink};
use crate::config::TelegramConfig;
use crate::utils::http_client::build_client;
use crate::{Error, Result};

/// Maximum number of retries for rate-limited requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Telegram `sendMessage` text limit (UTF-8 characters).
const TELEGRAM_MESSAGE_LIMIT: usize = 4096;

/// Maximum media items per album.
const TELEGRAM_ALBUM_LIMIT: usize = 10;

const SINK: &str = "telegram";

/// Telegram bot client.
pub struct TelegramBot {
    client: Client,
    base_url: String,
}

impl TelegramBot {
    pub fn new(config: &TelegramConfig) -> Result<Self> {
        let client = build_client(Duration::from_secs(60))?;
        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: Client, config: &TelegramConfig) -> Self {
        Self {
            client,
            base_url: format!(
                "{}/bot{}",
                config.api_url.trim_end_matches('/'),
                config.token
            ),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/{}", self.base_url, method)
    }

    /// Send a request built by `build`, retrying on rate limits.
    ///
    /// The builder is invoked once per attempt because multipart bodies
    /// cannot be replayed.
    async fn send_with_retry<F>(&self, method: &str, build: F) -> Result<()>
    where
        F: Fn(&Client, &str) -> Result<RequestBuilder>,
    {
        let url = self.method_url(method);
        let mut attempts = 0;

        loop {
            attempts += 1;

            let response = build(&self.client, &url)?
                .send()
                .await
                .map_err(|e| Error::delivery(SINK, format!("{method} request failed: {e}")))?;

            let status = response.status();
            if status.is_success() {
                return Ok(());
            }

            if status.as_u16() == 429 {
                let body: serde_json::Value = response.json().await.unwrap_or_default();
                let retry_after = body
                    .get("parameters")
                    .and_then(|p| p.get("retry_after"))
                    .and_then(|v| v.as_u64())
                    .map(Duration::from_secs);

                if attempts >= MAX_RATE_LIMIT_RETRIES {
                    warn!(
                        method,
                        retry_after = ?retry_after,
                        "Telegram rate limit: max retries ({}) exceeded",
                        MAX_RATE_LIMIT_RETRIES
                    );
                    return Err(Error::delivery(
                        SINK,
                        format!("{method} rate limited after {MAX_RATE_LIMIT_RETRIES} retries"),
                    ));
                }

                let wait = retry_after.unwrap_or(Duration::from_secs(1));
                debug!(
                    method,
                    "Telegram rate limited (429), waiting {:?} before retry (attempt {}/{})",
                    wait,
                    attempts,
                    MAX_RATE_LIMIT_RETRIES
                );
                tokio::time::sleep(wait).await;
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            return Err(Error::delivery(
                SINK,
                format!("{method} failed: {status} - {body}"),
            ));
        }
    }

    async fn send_message(&self, chat: Chat, text: &str, parse_mode: ParseMode) -> Result<()> {
        let mut payload = json!({
            "chat_id": chat.chat_id,
            "text": text,
        });
        if let Some(mode) = parse_mode.as_api_str() {
            payload["parse_mode"] = json!(mode);
        }
        if let Some(thread_id) = chat.thread_id {
            payload["message_thread_id"] = json!(thread_id);
        }

        self.send_with_retry("sendMessage", |client, url| Ok(client.post(url).json(&payload)))
            .await
    }

    async fn send_photo_group(&self, chat: Chat, images: &[Attachment]) -> Result<()> {
        let media: Vec<_> = images
            .iter()
            .enumerate()
            .map(|(i, _)| json!({ "type": "photo", "media": format!("attach://photo{i}") }))
            .collect();
        let media = serde_json::to_string(&media)?;

        self.send_with_retry("sendMediaGroup", |client, url| {
            let mut form = chat_form(chat).text("media", media.clone());
            for (i, image) in images.iter().enumerate() {
                form = form.part(format!("photo{i}"), file_part(image, "image/png")?);
            }
            Ok(client.post(url).multipart(form))
        })
        .await
    }

    async fn send_photo(&self, chat: Chat, image: &Attachment) -> Result<()> {
        self.send_with_retry("sendPhoto", |client, url| {
            let form = chat_form(chat).part("photo", file_part(image, "image/png")?);
            Ok(client.post(url).multipart(form))
        })
        .await
    }

    async fn send_document(&self, chat: Chat, file: &Attachment) -> Result<()> {
        let mime = mime_guess::from_path(&file.name)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        self.send_with_retry("sendDocument", |client, url| {
            let form = chat_form(chat).part("document", file_part(file, &mime)?);
            Ok(client.post(url).multipart(form))
        })
        .await
    }
}

fn chat_form(chat: Chat) -> Form {
    let form = Form::new().text("chat_id", chat.chat_id.to_string());
    match chat.thread_id {
        Some(thread_id) => form.text("message_thread_id", thread_id.to_string()),
        None => form,
    }
}

fn file_part(file: &Attachment, mime: &str) -> Result<Part> {
    Part::bytes(file.data.to_vec())
        .file_name(file.name.clone())
        .mime_str(mime)
        .map_err(|e| Error::delivery(SINK, format!("invalid mime type {mime}: {e}")))
}

/// Split `text` into chunks of at most `limit` characters, preferring line
/// breaks as split points.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    if text.chars().count() <= limit {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in text.split_inclusive('\n') {
        let line_len = line.chars().count();
        if current_len + line_len > limit && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if line_len > limit {
            let chars: Vec<char> = line.chars().collect();
            for piece in chars.chunks(limit) {
                chunks.push(piece.iter().collect());
            }
            continue;
        }
        current.push_str(line);
        current_len += line_len;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[async_trait]
impl TelegramSink for TelegramBot {
    async fn send_text(&self, chat: Chat, text: &str, parse_mode: ParseMode) -> Result<()> {
        for chunk in split_message(text, TELEGRAM_MESSAGE_LIMIT) {
            self.send_message(chat, &chunk, parse_mode).await?;
        }
        debug!(chat_id = chat.chat_id, "Telegram message sent");
        Ok(())
    }

    async fn send_album(&self, chat: Chat, images: &[Attachment]) -> Result<()> {
        for group in images.chunks(TELEGRAM_ALBUM_LIMIT) {
            // Albums need at least two items.
            match group {
                [single] => self.send_photo(chat, single).await?,
                many => self.send_photo_group(chat, many).await?,
            }
        }
        debug!(chat_id = chat.chat_id, images = images.len(), "Telegram album sent");
        Ok(())
    }

    async fn send_documents(&self, chat: Chat, files: &[Attachment]) -> Result<()> {
        let mut errors = Vec::new();
        for file in files {
            if let Err(err) = self.send_document(chat, file).await {
                warn!(chat_id = chat.chat_id, file = %file.name, error = %err, "Telegram document failed");
                errors.push(err);
            }
        }
        Error::join(errors).map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_url() {
        let bot = TelegramBot::with_client(
            Client::new(),
            &TelegramConfig {
                token: "123:ABC".into(),
                api_url: "https://api.telegram.org/".into(),
            },
        );
        assert_eq!(
            bot.method_url("sendMessage"),
            "https://api.telegram.org/bot123:ABC/sendMessage"
        );
    }

    #[test]
    fn test_split_short_message() {
        assert_eq!(split_message("hello", 10), vec!["hello"]);
    }

    #[test]
    fn test_split_prefers_line_breaks() {
        let text = "aaaa\nbbbb\ncccc\n";
        assert_eq!(split_message(text, 10), vec!["aaaa\nbbbb\n", "cccc\n"]);
    }

    #[test]
    fn test_split_long_line() {
        let text = "x".repeat(25);
        let chunks = split_message(&text, 10);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.chars().count() <= 10));
        assert_eq!(chunks.concat(), text);
    }
}
