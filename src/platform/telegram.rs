//! Telegram platform client — long-polls the Bot API for channel posts and
//! forwards via `forwardMessage`.
//!
//! One `getUpdates` loop per client. Incoming posts are routed to per-channel
//! subscribers by canonical chat id; a subscriber that has gone away is
//! dropped from the routing table on the next send.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::channel::{ChannelEntity, normalize_channel_id};
use crate::error::{ClientError, SendError};
use crate::message::{MediaKind, Message, MessageContent};
use crate::platform::{PlatformClient, Subscription};

/// Long-poll timeout passed to `getUpdates`.
const POLL_TIMEOUT_SECS: u64 = 30;

/// Pause after a failed poll before the next attempt.
const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(5);

type RouteTable = Arc<Mutex<HashMap<String, mpsc::UnboundedSender<Message>>>>;

/// Bot API client for one account.
pub struct TelegramClient {
    account: String,
    token: SecretString,
    http: reqwest::Client,
    routes: RouteTable,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl TelegramClient {
    pub fn new(account: impl Into<String>, token: SecretString) -> Self {
        Self {
            account: account.into(),
            token,
            http: reqwest::Client::new(),
            routes: Arc::new(Mutex::new(HashMap::new())),
            poller: Mutex::new(None),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!(
            "https://api.telegram.org/bot{}/{method}",
            self.token.expose_secret()
        )
    }

    /// Spawn the long-poll loop if it is not already running.
    fn ensure_poller(&self) {
        let mut guard = self.poller.lock().expect("poller lock poisoned");
        if guard.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        let url = self.api_url("getUpdates");
        let http = self.http.clone();
        let routes = Arc::clone(&self.routes);
        let account = self.account.clone();

        *guard = Some(tokio::spawn(async move {
            let mut offset: i64 = 0;
            info!(account = %account, "Telegram poller started");

            loop {
                let body = serde_json::json!({
                    "offset": offset,
                    "timeout": POLL_TIMEOUT_SECS,
                    "allowed_updates": ["message", "channel_post"],
                });

                let resp = match http.post(&url).json(&body).send().await {
                    Ok(r) => r,
                    Err(e) => {
                        warn!(account = %account, error = %e, "Telegram poll error");
                        tokio::time::sleep(POLL_ERROR_BACKOFF).await;
                        continue;
                    }
                };

                let data: serde_json::Value = match resp.json().await {
                    Ok(d) => d,
                    Err(e) => {
                        warn!(account = %account, error = %e, "Telegram poll parse error");
                        tokio::time::sleep(POLL_ERROR_BACKOFF).await;
                        continue;
                    }
                };

                let Some(results) = data.get("result").and_then(serde_json::Value::as_array)
                else {
                    continue;
                };

                for update in results {
                    if let Some(uid) = update.get("update_id").and_then(serde_json::Value::as_i64)
                    {
                        offset = uid + 1;
                    }

                    let Some(message) = parse_update(update) else {
                        continue;
                    };

                    let mut routes = routes.lock().expect("route lock poisoned");
                    if let Some(tx) = routes.get(&message.source) {
                        if tx.send(message.clone()).is_err() {
                            // Subscriber went away; drop the route.
                            routes.remove(&message.source);
                        }
                    }
                }
            }
        }));
    }
}

#[async_trait]
impl PlatformClient for TelegramClient {
    async fn resolve(&self, raw: &str) -> Result<ChannelEntity, ClientError> {
        let chat_id = normalize_channel_id(raw);
        // Bot API accepts numeric ids and @handles; strip a t.me link down to
        // its handle form first.
        let query = chat_id
            .strip_prefix("https://t.me/")
            .map(|h| format!("@{h}"))
            .unwrap_or_else(|| chat_id.clone());

        let resp = self
            .http
            .post(self.api_url("getChat"))
            .json(&serde_json::json!({ "chat_id": query }))
            .send()
            .await
            .map_err(|e| ClientError::ResolveFailed {
                raw: raw.to_string(),
                reason: e.to_string(),
            })?;

        let data: serde_json::Value =
            resp.json().await.map_err(|e| ClientError::ResolveFailed {
                raw: raw.to_string(),
                reason: e.to_string(),
            })?;

        if data.get("ok") != Some(&serde_json::Value::Bool(true)) {
            let reason = data
                .get("description")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("getChat failed")
                .to_string();
            return Err(ClientError::ResolveFailed {
                raw: raw.to_string(),
                reason,
            });
        }

        let chat = &data["result"];
        let id = chat
            .get("id")
            .and_then(serde_json::Value::as_i64)
            .ok_or_else(|| ClientError::ResolveFailed {
                raw: raw.to_string(),
                reason: "getChat result missing id".into(),
            })?;
        let title = chat
            .get("title")
            .or_else(|| chat.get("username"))
            .and_then(serde_json::Value::as_str)
            .unwrap_or(raw);

        Ok(ChannelEntity::new(raw, normalize_channel_id(&id.to_string()))
            .with_display_name(title))
    }

    async fn subscribe(&self, channel_id: &str) -> Result<Subscription, ClientError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.routes
            .lock()
            .expect("route lock poisoned")
            .insert(channel_id.to_string(), tx);
        debug!(account = %self.account, channel = %channel_id, "Subscribed");
        Ok(Subscription { events: rx })
    }

    async fn forward(&self, message: &Message, destination: &str) -> Result<(), SendError> {
        let message_id: i64 = message.id.parse().map_err(|_| SendError::Other {
            reason: format!("non-numeric message id {:?}", message.id),
        })?;

        let body = serde_json::json!({
            "chat_id": destination,
            "from_chat_id": message.source,
            "message_id": message_id,
        });

        let resp = self
            .http
            .post(self.api_url("forwardMessage"))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    SendError::ConnectionLost {
                        reason: e.to_string(),
                    }
                } else {
                    SendError::Other {
                        reason: e.to_string(),
                    }
                }
            })?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }

        let data: serde_json::Value = resp.json().await.unwrap_or_default();
        Err(map_send_failure(status.as_u16(), &data, destination))
    }

    async fn is_connected(&self) -> bool {
        match self.http.get(self.api_url("getMe")).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    async fn connect(&self) -> Result<(), ClientError> {
        let resp = self
            .http
            .get(self.api_url("getMe"))
            .send()
            .await
            .map_err(|e| ClientError::ConnectFailed {
                account: self.account.clone(),
                reason: e.to_string(),
            })?;

        if !resp.status().is_success() {
            return Err(ClientError::ConnectFailed {
                account: self.account.clone(),
                reason: format!("getMe returned {}", resp.status()),
            });
        }

        self.ensure_poller();
        info!(account = %self.account, "Telegram client connected");
        Ok(())
    }

    async fn disconnect(&self) {
        if let Some(handle) = self.poller.lock().expect("poller lock poisoned").take() {
            handle.abort();
        }
        self.routes.lock().expect("route lock poisoned").clear();
        info!(account = %self.account, "Telegram client disconnected");
    }
}

/// Map a failed Bot API send response to a typed delivery signal.
fn map_send_failure(status: u16, data: &serde_json::Value, destination: &str) -> SendError {
    if status == 429 {
        let retry_after = data
            .pointer("/parameters/retry_after")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(30);
        return SendError::RateLimited {
            retry_after: Duration::from_secs(retry_after),
        };
    }

    let description = data
        .get("description")
        .and_then(serde_json::Value::as_str)
        .unwrap_or("")
        .to_string();

    match status {
        403 => SendError::PermissionDenied {
            destination: destination.to_string(),
        },
        401 => SendError::AuthFailed {
            reason: description,
        },
        _ => SendError::Other {
            reason: format!("HTTP {status}: {description}"),
        },
    }
}

/// Parse one `getUpdates` entry into a relay message. Returns `None` for
/// update kinds the relay does not consume.
fn parse_update(update: &serde_json::Value) -> Option<Message> {
    let msg = update.get("channel_post").or_else(|| update.get("message"))?;

    let chat_id = msg.pointer("/chat/id").and_then(serde_json::Value::as_i64)?;
    let source = normalize_channel_id(&chat_id.to_string());
    let id = msg
        .get("message_id")
        .and_then(serde_json::Value::as_i64)?
        .to_string();

    let caption = msg
        .get("caption")
        .and_then(serde_json::Value::as_str)
        .map(String::from);
    let grouped = msg.get("media_group_id").is_some();

    let media = extract_media(msg);
    let content = match media {
        Some((kind, native_id)) => MessageContent::Media {
            kind,
            native_id,
            caption,
        },
        None => match msg.get("text").and_then(serde_json::Value::as_str) {
            Some(text) => MessageContent::Text(text.to_string()),
            None => MessageContent::Empty,
        },
    };

    Some(Message {
        id,
        source,
        content,
        grouped,
    })
}

/// Pull the media kind and stable native id out of a Bot API message object.
fn extract_media(msg: &serde_json::Value) -> Option<(MediaKind, String)> {
    if let Some(sizes) = msg.get("photo").and_then(serde_json::Value::as_array) {
        let id = sizes
            .last()
            .and_then(|p| p.get("file_unique_id"))
            .and_then(serde_json::Value::as_str)?;
        return Some((MediaKind::Photo, id.to_string()));
    }
    for (field, kind) in [
        ("document", MediaKind::Document),
        ("video", MediaKind::Video),
        ("audio", MediaKind::Audio),
        ("voice", MediaKind::Audio),
        ("animation", MediaKind::Other),
        ("sticker", MediaKind::Other),
    ] {
        if let Some(obj) = msg.get(field) {
            let id = obj
                .get("file_unique_id")
                .and_then(serde_json::Value::as_str)?;
            return Some((kind, id.to_string()));
        }
    }
    None
}
