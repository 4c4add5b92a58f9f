//! Out-of-band operator notifications over Telegram.
//!
//! The sink is strictly best-effort: a dead bot or a flaky network never
//! blocks trading logic, and identical messages are suppressed for a window
//! so a flapping alert can't flood the channel.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use teloxide::prelude::*;
use tracing::{info, warn};

use common::{Notifier, Severity};

/// Suppresses repeats of the same message inside a rolling window.
pub struct DedupWindow {
    window: Duration,
    seen: Mutex<HashMap<String, Instant>>,
}

impl DedupWindow {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// `true` when the message should go out; records it as sent.
    pub fn admit(&self, key: &str) -> bool {
        let mut seen = self.seen.lock().unwrap();
        let now = Instant::now();
        seen.retain(|_, sent_at| now.duration_since(*sent_at) < self.window);

        match seen.get(key) {
            Some(_) => false,
            None => {
                seen.insert(key.to_string(), now);
                true
            }
        }
    }
}

/// Sends alerts to a fixed set of Telegram chats.
pub struct TelegramNotifier {
    bot: Bot,
    chat_ids: Vec<ChatId>,
    dedup: DedupWindow,
}

impl TelegramNotifier {
    pub const DEDUP_WINDOW: Duration = Duration::from_secs(300);

    pub fn new(token: impl Into<String>, chat_ids: Vec<i64>) -> Self {
        info!(chats = chat_ids.len(), "Telegram notifier configured");
        Self {
            bot: Bot::new(token.into()),
            chat_ids: chat_ids.into_iter().map(ChatId).collect(),
            dedup: DedupWindow::new(Self::DEDUP_WINDOW),
        }
    }

    fn prefix(severity: Severity) -> &'static str {
        match severity {
            Severity::Info => "\u{2139}\u{fe0f}",
            Severity::Warning => "\u{26a0}\u{fe0f}",
            Severity::Critical => "\u{1f6a8}",
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, severity: Severity, message: &str) {
        if !self.dedup.admit(message) {
            return;
        }
        let text = format!("{} {message}", Self::prefix(severity));
        for &chat_id in &self.chat_ids {
            if let Err(e) = self.bot.send_message(chat_id, &text).await {
                warn!(chat_id = ?chat_id, error = %e, "failed to send Telegram alert");
            }
        }
    }
}
