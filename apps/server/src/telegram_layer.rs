//! Tracing layer that forwards ERROR events to a Telegram ops chat.
//!
//! Sends are throttled (one message per 10 s, repeated errors muted
//! for 60 s) and spawned onto the runtime so logging never blocks a
//! request.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

const MIN_INTERVAL: Duration = Duration::from_secs(10);
const DEDUP_WINDOW: Duration = Duration::from_secs(60);

// ── Throttle ──

/// Rate limit plus dedup for outgoing alerts. A message passes when
/// the global interval has elapsed and its hash wasn't sent within the
/// dedup window.
struct Throttle {
    inner: Mutex<ThrottleState>,
}

struct ThrottleState {
    last_sent: Instant,
    recent: Vec<(u64, Instant)>,
}

impl Throttle {
    fn new() -> Self {
        Self {
            inner: Mutex::new(ThrottleState {
                // first alert goes out immediately
                last_sent: Instant::now() - MIN_INTERVAL,
                recent: Vec::new(),
            }),
        }
    }

    fn admit(&self, hash: u64) -> bool {
        let mut state = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let now = Instant::now();
        state
            .recent
            .retain(|(_, ts)| now.duration_since(*ts) < DEDUP_WINDOW);

        let duplicate = state.recent.iter().any(|(h, _)| *h == hash);
        if duplicate || now.duration_since(state.last_sent) < MIN_INTERVAL {
            return false;
        }
        state.last_sent = now;
        state.recent.push((hash, now));
        true
    }

    #[cfg(test)]
    fn rewind(&self, interval: Duration) {
        let mut state = self.inner.lock().unwrap();
        state.last_sent = Instant::now() - interval;
        for (_, ts) in state.recent.iter_mut() {
            *ts -= interval;
        }
    }
}

// ── Layer ──

pub struct TelegramLayer {
    bot_token: String,
    chat_id: i64,
    http: reqwest::Client,
    throttle: Throttle,
}

impl TelegramLayer {
    pub fn new(bot_token: String, chat_id: i64) -> Self {
        Self {
            bot_token,
            chat_id,
            http: reqwest::Client::new(),
            throttle: Throttle::new(),
        }
    }
}

impl<S: Subscriber> Layer<S> for TelegramLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() != Level::ERROR {
            return;
        }

        let mut visitor = EventText::default();
        event.record(&mut visitor);
        let message = visitor.render();

        let hash = {
            let mut h = DefaultHasher::new();
            message.hash(&mut h);
            h.finish()
        };
        if !self.throttle.admit(hash) {
            return;
        }

        let target = event.metadata().target();
        let location = match (event.metadata().file(), event.metadata().line()) {
            (Some(file), Some(line)) => format!("{file}:{line}"),
            _ => target.to_string(),
        };
        let text = format!(
            "\u{26a0} <b>zapis-server</b>\n<code>{message}</code>\n{target} · {location}\n{}",
            chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
        );

        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        let client = self.http.clone();
        let chat_id = self.chat_id;
        tokio::spawn(async move {
            let _ = client
                .post(&url)
                .json(&serde_json::json!({
                    "chat_id": chat_id,
                    "text": text,
                    "parse_mode": "HTML"
                }))
                .send()
                .await;
        });
    }
}

// ── Field visitor ──

/// Flattens a tracing event into one line: the `message` field first,
/// structured fields appended as `k=v`.
#[derive(Default)]
struct EventText {
    message: String,
    fields: Vec<(String, String)>,
}

impl EventText {
    fn render(&self) -> String {
        if self.fields.is_empty() {
            return self.message.clone();
        }
        let extras: Vec<String> = self
            .fields
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        if self.message.is_empty() {
            extras.join(", ")
        } else {
            format!("{} ({})", self.message, extras.join(", "))
        }
    }

    fn record(&mut self, field: &Field, value: String) {
        if field.name() == "message" {
            self.message = value;
        } else {
            self.fields.push((field.name().to_string(), value));
        }
    }
}

impl Visit for EventText {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.record(field, format!("{:?}", value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.record(field, value.to_string());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.record(field, value.to_string());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.record(field, value.to_string());
    }
}

// ── Tests ──
