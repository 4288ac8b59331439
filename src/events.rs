use dashmap::DashMap;
use regex::Regex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

/// Which of the three containers an event describes a change to. Mirrors
/// the `{settings|queue|store}:<verb>` tag the raw event string carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Settings,
    Queue,
    Store,
}

/// A parsed event, or the raw string if it didn't match the taxonomy.
/// Subscribers that only care about well-formed events can match on
/// `Event::Tagged`; anything else (a misconfigured backend, a foreign
/// publisher sharing the channel) arrives as `Event::Raw` rather than
/// being silently dropped.
#[derive(Debug, Clone)]
pub enum Event {
    Tagged { kind: EventKind, verb: String },
    Raw(String),
}

impl Event {
    fn parse(raw: &str) -> Self {
        if let Some((prefix, verb)) = raw.split_once(':') {
            let kind = match prefix {
                "settings" => Some(EventKind::Settings),
                "queue" => Some(EventKind::Queue),
                "store" => Some(EventKind::Store),
                _ => None,
            };
            if let Some(kind) = kind {
                return Event::Tagged {
                    kind,
                    verb: verb.to_string(),
                };
            }
        }
        Event::Raw(raw.to_string())
    }
}

/// Throttled publisher over a backend's `:events` channel. Coalesces
/// publications of the same event string within `publish_throttle`, per
/// the spec's open question on where publish-event throttling is
/// enforced: the backing-store scripts never enforce it, so it lives here
/// in the client's publish path.
pub struct Publisher<B: ?Sized> {
    backend: Arc<B>,
    throttle: Duration,
    last_published: DashMap<String, Instant>,
}

impl<B> Publisher<B>
where
    B: crate::backend::Backend + ?Sized,
{
    pub fn new(backend: Arc<B>, throttle: Duration) -> Self {
        Self {
            backend,
            throttle,
            last_published: DashMap::new(),
        }
    }

    /// Publishes `event` unless an identical string was published within
    /// the throttle window. Always succeeds from the caller's point of
    /// view; suppressed publications are not an error.
    pub async fn publish(&self, event: &str) -> crate::error::Result<()> {
        if !self.throttle.is_zero() {
            let now = Instant::now();
            if let Some(last) = self.last_published.get(event) {
                if now.duration_since(*last) < self.throttle {
                    return Ok(());
                }
            }
            self.last_published.insert(event.to_string(), now);
        }
        self.backend.publish(event).await
    }
}

/// Regex-filtered wrapper around a backend's broadcast receiver. Matches
/// the tagged taxonomy `^(settings|queue|store):`; delivery is
/// best-effort (a slow subscriber can lag and miss events, same as the
/// underlying `tokio::sync::broadcast` channel).
pub struct Subscriber {
    receiver: broadcast::Receiver<String>,
    pattern: Regex,
}

impl Subscriber {
    pub fn new(receiver: broadcast::Receiver<String>) -> Self {
        Self {
            receiver,
            pattern: Regex::new(r"^(settings|queue|store):").expect("static regex is valid"),
        }
    }

    /// Waits for the next event matching the taxonomy, skipping anything
    /// that doesn't. Returns `None` if the channel closed.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(raw) => {
                    if self.pattern.is_match(&raw) {
                        return Some(Event::parse(&raw));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
