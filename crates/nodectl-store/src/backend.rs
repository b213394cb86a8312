// ── Store backend abstraction ──
//
// One capability set, one concrete implementation per deployment.
// The facade holds a single boxed backend chosen at construction, so
// no operation ever branches on topology.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use glob::{MatchOptions, Pattern};
use tracing::debug;

use crate::config::Topology;
use crate::error::StoreError;

/// Inbound pub/sub feed. Dropping it releases the subscription.
pub type MessageStream = BoxStream<'static, Message>;

/// A single pub/sub delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Channel the message was published on.
    pub channel: String,
    /// UTF-8 payload.
    pub payload: String,
}

impl Message {
    pub fn new(channel: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
        }
    }
}

/// Capabilities every store deployment provides.
///
/// Implementations need not be safe for unsynchronised structural use;
/// [`Store`](crate::Store) serialises every call.
#[async_trait]
pub trait StoreBackend: Send + Sync {
    fn topology(&self) -> Topology;

    async fn ping(&self) -> Result<(), StoreError>;

    /// Fetch a string value. `None` if the key is absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write a string value. `ttl = None` or a zero TTL means no expiry.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Keys matching a glob-style pattern.
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError>;

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError>;

    async fn hash_set_many(&self, key: &str, fields: &[(String, String)])
    -> Result<(), StoreError>;

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StoreError>;

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;

    async fn hash_delete(&self, key: &str, field: &str) -> Result<(), StoreError>;

    async fn publish(&self, channel: &str, message: &str) -> Result<(), StoreError>;

    /// Subscribe to an exact channel name.
    async fn subscribe(&self, channel: &str) -> Result<MessageStream, StoreError>;

    /// Subscribe to every channel matching a glob-style pattern.
    async fn psubscribe(&self, pattern: &str) -> Result<MessageStream, StoreError>;

    /// Turn on keyspace/keyevent notifications so `psubscribe` on
    /// `__keyspace@*` channels observes changes.
    async fn enable_keyspace_events(&self) -> Result<(), StoreError>;

    /// Release pooled connections. Further calls may reconnect.
    async fn close(&self) {}
}

/// A compiled Redis-style key or channel pattern.
///
/// Supports `*`, `?`, `[...]` and `[^...]` classes and `\\` escapes. A pattern
/// that does not compile is matched literally.
#[derive(Debug, Clone)]
pub(crate) enum KeyPattern {
    Glob(Pattern),
    Literal(String),
}

impl KeyPattern {
    pub(crate) fn new(pattern: &str) -> Self {
        match Pattern::new(&to_glob(pattern)) {
            Ok(glob) => Self::Glob(glob),
            Err(e) => {
                debug!(pattern, error = %e, "pattern does not compile, matching literally");
                Self::Literal(pattern.to_owned())
            }
        }
    }

    pub(crate) fn matches(&self, text: &str) -> bool {
        match self {
            Self::Glob(glob) => glob.matches_with(text, MATCH_OPTIONS),
            Self::Literal(literal) => literal == text,
        }
    }
}

// Keys are flat strings: `/` and leading dots are ordinary characters.
const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// Rewrite Redis glob syntax into `glob` crate syntax.
fn to_glob(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 4);
    let mut chars = pattern.chars();
    let mut after_star = false;

    while let Some(ch) = chars.next() {
        match ch {
            // `**` is a path-component wildcard to `glob`; Redis treats it as `*`.
            '*' if after_star => continue,
            '*' => out.push('*'),
            '\\' => match chars.next() {
                Some(escaped) => out.push_str(&Pattern::escape(&escaped.to_string())),
                None => out.push('\\'),
            },
            '[' => {
                let class: String = chars.clone().take_while(|&c| c != ']').collect();
                let closed = chars.clone().nth(class.chars().count()) == Some(']');
                if closed && !class.is_empty() {
                    out.push('[');
                    match class.strip_prefix('^') {
                        Some(rest) => {
                            out.push('!');
                            out.push_str(rest);
                        }
                        None => out.push_str(&class),
                    }
                    out.push(']');
                    chars.nth(class.chars().count());
                } else {
                    out.push_str("[[]");
                }
            }
            ']' => out.push_str("[]]"),
            other => out.push(other),
        }
        after_star = ch == '*';
    }
    out
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    fn glob_match(pattern: &str, text: &str) -> bool {
        KeyPattern::new(pattern).matches(text)
    }

    #[test]
    fn glob_literals_and_wildcards() {
        assert!(glob_match("ovp_nodejs:*", "ovp_nodejs:Server:resource:1.2.3.4:80"));
        assert!(glob_match("*", ""));
        assert!(glob_match("h?llo", "hello"));
        assert!(!glob_match("h?llo", "hllo"));
        assert!(glob_match("__keyspace@*__:*", "__keyspace@1__:foo"));
        assert!(!glob_match("foo", "foobar"));
        assert!(glob_match("a**b", "a/x.yb"));
        assert!(glob_match("*", ".hidden/key"));
    }

    #[test]
    fn glob_character_classes() {
        assert!(glob_match("h[ae]llo", "hallo"));
        assert!(!glob_match("h[ae]llo", "hillo"));
        assert!(glob_match("h[^e]llo", "hallo"));
        assert!(!glob_match("h[^e]llo", "hello"));
        assert!(glob_match("key[0-9]", "key7"));
        assert!(glob_match("a\\*b", "a*b"));
        assert!(!glob_match("a\\*b", "axb"));
        assert!(glob_match("a[b", "a[b"));
        assert!(glob_match("a]b", "a]b"));
    }

    #[test]
    fn many_stars_do_not_backtrack_exponentially() {
        let text = "a".repeat(40);
        let started = Instant::now();
        assert!(!glob_match("*a*a*a*a*a*a*a*b", &text));
        assert!(glob_match("*a*a*a*a*a*a*a*", &text));
        assert!(started.elapsed().as_secs() < 1);
    }
}
