//! Token and discovery document storage.
//!
//! Storage is a pair of observable cells. The session is the only writer;
//! applications subscribe to follow login state.

use crate::models::{DiscoveryDocument, Token};
use tokio::sync::watch;

/// Observable storage of the current token and discovery document.
pub trait IdpStorage: Send + Sync {
    /// Current token.
    fn token(&self) -> Option<Token>;

    /// Replace the current token.
    fn set_token(&self, token: Option<Token>);

    /// Subscribe to token changes.
    fn subscribe_token(&self) -> watch::Receiver<Option<Token>>;

    /// Current discovery document.
    fn discovery_document(&self) -> Option<DiscoveryDocument>;

    /// Replace the current discovery document.
    fn set_discovery_document(&self, document: Option<DiscoveryDocument>);

    /// Subscribe to discovery document changes.
    fn subscribe_discovery_document(&self) -> watch::Receiver<Option<DiscoveryDocument>>;
}

/// In-memory storage backed by `watch` channels.
#[derive(Debug)]
pub struct MemoryStorage {
    token: watch::Sender<Option<Token>>,
    discovery_document: watch::Sender<Option<DiscoveryDocument>>,
}

impl MemoryStorage {
    /// Create empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::with_contents(None, None)
    }

    /// Create storage holding `token` and `document`.
    #[must_use]
    pub fn with_contents(token: Option<Token>, document: Option<DiscoveryDocument>) -> Self {
        Self {
            token: watch::Sender::new(token),
            discovery_document: watch::Sender::new(document),
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl IdpStorage for MemoryStorage {
    fn token(&self) -> Option<Token> {
        self.token.borrow().clone()
    }

    fn set_token(&self, token: Option<Token>) {
        self.token.send_replace(token);
    }

    fn subscribe_token(&self) -> watch::Receiver<Option<Token>> {
        self.token.subscribe()
    }

    fn discovery_document(&self) -> Option<DiscoveryDocument> {
        self.discovery_document.borrow().clone()
    }

    fn set_discovery_document(&self, document: Option<DiscoveryDocument>) {
        self.discovery_document.send_replace(document);
    }

    fn subscribe_discovery_document(&self) -> watch::Receiver<Option<DiscoveryDocument>> {
        self.discovery_document.subscribe()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_subscribers_see_token_changes() {
        let storage = MemoryStorage::new();
        let mut updates = storage.subscribe_token();
        assert!(updates.borrow_and_update().is_none());

        storage.set_token(Some(Token::new("T1", "I1", Utc::now(), "r")));
        updates.changed().await.unwrap();
        assert_eq!(
            updates.borrow_and_update().as_ref().map(|token| token.access_token.clone()),
            Some("T1".to_string())
        );

        storage.set_token(None);
        updates.changed().await.unwrap();
        assert!(updates.borrow().is_none());
        assert!(storage.token().is_none());
    }
}
