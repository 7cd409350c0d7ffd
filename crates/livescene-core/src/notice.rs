//! User-visible notices with broadcast and history.

use std::{
    collections::VecDeque,
    sync::{PoisonError, RwLock},
};

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

/// Number of notices kept for late subscribers.
const HISTORY_LEN: usize = 256;

/// A message for the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "level", content = "text", rename_all = "snake_case")]
pub enum Notice {
    /// Input rejected before anything was sent.
    Validation(String),
    /// A request or scene evaluation failed.
    Failure(String),
    /// Informational feedback.
    Info(String),
}

impl Notice {
    /// Message shown to the user.
    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            Self::Validation(s) | Self::Failure(s) | Self::Info(s) => s,
        }
    }
}

/// Notice store with broadcast and history support.
///
/// Views that attach late get the history first, then live notices.
pub struct NoticeStore {
    history: RwLock<VecDeque<Notice>>,
    sender: broadcast::Sender<Notice>,
}

impl Default for NoticeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl NoticeStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(HISTORY_LEN);
        Self {
            history: RwLock::new(VecDeque::with_capacity(32)),
            sender,
        }
    }

    /// Push a notice to live listeners and history.
    pub fn push(&self, notice: Notice) {
        tracing::debug!(?notice, "notice");
        let _ = self.sender.send(notice.clone());

        let mut history = self.history.write().unwrap_or_else(PoisonError::into_inner);
        if history.len() == HISTORY_LEN {
            history.pop_front();
        }
        history.push_back(notice);
    }

    /// Push a validation notice.
    pub fn validation<S: Into<String>>(&self, s: S) {
        self.push(Notice::Validation(s.into()));
    }

    /// Push a failure notice.
    pub fn failure<S: Into<String>>(&self, s: S) {
        self.push(Notice::Failure(s.into()));
    }

    /// Push an informational notice.
    pub fn info<S: Into<String>>(&self, s: S) {
        self.push(Notice::Info(s.into()));
    }

    /// Subscribe to notices pushed from now on.
    #[must_use]
    pub fn get_receiver(&self) -> broadcast::Receiver<Notice> {
        self.sender.subscribe()
    }

    /// All notices still held in history.
    #[must_use]
    pub fn get_history(&self) -> Vec<Notice> {
        self.history
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Most recent notice, if any.
    #[must_use]
    pub fn last(&self) -> Option<Notice> {
        self.history
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .back()
            .cloned()
    }

    /// Stream that yields history first, then live notices.
    #[must_use]
    pub fn history_plus_stream(&self) -> futures::stream::BoxStream<'static, Notice> {
        let (history, rx) = (self.get_history(), self.get_receiver());

        let hist = futures::stream::iter(history);
        let live = BroadcastStream::new(rx).filter_map(|res| async move { res.ok() });

        Box::pin(hist.chain(live))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_is_bounded() {
        let store = NoticeStore::new();
        for i in 0..(HISTORY_LEN + 10) {
            store.info(format!("notice {i}"));
        }
        let history = store.get_history();
        assert_eq!(history.len(), HISTORY_LEN);
        assert_eq!(history[0], Notice::Info("notice 10".to_string()));
        assert_eq!(store.last().unwrap().text(), format!("notice {}", HISTORY_LEN + 9));
    }

    #[tokio::test]
    async fn test_history_then_live() {
        let store = NoticeStore::new();
        store.validation("first");

        let mut stream = store.history_plus_stream();
        store.failure("second");

        assert_eq!(stream.next().await, Some(Notice::Validation("first".into())));
        assert_eq!(stream.next().await, Some(Notice::Failure("second".into())));
    }
}
