//! Observable state shared between the session manager and its views.

use serde::{Deserialize, Serialize};

/// State of the persistent connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    /// Connection attempt in progress.
    Connecting,
    /// Connected; requests go over the persistent channel.
    Open,
    /// Disconnected; requests use the fallback path until reconnected.
    Closed,
}

/// Session manager state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    #[default]
    Idle,
    AwaitingGenerate,
    AwaitingModify,
}

/// UI-facing flags derived from the session manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UiState {
    /// True exactly while a generation request is outstanding.
    pub loading: bool,
    /// Set by the first successful scene install; never cleared.
    pub modification_unlocked: bool,
}
