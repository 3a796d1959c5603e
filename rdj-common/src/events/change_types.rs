//! Change-notification supporting types

use serde::{Deserialize, Serialize};

/// Store table a change event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    PlaybackState,
    Queue,
    Tracks,
    History,
    Suspensions,
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Table::PlaybackState => write!(f, "playback_state"),
            Table::Queue => write!(f, "queue"),
            Table::Tracks => write!(f, "tracks"),
            Table::History => write!(f, "history"),
            Table::Suspensions => write!(f, "suspensions"),
        }
    }
}

/// Row-level change kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeKind::Insert => write!(f, "insert"),
            ChangeKind::Update => write!(f, "update"),
            ChangeKind::Delete => write!(f, "delete"),
        }
    }
}

/// Why a queue entry left the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum RemovalReason {
    /// Promoted into the playback state
    Promoted,
    /// Withdrawn by the submitter
    Withdrawn,
    /// Removed by a moderator
    Moderated,
}

impl std::fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemovalReason::Promoted => write!(f, "Promoted"),
            RemovalReason::Withdrawn => write!(f, "Withdrawn"),
            RemovalReason::Moderated => write!(f, "Moderated"),
        }
    }
}
