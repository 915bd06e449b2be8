use ethers::types::{Address, TxHash, U64};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of one in-flight `setSentence` transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum WriteStatus {
    Submitted,
    Confirmed {
        #[serde(skip_serializing_if = "Option::is_none")]
        block: Option<U64>,
    },
    Failed {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingWrite {
    pub tx_hash: TxHash,
    pub status: WriteStatus,
}

impl PendingWrite {
    pub fn submitted(tx_hash: TxHash) -> Self {
        Self {
            tx_hash,
            status: WriteStatus::Submitted,
        }
    }

    pub fn confirm(&mut self, block: Option<U64>) {
        self.status = WriteStatus::Confirmed { block };
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        self.status = WriteStatus::Failed {
            reason: reason.into(),
        };
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self.status, WriteStatus::Submitted)
    }
}

/// Result of `getSentence`. `NoValue` means the call failed, not that the sentence is empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReadOutcome {
    Value { sentence: String },
    NoValue { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ReadStatus {
    Never,
    Succeeded,
    Failed { reason: String },
}

/// Everything a front end needs to render the session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub connection: ConnectionState,
    pub account: Option<Address>,
    /// A write is between submission and a terminal receipt.
    pub pending: bool,
    pub pending_read: bool,
    pub input: String,
    /// Last successfully read sentence; kept when a later read fails.
    pub stored_value: Option<String>,
    pub last_read: ReadStatus,
    pub last_write: Option<PendingWrite>,
}

impl SessionSnapshot {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            connection: ConnectionState::Disconnected,
            account: None,
            pending: false,
            pending_read: false,
            input: input.into(),
            stored_value: None,
            last_read: ReadStatus::Never,
            last_write: None,
        }
    }

    pub fn connected(&self) -> bool {
        self.connection == ConnectionState::Connected
    }
}

#[derive(Debug, Deserialize)]
pub struct SetInputParams {
    pub text: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct WriteSentenceParams {
    #[serde(default)]
    pub sentence: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ConnectOut {
    pub connected: bool,
    pub account: String,
}

#[derive(Debug, Serialize)]
pub struct WriteOut {
    pub tx_hash: String,
    #[serde(flatten)]
    pub status: WriteStatus,
}

#[derive(Debug, Serialize)]
pub struct ReadOut {
    #[serde(flatten)]
    pub outcome: ReadOutcome,
    pub stored_value: Option<String>,
}
