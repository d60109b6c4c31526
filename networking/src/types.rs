use std::fmt::Display;

use containers::{BlockHeader, Bytes32};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Operator-granted exemptions for a connection.
#[derive(Debug, Default, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct NetPermissions {
    /// Configured by the operator as a static peer.
    pub manual: bool,
    /// Never disconnected or discouraged for misbehavior.
    pub no_ban: bool,
}

impl NetPermissions {
    pub const MANUAL: Self = Self {
        manual: true,
        no_ban: false,
    };

    pub const NO_BAN: Self = Self {
        manual: false,
        no_ban: true,
    };

    /// Misbehavior is scored but never acted on.
    pub fn is_exempt(&self) -> bool {
        self.manual || self.no_ban
    }
}

/// Why a connection is being closed.
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    Misbehavior,
    Stalled,
    Discouraged,
    ProtocolError,
    Shutdown,
}

impl Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            DisconnectReason::Misbehavior => "misbehavior",
            DisconnectReason::Stalled => "stalled",
            DisconnectReason::Discouraged => "discouraged",
            DisconnectReason::ProtocolError => "protocol error",
            DisconnectReason::Shutdown => "shutdown",
        };
        f.write_str(text)
    }
}

/// Message the sync layer wants delivered to its peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundRequest {
    GetHeaders { locator: Vec<Bytes32>, stop: Bytes32 },
    Headers(Vec<BlockHeader>),
}

/// Side effects requested by a peer session; the network layer performs them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAction {
    Send(OutboundRequest),
    Disconnect(DisconnectReason),
}

impl SyncAction {
    pub fn is_disconnect(&self) -> bool {
        matches!(self, SyncAction::Disconnect(_))
    }
}
