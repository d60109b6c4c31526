/// Per-peer header sync state machine.
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// Nothing outstanding. Ready to (re)issue a locator request.
    Idle,

    /// A getheaders request is out and no batch has arrived yet.
    AwaitingHeaders,

    /// Processing batches; a continuation may be outstanding after a full one.
    ReceivingHeaders,

    /// The peer reported no further headers. Announcements are still processed.
    Synced,

    /// Terminal. The connection is gone or about to be.
    Disconnected,
}

impl SyncState {
    /// Check if a transition to the target state is valid.
    pub fn can_transition_to(&self, target: SyncState) -> bool {
        match self {
            SyncState::Idle => matches!(
                target,
                SyncState::AwaitingHeaders | SyncState::ReceivingHeaders | SyncState::Disconnected
            ),
            SyncState::AwaitingHeaders => matches!(
                target,
                SyncState::ReceivingHeaders | SyncState::Idle | SyncState::Disconnected
            ),
            SyncState::ReceivingHeaders => matches!(
                target,
                SyncState::ReceivingHeaders
                    | SyncState::AwaitingHeaders
                    | SyncState::Synced
                    | SyncState::Idle
                    | SyncState::Disconnected
            ),
            SyncState::Synced => matches!(
                target,
                SyncState::AwaitingHeaders
                    | SyncState::ReceivingHeaders
                    | SyncState::Idle
                    | SyncState::Disconnected
            ),
            SyncState::Disconnected => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        *self == SyncState::Disconnected
    }
}

impl Default for SyncState {
    fn default() -> Self {
        SyncState::Idle
    }
}
