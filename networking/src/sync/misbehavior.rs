/// Protocol violations the header sync can observe, with their penalties.
use std::fmt::Display;

use serde::Serialize;

/// Score at which a peer is disconnected and its address discouraged.
pub const DISCOURAGEMENT_THRESHOLD: u32 = 100;

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Misbehavior {
    OversizedHeaders,
    NonContinuousHeaders,
    InvalidPow,
    /// Any other consensus rejection of a header the peer sent.
    InvalidHeader,
    LowWorkHeaders,
}

impl Misbehavior {
    pub fn penalty(&self) -> u32 {
        match self {
            Misbehavior::OversizedHeaders => 20,
            Misbehavior::NonContinuousHeaders => 20,
            Misbehavior::InvalidPow => 100,
            Misbehavior::InvalidHeader => 100,
            Misbehavior::LowWorkHeaders => 10,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            Misbehavior::OversizedHeaders => "oversized-headers",
            Misbehavior::NonContinuousHeaders => "non-continuous-headers",
            Misbehavior::InvalidPow => "invalid-pow",
            Misbehavior::InvalidHeader => "invalid-header",
            Misbehavior::LowWorkHeaders => "low-work-headers",
        }
    }
}

impl Display for Misbehavior {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.reason())
    }
}
