use crate::error::WalletError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    /// Created, waiting for the client to sign
    Unsigned,
    /// Signed, queued for broadcast
    Unprocessed,
    /// Broadcast attempted, outcome not yet known
    Sending,
    /// Signed, never to be broadcast by storage
    NoSend,
    /// Accepted by the network, waiting for a merkle proof
    Unproven,
    Completed,
    Failed,
}

/// Allowed status changes. Re-entering the same status is always allowed.
const VALID_TRANSITIONS: &[(TxStatus, TxStatus)] = &[
    (TxStatus::Unsigned, TxStatus::Unprocessed),
    (TxStatus::Unsigned, TxStatus::NoSend),
    (TxStatus::Unsigned, TxStatus::Failed),
    (TxStatus::Unprocessed, TxStatus::NoSend),
    (TxStatus::Unprocessed, TxStatus::Sending),
    (TxStatus::Unprocessed, TxStatus::Unproven),
    (TxStatus::Unprocessed, TxStatus::Failed),
    (TxStatus::Sending, TxStatus::Unproven),
    (TxStatus::Sending, TxStatus::Failed),
    (TxStatus::Unproven, TxStatus::Completed),
];

impl TxStatus {
    pub const ALL: [TxStatus; 7] = [
        TxStatus::Unsigned,
        TxStatus::Unprocessed,
        TxStatus::Sending,
        TxStatus::NoSend,
        TxStatus::Unproven,
        TxStatus::Completed,
        TxStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Unsigned => "unsigned",
            TxStatus::Unprocessed => "unprocessed",
            TxStatus::Sending => "sending",
            TxStatus::NoSend => "nosend",
            TxStatus::Unproven => "unproven",
            TxStatus::Completed => "completed",
            TxStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TxStatus::NoSend | TxStatus::Completed | TxStatus::Failed)
    }

    pub fn can_transition_to(&self, next: TxStatus) -> bool {
        *self == next || VALID_TRANSITIONS.contains(&(*self, next))
    }

    pub fn check_transition(&self, next: TxStatus) -> Result<(), WalletError> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(WalletError::Unexpected(format!("invalid status transition {self} -> {next}")))
        }
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TxStatus {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TxStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| WalletError::Unexpected(format!("unknown transaction status '{s}'")))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BroadcastMode {
    #[default]
    Immediate,
    Delayed,
    NoSend,
}

impl BroadcastMode {
    pub fn from_flags(is_no_send: bool, is_delayed: bool) -> Self {
        match (is_no_send, is_delayed) {
            (true, _) => BroadcastMode::NoSend,
            (false, true) => BroadcastMode::Delayed,
            (false, false) => BroadcastMode::Immediate,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BroadcastMode::Immediate => "immediate",
            BroadcastMode::Delayed => "delayed",
            BroadcastMode::NoSend => "nosend",
        }
    }

    /// Status a freshly signed transaction lands in
    pub fn signed_status(&self) -> TxStatus {
        match self {
            BroadcastMode::NoSend => TxStatus::NoSend,
            BroadcastMode::Delayed | BroadcastMode::Immediate => TxStatus::Unprocessed,
        }
    }
}

impl fmt::Display for BroadcastMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BroadcastMode {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "immediate" => Ok(BroadcastMode::Immediate),
            "delayed" => Ok(BroadcastMode::Delayed),
            "nosend" => Ok(BroadcastMode::NoSend),
            other => Err(WalletError::Unexpected(format!("unknown broadcast mode '{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_strings() {
        for status in TxStatus::ALL {
            assert_eq!(status.as_str().parse::<TxStatus>().unwrap(), status);
        }
        assert!("mined".parse::<TxStatus>().is_err());
    }

    #[test]
    fn test_transitions() {
        assert!(TxStatus::Unsigned.can_transition_to(TxStatus::Unprocessed));
        assert!(TxStatus::Unprocessed.can_transition_to(TxStatus::Sending));
        assert!(TxStatus::Sending.can_transition_to(TxStatus::Sending));
        assert!(!TxStatus::Unsigned.can_transition_to(TxStatus::Sending));
        assert!(!TxStatus::Failed.can_transition_to(TxStatus::Unprocessed));
        assert!(!TxStatus::NoSend.can_transition_to(TxStatus::Unproven));
        assert!(TxStatus::Completed.check_transition(TxStatus::Failed).is_err());
    }

    #[test]
    fn test_terminal_statuses_have_no_exit() {
        for from in TxStatus::ALL.into_iter().filter(TxStatus::is_terminal) {
            for to in TxStatus::ALL.into_iter().filter(|to| *to != from) {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn test_broadcast_mode_flags() {
        assert_eq!(BroadcastMode::from_flags(true, true), BroadcastMode::NoSend);
        assert_eq!(BroadcastMode::from_flags(false, true), BroadcastMode::Delayed);
        assert_eq!(BroadcastMode::from_flags(false, false).signed_status(), TxStatus::Unprocessed);
        assert_eq!(BroadcastMode::NoSend.signed_status(), TxStatus::NoSend);
    }
}
