use crate::constants::states::{COMPLETED, FAILED};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// A non-terminal state token declared by a process (e.g. `WAITING_FOR_RESERVATION`).
///
/// Tokens are upper-case ASCII letters, digits and underscores, and can never be
/// one of the universal terminal tokens.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateToken(String);

impl StateToken {
    pub fn parse(raw: &str) -> Result<Self, InvalidStateToken> {
        if raw.is_empty() {
            return Err(InvalidStateToken::Empty);
        }
        if raw == COMPLETED || raw == FAILED {
            return Err(InvalidStateToken::Reserved(raw.to_string()));
        }
        if !raw
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
        {
            return Err(InvalidStateToken::Malformed(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StateToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for StateToken {
    type Err = InvalidStateToken;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidStateToken {
    #[error("state token cannot be empty")]
    Empty,
    #[error("state token '{0}' is reserved for terminal states")]
    Reserved(String),
    #[error("state token '{0}' must contain only A-Z, 0-9 and '_'")]
    Malformed(String),
}

/// Persisted state of a workflow instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WorkflowState {
    Completed,
    Failed,
    Step(StateToken),
}

impl WorkflowState {
    /// Terminal states are never left except by a re-enqueue.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn step(token: &str) -> Result<Self, InvalidStateToken> {
        StateToken::parse(token).map(Self::Step)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Completed => COMPLETED,
            Self::Failed => FAILED,
            Self::Step(token) => token.as_str(),
        }
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WorkflowState {
    type Err = InvalidStateToken;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            COMPLETED => Ok(Self::Completed),
            FAILED => Ok(Self::Failed),
            other => Self::step(other),
        }
    }
}

impl Serialize for WorkflowState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for WorkflowState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
