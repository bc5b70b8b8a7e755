//! Review step lifecycle states.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Where a review step is in its lifecycle.
///
/// `ASSIGNED -> IN_PROGRESS -> COMPLETED`, or `ASSIGNED|IN_PROGRESS -> EXPIRED`.
/// An expired or completed step returns to `ASSIGNED` when it is reassigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewState {
    Assigned,
    InProgress,
    Completed,
    Expired,
}

impl ReviewState {
    pub const ALL: [ReviewState; 4] = [
        ReviewState::Assigned,
        ReviewState::InProgress,
        ReviewState::Completed,
        ReviewState::Expired,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewState::Assigned => "ASSIGNED",
            ReviewState::InProgress => "IN_PROGRESS",
            ReviewState::Completed => "COMPLETED",
            ReviewState::Expired => "EXPIRED",
        }
    }

    /// Work the evaluator still owes.
    pub fn is_open(&self) -> bool {
        matches!(self, ReviewState::Assigned | ReviewState::InProgress)
    }
}

impl fmt::Display for ReviewState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReviewState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ReviewState::ALL
            .into_iter()
            .find(|state| state.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown review state: {}", s))
    }
}

/// Who created the current assignment of a step.
///
/// Only `Auto` assignments are swept by the expiry job; a human assignment
/// stays until an admin removes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssignerKind {
    Auto,
    Human,
}

impl AssignerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignerKind::Auto => "AUTO",
            AssignerKind::Human => "HUMAN",
        }
    }
}

impl fmt::Display for AssignerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssignerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "AUTO" => Ok(AssignerKind::Auto),
            "HUMAN" => Ok(AssignerKind::Human),
            _ => Err(format!("unknown assigner kind: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_wire_names() {
        assert_eq!(
            serde_json::to_string(&ReviewState::InProgress).unwrap(),
            "\"IN_PROGRESS\""
        );
        for state in ReviewState::ALL {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{}\"", state.as_str()));
        }
    }

    #[test]
    fn test_state_from_str() {
        assert_eq!("completed".parse::<ReviewState>(), Ok(ReviewState::Completed));
        assert_eq!("EXPIRED".parse::<ReviewState>(), Ok(ReviewState::Expired));
        assert!("DONE".parse::<ReviewState>().is_err());
    }

    #[test]
    fn test_is_open() {
        assert!(ReviewState::Assigned.is_open());
        assert!(ReviewState::InProgress.is_open());
        assert!(!ReviewState::Completed.is_open());
        assert!(!ReviewState::Expired.is_open());
    }

    #[test]
    fn test_assigner_kind_round_trip() {
        assert_eq!("human".parse::<AssignerKind>(), Ok(AssignerKind::Human));
        assert_eq!(AssignerKind::Auto.to_string(), "AUTO");
    }
}
