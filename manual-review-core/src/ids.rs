//! Identifier newtypes.
//!
//! Every record in the review subsystem is addressed by a string key. Wrapping
//! each kind of key in its own type keeps a student key from being passed where
//! an evaluator id is expected, even though both come from the same user id space.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Joins the parts of a derived key.
pub const KEY_SEPARATOR: char = ':';

/// Characters a unit, student or evaluator id may not contain. `/` would make
/// the derived key unreachable as a URL path segment.
const RESERVED_CHARS: [char; 2] = [KEY_SEPARATOR, '/'];

/// An id that cannot be part of a derived key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidId {
    #[error("{kind} id must not be empty")]
    Empty { kind: &'static str },

    #[error("{kind} id {value:?} must not contain {found:?}")]
    ReservedChar {
        kind: &'static str,
        value: String,
        found: char,
    },
}

fn check_key_part(kind: &'static str, value: &str) -> Result<(), InvalidId> {
    if value.is_empty() {
        return Err(InvalidId::Empty { kind });
    }
    match value.chars().find(|c| RESERVED_CHARS.contains(c)) {
        Some(found) => Err(InvalidId::ReservedChar {
            kind,
            value: value.to_string(),
            found,
        }),
        None => Ok(()),
    }
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

/// Ids that are joined into submission and step keys. Two different tuples
/// of valid parts never produce the same key.
macro_rules! key_part {
    ($name:ident, $kind:literal) => {
        impl $name {
            pub fn validate(&self) -> Result<(), InvalidId> {
                check_key_part($kind, &self.0)
            }
        }
    };
}

string_id!(
    /// Identifier of a reviewable unit (a subjective assignment).
    UnitId
);

string_id!(
    /// User id of the student whose work is reviewed.
    StudentKey
);

string_id!(
    /// User id of a course staff member acting as evaluator.
    EvaluatorId
);

string_id!(
    /// Key of a student submission. Also keys the submission's summary.
    SubmissionKey
);

string_id!(
    /// Key of one evaluator's review step for one submission.
    StepKey
);

key_part!(UnitId, "unit");
key_part!(StudentKey, "student");
key_part!(EvaluatorId, "evaluator");

impl SubmissionKey {
    /// One submission per (unit, student), provided both ids validate.
    pub fn new(unit_id: &UnitId, reviewee: &StudentKey) -> Self {
        Self(format!("{}{}{}", unit_id, KEY_SEPARATOR, reviewee))
    }
}

impl StepKey {
    /// One step per (submission, evaluator).
    pub fn new(submission_key: &SubmissionKey, evaluator: &EvaluatorId) -> Self {
        Self(format!("{}{}{}", submission_key, KEY_SEPARATOR, evaluator))
    }
}

impl EvaluatorId {
    /// Staff and students share a user id space.
    pub fn is_same_user(&self, student: &StudentKey) -> bool {
        self.0 == student.0
    }
}
