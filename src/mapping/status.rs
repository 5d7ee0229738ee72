// Mapping row status workflow
// Classifies statuses and decides which transitions a task role may offer

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MappingStatus {
    Unmapped,
    Draft,
    Mapped,
    #[serde(rename = "INREVIEW")]
    InReview,
    Accepted,
    Rejected,
}

/// Statuses owned by the author stage of the workflow.
pub const AUTHOR_STATUSES: [MappingStatus; 3] = [
    MappingStatus::Unmapped,
    MappingStatus::Draft,
    MappingStatus::Mapped,
];

/// Statuses owned by the review stage of the workflow.
pub const REVIEW_STATUSES: [MappingStatus; 3] = [
    MappingStatus::InReview,
    MappingStatus::Accepted,
    MappingStatus::Rejected,
];

impl MappingStatus {
    pub const ALL: [MappingStatus; 6] = [
        MappingStatus::Unmapped,
        MappingStatus::Draft,
        MappingStatus::Mapped,
        MappingStatus::InReview,
        MappingStatus::Accepted,
        MappingStatus::Rejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MappingStatus::Unmapped => "UNMAPPED",
            MappingStatus::Draft => "DRAFT",
            MappingStatus::Mapped => "MAPPED",
            MappingStatus::InReview => "INREVIEW",
            MappingStatus::Accepted => "ACCEPTED",
            MappingStatus::Rejected => "REJECTED",
        }
    }

    pub fn is_author_status(&self) -> bool {
        AUTHOR_STATUSES.contains(self)
    }

    pub fn is_review_status(&self) -> bool {
        REVIEW_STATUSES.contains(self)
    }
}

impl fmt::Display for MappingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unknown {kind}: '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl FromStr for MappingStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        MappingStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == upper)
            .ok_or_else(|| ParseEnumError {
                kind: "mapping status",
                value: s.to_string(),
            })
    }
}

/// Task role that drives which transitions are legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Author,
    Review,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Author => "AUTHOR",
            Role::Review => "REVIEW",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AUTHOR" => Ok(Role::Author),
            "REVIEW" | "REVIEWER" => Ok(Role::Review),
            _ => Err(ParseEnumError {
                kind: "task role",
                value: s.to_string(),
            }),
        }
    }
}

/// True for DRAFT and MAPPED.
pub fn in_authored_state(status: MappingStatus) -> bool {
    status.is_author_status() && status != MappingStatus::Unmapped
}

/// True for INREVIEW and ACCEPTED.
///
/// REJECTED is a review status but is not treated as "in review": a rejected
/// row goes back to the author. This mirrors the behaviour curators rely on
/// even though the reviewer side of the workflow is known to be awkward.
pub fn in_reviewed_state(status: MappingStatus) -> bool {
    status.is_review_status() && status != MappingStatus::Rejected
}

pub fn is_status_option_disabled(
    role: Role,
    current: MappingStatus,
    candidate: MappingStatus,
) -> bool {
    match role {
        Role::Review => {
            if matches!(current, MappingStatus::Unmapped | MappingStatus::Draft) {
                return true;
            }
            candidate.is_author_status()
        }
        Role::Author => {
            if current == MappingStatus::Unmapped {
                return candidate != MappingStatus::Unmapped;
            }
            if in_reviewed_state(current) {
                return true;
            }
            // authored or rejected
            candidate == MappingStatus::Unmapped || candidate.is_review_status()
        }
    }
}

/// Same as [`is_status_option_disabled`] for values that have not been parsed
/// yet. Anything unrecognised disables the option.
pub fn is_status_option_disabled_raw(role: &str, current: &str, candidate: &str) -> bool {
    match (
        role.parse::<Role>(),
        current.parse::<MappingStatus>(),
        candidate.parse::<MappingStatus>(),
    ) {
        (Ok(role), Ok(current), Ok(candidate)) => {
            is_status_option_disabled(role, current, candidate)
        }
        _ => true,
    }
}

/// Ordered list of statuses a role can pick from for a row in `current`.
pub fn available_status_options(role: Role, current: MappingStatus) -> Vec<MappingStatus> {
    use MappingStatus::*;

    match role {
        Role::Author => match current {
            Unmapped => vec![Unmapped],
            Rejected => vec![Draft, Mapped, Rejected],
            status if in_authored_state(status) => vec![Draft, Mapped],
            status => vec![status],
        },
        Role::Review => match current {
            Unmapped | Draft => vec![current],
            Mapped => vec![Mapped, InReview, Accepted, Rejected],
            _ => vec![InReview, Accepted, Rejected],
        },
    }
}
