//! Topic taxonomy for domain events.
//!
//! Topics name the bus routing keys producers publish under. The set is
//! closed: consumers subscribe to these names and nothing else.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A domain event topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    #[serde(rename = "scrum.task")]
    ScrumTask,
    #[serde(rename = "scrum.sprint")]
    ScrumSprint,
    #[serde(rename = "scrum.backlog-item")]
    ScrumBacklogItem,
    #[serde(rename = "scrum.impediment")]
    ScrumImpediment,
    #[serde(rename = "identity.user")]
    IdentityUser,
    #[serde(rename = "identity.team")]
    IdentityTeam,
    #[serde(rename = "identity.project")]
    IdentityProject,
}

impl Topic {
    /// Every topic, in subscription order.
    pub const ALL: [Topic; 7] = [
        Topic::ScrumTask,
        Topic::ScrumSprint,
        Topic::ScrumBacklogItem,
        Topic::ScrumImpediment,
        Topic::IdentityUser,
        Topic::IdentityTeam,
        Topic::IdentityProject,
    ];

    /// Wire name used as the routing key.
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::ScrumTask => "scrum.task",
            Topic::ScrumSprint => "scrum.sprint",
            Topic::ScrumBacklogItem => "scrum.backlog-item",
            Topic::ScrumImpediment => "scrum.impediment",
            Topic::IdentityUser => "identity.user",
            Topic::IdentityTeam => "identity.team",
            Topic::IdentityProject => "identity.project",
        }
    }

    /// Entity type recorded in activity rows: the first `.` becomes `_`.
    ///
    /// `scrum.backlog-item` maps to `scrum_backlog-item`.
    pub fn entity_type(&self) -> String {
        self.as_str().replacen('.', "_", 1)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topic {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Topic::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::InvalidInput(format!("unknown topic: {}", s)))
    }
}
