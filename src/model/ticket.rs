//! Projects and tickets.
//!
//! A ticket is a unit of work identified by a project-scoped key (`KEY-N`).
//! Its status moves through a fixed lifecycle owned by [`super::transition`].

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProjectId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TicketId(pub i64);

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Human-facing ticket key, e.g. `API-12`. Immutable once assigned.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TicketKey {
    pub project: String,
    pub sequence: i64,
}

impl TicketKey {
    pub fn new(project: impl Into<String>, sequence: i64) -> Self {
        Self {
            project: project.into(),
            sequence,
        }
    }
}

impl fmt::Display for TicketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.project, self.sequence)
    }
}

impl FromStr for TicketKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (project, seq) = s
            .trim()
            .rsplit_once('-')
            .ok_or_else(|| Error::InvalidArgument(format!("malformed ticket key: {s}")))?;
        let project = project.to_ascii_uppercase();
        validate_project_key(&project)?;
        let sequence: i64 = seq
            .parse()
            .map_err(|_| Error::InvalidArgument(format!("malformed ticket key: {s}")))?;
        if sequence < 1 {
            return Err(Error::InvalidArgument(format!(
                "ticket sequence must be positive: {s}"
            )));
        }
        Ok(Self { project, sequence })
    }
}

/// Project keys are 1-10 uppercase ASCII letters or digits, starting with a letter.
pub fn validate_project_key(key: &str) -> Result<()> {
    let mut chars = key.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_uppercase())
        && key.len() <= 10
        && chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit());
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidArgument(format!(
            "project key must be 1-10 uppercase letters/digits starting with a letter: {key:?}"
        )))
    }
}

// ---------------------------------------------------------------------------
// Project
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub key: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Ticket
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    pub project_id: ProjectId,
    pub key: TicketKey,
    pub title: String,
    pub description: String,
    pub status: Status,
    /// Set exactly when `status == Closed`.
    pub resolution: Option<Resolution>,
    /// Prerequisites: tickets that must close as `Completed` first.
    pub dependencies: BTreeSet<TicketId>,
    pub complexity: Complexity,
    /// Free-text execution hint for whoever picks the ticket up.
    pub brain: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Eligible for claiming once its prerequisites are satisfied.
    Ready,
    /// Actively claimed by a worker.
    Working,
    /// Awaiting review.
    Review,
    /// Stuck on something outside the ticket.
    Blocked,
    /// Needs a human decision.
    Human,
    /// Terminal. Carries a resolution.
    Closed,
}

impl Status {
    pub const ALL: [Status; 6] = [
        Status::Ready,
        Status::Working,
        Status::Review,
        Status::Blocked,
        Status::Human,
        Status::Closed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Ready => "ready",
            Status::Working => "working",
            Status::Review => "review",
            Status::Blocked => "blocked",
            Status::Human => "human",
            Status::Closed => "closed",
        }
    }

    pub fn is_terminal(self) -> bool {
        self == Status::Closed
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ready" => Ok(Status::Ready),
            // "in progress" is an alias, not a separate state
            "working" | "in_progress" | "in-progress" => Ok(Status::Working),
            "review" => Ok(Status::Review),
            "blocked" => Ok(Status::Blocked),
            "human" => Ok(Status::Human),
            "closed" => Ok(Status::Closed),
            _ => Err(Error::InvalidArgument(format!("unknown status: {s}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Terminal outcome recorded on close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Completed,
    WontDo,
    Duplicate,
    Obsolete,
}

impl Resolution {
    pub fn as_str(self) -> &'static str {
        match self {
            Resolution::Completed => "completed",
            Resolution::WontDo => "wont_do",
            Resolution::Duplicate => "duplicate",
            Resolution::Obsolete => "obsolete",
        }
    }

    /// Only `Completed` satisfies dependents.
    pub fn is_success(self) -> bool {
        self == Resolution::Completed
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "completed" | "done" => Ok(Resolution::Completed),
            "wont_do" | "wontdo" | "wont-do" => Ok(Resolution::WontDo),
            "duplicate" => Ok(Resolution::Duplicate),
            "obsolete" => Ok(Resolution::Obsolete),
            _ => Err(Error::InvalidArgument(format!("unknown resolution: {s}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Complexity
// ---------------------------------------------------------------------------

/// Ordinal size estimate; the default pick order favours smaller work.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Trivial,
    Small,
    #[default]
    Medium,
    Large,
    Xlarge,
}

impl Complexity {
    pub fn as_str(self) -> &'static str {
        match self {
            Complexity::Trivial => "trivial",
            Complexity::Small => "small",
            Complexity::Medium => "medium",
            Complexity::Large => "large",
            Complexity::Xlarge => "xlarge",
        }
    }
}

impl fmt::Display for Complexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Complexity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "trivial" => Ok(Complexity::Trivial),
            "small" => Ok(Complexity::Small),
            "medium" => Ok(Complexity::Medium),
            "large" => Ok(Complexity::Large),
            "xlarge" | "x-large" => Ok(Complexity::Xlarge),
            _ => Err(Error::InvalidArgument(format!("unknown complexity: {s}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for creating tickets. New tickets always start `Ready`.
#[derive(Debug, Clone)]
pub struct NewTicket {
    pub(crate) project_key: String,
    pub(crate) title: String,
    pub(crate) description: String,
    pub(crate) complexity: Complexity,
    pub(crate) brain: Option<String>,
    pub(crate) depends_on: Vec<TicketKey>,
}

impl NewTicket {
    pub fn new(project_key: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            project_key: project_key.into(),
            title: title.into(),
            description: String::new(),
            complexity: Complexity::default(),
            brain: None,
            depends_on: Vec::new(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn complexity(mut self, complexity: Complexity) -> Self {
        self.complexity = complexity;
        self
    }

    pub fn brain(mut self, brain: impl Into<String>) -> Self {
        self.brain = Some(brain.into());
        self
    }

    pub fn depends_on(mut self, prerequisite: TicketKey) -> Self {
        self.depends_on.push(prerequisite);
        self
    }
}
