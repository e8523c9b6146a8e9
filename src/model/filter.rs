//! Query filters shared by the listing operations.

use super::ticket::Status;

/// Recognised options: project, status (exact match) and a row limit.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    pub project_key: Option<String>,
    pub status: Option<Status>,
    pub limit: Option<u32>,
}

impl Filter {
    pub fn project(mut self, key: impl Into<String>) -> Self {
        self.project_key = Some(key.into());
        self
    }

    pub fn status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// SQLite treats a negative LIMIT as "no limit".
    pub(crate) fn sql_limit(&self) -> i64 {
        self.limit.map(i64::from).unwrap_or(-1)
    }
}

/// Pick order for the workable set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WorkOrder {
    /// Smallest complexity first, then oldest.
    #[default]
    Complexity,
    Oldest,
    Newest,
}

impl WorkOrder {
    pub(crate) fn order_by(self) -> &'static str {
        match self {
            WorkOrder::Complexity => {
                "CASE t.complexity
                    WHEN 'trivial' THEN 0
                    WHEN 'small' THEN 1
                    WHEN 'medium' THEN 2
                    WHEN 'large' THEN 3
                    ELSE 4
                 END ASC, t.created_at ASC, t.id ASC"
            }
            WorkOrder::Oldest => "t.created_at ASC, t.id ASC",
            WorkOrder::Newest => "t.created_at DESC, t.id DESC",
        }
    }
}

impl std::str::FromStr for WorkOrder {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> crate::error::Result<Self> {
        match s {
            "complexity" => Ok(WorkOrder::Complexity),
            "oldest" => Ok(WorkOrder::Oldest),
            "newest" => Ok(WorkOrder::Newest),
            _ => Err(crate::error::Error::InvalidArgument(format!(
                "unknown order: {s}"
            ))),
        }
    }
}
