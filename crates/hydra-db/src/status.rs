//! The shared status alphabet spanning node, job, and task rows.
//!
//! One codepoint set straddles three entity state machines. We keep a
//! single enum with documented subsets rather than three parallel enums,
//! since the claim query and crash-recovery logic reason about the same
//! codepoints across entity types.

use std::fmt;
use std::str::FromStr;

/// A status codepoint shared by `render_nodes`, `jobs`, and `tasks`.
///
/// Interpretation depends on the entity: `Started` on a node means it is
/// actively running a task, while on a job it means at least one task is
/// running; see the design notes on each consuming module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HydraStatus {
    Started,
    Ready,
    Paused,
    Finished,
    Killed,
    Error,
    Crashed,
    Timeout,
    Idle,
    Offline,
    Pending,
    GetOff,
}

impl HydraStatus {
    /// The single-character codepoint stored in the database.
    pub const fn code(self) -> char {
        match self {
            HydraStatus::Started => 'S',
            HydraStatus::Ready => 'R',
            HydraStatus::Paused => 'U',
            HydraStatus::Finished => 'F',
            HydraStatus::Killed => 'K',
            HydraStatus::Error => 'E',
            HydraStatus::Crashed => 'C',
            HydraStatus::Timeout => 'T',
            HydraStatus::Idle => 'I',
            HydraStatus::Offline => 'O',
            HydraStatus::Pending => 'P',
            HydraStatus::GetOff => 'G',
        }
    }

    /// A human-readable name, for logging and CLI display.
    pub const fn nice_name(self) -> &'static str {
        match self {
            HydraStatus::Started => "Started",
            HydraStatus::Ready => "Ready",
            HydraStatus::Paused => "Paused",
            HydraStatus::Finished => "Finished",
            HydraStatus::Killed => "Killed",
            HydraStatus::Error => "Error",
            HydraStatus::Crashed => "Crashed",
            HydraStatus::Timeout => "Timeout",
            HydraStatus::Idle => "Idle",
            HydraStatus::Offline => "Offline",
            HydraStatus::Pending => "Pending",
            HydraStatus::GetOff => "GetOff",
        }
    }

    /// Used at worker startup to detect a node/task left mid-operation by a crash.
    pub const fn is_stuck(self) -> bool {
        matches!(self, HydraStatus::Started | HydraStatus::Pending)
    }

    /// Used by the dispatch loop to decide whether a claim attempt may run.
    pub const fn is_offline_set(self) -> bool {
        matches!(
            self,
            HydraStatus::Offline | HydraStatus::Pending | HydraStatus::Started
        )
    }
}

impl fmt::Display for HydraStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid HydraStatus code: {0:?}")]
pub struct StatusParseError(pub String);

impl FromStr for HydraStatus {
    type Err = StatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        let (Some(c), None) = (chars.next(), chars.next()) else {
            return Err(StatusParseError(s.to_owned()));
        };
        HydraStatus::try_from(c).map_err(|_| StatusParseError(s.to_owned()))
    }
}

impl TryFrom<char> for HydraStatus {
    type Error = StatusParseError;

    fn try_from(c: char) -> Result<Self, Self::Error> {
        Ok(match c {
            'S' => HydraStatus::Started,
            'R' => HydraStatus::Ready,
            'U' => HydraStatus::Paused,
            'F' => HydraStatus::Finished,
            'K' => HydraStatus::Killed,
            'E' => HydraStatus::Error,
            'C' => HydraStatus::Crashed,
            'T' => HydraStatus::Timeout,
            'I' => HydraStatus::Idle,
            'O' => HydraStatus::Offline,
            'P' => HydraStatus::Pending,
            'G' => HydraStatus::GetOff,
            other => return Err(StatusParseError(other.to_string())),
        })
    }
}

impl From<HydraStatus> for char {
    fn from(status: HydraStatus) -> char {
        status.code()
    }
}

impl sqlx::Type<sqlx::Postgres> for HydraStatus {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <String as sqlx::Type<sqlx::Postgres>>::type_info()
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for HydraStatus {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <String as sqlx::Encode<sqlx::Postgres>>::encode(self.code().to_string(), buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for HydraStatus {
    fn decode(
        value: sqlx::postgres::PgValueRef<'r>,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let s = <String as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        HydraStatus::from_str(&s).map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)
    }
}
