use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::support::numbers::grouped;

pub type UserId = i64;
pub type BallotId = i64;
pub type DrawId = i64;
pub type DrawTypeId = i64;

/// One prize category of a draw type: `count` winners receive `amount` each.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrizeTier {
    pub name: String,
    pub amount: i64,
    pub count: u32,
}

impl PrizeTier {
    pub fn new(name: &str, amount: i64, count: u32) -> Self {
        Self {
            name: name.to_owned(),
            amount,
            count,
        }
    }
}

impl fmt::Display for PrizeTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}x € {}", self.name, self.count, grouped(self.amount))
    }
}

/// Date selector for a draw type. Unset fields match anything, so the default
/// schedule matches every date. `weekday` counts from Monday = 0.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weekday: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub month: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day: Option<u32>,
}

impl Schedule {
    pub fn weekly(weekday: u32) -> Self {
        Self {
            weekday: Some(weekday),
            ..Self::default()
        }
    }

    pub fn yearly(month: u32, day: u32) -> Self {
        Self {
            weekday: None,
            month: Some(month),
            day: Some(day),
        }
    }

    pub fn matches(&self, date: NaiveDate) -> bool {
        let selectors = [
            (self.weekday, date.weekday().num_days_from_monday()),
            (self.month, date.month()),
            (self.day, date.day()),
        ];

        selectors
            .iter()
            .all(|(wanted, actual)| wanted.map_or(true, |w| w == *actual))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrawType {
    pub id: DrawTypeId,
    pub name: String,
    pub position: i32,
    pub is_active: bool,
    pub schedule: Schedule,
    pub tiers: Vec<PrizeTier>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewDrawType {
    pub name: String,
    pub position: i32,
    pub is_active: bool,
    pub schedule: Schedule,
    pub tiers: Vec<PrizeTier>,
}

/// `(ballot, tier, amount)` entry of a closed draw's prize allocation record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Winner {
    pub id_ballot: BallotId,
    pub id_owner: UserId,
    pub tier: String,
    pub amount: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Draw {
    pub id: DrawId,
    pub id_draw_type: DrawTypeId,
    pub draw_type_name: String,
    pub tiers: Vec<PrizeTier>,
    pub date: NaiveDate,
    pub scheduled_at: DateTime<Utc>,
    pub time_created: DateTime<Utc>,
    pub time_closed: Option<DateTime<Utc>>,
    pub winners: Option<Vec<Winner>>,
    /// Ballots assigned to the draw at the time it was read.
    pub entries: u64,
}

impl Draw {
    pub fn is_closed(&self) -> bool {
        self.time_closed.is_some()
    }

    pub fn accepts_ballots(&self, now: DateTime<Utc>) -> bool {
        !self.is_closed() && now < self.scheduled_at
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.is_closed() && self.scheduled_at <= now
    }

    pub fn winners(&self) -> &[Winner] {
        self.winners.as_deref().unwrap_or(&[])
    }

    pub fn total_awarded(&self) -> i64 {
        self.winners().iter().map(|w| w.amount).sum()
    }

    pub fn prize_slots(&self) -> u64 {
        self.tiers.iter().map(|t| t.count as u64).sum()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BallotState {
    Unassigned,
    Assigned,
    Resolved,
}

impl BallotState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BallotState::Unassigned => "unassigned",
            BallotState::Assigned => "assigned",
            BallotState::Resolved => "resolved",
        }
    }
}

impl fmt::Display for BallotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BallotState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unassigned" => Ok(BallotState::Unassigned),
            "assigned" => Ok(BallotState::Assigned),
            "resolved" => Ok(BallotState::Resolved),
            _ => Err(anyhow::anyhow!("unknown ballot state '{}'", s)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    NoPrize,
    Prize { tier: String, amount: i64 },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ballot {
    pub id: BallotId,
    pub id_owner: UserId,
    pub time_created: DateTime<Utc>,
    pub state: BallotState,
    pub id_draw: Option<DrawId>,
    /// Set once, when the ballot's draw is resolved.
    pub outcome: Option<Outcome>,
}

impl Ballot {
    pub fn prize(&self) -> Option<(&str, i64)> {
        match &self.outcome {
            Some(Outcome::Prize { tier, amount }) => Some((tier.as_str(), *amount)),
            _ => None,
        }
    }
}
