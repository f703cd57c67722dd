use std::cmp::Reverse;
use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, Utc};
use itertools::Itertools;
use serde::Serialize;

use crate::db::schema::{Ballot, BallotId, BallotState, Draw, DrawId, PrizeTier, UserId, Winner};
use crate::db::missing_ballot;
use crate::error::LotteryError;
use crate::lottery::Lottery;

#[derive(Clone, Debug, Serialize)]
pub struct DrawSummary {
    pub id: DrawId,
    pub draw_type: String,
    pub date: NaiveDate,
    pub scheduled_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub prize_tiers: Vec<PrizeTier>,
    /// Tiers as shown to users, e.g. `Grand Prize: 1x € 10,000`.
    pub prizes: Vec<String>,
    pub prize_slots: u64,
    pub entries: u64,
    pub winner_count: usize,
    pub total_prize_amount: i64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub winners: Vec<Winner>,
}

impl From<&Draw> for DrawSummary {
    fn from(draw: &Draw) -> Self {
        let winner_count = draw.winners()
            .iter()
            .map(|w| w.id_owner)
            .collect::<HashSet<_>>()
            .len();

        Self {
            id: draw.id,
            draw_type: draw.draw_type_name.clone(),
            date: draw.date,
            scheduled_at: draw.scheduled_at,
            closed_at: draw.time_closed,
            prize_tiers: draw.tiers.clone(),
            prizes: draw.tiers.iter().map(|t| t.to_string()).collect(),
            prize_slots: draw.prize_slots(),
            entries: draw.entries,
            winner_count,
            total_prize_amount: draw.total_awarded(),
            winners: draw.winners().to_vec(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct UserBallots {
    pub unassigned: Vec<Ballot>,
    pub assigned: Vec<Ballot>,
    pub total_ballots: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct DrawWinnings {
    pub id_draw: DrawId,
    pub draw_type: String,
    pub date: NaiveDate,
    pub prizes: Vec<Winner>,
}

#[derive(Clone, Debug, Serialize)]
pub struct Winnings {
    pub total_amount: i64,
    pub winning_ballots: usize,
    pub draws: Vec<DrawWinnings>,
}

impl Lottery {
    pub async fn open_draws(&self) -> Result<Vec<DrawSummary>, LotteryError> {
        let now = Utc::now();

        Ok(self.load_draws().await?
            .iter()
            .filter(|d| d.accepts_ballots(now))
            .map(DrawSummary::from)
            .collect())
    }

    pub async fn closed_draws(&self) -> Result<Vec<DrawSummary>, LotteryError> {
        Ok(self.load_draws().await?
            .iter()
            .rev()
            .filter(|d| d.is_closed())
            .map(DrawSummary::from)
            .collect())
    }

    pub async fn draw_detail(&self, id: DrawId) -> Result<DrawSummary, LotteryError> {
        Ok(DrawSummary::from(&self.load_draw(id).await?))
    }

    pub async fn my_ballots(&self, user: UserId) -> Result<UserBallots, LotteryError> {
        let store = self.store.as_ref();
        let ballots = self.config.retry
            .run("list_user_ballots", move || store.list_user_ballots(user))
            .await?;
        let total_ballots = ballots.len();

        let (mut unassigned, mut assigned): (Vec<_>, Vec<_>) = ballots
            .into_iter()
            .partition(|b| b.state == BallotState::Unassigned);

        unassigned.sort_by_key(|b| Reverse(b.id));
        assigned.sort_by_key(|b| Reverse((b.id_draw, b.id)));

        Ok(UserBallots {
            unassigned,
            assigned,
            total_ballots,
        })
    }

    /// One of the caller's ballots. Someone else's ballot is `Forbidden`.
    pub async fn my_ballot(&self, user: UserId, id: BallotId) -> Result<Ballot, LotteryError> {
        let store = self.store.as_ref();
        let ballot = self.config.retry
            .run("get_ballot", move || store.get_ballot(id))
            .await?
            .ok_or_else(|| missing_ballot(id))?;

        if ballot.id_owner != user {
            return Err(LotteryError::Forbidden { ballot: id });
        }

        Ok(ballot)
    }

    pub async fn my_winnings(&self, user: UserId) -> Result<Winnings, LotteryError> {
        let draws = self.load_draws().await?
            .into_iter()
            .filter(|d| d.is_closed())
            .collect::<Vec<_>>();

        let mine = draws.iter()
            .flat_map(|d| d.winners().iter().filter(|w| w.id_owner == user).map(move |w| (d, w)))
            .sorted_by_key(|(d, w)| (Reverse(d.scheduled_at), Reverse(d.id), w.id_ballot))
            .collect::<Vec<_>>();

        let total_amount = mine.iter().map(|(_, w)| w.amount).sum();
        let winning_ballots = mine.len();

        let groups = mine.into_iter().group_by(|(d, _)| d.id);
        let per_draw = (&groups)
            .into_iter()
            .map(|(_, group)| {
                let group = group.collect::<Vec<_>>();
                let draw = group[0].0;
                DrawWinnings {
                    id_draw: draw.id,
                    draw_type: draw.draw_type_name.clone(),
                    date: draw.date,
                    prizes: group.iter().map(|(_, w)| (*w).clone()).collect(),
                }
            })
            .collect();

        Ok(Winnings {
            total_amount,
            winning_ballots,
            draws: per_draw,
        })
    }
}
