use chrono::Utc;
use serde::Serialize;

use crate::error::LotteryError;
use crate::lottery::views::DrawSummary;
use crate::lottery::Lottery;

const RECENT_WINNERS: usize = 5;

#[derive(Clone, Debug, Serialize)]
pub struct LotteryStats {
    pub total_draws: usize,
    /// Draws still accepting ballots, the same set `open_draws()` lists.
    pub open_draws: usize,
    pub due_draws: usize,
    pub closed_draws: usize,
    pub total_prizes_awarded: usize,
    pub total_amount_awarded: i64,
    pub recent_winners: Vec<DrawSummary>,
}

impl Lottery {
    pub async fn stats(&self) -> Result<LotteryStats, LotteryError> {
        let now = Utc::now();
        let draws = self.load_draws().await?;
        let closed = draws.iter().filter(|d| d.is_closed()).collect::<Vec<_>>();

        Ok(LotteryStats {
            total_draws: draws.len(),
            open_draws: draws.iter().filter(|d| d.accepts_ballots(now)).count(),
            due_draws: draws.iter().filter(|d| d.is_due(now)).count(),
            closed_draws: closed.len(),
            total_prizes_awarded: closed.iter().map(|d| d.winners().len()).sum(),
            total_amount_awarded: closed.iter().map(|d| d.total_awarded()).sum(),
            recent_winners: closed.iter()
                .rev()
                .filter(|d| !d.winners().is_empty())
                .take(RECENT_WINNERS)
                .map(|d| DrawSummary::from(*d))
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use crate::db::schema::PrizeTier;
    use crate::lottery::testing::{card, grand_prize, lottery, new_draw_type, open_draw};

    #[tokio::test]
    async fn empty_lottery_has_zero_stats() {
        let stats = lottery().stats().await.unwrap();
        assert_eq!(stats.total_draws, 0);
        assert_eq!(stats.open_draws, 0);
        assert_eq!(stats.due_draws, 0);
        assert_eq!(stats.total_prizes_awarded, 0);
        assert_eq!(stats.total_amount_awarded, 0);
        assert!(stats.recent_winners.is_empty());
    }

    #[tokio::test]
    async fn stats_sum_recorded_prizes() {
        let lottery = lottery();
        let tiers = vec![PrizeTier::new("Jackpot", 5000, 1), PrizeTier::new("Runner Up", 1000, 2)];
        let d = open_draw(&lottery, "Weekly Draw", tiers, 1).await;
        let empty = open_draw(&lottery, "Daily Draw", grand_prize(), 2).await;
        open_draw(&lottery, "Special Draw", grand_prize(), 3).await;

        lottery.purchase(1, 2, &card()).await.unwrap();
        lottery.purchase(2, 2, &card()).await.unwrap();
        lottery.assign_many(1, d.id, 2).await.unwrap();
        lottery.assign_many(2, d.id, 2).await.unwrap();
        lottery.resolve(d.id).await.unwrap();
        lottery.resolve(empty.id).await.unwrap();

        let stats = lottery.stats().await.unwrap();
        assert_eq!(stats.total_draws, 3);
        assert_eq!(stats.open_draws, 1);
        assert_eq!(stats.due_draws, 0);
        assert_eq!(stats.closed_draws, 2);
        assert_eq!(stats.total_prizes_awarded, 3);
        assert_eq!(stats.total_amount_awarded, 7000);
        assert_eq!(stats.recent_winners.len(), 1);
        assert_eq!(stats.recent_winners[0].id, d.id);
    }

    #[tokio::test]
    async fn past_due_draws_are_not_counted_open() {
        let lottery = lottery();
        open_draw(&lottery, "Daily Draw", grand_prize(), 1).await;

        // Draws cannot be created in the past through the lottery, so go to
        // the store directly.
        let now = Utc::now();
        let draw_type = lottery.store.add_draw_type(&new_draw_type("Weekly Draw", 0, Default::default())).await.unwrap();
        lottery.store.add_draw(&draw_type, now - Duration::hours(1), now - Duration::days(1)).await.unwrap();

        let stats = lottery.stats().await.unwrap();
        assert_eq!(stats.total_draws, 2);
        assert_eq!(stats.open_draws, lottery.open_draws().await.unwrap().len());
        assert_eq!(stats.open_draws, 1);
        assert_eq!(stats.due_draws, 1);
        assert_eq!(stats.closed_draws, 0);
    }
}
