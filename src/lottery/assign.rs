use std::sync::atomic::{AtomicU32, Ordering};

use chrono::Utc;
use evlog::meta;

use crate::db::schema::{Ballot, BallotId, BallotState, DrawId, UserId};
use crate::error::LotteryError;
use crate::lottery::Lottery;
use crate::runtime::get_logger;

impl Lottery {
    pub async fn assign(&self, user: UserId, ballot: BallotId, draw: DrawId) -> Result<Ballot, LotteryError> {
        let now = Utc::now();
        let store = self.store.as_ref();
        let attempts = AtomicU32::new(0);
        let tries = &attempts;

        let r = self.config.retry
            .run("assign_ballot", move || {
                tries.fetch_add(1, Ordering::SeqCst);
                store.assign_ballot(user, ballot, draw, now)
            })
            .await;

        // An earlier attempt may have committed before the store went away.
        let r = match r {
            Err(e @ LotteryError::InvalidState { .. }) if attempts.load(Ordering::SeqCst) > 1 => {
                match self.committed_assignment(user, ballot, draw).await {
                    Some(b) => Ok(b),
                    None => Err(e),
                }
            }
            r => r,
        };

        match &r {
            Ok(_) => {
                get_logger().info("Ballot assigned to draw.", meta! {
                    "UserID" => user,
                    "BallotID" => ballot,
                    "DrawID" => draw,
                });
            }
            Err(e) => {
                get_logger().info("Ballot assignment rejected.", meta! {
                    "UserID" => user,
                    "BallotID" => ballot,
                    "DrawID" => draw,
                    "Code" => e.code(),
                });
            }
        }

        r
    }

    async fn committed_assignment(&self, user: UserId, ballot: BallotId, draw: DrawId) -> Option<Ballot> {
        let store = self.store.as_ref();
        let current = self.config.retry
            .run("get_ballot", move || store.get_ballot(ballot))
            .await
            .ok()
            .flatten()?;

        let entered = current.id_owner == user
            && current.id_draw == Some(draw)
            && current.state != BallotState::Unassigned;

        if entered { Some(current) } else { None }
    }

    /// Enters `count` of the caller's unassigned ballots, oldest first, into
    /// one draw. Ballots taken by a concurrent request are skipped in favour of
    /// the next one; any other rejection stops the batch, leaving earlier
    /// entries in place.
    pub async fn assign_many(&self, user: UserId, draw: DrawId, count: i64) -> Result<Vec<Ballot>, LotteryError> {
        if count < 1 {
            return Err(LotteryError::validation("count", format!("must be at least 1; got {}", count)));
        }

        let store = self.store.as_ref();
        let candidates = self.config.retry
            .run("list_user_ballots", move || store.list_user_ballots(user))
            .await?
            .into_iter()
            .filter(|b| b.state == BallotState::Unassigned)
            .collect::<Vec<_>>();

        if (candidates.len() as i64) < count {
            return Err(LotteryError::validation("count", format!(
                "only {} unassigned ballot(s) available; requested {}", candidates.len(), count
            )));
        }

        let mut assigned = Vec::with_capacity(count as usize);
        for candidate in candidates {
            if assigned.len() as i64 == count {
                break;
            }

            match self.assign(user, candidate.id, draw).await {
                Ok(b) => assigned.push(b),
                Err(LotteryError::InvalidState { .. }) => continue,
                Err(e) => return Err(e),
            }
        }

        get_logger().info("Ballots assigned in batch.", meta! {
            "UserID" => user,
            "DrawID" => draw,
            "Requested" => count,
            "Assigned" => assigned.len(),
        });

        Ok(assigned)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::db::schema::{BallotState, PrizeTier};
    use crate::error::LotteryError;
    use crate::lottery::testing::{card, grand_prize, lottery, lottery_over, open_draw, LostAckStore};

    #[tokio::test]
    async fn second_assignment_fails_and_keeps_first_draw() {
        let lottery = lottery();
        let d = open_draw(&lottery, "Daily Draw", grand_prize(), 1).await;
        let e = open_draw(&lottery, "Weekly Draw", grand_prize(), 2).await;
        let x = lottery.purchase(1, 1, &card()).await.unwrap()[0].id;

        let assigned = lottery.assign(1, x, d.id).await.unwrap();
        assert_eq!(assigned.state, BallotState::Assigned);
        assert_eq!(assigned.id_draw, Some(d.id));

        for target in [e.id, d.id] {
            let err = lottery.assign(1, x, target).await.unwrap_err();
            assert!(matches!(err, LotteryError::InvalidState { state: BallotState::Assigned, .. }));
        }

        let ballots = lottery.my_ballots(1).await.unwrap();
        assert_eq!(ballots.assigned[0].id_draw, Some(d.id));
    }

    #[tokio::test]
    async fn foreign_and_unknown_ballots_are_rejected() {
        let lottery = lottery();
        let d = open_draw(&lottery, "Daily Draw", grand_prize(), 1).await;
        let x = lottery.purchase(1, 1, &card()).await.unwrap()[0].id;

        assert!(matches!(lottery.assign(2, x, d.id).await, Err(LotteryError::Forbidden { .. })));
        assert!(matches!(lottery.assign(1, x + 100, d.id).await, Err(LotteryError::NotFound { .. })));
        assert!(matches!(lottery.assign(1, x, d.id + 100).await, Err(LotteryError::NotFound { .. })));
    }

    #[tokio::test]
    async fn closed_draw_rejects_every_later_assignment() {
        let lottery = lottery();
        let d = open_draw(&lottery, "Daily Draw", grand_prize(), 1).await;
        let ballots = lottery.purchase(1, 3, &card()).await.unwrap();
        lottery.assign(1, ballots[0].id, d.id).await.unwrap();

        lottery.resolve(d.id).await.unwrap();

        for b in &ballots[1..] {
            assert!(matches!(lottery.assign(1, b.id, d.id).await, Err(LotteryError::DrawClosed { .. })));
        }
        assert!(matches!(
            lottery.assign(1, ballots[0].id, d.id).await,
            Err(LotteryError::InvalidState { state: BallotState::Resolved, .. })
        ));
    }

    #[tokio::test]
    async fn batch_takes_oldest_ballots_first() {
        let lottery = lottery();
        let d = open_draw(&lottery, "Daily Draw", grand_prize(), 1).await;
        let ballots = lottery.purchase(1, 5, &card()).await.unwrap();

        let assigned = lottery.assign_many(1, d.id, 3).await.unwrap();
        assert_eq!(
            assigned.iter().map(|b| b.id).collect::<Vec<_>>(),
            ballots[..3].iter().map(|b| b.id).collect::<Vec<_>>()
        );

        let mine = lottery.my_ballots(1).await.unwrap();
        assert_eq!(mine.unassigned.len(), 2);
        assert_eq!(mine.assigned.len(), 3);
    }

    #[tokio::test]
    async fn batch_larger_than_holdings_assigns_nothing() {
        let lottery = lottery();
        let d = open_draw(&lottery, "Daily Draw", grand_prize(), 1).await;
        lottery.purchase(1, 2, &card()).await.unwrap();

        let err = lottery.assign_many(1, d.id, 3).await.unwrap_err();
        assert!(matches!(err, LotteryError::Validation { field: "count", .. }));
        assert!(matches!(lottery.assign_many(1, d.id, 0).await, Err(LotteryError::Validation { .. })));
        assert_eq!(lottery.my_ballots(1).await.unwrap().unassigned.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_assignments_of_one_ballot_succeed_once() {
        let lottery = Arc::new(lottery());
        let tiers = vec![PrizeTier::new("Grand Prize", 1000, 1)];
        let d = open_draw(&lottery, "Daily Draw", tiers.clone(), 1).await;
        let e = open_draw(&lottery, "Weekly Draw", tiers, 2).await;
        let x = lottery.purchase(1, 1, &card()).await.unwrap()[0].id;

        let tasks = (0..20)
            .map(|i| {
                let lottery = Arc::clone(&lottery);
                let target = if i % 2 == 0 { d.id } else { e.id };
                tokio::spawn(async move { lottery.assign(1, x, target).await })
            })
            .collect::<Vec<_>>();

        let mut won = Vec::new();
        for task in tasks {
            match task.await.unwrap() {
                Ok(b) => won.push(b),
                Err(LotteryError::InvalidState { .. }) => {}
                Err(other) => panic!("unexpected error: {}", other),
            }
        }

        assert_eq!(won.len(), 1);
        let ballots = lottery.my_ballots(1).await.unwrap();
        assert_eq!(ballots.assigned[0].id_draw, won[0].id_draw);
    }

    #[tokio::test]
    async fn retry_after_lost_acknowledgement_reports_the_assignment() {
        let lottery = lottery_over(LostAckStore::new());
        let d = open_draw(&lottery, "Daily Draw", grand_prize(), 1).await;
        let ballots = lottery.purchase(1, 2, &card()).await.unwrap();

        let assigned = lottery.assign(1, ballots[0].id, d.id).await.unwrap();
        assert_eq!(assigned.state, BallotState::Assigned);
        assert_eq!(assigned.id_draw, Some(d.id));
        assert_eq!(lottery.draw_detail(d.id).await.unwrap().entries, 1);

        // Without a lost acknowledgement a repeat is still a conflict.
        assert!(matches!(
            lottery.assign(1, ballots[0].id, d.id).await,
            Err(LotteryError::InvalidState { state: BallotState::Assigned, .. })
        ));
        lottery.assign(1, ballots[1].id, d.id).await.unwrap();
        assert_eq!(lottery.draw_detail(d.id).await.unwrap().entries, 2);
    }
}
