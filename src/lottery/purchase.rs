use chrono::Utc;
use evlog::meta;

use crate::db::schema::{Ballot, UserId};
use crate::error::LotteryError;
use crate::lottery::Lottery;
use crate::runtime::get_logger;
use crate::support::payment::PaymentDetails;

impl Lottery {
    /// Creates `quantity` unassigned ballots for `user` once the payment gate
    /// passes. Either every ballot is created or none is. Retries reuse one
    /// purchase key, so a write whose acknowledgement was lost is not repeated.
    pub async fn purchase(&self, user: UserId, quantity: i64, payment: &PaymentDetails) -> Result<Vec<Ballot>, LotteryError> {
        let now = Utc::now();
        let max = self.config.max_purchase;

        if quantity < 1 || quantity > max as i64 {
            get_logger().info("Attempted to purchase an invalid number of ballots.", meta! {
                "UserID" => user,
                "Quantity" => quantity,
            });
            return Err(LotteryError::validation("quantity", format!("must be between 1 and {}; got {}", max, quantity)));
        }

        if let Err(e) = payment.check(now.date_naive()) {
            get_logger().info("Payment details rejected.", meta! {
                "UserID" => user,
                "Error" => e.to_string(),
            });
            return Err(e);
        }

        let store = self.store.as_ref();
        let quantity = quantity as u32;
        let purchase_key = format!("{:032x}", rand::random::<u128>());
        let key = purchase_key.as_str();
        let ballots = self.config.retry
            .run("add_ballots", move || store.add_ballots(user, quantity, key, now))
            .await?;

        get_logger().info("Ballots purchased.", meta! {
            "UserID" => user,
            "Quantity" => quantity,
            "PurchaseKey" => key,
            "FirstBallotID" => ballots.first().map(|b| b.id).unwrap_or_default(),
        });

        Ok(ballots)
    }
}

#[cfg(test)]
mod tests {
    use crate::db::schema::BallotState;
    use crate::error::LotteryError;
    use crate::lottery::testing::{card, lottery, lottery_over, LostAckStore};

    #[tokio::test]
    async fn purchase_creates_exactly_quantity_unassigned_ballots() {
        let lottery = lottery();
        lottery.purchase(1, 2, &card()).await.unwrap();
        let before = lottery.my_ballots(1).await.unwrap().unassigned.len();

        let bought = lottery.purchase(1, 5, &card()).await.unwrap();
        assert_eq!(bought.len(), 5);
        assert!(bought.iter().all(|b| b.state == BallotState::Unassigned && b.id_owner == 1));

        let after = lottery.my_ballots(1).await.unwrap();
        assert_eq!(after.unassigned.len(), before + 5);
        for b in &bought {
            assert!(after.unassigned.iter().any(|u| u.id == b.id));
        }
    }

    #[tokio::test]
    async fn invalid_quantity_creates_nothing() {
        let lottery = lottery();

        for quantity in [0, -3, 101] {
            let err = lottery.purchase(1, quantity, &card()).await.unwrap_err();
            assert!(matches!(err, LotteryError::Validation { field: "quantity", .. }));
        }
        assert_eq!(lottery.my_ballots(1).await.unwrap().total_ballots, 0);
    }

    #[tokio::test]
    async fn rejected_payment_creates_nothing() {
        let lottery = lottery();
        let mut payment = card();
        payment.cvv = "1".to_owned();

        let err = lottery.purchase(1, 3, &payment).await.unwrap_err();
        assert!(matches!(err, LotteryError::Validation { field: "cvv", .. }));
        assert_eq!(lottery.my_ballots(1).await.unwrap().total_ballots, 0);
    }

    #[tokio::test]
    async fn purchases_do_not_touch_other_users() {
        let lottery = lottery();
        lottery.purchase(1, 4, &card()).await.unwrap();
        lottery.purchase(2, 1, &card()).await.unwrap();

        assert_eq!(lottery.my_ballots(1).await.unwrap().total_ballots, 4);
        assert_eq!(lottery.my_ballots(2).await.unwrap().total_ballots, 1);
    }

    #[tokio::test]
    async fn retry_after_lost_acknowledgement_buys_once() {
        let lottery = lottery_over(LostAckStore::new());

        let bought = lottery.purchase(1, 5, &card()).await.unwrap();
        assert_eq!(bought.len(), 5);

        let held = lottery.my_ballots(1).await.unwrap();
        assert_eq!(held.total_ballots, 5);
        assert_eq!(held.unassigned.len(), 5);

        lottery.purchase(1, 2, &card()).await.unwrap();
        assert_eq!(lottery.my_ballots(1).await.unwrap().total_ballots, 7);
    }
}
