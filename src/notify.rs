use async_trait::async_trait;
use evlog::meta;
use itertools::Itertools;

use crate::db::schema::{Draw, UserId, Winner};
use crate::runtime::get_logger;
use crate::support::numbers::grouped;

/// Tells a user what they won in a draw. Delivery (email or otherwise) lives
/// outside the lottery core.
#[async_trait]
pub trait WinnerNotifier: Send + Sync {
    async fn notify(&self, draw: &Draw, owner: UserId, prizes: &[Winner]) -> anyhow::Result<()>;
}

pub struct LogNotifier;

#[async_trait]
impl WinnerNotifier for LogNotifier {
    async fn notify(&self, draw: &Draw, owner: UserId, prizes: &[Winner]) -> anyhow::Result<()> {
        let total: i64 = prizes.iter().map(|w| w.amount).sum();

        get_logger().info("Winner notification queued.", meta! {
            "DrawID" => draw.id,
            "DrawType" => draw.draw_type_name.clone(),
            "UserID" => owner,
            "Prizes" => prizes.iter().map(|w| w.tier.as_str()).join(", "),
            "Total" => grouped(total),
        });

        Ok(())
    }
}

pub fn winners_by_owner(draw: &Draw) -> Vec<(UserId, Vec<Winner>)> {
    let groups = draw.winners()
        .iter()
        .sorted_by_key(|w| (w.id_owner, w.amount, w.id_ballot))
        .group_by(|w| w.id_owner);

    let result = (&groups)
        .into_iter()
        .map(|(owner, prizes)| (owner, prizes.cloned().collect()))
        .collect();
    result
}

/// Sends one notification per winning owner. A failed notification is logged
/// and skipped; it never undoes or fails the resolution.
pub async fn notify_winners(notifier: &dyn WinnerNotifier, draw: &Draw) -> usize {
    let mut sent = 0;

    for (owner, prizes) in winners_by_owner(draw) {
        match notifier.notify(draw, owner, &prizes).await {
            Ok(()) => sent += 1,
            Err(e) => {
                get_logger().error("Failed to notify lottery winner.", meta! {
                    "DrawID" => draw.id,
                    "UserID" => owner,
                    "Error" => e,
                });
            }
        }
    }

    get_logger().info("Lottery winner notifications sent.", meta! {
        "DrawID" => draw.id,
        "Sent" => sent,
    });

    sent
}
