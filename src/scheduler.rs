use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use evlog::meta;
use futures::future::join_all;
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::StreamExt;

use crate::config::Config;
use crate::error::LotteryError;
use crate::lottery::resolve::Resolution;
use crate::lottery::Lottery;
use crate::runtime::get_logger;

/// Resolves every open draw whose scheduled time has passed. Draws are closed
/// concurrently; a failure on one does not hold back the others.
pub async fn close_due_draws(lottery: &Lottery, now: DateTime<Utc>) -> Result<Vec<Resolution>, LotteryError> {
    let due = lottery.due_draws(now).await?;

    let results = join_all(due.iter().map(|id| lottery.resolve(*id))).await;

    let mut closed = Vec::with_capacity(results.len());
    for (id, r) in due.iter().zip(results) {
        match r {
            Ok(resolution) => closed.push(resolution),
            Err(e) => {
                get_logger().error("Scheduled resolution failed.", meta! {
                    "DrawID" => id,
                    "Error" => e.to_string(),
                });
            }
        }
    }

    Ok(closed)
}

async fn tick(lottery: &Lottery, days_ahead: u32) {
    let now = Utc::now();

    if let Err(e) = lottery.ensure_upcoming_draws(now, days_ahead).await {
        get_logger().error("Failed to schedule upcoming draws.", meta! {
            "Error" => e.to_string(),
        });
    }

    match close_due_draws(lottery, now).await {
        Ok(closed) if !closed.is_empty() => {
            get_logger().info("Closed due draws.", meta! {
                "Count" => closed.len(),
            });
        }
        Ok(_) => {}
        Err(e) => {
            get_logger().error("Failed to list due draws.", meta! {
                "Error" => e.to_string(),
            });
        }
    }
}

pub async fn run(lottery: Arc<Lottery>, config: &Config) {
    let period = Duration::from_secs(config.sweep_secs.max(1));
    let mut ticks = IntervalStream::new(tokio::time::interval(period));

    get_logger().info("Draw scheduler started.", meta! {
        "SweepSecs" => period.as_secs(),
        "DaysAhead" => config.days_ahead,
    });

    loop {
        tokio::select! {
            next = ticks.next() => {
                if next.is_none() {
                    break;
                }
                tick(&lottery, config.days_ahead).await;
            }
            _ = tokio::signal::ctrl_c() => {
                get_logger().info("Shutdown requested; stopping draw scheduler.", meta! {
                    "Signal" => "ctrl-c",
                });
                break;
            }
        }
    }
}
