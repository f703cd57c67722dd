use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::db::schema::{Draw, DrawId};
use crate::db::{missing_draw, LotteryStore, WinnerPicker};
use crate::error::LotteryError;
use crate::notify::WinnerNotifier;
use crate::support::retry::RetryPolicy;

pub mod assign;
pub mod calendar;
pub mod purchase;
pub mod resolve;
pub mod selection;
pub mod stats;
pub mod views;

#[cfg(test)]
pub(crate) mod testing;

#[derive(Clone, Debug)]
pub struct LotteryConfig {
    pub max_purchase: u32,
    /// UTC hour at which calendar draws are scheduled.
    pub draw_hour: u32,
    pub retry: RetryPolicy,
}

impl Default for LotteryConfig {
    fn default() -> Self {
        Self {
            max_purchase: 100,
            draw_hour: 20,
            retry: RetryPolicy::default(),
        }
    }
}

pub struct Lottery {
    store: Arc<dyn LotteryStore>,
    picker: Arc<dyn WinnerPicker>,
    notifier: Arc<dyn WinnerNotifier>,
    config: LotteryConfig,
}

impl Lottery {
    pub fn new(
        store: Arc<dyn LotteryStore>,
        picker: Arc<dyn WinnerPicker>,
        notifier: Arc<dyn WinnerNotifier>,
        config: LotteryConfig,
    ) -> Self {
        Self {
            store,
            picker,
            notifier,
            config,
        }
    }

    /// Unresolved draws whose scheduled time is not after `now`.
    pub async fn due_draws(&self, now: DateTime<Utc>) -> Result<Vec<DrawId>, LotteryError> {
        Ok(self.load_draws().await?
            .iter()
            .filter(|d| d.is_due(now))
            .map(|d| d.id)
            .collect())
    }

    async fn load_draw(&self, id: DrawId) -> Result<Draw, LotteryError> {
        let store = self.store.as_ref();

        self.config.retry.run("get_draw", move || store.get_draw(id))
            .await?
            .ok_or_else(|| missing_draw(id))
    }

    async fn load_draws(&self) -> Result<Vec<Draw>, LotteryError> {
        let store = self.store.as_ref();

        self.config.retry.run("list_draws", move || store.list_draws()).await
    }
}
