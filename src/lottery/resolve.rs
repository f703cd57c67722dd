use chrono::Utc;
use evlog::meta;

use crate::db::schema::{Draw, DrawId, Winner};
use crate::error::LotteryError;
use crate::lottery::Lottery;
use crate::notify::notify_winners;
use crate::runtime::get_logger;

#[derive(Clone, Debug)]
pub enum Resolution {
    Closed(Draw),
    AlreadyClosed(Draw),
}

impl Resolution {
    pub fn draw(&self) -> &Draw {
        match self {
            Resolution::Closed(d) | Resolution::AlreadyClosed(d) => d,
        }
    }

    pub fn winners(&self) -> &[Winner] {
        self.draw().winners()
    }

    pub fn is_fresh(&self) -> bool {
        matches!(self, Resolution::Closed(_))
    }
}

impl Lottery {
    pub async fn resolve(&self, draw: DrawId) -> Result<Resolution, LotteryError> {
        let now = Utc::now();
        let store = self.store.as_ref();
        let picker = self.picker.as_ref();

        let closed = self.config.retry
            .run("close_draw", move || store.close_draw(draw, now, picker))
            .await;

        match closed {
            Ok(closed) => {
                get_logger().info("Lottery draw closed.", meta! {
                    "DrawID" => closed.id,
                    "DrawType" => closed.draw_type_name.clone(),
                    "Entries" => closed.entries,
                    "Winners" => closed.winners().len(),
                    "Awarded" => closed.total_awarded(),
                });

                notify_winners(self.notifier.as_ref(), &closed).await;

                Ok(Resolution::Closed(closed))
            }
            Err(LotteryError::AlreadyClosed { .. }) => {
                get_logger().info("Lottery draw already closed.", meta! {
                    "DrawID" => draw,
                });

                Ok(Resolution::AlreadyClosed(self.load_draw(draw).await?))
            }
            Err(e) => {
                get_logger().error("Failed to close lottery draw.", meta! {
                    "DrawID" => draw,
                    "Error" => e.to_string(),
                });

                Err(e)
            }
        }
    }
}
