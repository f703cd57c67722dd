use std::collections::HashSet;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use evlog::meta;

use crate::db::schema::{Draw, DrawType, DrawTypeId, NewDrawType, Schedule};
use crate::error::{Entity, LotteryError};
use crate::lottery::Lottery;
use crate::runtime::get_logger;

fn validate_schedule(schedule: &Schedule) -> Result<(), LotteryError> {
    if matches!(schedule.weekday, Some(w) if w > 6) {
        return Err(LotteryError::validation("schedule", "weekday must be between 0 (Monday) and 6 (Sunday)"));
    }
    if matches!(schedule.month, Some(m) if !(1..=12).contains(&m)) {
        return Err(LotteryError::validation("schedule", "month must be between 1 and 12"));
    }
    if matches!(schedule.day, Some(d) if !(1..=31).contains(&d)) {
        return Err(LotteryError::validation("schedule", "day must be between 1 and 31"));
    }

    Ok(())
}

fn validate_draw_type(new: &NewDrawType) -> Result<(), LotteryError> {
    if new.name.trim().is_empty() {
        return Err(LotteryError::validation("name", "draw type name must not be empty"));
    }

    if new.tiers.is_empty() {
        return Err(LotteryError::validation("tiers", "a draw type needs at least one prize tier"));
    }

    let mut names = HashSet::new();
    for tier in &new.tiers {
        if tier.name.trim().is_empty() {
            return Err(LotteryError::validation("tiers", "tier names must not be empty"));
        }
        if tier.count < 1 {
            return Err(LotteryError::validation("tiers", format!("tier '{}' must award at least one prize", tier.name)));
        }
        if tier.amount <= 0 {
            return Err(LotteryError::validation("tiers", format!("tier '{}' must have a positive amount", tier.name)));
        }
        if !names.insert(tier.name.as_str()) {
            return Err(LotteryError::validation("tiers", format!("tier '{}' appears more than once", tier.name)));
        }
    }

    validate_schedule(&new.schedule)
}

/// The active draw type with the highest position whose schedule matches.
/// `types` must be ordered by descending position.
pub fn type_for_date(types: &[DrawType], date: NaiveDate) -> Option<&DrawType> {
    types.iter().find(|t| t.is_active && t.schedule.matches(date))
}

impl Lottery {
    pub async fn add_draw_type(&self, new: NewDrawType) -> Result<DrawType, LotteryError> {
        validate_draw_type(&new)?;

        let store = self.store.as_ref();
        let new = &new;
        let draw_type = self.config.retry
            .run("add_draw_type", move || store.add_draw_type(new))
            .await?;

        get_logger().info("Draw type created.", meta! {
            "DrawTypeID" => draw_type.id,
            "Name" => draw_type.name.clone(),
            "Tiers" => draw_type.tiers.len(),
        });

        Ok(draw_type)
    }

    pub async fn draw_types(&self) -> Result<Vec<DrawType>, LotteryError> {
        let store = self.store.as_ref();

        self.config.retry.run("list_draw_types", move || store.list_draw_types()).await
    }

    pub async fn create_draw(&self, draw_type: DrawTypeId, scheduled_at: DateTime<Utc>) -> Result<Draw, LotteryError> {
        let now = Utc::now();
        if scheduled_at <= now {
            return Err(LotteryError::validation("scheduled_at", "draws must be scheduled in the future"));
        }

        let store = self.store.as_ref();
        let draw_type = self.config.retry
            .run("get_draw_type", move || store.get_draw_type(draw_type))
            .await?
            .ok_or_else(|| LotteryError::not_found(Entity::DrawType, draw_type))?;

        let dt = &draw_type;
        let draw = self.config.retry
            .run("add_draw", move || store.add_draw(dt, scheduled_at, now))
            .await?;

        get_logger().info("Draw scheduled.", meta! {
            "DrawID" => draw.id,
            "DrawType" => draw.draw_type_name.clone(),
            "ScheduledAt" => draw.scheduled_at,
        });

        Ok(draw)
    }

    fn draw_time(&self, date: NaiveDate) -> Result<DateTime<Utc>, LotteryError> {
        let naive = date.and_hms_opt(self.config.draw_hour, 0, 0)
            .ok_or_else(|| LotteryError::validation("draw_hour", format!("{} is not an hour of the day", self.config.draw_hour)))?;

        Ok(Utc.from_utc_datetime(&naive))
    }

    /// Returns the draw on `date`, creating one of the matching draw type if
    /// there is none yet. `None` when no active type matches the date.
    pub async fn schedule_draw(&self, date: NaiveDate) -> Result<Option<Draw>, LotteryError> {
        if let Some(existing) = self.load_draws().await?.into_iter().find(|d| d.date == date) {
            return Ok(Some(existing));
        }

        let types = self.draw_types().await?;
        let draw_type = match type_for_date(&types, date) {
            None => {
                get_logger().debug("No draw type matches date.", meta! {
                    "Date" => date,
                });
                return Ok(None);
            }
            Some(v) => v,
        };

        let at = self.draw_time(date)?;
        match self.create_draw(draw_type.id, at).await {
            Ok(draw) => Ok(Some(draw)),
            // Someone else scheduled the date first.
            Err(LotteryError::Validation { field: "date", .. }) => {
                Ok(self.load_draws().await?.into_iter().find(|d| d.date == date))
            }
            Err(e) => Err(e),
        }
    }

    pub async fn ensure_upcoming_draws(&self, now: DateTime<Utc>, days: u32) -> Result<Vec<Draw>, LotteryError> {
        let today = now.date_naive();
        let mut draws = Vec::new();

        for offset in 0..days as i64 {
            let date = today + Duration::days(offset);
            if self.draw_time(date)? <= now {
                continue;
            }

            if let Some(draw) = self.schedule_draw(date).await? {
                draws.push(draw);
            }
        }

        Ok(draws)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Datelike, Duration, NaiveDate, Utc};

    use super::*;
    use crate::db::schema::PrizeTier;
    use crate::lottery::testing::{grand_prize, lottery, new_draw_type};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    async fn calendar() -> Vec<DrawType> {
        let lottery = lottery();
        lottery.add_draw_type(new_draw_type("Daily", 0, Schedule::default())).await.unwrap();
        lottery.add_draw_type(new_draw_type("Friday Special", 1, Schedule::weekly(4))).await.unwrap();
        lottery.add_draw_type(new_draw_type("New Year's Eve", 2, Schedule::yearly(12, 31))).await.unwrap();
        lottery.draw_types().await.unwrap()
    }

    #[tokio::test]
    async fn highest_matching_type_wins() {
        let types = calendar().await;

        assert_eq!(type_for_date(&types, date(2025, 12, 31)).unwrap().name, "New Year's Eve");
        assert_eq!(type_for_date(&types, date(2025, 7, 25)).unwrap().name, "Friday Special");
        assert_eq!(type_for_date(&types, date(2025, 7, 28)).unwrap().name, "Daily");
    }

    #[tokio::test]
    async fn inactive_types_are_skipped() {
        let mut types = calendar().await;
        for t in types.iter_mut().filter(|t| t.name == "Friday Special") {
            t.is_active = false;
        }

        assert_eq!(type_for_date(&types, date(2025, 7, 25)).unwrap().name, "Daily");
        assert!(type_for_date(&[], date(2025, 7, 25)).is_none());
    }

    #[tokio::test]
    async fn malformed_draw_types_are_rejected() {
        let lottery = lottery();

        let mut zero_count = new_draw_type("Broken", 0, Schedule::default());
        zero_count.tiers = vec![PrizeTier::new("Grand Prize", 1000, 0)];
        let mut free_prize = new_draw_type("Broken", 0, Schedule::default());
        free_prize.tiers = vec![PrizeTier::new("Grand Prize", 0, 1)];
        let mut duplicate = new_draw_type("Broken", 0, Schedule::default());
        duplicate.tiers = vec![PrizeTier::new("Prize", 10, 1), PrizeTier::new("Prize", 5, 1)];
        let bad_weekday = new_draw_type("Broken", 0, Schedule::weekly(7));
        let unnamed = new_draw_type("  ", 0, Schedule::default());

        for new in [zero_count, free_prize, duplicate, bad_weekday, unnamed] {
            assert!(matches!(lottery.add_draw_type(new).await, Err(LotteryError::Validation { .. })));
        }
        assert!(lottery.draw_types().await.unwrap().is_empty());

        lottery.add_draw_type(new_draw_type("Daily", 0, Schedule::default())).await.unwrap();
        assert!(matches!(
            lottery.add_draw_type(new_draw_type("Daily", 3, Schedule::default())).await,
            Err(LotteryError::Validation { field: "name", .. })
        ));
    }

    #[tokio::test]
    async fn draws_freeze_the_prize_schedule() {
        let lottery = lottery();
        let t = lottery.add_draw_type(new_draw_type("Daily", 0, Schedule::default())).await.unwrap();

        let draw = lottery.create_draw(t.id, Utc::now() + Duration::days(1)).await.unwrap();
        assert_eq!(draw.tiers, grand_prize());
        assert_eq!(draw.draw_type_name, "Daily");
        assert!(!draw.is_closed());

        assert!(matches!(
            lottery.create_draw(t.id, Utc::now() - Duration::hours(1)).await,
            Err(LotteryError::Validation { field: "scheduled_at", .. })
        ));
        assert!(matches!(
            lottery.create_draw(t.id + 10, Utc::now() + Duration::days(1)).await,
            Err(LotteryError::NotFound { entity: Entity::DrawType, .. })
        ));
    }

    #[tokio::test]
    async fn schedule_draw_is_idempotent_per_date() {
        let lottery = lottery();
        lottery.add_draw_type(new_draw_type("Daily", 0, Schedule::default())).await.unwrap();
        let day = Utc::now().date_naive() + Duration::days(3);

        let first = lottery.schedule_draw(day).await.unwrap().unwrap();
        let second = lottery.schedule_draw(day).await.unwrap().unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.date, day);
        assert_eq!(first.scheduled_at, lottery.draw_time(day).unwrap());
    }

    #[tokio::test]
    async fn schedule_draw_without_matching_type_creates_nothing() {
        let lottery = lottery();
        lottery.add_draw_type(new_draw_type("New Year's Eve", 0, Schedule::yearly(12, 31))).await.unwrap();

        let mut day = Utc::now().date_naive() + Duration::days(1);
        if day.month() == 12 && day.day() == 31 {
            day = day + Duration::days(1);
        }

        assert!(lottery.schedule_draw(day).await.unwrap().is_none());
        assert!(lottery.open_draws().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn upcoming_draws_cover_the_window() {
        let lottery = lottery();
        lottery.add_draw_type(new_draw_type("Daily", 0, Schedule::default())).await.unwrap();
        let now = Utc::now();

        let draws = lottery.ensure_upcoming_draws(now, 7).await.unwrap();
        assert!(draws.len() == 6 || draws.len() == 7);
        assert!(draws.iter().all(|d| d.scheduled_at > now));

        let again = lottery.ensure_upcoming_draws(now, 7).await.unwrap();
        assert_eq!(
            draws.iter().map(|d| d.id).collect::<Vec<_>>(),
            again.iter().map(|d| d.id).collect::<Vec<_>>()
        );
    }
}
