use evlog::meta;

use crate::db::schema::{NewDrawType, PrizeTier, Schedule};
use crate::error::LotteryError;
use crate::lottery::Lottery;
use crate::runtime::get_logger;

pub fn default_draw_types() -> Vec<NewDrawType> {
    vec![
        NewDrawType {
            name: "Daily Draw".to_owned(),
            position: 0,
            is_active: true,
            schedule: Schedule::default(),
            tiers: vec![
                PrizeTier::new("First Prize", 1000, 1),
                PrizeTier::new("Second Prize", 500, 2),
                PrizeTier::new("Third Prize", 250, 3),
            ],
        },
        NewDrawType {
            name: "Weekly Draw".to_owned(),
            position: 1,
            is_active: true,
            schedule: Schedule::weekly(5),
            tiers: vec![
                PrizeTier::new("Jackpot", 5000, 1),
                PrizeTier::new("Runner Up", 1000, 2),
                PrizeTier::new("Consolation", 100, 5),
            ],
        },
    ]
}

pub async fn seed_draw_types(lottery: &Lottery) -> Result<usize, LotteryError> {
    let existing = lottery.draw_types().await?;
    let mut added = 0;

    for new in default_draw_types() {
        if existing.iter().any(|t| t.name == new.name) {
            get_logger().debug("Draw type already present; not seeding.", meta! {
                "Name" => new.name,
            });
            continue;
        }

        lottery.add_draw_type(new).await?;
        added += 1;
    }

    Ok(added)
}
