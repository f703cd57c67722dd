use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::db::memory::MemoryStore;
use crate::db::schema::{Ballot, BallotId, Draw, DrawId, DrawType, DrawTypeId, NewDrawType, PrizeTier, Schedule, UserId, Winner};
use crate::db::{LotteryStore, WinnerPicker};
use crate::error::LotteryError;
use crate::lottery::selection::pick_winners;
use crate::lottery::{Lottery, LotteryConfig};
use crate::notify::LogNotifier;
use crate::support::payment::PaymentDetails;
use crate::support::retry::RetryPolicy;

pub struct SeededPicker {
    rng: Mutex<StdRng>,
}

impl SeededPicker {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl WinnerPicker for SeededPicker {
    fn pick(&self, tiers: &[PrizeTier], pool: &[Ballot]) -> Vec<Winner> {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        pick_winners(tiers, pool, &mut *rng)
    }
}

pub fn lottery() -> Lottery {
    Lottery::new(
        Arc::new(MemoryStore::new()),
        Arc::new(SeededPicker::new(7)),
        Arc::new(LogNotifier),
        LotteryConfig::default(),
    )
}

pub fn lottery_over(store: impl LotteryStore + 'static) -> Lottery {
    let config = LotteryConfig {
        retry: RetryPolicy {
            attempts: 3,
            backoff: std::time::Duration::from_millis(1),
        },
        ..LotteryConfig::default()
    };

    Lottery::new(Arc::new(store), Arc::new(SeededPicker::new(7)), Arc::new(LogNotifier), config)
}

/// Commits the first purchase and the first assignment, then reports each as
/// unavailable, as if the connection dropped before the reply.
pub struct LostAckStore {
    inner: MemoryStore,
    purchase_lost: AtomicBool,
    assignment_lost: AtomicBool,
}

impl LostAckStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            purchase_lost: AtomicBool::new(false),
            assignment_lost: AtomicBool::new(false),
        }
    }
}

fn lost_ack(already_lost: &AtomicBool) -> Option<LotteryError> {
    if already_lost.swap(true, Ordering::SeqCst) {
        None
    } else {
        Some(LotteryError::Unavailable(anyhow::anyhow!("connection closed before reply")))
    }
}

#[async_trait]
impl LotteryStore for LostAckStore {
    async fn add_draw_type(&self, new: &NewDrawType) -> Result<DrawType, LotteryError> {
        self.inner.add_draw_type(new).await
    }

    async fn list_draw_types(&self) -> Result<Vec<DrawType>, LotteryError> {
        self.inner.list_draw_types().await
    }

    async fn get_draw_type(&self, id: DrawTypeId) -> Result<Option<DrawType>, LotteryError> {
        self.inner.get_draw_type(id).await
    }

    async fn add_draw(&self, draw_type: &DrawType, scheduled_at: DateTime<Utc>, now: DateTime<Utc>) -> Result<Draw, LotteryError> {
        self.inner.add_draw(draw_type, scheduled_at, now).await
    }

    async fn get_draw(&self, id: DrawId) -> Result<Option<Draw>, LotteryError> {
        self.inner.get_draw(id).await
    }

    async fn list_draws(&self) -> Result<Vec<Draw>, LotteryError> {
        self.inner.list_draws().await
    }

    async fn add_ballots(&self, owner: UserId, quantity: u32, key: &str, now: DateTime<Utc>) -> Result<Vec<Ballot>, LotteryError> {
        let ballots = self.inner.add_ballots(owner, quantity, key, now).await?;

        match lost_ack(&self.purchase_lost) {
            Some(e) => Err(e),
            None => Ok(ballots),
        }
    }

    async fn get_ballot(&self, id: BallotId) -> Result<Option<Ballot>, LotteryError> {
        self.inner.get_ballot(id).await
    }

    async fn list_user_ballots(&self, owner: UserId) -> Result<Vec<Ballot>, LotteryError> {
        self.inner.list_user_ballots(owner).await
    }

    async fn assign_ballot(&self, owner: UserId, ballot: BallotId, draw: DrawId, now: DateTime<Utc>) -> Result<Ballot, LotteryError> {
        let assigned = self.inner.assign_ballot(owner, ballot, draw, now).await?;

        match lost_ack(&self.assignment_lost) {
            Some(e) => Err(e),
            None => Ok(assigned),
        }
    }

    async fn close_draw(&self, draw: DrawId, now: DateTime<Utc>, picker: &dyn WinnerPicker) -> Result<Draw, LotteryError> {
        self.inner.close_draw(draw, now, picker).await
    }
}

pub fn card() -> PaymentDetails {
    PaymentDetails {
        card_number: "4111 1111 1111 1111".to_owned(),
        expiry_month: 12,
        expiry_year: 2099,
        cvv: "123".to_owned(),
    }
}

pub fn grand_prize() -> Vec<PrizeTier> {
    vec![PrizeTier::new("Grand Prize", 1000, 1)]
}

pub fn new_draw_type(name: &str, position: i32, schedule: Schedule) -> NewDrawType {
    NewDrawType {
        name: name.to_owned(),
        position,
        is_active: true,
        schedule,
        tiers: grand_prize(),
    }
}

pub async fn open_draw(lottery: &Lottery, name: &str, tiers: Vec<PrizeTier>, days_ahead: i64) -> Draw {
    let mut new = new_draw_type(name, 0, Schedule::default());
    new.tiers = tiers;

    let draw_type = lottery.add_draw_type(new).await.unwrap();
    lottery.create_draw(draw_type.id, Utc::now() + Duration::days(days_ahead)).await.unwrap()
}
