use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::db::schema::{Ballot, BallotId, BallotState, Draw, DrawId, DrawType, DrawTypeId, NewDrawType, Outcome, UserId, Winner};
use crate::db::{check_ballot_assignable, check_draw_accepts, missing_ballot, missing_draw, LotteryStore, WinnerPicker};
use crate::error::LotteryError;

struct DrawSlot {
    /// Shared by assignments, exclusive for resolution.
    draw: RwLock<Draw>,
    pool: Mutex<Vec<BallotId>>,
}

/// In-process store. Unrelated ballots and draws never contend: ballots are
/// guarded by their `DashMap` shard and each draw by its own lock.
#[derive(Default)]
pub struct MemoryStore {
    next_draw_type: AtomicI64,
    next_draw: AtomicI64,
    next_ballot: AtomicI64,
    draw_types: DashMap<DrawTypeId, DrawType>,
    draw_type_names: DashMap<String, DrawTypeId>,
    draws: DashMap<DrawId, Arc<DrawSlot>>,
    draw_dates: DashMap<NaiveDate, DrawId>,
    ballots: DashMap<BallotId, Ballot>,
    purchases: DashMap<String, Vec<BallotId>>,
}

fn poisoned() -> LotteryError {
    LotteryError::internal("draw lock poisoned")
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, id: DrawId) -> Option<Arc<DrawSlot>> {
        self.draws.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    fn read_draw(&self, slot: &DrawSlot) -> Result<Draw, LotteryError> {
        let mut draw = slot.draw.read().map_err(|_| poisoned())?.clone();
        draw.entries = slot.pool.lock().map_err(|_| poisoned())?.len() as u64;
        Ok(draw)
    }

    fn insert_draw_type(&self, new: &NewDrawType) -> Result<DrawType, LotteryError> {
        let id = match self.draw_type_names.entry(new.name.clone()) {
            Entry::Occupied(_) => {
                return Err(LotteryError::validation("name", format!("a draw type named '{}' already exists", new.name)));
            }
            Entry::Vacant(vacant) => {
                let id = self.next_draw_type.fetch_add(1, Ordering::SeqCst) + 1;
                vacant.insert(id);
                id
            }
        };

        let draw_type = DrawType {
            id,
            name: new.name.clone(),
            position: new.position,
            is_active: new.is_active,
            schedule: new.schedule.clone(),
            tiers: new.tiers.clone(),
        };
        self.draw_types.insert(draw_type.id, draw_type.clone());

        Ok(draw_type)
    }

    fn insert_draw(&self, draw_type: &DrawType, scheduled_at: DateTime<Utc>, now: DateTime<Utc>) -> Result<Draw, LotteryError> {
        let date = scheduled_at.date_naive();

        let id = match self.draw_dates.entry(date) {
            Entry::Occupied(_) => {
                return Err(LotteryError::validation("date", format!("a draw is already scheduled on {}", date)));
            }
            Entry::Vacant(vacant) => {
                let id = self.next_draw.fetch_add(1, Ordering::SeqCst) + 1;
                vacant.insert(id);
                id
            }
        };

        let draw = Draw {
            id,
            id_draw_type: draw_type.id,
            draw_type_name: draw_type.name.clone(),
            tiers: draw_type.tiers.clone(),
            date,
            scheduled_at,
            time_created: now,
            time_closed: None,
            winners: None,
            entries: 0,
        };

        self.draws.insert(id, Arc::new(DrawSlot {
            draw: RwLock::new(draw.clone()),
            pool: Mutex::new(Vec::new()),
        }));

        Ok(draw)
    }

    fn insert_ballots(&self, owner: UserId, quantity: u32, key: &str, now: DateTime<Utc>) -> Result<Vec<Ballot>, LotteryError> {
        // The key's shard stays locked until the ballots exist, so a repeat
        // with the same key waits and then sees them.
        let vacant = match self.purchases.entry(key.to_owned()) {
            Entry::Occupied(done) => return self.purchased_ballots(owner, done.get()),
            Entry::Vacant(vacant) => vacant,
        };

        let first = self.next_ballot.fetch_add(quantity as i64, Ordering::SeqCst) + 1;

        let ballots = (0..quantity as i64)
            .map(|i| Ballot {
                id: first + i,
                id_owner: owner,
                time_created: now,
                state: BallotState::Unassigned,
                id_draw: None,
                outcome: None,
            })
            .collect::<Vec<_>>();

        for ballot in &ballots {
            self.ballots.insert(ballot.id, ballot.clone());
        }
        vacant.insert(ballots.iter().map(|b| b.id).collect());

        Ok(ballots)
    }

    fn purchased_ballots(&self, owner: UserId, ids: &[BallotId]) -> Result<Vec<Ballot>, LotteryError> {
        let ballots = ids.iter()
            .filter_map(|id| self.ballots.get(id).map(|entry| entry.value().clone()))
            .collect::<Vec<_>>();

        if ballots.iter().any(|b| b.id_owner != owner) {
            return Err(LotteryError::validation("purchase_key", "purchase key belongs to another user"));
        }

        Ok(ballots)
    }

    fn assign(&self, owner: UserId, ballot_id: BallotId, draw_id: DrawId, now: DateTime<Utc>) -> Result<Ballot, LotteryError> {
        let current = self.ballots.get(&ballot_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| missing_ballot(ballot_id))?;
        check_ballot_assignable(&current, owner)?;

        let slot = self.slot(draw_id).ok_or_else(|| missing_draw(draw_id))?;
        let draw = slot.draw.read().map_err(|_| poisoned())?;
        check_draw_accepts(&draw, now)?;

        let assigned = {
            let mut entry = self.ballots.get_mut(&ballot_id).ok_or_else(|| missing_ballot(ballot_id))?;
            let ballot = entry.value_mut();
            check_ballot_assignable(ballot, owner)?;

            ballot.state = BallotState::Assigned;
            ballot.id_draw = Some(draw_id);
            ballot.clone()
        };

        slot.pool.lock().map_err(|_| poisoned())?.push(ballot_id);

        Ok(assigned)
    }

    fn close(&self, draw_id: DrawId, now: DateTime<Utc>, picker: &dyn WinnerPicker) -> Result<Draw, LotteryError> {
        let slot = self.slot(draw_id).ok_or_else(|| missing_draw(draw_id))?;
        let mut draw = slot.draw.write().map_err(|_| poisoned())?;
        if draw.is_closed() {
            return Err(LotteryError::AlreadyClosed { draw: draw_id });
        }

        let pool_ids = slot.pool.lock().map_err(|_| poisoned())?.clone();
        let pool = pool_ids.iter()
            .filter_map(|id| self.ballots.get(id).map(|entry| entry.value().clone()))
            .filter(|b| b.state == BallotState::Assigned && b.id_draw == Some(draw_id))
            .collect::<Vec<_>>();

        let winners = picker.pick(&draw.tiers, &pool);
        let prizes = winners.iter()
            .map(|w| (w.id_ballot, w))
            .collect::<HashMap<BallotId, &Winner>>();

        // Nothing below can fail, so either every ballot and the draw change or
        // none of them do.
        for ballot in &pool {
            if let Some(mut entry) = self.ballots.get_mut(&ballot.id) {
                let outcome = match prizes.get(&ballot.id) {
                    Some(w) => Outcome::Prize {
                        tier: w.tier.clone(),
                        amount: w.amount,
                    },
                    None => Outcome::NoPrize,
                };

                let ballot = entry.value_mut();
                ballot.state = BallotState::Resolved;
                ballot.outcome = Some(outcome);
            }
        }

        draw.time_closed = Some(now);
        draw.winners = Some(winners);

        let mut closed = draw.clone();
        closed.entries = pool.len() as u64;

        Ok(closed)
    }
}

#[async_trait]
impl LotteryStore for MemoryStore {
    async fn add_draw_type(&self, new: &NewDrawType) -> Result<DrawType, LotteryError> {
        self.insert_draw_type(new)
    }

    async fn list_draw_types(&self) -> Result<Vec<DrawType>, LotteryError> {
        let mut types = self.draw_types.iter()
            .map(|entry| entry.value().clone())
            .collect::<Vec<_>>();
        types.sort_by_key(|t| (-(t.position as i64), t.id));

        Ok(types)
    }

    async fn get_draw_type(&self, id: DrawTypeId) -> Result<Option<DrawType>, LotteryError> {
        Ok(self.draw_types.get(&id).map(|entry| entry.value().clone()))
    }

    async fn add_draw(&self, draw_type: &DrawType, scheduled_at: DateTime<Utc>, now: DateTime<Utc>) -> Result<Draw, LotteryError> {
        self.insert_draw(draw_type, scheduled_at, now)
    }

    async fn get_draw(&self, id: DrawId) -> Result<Option<Draw>, LotteryError> {
        match self.slot(id) {
            None => Ok(None),
            Some(slot) => self.read_draw(&slot).map(Some),
        }
    }

    async fn list_draws(&self) -> Result<Vec<Draw>, LotteryError> {
        let slots = self.draws.iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect::<Vec<_>>();

        let mut draws = Vec::with_capacity(slots.len());
        for slot in &slots {
            draws.push(self.read_draw(slot)?);
        }
        draws.sort_by_key(|d| (d.scheduled_at, d.id));

        Ok(draws)
    }

    async fn add_ballots(&self, owner: UserId, quantity: u32, key: &str, now: DateTime<Utc>) -> Result<Vec<Ballot>, LotteryError> {
        self.insert_ballots(owner, quantity, key, now)
    }

    async fn get_ballot(&self, id: BallotId) -> Result<Option<Ballot>, LotteryError> {
        Ok(self.ballots.get(&id).map(|entry| entry.value().clone()))
    }

    async fn list_user_ballots(&self, owner: UserId) -> Result<Vec<Ballot>, LotteryError> {
        let mut ballots = self.ballots.iter()
            .filter(|entry| entry.value().id_owner == owner)
            .map(|entry| entry.value().clone())
            .collect::<Vec<_>>();
        ballots.sort_by_key(|b| b.id);

        Ok(ballots)
    }

    async fn assign_ballot(&self, owner: UserId, ballot: BallotId, draw: DrawId, now: DateTime<Utc>) -> Result<Ballot, LotteryError> {
        self.assign(owner, ballot, draw, now)
    }

    async fn close_draw(&self, draw: DrawId, now: DateTime<Utc>, picker: &dyn WinnerPicker) -> Result<Draw, LotteryError> {
        self.close(draw, now, picker)
    }
}
