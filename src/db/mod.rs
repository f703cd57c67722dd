use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::db::schema::{Ballot, BallotId, BallotState, Draw, DrawId, DrawType, DrawTypeId, NewDrawType, PrizeTier, UserId, Winner};
use crate::error::{Entity, LotteryError};

pub mod dbclient;
pub mod memory;
pub mod model;
pub mod schema;

/// Chooses the winners of a draw from its candidate pool. Called by the store
/// while it holds the draw exclusively, so it must not block.
pub trait WinnerPicker: Send + Sync {
    fn pick(&self, tiers: &[PrizeTier], pool: &[Ballot]) -> Vec<Winner>;
}

/// Storage for draw types, draws and ballots.
///
/// Implementations own the atomicity guarantees: a ballot transition is a
/// check-and-set on that ballot, and closing a draw excludes concurrent
/// assignments to the same draw without touching other draws.
#[async_trait]
pub trait LotteryStore: Send + Sync {
    async fn add_draw_type(&self, new: &NewDrawType) -> Result<DrawType, LotteryError>;

    /// Ordered by descending `position`.
    async fn list_draw_types(&self) -> Result<Vec<DrawType>, LotteryError>;

    async fn get_draw_type(&self, id: DrawTypeId) -> Result<Option<DrawType>, LotteryError>;

    /// Freezes the type's name and tiers onto the new draw. One draw per date.
    async fn add_draw(&self, draw_type: &DrawType, scheduled_at: DateTime<Utc>, now: DateTime<Utc>) -> Result<Draw, LotteryError>;

    async fn get_draw(&self, id: DrawId) -> Result<Option<Draw>, LotteryError>;

    /// Ordered by ascending schedule.
    async fn list_draws(&self) -> Result<Vec<Draw>, LotteryError>;

    /// Creates all `quantity` ballots or none. Repeating a call with the same
    /// `key` returns the ballots of the first call instead of creating more.
    async fn add_ballots(&self, owner: UserId, quantity: u32, key: &str, now: DateTime<Utc>) -> Result<Vec<Ballot>, LotteryError>;

    async fn get_ballot(&self, id: BallotId) -> Result<Option<Ballot>, LotteryError>;

    /// Ordered by ascending id.
    async fn list_user_ballots(&self, owner: UserId) -> Result<Vec<Ballot>, LotteryError>;

    /// `unassigned → assigned`, checked in order: ownership, ballot state,
    /// draw open.
    async fn assign_ballot(&self, owner: UserId, ballot: BallotId, draw: DrawId, now: DateTime<Utc>) -> Result<Ballot, LotteryError>;

    /// Resolves every ballot assigned to the draw and closes it, all at once.
    /// Fails with `AlreadyClosed` if the draw was closed before.
    async fn close_draw(&self, draw: DrawId, now: DateTime<Utc>, picker: &dyn WinnerPicker) -> Result<Draw, LotteryError>;
}

pub(crate) fn check_ballot_assignable(ballot: &Ballot, owner: UserId) -> Result<(), LotteryError> {
    if ballot.id_owner != owner {
        return Err(LotteryError::Forbidden { ballot: ballot.id });
    }

    if ballot.state != BallotState::Unassigned {
        return Err(LotteryError::InvalidState {
            ballot: ballot.id,
            state: ballot.state,
        });
    }

    Ok(())
}

pub(crate) fn check_draw_accepts(draw: &Draw, now: DateTime<Utc>) -> Result<(), LotteryError> {
    if !draw.accepts_ballots(now) {
        return Err(LotteryError::DrawClosed { draw: draw.id });
    }

    Ok(())
}

pub(crate) fn missing_ballot(id: BallotId) -> LotteryError {
    LotteryError::not_found(Entity::Ballot, id)
}

pub(crate) fn missing_draw(id: DrawId) -> LotteryError {
    LotteryError::not_found(Entity::Draw, id)
}
