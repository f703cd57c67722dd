use rand::seq::SliceRandom;
use rand::Rng;

use crate::db::schema::{Ballot, PrizeTier, Winner};
use crate::db::WinnerPicker;

/// Shuffles the pool once and hands out consecutive slices of it, tier by tier
/// in schedule order. A ballot therefore wins at most once per draw, and each
/// tier gets `min(count, remaining)` winners.
pub fn pick_winners<R: Rng + ?Sized>(tiers: &[PrizeTier], pool: &[Ballot], rng: &mut R) -> Vec<Winner> {
    let mut shuffled = pool.iter().collect::<Vec<_>>();
    shuffled.shuffle(rng);

    let mut remaining = shuffled.as_slice();
    let mut winners = Vec::new();

    for tier in tiers {
        let take = (tier.count as usize).min(remaining.len());
        let (chosen, rest) = remaining.split_at(take);

        winners.extend(chosen.iter().map(|b| Winner {
            id_ballot: b.id,
            id_owner: b.id_owner,
            tier: tier.name.clone(),
            amount: tier.amount,
        }));
        remaining = rest;
    }

    winners
}

pub struct RandomPicker;

impl WinnerPicker for RandomPicker {
    fn pick(&self, tiers: &[PrizeTier], pool: &[Ballot]) -> Vec<Winner> {
        pick_winners(tiers, pool, &mut rand::thread_rng())
    }
}
