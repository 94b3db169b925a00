//! Separation-of-duties eligibility and random selection.
//!
//! One predicate decides who may adjudicate an appeal; both resolver and
//! board assignment go through it, so the exclusion rules cannot drift
//! apart. Selection is a filtered uniform random sample over the eligible
//! pool, never iteration with scattered exclusion checks.

use rand::Rng;
use rand::seq::SliceRandom;

use super::state::Appeal;

/// Whether the candidate may adjudicate the appeal.
///
/// Excluded: the appellant, the original reporter, and every actor
/// referenced as subject of the disputed action.
#[must_use]
pub fn is_eligible(appeal: &Appeal, candidate: &str) -> bool {
    !candidate.is_empty() && !appeal.barred_actors().contains(candidate)
}

/// Filters a candidate pool down to the eligible, deduplicated actors.
///
/// Deduplication keeps the sample uniform: a candidate listed twice would
/// otherwise be drawn twice as often.
#[must_use]
pub fn eligible_pool<'a>(appeal: &Appeal, candidates: &'a [String]) -> Vec<&'a str> {
    let mut pool: Vec<&str> = candidates
        .iter()
        .map(String::as_str)
        .filter(|c| is_eligible(appeal, c))
        .collect();
    pool.sort_unstable();
    pool.dedup();
    pool
}

/// Draws one eligible resolver uniformly at random.
///
/// Returns `None` if the eligible pool is empty.
#[must_use]
pub fn select_resolver<R: Rng + ?Sized>(
    appeal: &Appeal,
    candidates: &[String],
    rng: &mut R,
) -> Option<String> {
    let pool = eligible_pool(appeal, candidates);
    pool.choose(rng).map(|&s| s.to_string())
}

/// Draws `size` distinct eligible board members uniformly at random,
/// never overlapping the resolver.
///
/// # Errors
///
/// Returns the number of available candidates if fewer than `size` eligible
/// candidates remain.
pub fn select_board<R: Rng + ?Sized>(
    appeal: &Appeal,
    candidates: &[String],
    size: usize,
    rng: &mut R,
) -> Result<Vec<String>, usize> {
    let pool: Vec<&str> = eligible_pool(appeal, candidates)
        .into_iter()
        .filter(|&c| appeal.resolver_id.as_deref() != Some(c))
        .collect();

    if pool.len() < size {
        return Err(pool.len());
    }

    let mut board: Vec<String> = pool
        .choose_multiple(rng, size)
        .map(|&s| s.to_string())
        .collect();
    board.sort_unstable();
    Ok(board)
}
