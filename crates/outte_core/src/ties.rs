use std::cmp::Reverse;

use crate::score::Rankable;

/// An entry with its position on the board and the position of its tie group.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolved<T> {
    pub item: T,
    pub rank: u32,
    pub tied_rank: u32,
}

/// Orders entries best-first and assigns dense and tie-collapsed ranks.
///
/// Higher scores rank first; among equal scores the lower (older) replay id wins.
/// `tied_rank` is the rank of the first entry sharing the same score.
pub fn resolve<T: Rankable>(mut entries: Vec<T>) -> Vec<Resolved<T>> {
    entries.sort_by_key(|entry| (Reverse(entry.score()), entry.replay_id()));

    let mut resolved: Vec<Resolved<T>> = Vec::with_capacity(entries.len());
    for (index, item) in entries.into_iter().enumerate() {
        let rank = index as u32;
        let tied_rank = match resolved.last() {
            Some(prev) if prev.item.score() == item.score() => prev.tied_rank,
            _ => rank,
        };
        resolved.push(Resolved {
            item,
            rank,
            tied_rank,
        });
    }
    resolved
}
