//! Candidate arbitrage cycles and sandwich routes around a victim's swaps.
//!
//! Link pools are chosen by observed depth: the pool holding the most of the
//! flash-loan token wins. The victim's own pool is never used as a link.

use alloy::primitives::{Address, U256};
use tracing::debug;

use super::builder::PoolIndex;
use crate::types::{Path, SwapEvent};

/// Token pairs whose pools an arbitrage search needs indexed
pub fn arbitrage_link_pairs(events: &[SwapEvent], wrapped: Address) -> Vec<(Address, Address)> {
    let mut pairs = Vec::new();
    for event in events {
        if event.touches(wrapped) {
            pairs.push((event.token_in, event.token_out));
        } else {
            pairs.push((wrapped, event.token_out));
            pairs.push((event.token_in, wrapped));
            pairs.push((event.token_in, event.token_out));
        }
    }
    dedup_pairs(pairs)
}

/// Token pairs whose pools a sandwich search needs indexed
pub fn sandwich_link_pairs(events: &[SwapEvent], wrapped: Address) -> Vec<(Address, Address)> {
    dedup_pairs(
        events
            .iter()
            .filter(|e| e.token_in != wrapped)
            .map(|e| (wrapped, e.token_in))
            .collect(),
    )
}

fn dedup_pairs(pairs: Vec<(Address, Address)>) -> Vec<(Address, Address)> {
    let mut out: Vec<(Address, Address)> = Vec::with_capacity(pairs.len());
    for (a, b) in pairs {
        let seen = out.iter().any(|(x, y)| (*x == a && *y == b) || (*x == b && *y == a));
        if !seen && a != b {
            out.push((a, b));
        }
    }
    out
}

/// Arbitrage cycles starting and ending on `wrapped`.
///
/// A victim trading the wrapped token yields a two-hop cycle through the
/// deepest other pool of the same pair. Any other victim swap `A -> B` yields
/// `W -> B -> A -> W` and `W -> A -> B -> A -> W` when the link pools exist.
pub fn find_arbitrage_paths(events: &[SwapEvent], index: &PoolIndex, wrapped: Address) -> Vec<Path> {
    let mut paths = Vec::new();

    for event in events {
        let victim = (event.dex, event.pool);
        if event.touches(wrapped) {
            let other = if event.token_in == wrapped { event.token_out } else { event.token_in };
            let Some(link) = index.deepest(wrapped, other, &[event.pool]) else {
                debug!("No link pool for {} beside {}", other, event.pool);
                continue;
            };
            let link = (link.dex, link.pool);
            if event.token_in == wrapped {
                // Buy where the victim did not, then sell into the pool the victim pushed
                paths.push(Path::new(event.amount_in, &[link, victim], vec![wrapped, other, wrapped]));
            } else {
                paths.push(Path::new(U256::ZERO, &[victim, link], vec![wrapped, other, wrapped]));
            }
            continue;
        }

        let (a, b) = (event.token_in, event.token_out);
        let exclude = [event.pool];

        let front = index.deepest(wrapped, b, &exclude);
        let back = index.deepest(wrapped, a, &exclude);
        if let (Some(front), Some(back)) = (front, back) {
            paths.push(Path::new(
                U256::ZERO,
                &[(front.dex, front.pool), victim, (back.dex, back.pool)],
                vec![wrapped, b, a, wrapped],
            ));
        }

        let (first, second) = index.deepest_two(wrapped, a, &exclude);
        let middle = index.deepest(a, b, &exclude);
        if let (Some(first), Some(second), Some(middle)) = (first, second, middle) {
            paths.push(Path::new(
                U256::ZERO,
                &[(first.dex, first.pool), (middle.dex, middle.pool), victim, (second.dex, second.pool)],
                vec![wrapped, a, b, a, wrapped],
            ));
        }
    }

    paths.retain(|p| p.is_valid() && p.is_cycle());
    paths
}

/// Sandwich routes ending in the victim's pool.
///
/// A victim selling the wrapped token is sandwiched directly on its pool;
/// otherwise the front-run first buys the victim's input token on the deepest
/// other wrapped pool.
pub fn find_sandwich_paths(events: &[SwapEvent], index: &PoolIndex, wrapped: Address) -> Vec<Path> {
    let mut paths = Vec::new();
    for event in events {
        let victim = (event.dex, event.pool);
        if event.token_in == wrapped {
            paths.push(Path::new(event.amount_in, &[victim], vec![wrapped, event.token_out]));
            continue;
        }
        match index.deepest(wrapped, event.token_in, &[event.pool]) {
            Some(front) => paths.push(Path::new(
                U256::ZERO,
                &[(front.dex, front.pool), victim],
                vec![wrapped, event.token_in, event.token_out],
            )),
            None => debug!("No front pool for {} beside {}", event.token_in, event.pool),
        }
    }
    paths.retain(Path::is_valid);
    paths
}
