use std::time::{Duration, Instant};

use alloy::primitives::U256;
use mev_engine::simulation::{IteratorSettings, SimulationIterator};

/// Drives the iterator with `output` until it stops; returns the amounts tried
fn drive(mut iterator: SimulationIterator, output: impl Fn(U256) -> U256) -> Vec<U256> {
    let mut tried = Vec::new();
    while let Some(amount) = iterator.next_amount() {
        tried.push(amount);
        iterator.record(output(amount), 150_000);
        assert!(tried.len() <= 1_000, "iterator did not stop");
    }
    tried
}

#[test]
fn test_stops_within_max_count_for_any_shape() {
    let start = U256::from(1_000_000u64);
    let shapes: Vec<Box<dyn Fn(U256) -> U256>> = vec![
        Box::new(|_| U256::ZERO),
        Box::new(|x| x),
        Box::new(|x| U256::from(u64::MAX).saturating_sub(x)),
        Box::new(|x| if x % U256::from(2u64) == U256::from(1u64) { U256::from(7u64) } else { U256::ZERO }),
        Box::new(|x| {
            let x = x.saturating_to::<u64>() as i128;
            U256::from((4_000_000i128 * 4_000_000 - (x - 4_000_000).pow(2)).max(0) as u128)
        }),
    ];
    for shape in shapes {
        let tried = drive(SimulationIterator::arbitrage(start), &shape);
        assert!(tried.len() <= IteratorSettings::ARBITRAGE.max_count);

        let tried = drive(SimulationIterator::sandwich(start, start * U256::from(3u64)), &shape);
        assert!(tried.len() <= IteratorSettings::SANDWICH.max_count);
    }
}

#[test]
fn test_nothing_profitable_gives_up_early() {
    let tried = drive(SimulationIterator::sandwich(U256::from(1_000u64), U256::from(1_000_000u64)), |_| U256::ZERO);
    assert!(tried.len() <= IteratorSettings::SANDWICH.break_count_if_zero);
}

#[test]
fn test_sandwich_amounts_respect_cap() {
    let cap = U256::from(2_500_000u64);
    let tried = drive(SimulationIterator::sandwich(U256::from(1_000_000u64), cap), |x| x);
    assert!(tried.iter().all(|amount| *amount <= cap));
}

#[test]
fn test_expired_deadline_allows_single_trial() {
    let deadline = Instant::now() - Duration::from_millis(1);
    let iterator = SimulationIterator::arbitrage(U256::from(1_000u64)).with_deadline(deadline);
    assert_eq!(drive(iterator, |x| x).len(), 1);
}
