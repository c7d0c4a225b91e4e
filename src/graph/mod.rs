pub mod builder;
pub mod path_finder;

pub use builder::{PoolEdge, PoolIndex};
pub use path_finder::{arbitrage_link_pairs, find_arbitrage_paths, find_sandwich_paths, sandwich_link_pairs};
