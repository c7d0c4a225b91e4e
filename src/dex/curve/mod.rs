//! Curve pool families: stableswap, stableswap-NG and the cryptoswap variants.

pub mod base_pool;
pub mod crypto;
pub mod math;
pub mod pool_info;
pub mod stable;
pub mod stable_ng;
pub mod tricrypto;
pub mod tricrypto_ng;
