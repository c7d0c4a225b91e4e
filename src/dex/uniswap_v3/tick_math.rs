//! Q64.96 tick <-> sqrt price conversion

use alloy::primitives::{I256, U256};

use crate::error::QuoteError;

pub const MIN_TICK: i32 = -887272;
pub const MAX_TICK: i32 = 887272;

pub const MIN_SQRT_RATIO: U256 = U256::from_limbs([4295128739, 0, 0, 0]);
pub const MAX_SQRT_RATIO: U256 = U256::from_limbs([
    0x5d951d5263988d26,
    0xefd1fc6a50648849,
    0xfffd8963,
    0,
]);

const RATIO_MULTIPLIERS: [(u32, u128); 19] = [
    (0x2, 0xfff97272373d413259a46990580e213a),
    (0x4, 0xfff2e50f5f656932ef12357cf3c7fdcc),
    (0x8, 0xffe5caca7e10e4e61c3624eaa0941cd0),
    (0x10, 0xffcb9843d60f6159c9db58835c926644),
    (0x20, 0xff973b41fa98c081472e6896dfb254c0),
    (0x40, 0xff2ea16466c96a3843ec78b326b52861),
    (0x80, 0xfe5dee046a99a2a811c461f1969c3053),
    (0x100, 0xfcbe86c7900a88aedcffc83b479aa3a4),
    (0x200, 0xf987a7253ac413176f2b074cf7815e54),
    (0x400, 0xf3392b0822b70005940c7a398e4b70f3),
    (0x800, 0xe7159475a2c29b7443b29c7fa6e889d9),
    (0x1000, 0xd097f3bdfd2022b8845ad8f792aa5825),
    (0x2000, 0xa9f746462d870fdf8a65dc1f90e061e5),
    (0x4000, 0x70d869a156d2a1b890bb3df62baf32f7),
    (0x8000, 0x31be135f97d08fd981231505542fcfa6),
    (0x10000, 0x9aa508b5b7a84e1c677de54f3e99bc9),
    (0x20000, 0x5d6af8dedb81196699c329225ee604),
    (0x40000, 0x2216e584f5fa1ea926041bedfe98),
    (0x80000, 0x48a170391f7dc42444e8fa2),
];

/// sqrt(1.0001^tick) * 2^96, rounded up
pub fn get_sqrt_ratio_at_tick(tick: i32) -> Result<U256, QuoteError> {
    let abs_tick = tick.unsigned_abs();
    if abs_tick > MAX_TICK as u32 {
        return Err(QuoteError::OutOfBounds("tick out of range"));
    }

    let mut ratio = if abs_tick & 0x1 != 0 {
        U256::from(0xfffcb933bd6fad37aa2d162d1a594001u128)
    } else {
        U256::from(1u64) << 128
    };
    for (bit, multiplier) in RATIO_MULTIPLIERS {
        if abs_tick & bit != 0 {
            ratio = (ratio * U256::from(multiplier)) >> 128;
        }
    }

    if tick > 0 {
        ratio = U256::MAX / ratio;
    }

    let rounding = if (ratio % (U256::from(1u64) << 32usize)).is_zero() { 0u64 } else { 1u64 };
    Ok((ratio >> 32) + U256::from(rounding))
}

/// Greatest tick whose sqrt ratio is <= `sqrt_price_x96`
pub fn get_tick_at_sqrt_ratio(sqrt_price_x96: U256) -> Result<i32, QuoteError> {
    if sqrt_price_x96 < MIN_SQRT_RATIO || sqrt_price_x96 >= MAX_SQRT_RATIO {
        return Err(QuoteError::OutOfBounds("sqrt price out of range"));
    }

    let ratio: U256 = sqrt_price_x96 << 32usize;
    let msb = ratio.bit_len() - 1;

    let mut r = if msb >= 128 {
        ratio >> (msb - 127)
    } else {
        ratio << (127 - msb)
    };

    let mut log_2: I256 = signed(msb as i128 - 128) << 64usize;

    for shift in (50..=63).rev() {
        r = (r * r) >> 127;
        let f: U256 = r >> 128usize;
        if !f.is_zero() {
            log_2 |= I256::from_raw(U256::from(1u64) << shift);
        }
        r >>= f.to::<usize>();
    }

    let log_sqrt10001 = log_2.wrapping_mul(I256::from_raw(U256::from(255738958999603826347141u128)));

    let tick_low = (log_sqrt10001
        .wrapping_sub(I256::from_raw(U256::from(3402992956809132418596140100660247210u128))))
    .asr(128);
    let tick_high = (log_sqrt10001
        .wrapping_add(I256::from_raw(U256::from(291339464771989622907027621153398088495u128))))
    .asr(128);

    let tick_low = i32::try_from(tick_low).map_err(|_| QuoteError::OutOfBounds("tick low"))?;
    let tick_high = i32::try_from(tick_high).map_err(|_| QuoteError::OutOfBounds("tick high"))?;

    if tick_low == tick_high {
        Ok(tick_low)
    } else if get_sqrt_ratio_at_tick(tick_high)? <= sqrt_price_x96 {
        Ok(tick_high)
    } else {
        Ok(tick_low)
    }
}

fn signed(value: i128) -> I256 {
    let magnitude = I256::from_raw(U256::from(value.unsigned_abs()));
    if value < 0 {
        -magnitude
    } else {
        magnitude
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqrt_ratio_at_zero_is_q96() {
        assert_eq!(get_sqrt_ratio_at_tick(0).unwrap(), U256::from(1u64) << 96);
    }

    #[test]
    fn test_bounds() {
        assert_eq!(get_sqrt_ratio_at_tick(MIN_TICK).unwrap(), MIN_SQRT_RATIO);
        assert_eq!(get_sqrt_ratio_at_tick(MAX_TICK).unwrap(), MAX_SQRT_RATIO);
        assert!(get_sqrt_ratio_at_tick(MAX_TICK + 1).is_err());
        assert!(get_sqrt_ratio_at_tick(MIN_TICK - 1).is_err());
        assert_eq!(
            MAX_SQRT_RATIO,
            U256::from_str_radix("1461446703485210103287273052203988822378723970342", 10).unwrap()
        );
    }

    #[test]
    fn test_tick_at_sqrt_ratio_inverts() {
        for tick in [MIN_TICK, -500_000, -60, -1, 0, 1, 59, 60, 123_456, MAX_TICK - 1] {
            let sqrt = get_sqrt_ratio_at_tick(tick).unwrap();
            assert_eq!(get_tick_at_sqrt_ratio(sqrt).unwrap(), tick);
            if tick > MIN_TICK {
                // one below the boundary belongs to the previous tick
                assert_eq!(get_tick_at_sqrt_ratio(sqrt - U256::from(1u64)).unwrap(), tick - 1);
            }
        }
    }

    #[test]
    fn test_tick_at_sqrt_ratio_rejects_out_of_range() {
        assert!(get_tick_at_sqrt_ratio(MIN_SQRT_RATIO - U256::from(1u64)).is_err());
        assert!(get_tick_at_sqrt_ratio(MAX_SQRT_RATIO).is_err());
    }
}
