use alloy::primitives::U256;

use super::TickDataProvider;
use crate::error::QuoteError;

/// Word index and bit position of a compressed tick
pub fn position(compressed: i32) -> (i16, u8) {
    ((compressed >> 8) as i16, compressed.rem_euclid(256) as u8)
}

/// Tick index divided by spacing, rounded toward negative infinity
pub fn compress(tick: i32, tick_spacing: i32) -> i32 {
    tick.div_euclid(tick_spacing)
}

/// Next initialized tick in the same bitmap word, or the word boundary.
///
/// Searching left (`lte`) includes the current tick; searching right starts
/// one compressed tick above it.
pub fn next_initialized_tick_within_one_word<P: TickDataProvider + ?Sized>(
    ticks: &mut P,
    tick: i32,
    tick_spacing: i32,
    lte: bool,
) -> Result<(i32, bool), QuoteError> {
    let compressed = compress(tick, tick_spacing);

    if lte {
        let (word_pos, bit_pos) = position(compressed);
        let one = U256::from(1u64);
        let mask = (one << bit_pos) - one + (one << bit_pos);
        let masked = ticks.bitmap_word(word_pos)? & mask;
        let initialized = !masked.is_zero();
        let next = if initialized {
            let msb = (masked.bit_len() - 1) as i32;
            (compressed - (bit_pos as i32 - msb)) * tick_spacing
        } else {
            (compressed - bit_pos as i32) * tick_spacing
        };
        Ok((next, initialized))
    } else {
        let (word_pos, bit_pos) = position(compressed + 1);
        let one = U256::from(1u64);
        let mask = !((one << bit_pos) - one);
        let masked = ticks.bitmap_word(word_pos)? & mask;
        let initialized = !masked.is_zero();
        let next = if initialized {
            let lsb = masked.trailing_zeros() as i32;
            (compressed + 1 + (lsb - bit_pos as i32)) * tick_spacing
        } else {
            (compressed + 1 + (255 - bit_pos as i32)) * tick_spacing
        };
        Ok((next, initialized))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    struct Words(HashMap<i16, U256>);

    impl TickDataProvider for Words {
        fn bitmap_word(&mut self, word_pos: i16) -> Result<U256, QuoteError> {
            Ok(self.0.get(&word_pos).copied().unwrap_or_default())
        }

        fn liquidity_net(&mut self, _tick: i32, _tick_spacing: i32) -> Result<i128, QuoteError> {
            Ok(0)
        }
    }

    fn with_ticks(spacing: i32, ticks: &[i32]) -> Words {
        let mut words: HashMap<i16, U256> = HashMap::new();
        for tick in ticks {
            let (word, bit) = position(compress(*tick, spacing));
            *words.entry(word).or_default() |= U256::from(1u64) << bit;
        }
        Words(words)
    }

    #[test]
    fn test_position_negative() {
        assert_eq!(position(-1), (-1, 255));
        assert_eq!(position(-256), (-1, 0));
        assert_eq!(position(-257), (-2, 255));
        assert_eq!(position(256), (1, 0));
        assert_eq!(compress(-1, 60), -1);
        assert_eq!(compress(-60, 60), -1);
        assert_eq!(compress(59, 60), 0);
    }

    #[test]
    fn test_search_left_includes_current() {
        let mut words = with_ticks(60, &[-120, 0, 600]);
        assert_eq!(next_initialized_tick_within_one_word(&mut words, 0, 60, true).unwrap(), (0, true));
        assert_eq!(next_initialized_tick_within_one_word(&mut words, 59, 60, true).unwrap(), (0, true));
        assert_eq!(next_initialized_tick_within_one_word(&mut words, -1, 60, true).unwrap(), (-120, true));
    }

    #[test]
    fn test_search_right_skips_current() {
        let mut words = with_ticks(60, &[-120, 0, 600]);
        assert_eq!(next_initialized_tick_within_one_word(&mut words, 0, 60, false).unwrap(), (600, true));
        assert_eq!(next_initialized_tick_within_one_word(&mut words, -60, 60, false).unwrap(), (0, true));
        // -120 sits on the last-but-one bit of word -1, so the search ends at the word edge
        assert_eq!(next_initialized_tick_within_one_word(&mut words, -120, 60, false).unwrap(), (-60, false));
    }

    #[test]
    fn test_search_stops_at_word_boundary() {
        let mut words = with_ticks(1, &[]);
        assert_eq!(next_initialized_tick_within_one_word(&mut words, 10, 1, true).unwrap(), (0, false));
        assert_eq!(next_initialized_tick_within_one_word(&mut words, 10, 1, false).unwrap(), (255, false));
        assert_eq!(next_initialized_tick_within_one_word(&mut words, -1, 1, false).unwrap(), (255, false));
    }
}
