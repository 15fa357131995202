//! Dropout mask sampling.
//!
//! Marks exactly `⌊ratio · len⌋` bits as dropped (bit = 1). To bound the work
//! regardless of the ratio, the sampler draws the smaller of the two
//! populations: dropped indices for `ratio <= 0.5`, kept indices (then an
//! inversion) otherwise. The already-set-resample loop therefore always
//! targets at most half of the mask.

use crate::bitmask::BitMask;
use crate::rng::Prng;
use crate::{Error, Result};

/// Overwrites `mask` with a fresh dropout pattern for `ratio` in `[0, 1]`.
pub fn generate_mask(mask: &mut BitMask, ratio: f32, rng: &mut Prng) -> Result<()> {
    if !(0.0..=1.0).contains(&ratio) {
        log::error!("dropout ratio {ratio} is outside [0, 1]");
        return Err(Error::MaskOutOfBounds);
    }

    mask.clear_all();

    let len = mask.len();
    if len == 0 {
        return Ok(());
    }

    // Smaller population: indices to drop below 0.5, indices to keep above.
    let keep_mode = ratio > 0.5;
    let count = if keep_mode {
        len - (len as f32 * ratio) as usize
    } else {
        (len as f32 * ratio) as usize
    };

    if count == len {
        for i in 0..len {
            mask.set(i)?;
        }
    } else {
        let mut set = 0;
        while set < count {
            let index = rng.next_u32() as usize % len;
            if mask.is_set(index) {
                continue;
            }
            mask.set(index)?;
            set += 1;
        }
    }

    if keep_mode {
        mask.invert();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifty_bits_at_fifth_ratio_drops_exactly_ten() {
        let mut rng = Prng::new(0);
        let mut mask = BitMask::new(50);
        generate_mask(&mut mask, 0.2, &mut rng).unwrap();
        assert_eq!(mask.count_ones(), 10);
    }

    #[test]
    fn count_is_exact_for_every_ratio() {
        let mut rng = Prng::new(7);
        for len in [1usize, 2, 3, 16, 50, 63, 64, 65, 100] {
            for ratio in [0.0f32, 0.1, 0.25, 0.5, 0.5625, 0.75, 0.9, 1.0] {
                let mut mask = BitMask::new(len);
                generate_mask(&mut mask, ratio, &mut rng).unwrap();
                let expected = (len as f32 * ratio) as usize;
                assert_eq!(
                    mask.count_ones(),
                    expected,
                    "len={len} ratio={ratio}"
                );
            }
        }
    }

    #[test]
    fn full_ratio_sets_every_bit() {
        let mut rng = Prng::new(1);
        let mut mask = BitMask::new(17);
        generate_mask(&mut mask, 1.0, &mut rng).unwrap();
        assert_eq!(mask.count_ones(), 17);
    }

    #[test]
    fn zero_ratio_sets_nothing() {
        let mut rng = Prng::new(1);
        let mut mask = BitMask::new(17);
        mask.set(3).unwrap();
        generate_mask(&mut mask, 0.0, &mut rng).unwrap();
        assert_eq!(mask.count_ones(), 0);
    }

    #[test]
    fn previous_pattern_is_discarded() {
        let mut rng = Prng::new(5);
        let mut mask = BitMask::new(40);
        generate_mask(&mut mask, 0.5, &mut rng).unwrap();
        generate_mask(&mut mask, 0.1, &mut rng).unwrap();
        assert_eq!(mask.count_ones(), 4);
    }

    #[test]
    fn out_of_range_ratio_is_rejected() {
        let mut rng = Prng::new(0);
        let mut mask = BitMask::new(10);
        assert_eq!(
            generate_mask(&mut mask, 1.5, &mut rng),
            Err(Error::MaskOutOfBounds)
        );
        assert_eq!(
            generate_mask(&mut mask, -0.1, &mut rng),
            Err(Error::MaskOutOfBounds)
        );
    }
}
