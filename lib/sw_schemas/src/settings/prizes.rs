//! Weighted random prize selection over a prefix-sum table.

use rand::Rng;

use super::packet::PRIZE_WEIGHT_COUNT;

/// Running-sum table over the 28 prize weights, plus a base weight for the
/// null prize (id 0). `pwps[i]` is the cumulative weight of prize ids
/// `0..=i-1` plus the base, so the weight of prize id `i` is
/// `pwps[i] - pwps[i-1]` and a uniform draw over `0..pwps[28]` selects
/// prizes proportionally in `O(log n)`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PrizeWeights {
    pwps: [u32; PRIZE_WEIGHT_COUNT + 1],
}

impl Default for PrizeWeights {
    fn default() -> Self {
        Self::from_weights(0, &[0; PRIZE_WEIGHT_COUNT])
    }
}

impl PrizeWeights {
    /// Builds the prefix sums from a null-prize base weight (zero unless
    /// death prize weights are in use) and the per-prize weights for prize
    /// ids 1..=28.
    pub fn from_weights(null_weight: u32, weights: &[u8; PRIZE_WEIGHT_COUNT]) -> Self {
        let mut pwps = [0u32; PRIZE_WEIGHT_COUNT + 1];
        pwps[0] = null_weight;
        for (i, &w) in weights.iter().enumerate() {
            pwps[i + 1] = pwps[i] + w as u32;
        }
        Self { pwps }
    }

    /// Total weight; zero when no prize has any weight.
    pub fn total(&self) -> u32 {
        self.pwps[PRIZE_WEIGHT_COUNT]
    }

    /// Draws a prize id in `0..=28` with probability proportional to its
    /// weight. Returns 0 (the null prize) when every weight is zero.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> u8 {
        if self.total() == 0 {
            return 0;
        }
        let roll = rng.gen_range(0..self.total());
        // First index whose cumulative weight exceeds the roll.
        self.pwps.partition_point(|&p| p <= roll) as u8
    }
}

#[cfg(test)]
mod test {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    #[test]
    pub fn prefix_sums_accumulate() {
        let mut weights = [0u8; PRIZE_WEIGHT_COUNT];
        weights[0] = 2;
        weights[1] = 3;
        let p = PrizeWeights::from_weights(1, &weights);
        assert_eq!(p.pwps[0], 1);
        assert_eq!(p.pwps[1], 3);
        assert_eq!(p.pwps[2], 6);
        assert_eq!(p.total(), 6);
    }

    #[test]
    pub fn sampling_matches_the_configured_distribution() {
        // Only prize id 3 (weight 7) and prize id 10 (weight 3) can win.
        let mut weights = [0u8; PRIZE_WEIGHT_COUNT];
        weights[2] = 7;
        weights[9] = 3;
        let p = PrizeWeights::from_weights(0, &weights);

        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut hits = [0u32; PRIZE_WEIGHT_COUNT + 1];
        const SAMPLES: u32 = 10_000;
        for _ in 0..SAMPLES {
            hits[p.sample(&mut rng) as usize] += 1;
        }

        for (id, &count) in hits.iter().enumerate() {
            match id {
                3 | 10 => {}
                _ => assert_eq!(count, 0, "prize id {id} should never win"),
            }
        }
        let frac3 = hits[3] as f64 / SAMPLES as f64;
        let frac10 = hits[10] as f64 / SAMPLES as f64;
        assert!((frac3 - 0.7).abs() < 0.02, "prize 3 fraction {frac3}");
        assert!((frac10 - 0.3).abs() < 0.02, "prize 10 fraction {frac10}");
    }

    #[test]
    pub fn null_prize_base_weight_can_win() {
        let mut weights = [0u8; PRIZE_WEIGHT_COUNT];
        weights[0] = 1;
        let p = PrizeWeights::from_weights(3, &weights);
        let mut rng = StdRng::seed_from_u64(42);
        let mut nulls = 0;
        for _ in 0..4000 {
            if p.sample(&mut rng) == 0 {
                nulls += 1;
            }
        }
        let frac = nulls as f64 / 4000.0;
        assert!((frac - 0.75).abs() < 0.05, "null prize fraction {frac}");
    }

    #[test]
    pub fn all_zero_weights_fall_back_to_null() {
        let p = PrizeWeights::default();
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(p.sample(&mut rng), 0);
    }
}
