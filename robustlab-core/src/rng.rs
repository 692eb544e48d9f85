//! Deterministic seeded RNG.
//!
//! `SeededRng` is a 32-bit linear-congruential generator. It drives per-round
//! re-seeding in the Hyperband scheduler and can be handed to SPSA as its
//! perturbation source. It implements `rand::RngCore`, so any code that is
//! generic over `rand::Rng` accepts it, and tests can substitute a fixed
//! sequence (e.g. `rand::rngs::mock::StepRng`) in its place.

use rand::{Error, RngCore, SeedableRng};

/// Multiplier of the Numerical Recipes LCG.
const LCG_MULTIPLIER: u32 = 1_664_525;
/// Increment of the Numerical Recipes LCG.
const LCG_INCREMENT: u32 = 1_013_904_223;

/// Linear-congruential generator: `state = state * a + c (mod 2^32)`.
///
/// Identical seeds always produce identical sequences, independent of
/// platform or thread scheduling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeededRng {
    state: u32,
}

impl SeededRng {
    pub fn new(seed: u64) -> Self {
        // Fold the high half in so seeds differing only above bit 32 diverge.
        let folded = (seed as u32) ^ ((seed >> 32) as u32);
        Self { state: folded }
    }

    /// Advance the generator and return the raw 32-bit state.
    pub fn next_state(&mut self) -> u32 {
        self.state = self
            .state
            .wrapping_mul(LCG_MULTIPLIER)
            .wrapping_add(LCG_INCREMENT);
        self.state
    }

    /// Uniform float in `[0, 1)`.
    pub fn next_unit(&mut self) -> f64 {
        f64::from(self.next_state()) / 4_294_967_296.0
    }

    /// Draw a sub-seed for a dependent stream (one per Hyperband round).
    pub fn sub_seed(&mut self) -> u64 {
        u64::from(self.next_state())
    }
}

impl RngCore for SeededRng {
    fn next_u32(&mut self) -> u32 {
        self.next_state()
    }

    fn next_u64(&mut self) -> u64 {
        let hi = u64::from(self.next_state());
        let lo = u64::from(self.next_state());
        (hi << 32) | lo
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for chunk in dest.chunks_mut(4) {
            let bytes = self.next_state().to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

impl SeedableRng for SeededRng {
    type Seed = [u8; 8];

    fn from_seed(seed: Self::Seed) -> Self {
        Self::new(u64::from_le_bytes(seed))
    }

    fn seed_from_u64(state: u64) -> Self {
        Self::new(state)
    }
}
