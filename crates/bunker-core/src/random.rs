//! Injected randomness.
//!
//! The engine never reaches for a global RNG. Every draw, shuffle and
//! tie-break goes through a [`RandomSource`] handed in at session creation
//! so a seeded source replays a game exactly.

use rand::RngCore;

/// A source of floats in `[0, 1)`
pub trait RandomSource {
    fn next_f64(&mut self) -> f64;

    /// Uniform index in `0..len`. Returns 0 when `len` is 0.
    fn pick_index(&mut self, len: usize) -> usize {
        if len == 0 {
            return 0;
        }
        let index = (self.next_f64() * len as f64).floor() as usize;
        index.min(len - 1)
    }
}

impl<R: RngCore> RandomSource for R {
    fn next_f64(&mut self) -> f64 {
        rand::Rng::gen::<f64>(self)
    }
}

/// Adapter for plain closures (`|| 0.5`)
pub struct FnRandom<F>(pub F);

impl<F: FnMut() -> f64> RandomSource for FnRandom<F> {
    fn next_f64(&mut self) -> f64 {
        (self.0)()
    }
}

/// In-place Fisher-Yates shuffle driven by a [`RandomSource`]
pub fn shuffle<T>(items: &mut [T], rng: &mut dyn RandomSource) {
    for i in (1..items.len()).rev() {
        let j = rng.pick_index(i + 1);
        items.swap(i, j);
    }
}
