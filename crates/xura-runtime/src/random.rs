//! Process-wide generator behind the random-fill constructors.
//!
//! Until [`define_seed`] is called every fill draws from a fresh
//! entropy-seeded generator. After it, fills share one deterministic stream.

use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::debug;

static SEEDED: Mutex<Option<StdRng>> = Mutex::new(None);

/// Make subsequent random fills deterministic, starting from `seed`.
pub fn define_seed(seed: u64) {
    debug!(seed, "seeding tensor generator");
    *lock() = Some(StdRng::seed_from_u64(seed));
}

/// Return to per-call entropy seeding.
pub fn clear_seed() {
    *lock() = None;
}

pub fn is_seeded() -> bool {
    lock().is_some()
}

/// Run `f` with the seeded generator, or with a fresh one if none was defined.
pub(crate) fn with_rng<R>(f: impl FnOnce(&mut StdRng) -> R) -> R {
    let mut guard = lock();
    if let Some(rng) = guard.as_mut() {
        return f(rng);
    }
    drop(guard);
    f(&mut StdRng::from_entropy())
}

fn lock() -> std::sync::MutexGuard<'static, Option<StdRng>> {
    SEEDED.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
