//! Environment abstraction decoupling protocol/session logic from system
//! time and randomness, so the delivery engine's retry timers and the
//! session's command timeouts can be driven deterministically in tests.

use std::time::Duration;

use rand::RngCore;

/// Abstract environment providing time, randomness, and async sleep.
///
/// # Invariants
///
/// - `now()` never goes backwards within one execution.
/// - `random_bytes()` uses cryptographically secure entropy in production.
/// - Methods are infallible; there is no recoverable failure mode for
///   reading the clock or the RNG.
pub trait Environment: Clone + Send + Sync + 'static {
    /// The instant type used by this environment. Production uses
    /// `std::time::Instant`; tests use a virtual clock.
    type Instant: Copy + Ord + Send + Sync + std::ops::Sub<Output = Duration>;

    /// Current time (monotonic).
    fn now(&self) -> Self::Instant;

    /// Sleep for the given duration. The only async method on this trait;
    /// used exclusively by driver/session code, never by pure state
    /// machine logic.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fill `buffer` with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generate a random `u32`, e.g. for an ACK correlation code.
    fn random_u32(&self) -> u32 {
        let mut bytes = [0u8; 4];
        self.random_bytes(&mut bytes);
        u32::from_le_bytes(bytes)
    }
}

/// Production environment backed by system time and OS-provided entropy.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnvironment;

impl Environment for SystemEnvironment {
    type Instant = std::time::Instant;

    fn now(&self) -> Self::Instant {
        std::time::Instant::now()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        rand::rngs::OsRng.fill_bytes(buffer);
    }
}

/// Deterministic [`Environment`] for tests, exposed for downstream crates
/// under the `test-util` feature.
#[cfg(feature = "test-util")]
pub mod testing {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use rand::rngs::StdRng;
    use rand::{RngCore, SeedableRng};

    use super::Environment;

    /// A virtual instant: an offset from the clock's zero point.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
    pub struct VirtualInstant(Duration);

    impl std::ops::Sub for VirtualInstant {
        type Output = Duration;

        fn sub(self, rhs: Self) -> Duration {
            self.0 - rhs.0
        }
    }

    /// An [`Environment`] with a manually-advanced clock and seeded RNG, so
    /// retry timers and ACK codes are reproducible in tests without real
    /// sleeps.
    #[derive(Debug, Clone)]
    pub struct VirtualEnvironment {
        elapsed: Arc<Mutex<Duration>>,
        rng: Arc<Mutex<StdRng>>,
    }

    impl VirtualEnvironment {
        /// Build a new virtual environment seeded deterministically.
        #[must_use]
        pub fn new(seed: u64) -> Self {
            Self { elapsed: Arc::new(Mutex::new(Duration::ZERO)), rng: Arc::new(Mutex::new(StdRng::seed_from_u64(seed))) }
        }

        /// Move the clock forward by `duration`. Does not actually sleep.
        #[allow(clippy::expect_used)]
        pub fn advance(&self, duration: Duration) {
            let mut elapsed = self.elapsed.lock().expect("invariant: elapsed mutex is never held across a panic");
            *elapsed += duration;
        }
    }

    impl Default for VirtualEnvironment {
        fn default() -> Self {
            Self::new(0)
        }
    }

    impl Environment for VirtualEnvironment {
        type Instant = VirtualInstant;

        #[allow(clippy::expect_used)]
        fn now(&self) -> Self::Instant {
            VirtualInstant(*self.elapsed.lock().expect("invariant: elapsed mutex is never held across a panic"))
        }

        /// Never resolves. Tests that need to observe a session-level
        /// response timeout must race it against a transport stub that
        /// also never answers; this environment's clock otherwise only
        /// advances via explicit [`VirtualEnvironment::advance`] calls, so
        /// a real-resolving sleep here would race non-deterministically
        /// against an already-ready `recv_frame` in `tokio::select!`.
        fn sleep(&self, _duration: Duration) -> impl std::future::Future<Output = ()> + Send {
            std::future::pending()
        }

        #[allow(clippy::expect_used)]
        fn random_bytes(&self, buffer: &mut [u8]) {
            self.rng.lock().expect("invariant: rng mutex is never held across a panic").fill_bytes(buffer);
        }
    }
}
