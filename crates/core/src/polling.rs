//! Bounded polling and retry.
//!
//! A [`PollingPolicy`] is a stateless description of how to wait; every wait
//! loop calls [`PollingPolicy::start`] to get a fresh [`Sleeper`] cursor and
//! asks it to [`sleep`](Sleeper::sleep) between attempts until it answers
//! [`Action::Stop`].
//!
//! Time comes from an injectable [`Clock`] so elapsed-time behaviour can be
//! driven deterministically by [`ManualClock`] in tests.
//!
//! ```ignore
//! let policy = PollingPolicy::timeout(Duration::from_secs(5), Duration::from_millis(300));
//! wait_until(&policy, "socket file", || async { path.exists() }).await?;
//! ```

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;

use crate::error::DriverError;

/// Boxed future used to keep [`Clock`] dyn-compatible.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Time source for polling loops.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> Instant;

    fn sleep(&self, duration: Duration) -> BoxFuture<'_, ()>;

    fn since(&self, start: Instant) -> Duration {
        self.now().saturating_duration_since(start)
    }
}

/// Clock backed by the tokio timer (honours paused test time).
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'_, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Virtual clock: `sleep` returns immediately and advances time by the
/// requested duration.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset_nanos: AtomicU64,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset_nanos: AtomicU64::new(0),
        }
    }

    pub fn advance(&self, duration: Duration) {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        self.offset_nanos.fetch_add(nanos, Ordering::SeqCst);
    }

    /// Virtual time elapsed since the clock was created.
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.offset_nanos.load(Ordering::SeqCst))
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'_, ()> {
        self.advance(duration);
        Box::pin(std::future::ready(()))
    }
}

/// What a wait loop should do after [`Sleeper::sleep`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Retry,
    Stop,
}

/// How a wait loop paces and bounds itself.
#[derive(Debug, Clone)]
pub enum PollingPolicy {
    /// Sleep `delay` between attempts, multiplying it by `multiplier` each
    /// time, and stop once `timeout` has elapsed.
    Timeout {
        timeout: Duration,
        delay: Duration,
        multiplier: u32,
        clock: Arc<dyn Clock>,
    },
    /// A single attempt.
    OneShot,
}

impl PollingPolicy {
    /// Fixed-delay timeout policy on the tokio clock.
    pub fn timeout(timeout: Duration, delay: Duration) -> Self {
        Self::Timeout {
            timeout,
            delay,
            multiplier: 1,
            clock: Arc::new(TokioClock),
        }
    }

    pub fn one_shot() -> Self {
        Self::OneShot
    }

    /// Sets the backoff multiplier. No effect on [`PollingPolicy::OneShot`].
    pub fn with_multiplier(mut self, value: u32) -> Self {
        if let Self::Timeout { multiplier, .. } = &mut self {
            *multiplier = value.max(1);
        }
        self
    }

    /// Replaces the clock. No effect on [`PollingPolicy::OneShot`].
    pub fn with_clock(mut self, value: Arc<dyn Clock>) -> Self {
        if let Self::Timeout { clock, .. } = &mut self {
            *clock = value;
        }
        self
    }

    /// Starts a new wait loop.
    pub fn start(&self) -> Sleeper {
        let state = match self {
            Self::Timeout {
                timeout,
                delay,
                multiplier,
                clock,
            } => SleeperState::Timeout {
                started: clock.now(),
                timeout: *timeout,
                next_delay: *delay,
                multiplier: *multiplier,
                clock: Arc::clone(clock),
            },
            Self::OneShot => SleeperState::OneShot,
        };
        Sleeper { state }
    }
}

/// Cursor of one wait loop.
#[derive(Debug)]
pub struct Sleeper {
    state: SleeperState,
}

#[derive(Debug)]
enum SleeperState {
    Timeout {
        started: Instant,
        timeout: Duration,
        next_delay: Duration,
        multiplier: u32,
        clock: Arc<dyn Clock>,
    },
    OneShot,
}

impl Sleeper {
    /// Returns [`Action::Stop`] once the budget is spent; otherwise sleeps
    /// the current delay, grows it, and returns [`Action::Retry`].
    pub async fn sleep(&mut self) -> Action {
        match &mut self.state {
            SleeperState::OneShot => Action::Stop,
            SleeperState::Timeout {
                started,
                timeout,
                next_delay,
                multiplier,
                clock,
            } => {
                if clock.since(*started) >= *timeout {
                    return Action::Stop;
                }
                clock.sleep(*next_delay).await;
                *next_delay = next_delay.saturating_mul(*multiplier);
                Action::Retry
            }
        }
    }

    pub fn elapsed(&self) -> Duration {
        match &self.state {
            SleeperState::OneShot => Duration::ZERO,
            SleeperState::Timeout { started, clock, .. } => clock.since(*started),
        }
    }
}

/// Polls `check` until it returns `true`.
///
/// Returns the elapsed wait on success and [`DriverError::WaitTimeout`]
/// once the policy stops.
pub async fn wait_until<F, Fut>(
    policy: &PollingPolicy,
    what: &str,
    mut check: F,
) -> Result<Duration, DriverError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let mut sleeper = policy.start();
    loop {
        if check().await {
            return Ok(sleeper.elapsed());
        }
        if sleeper.sleep().await == Action::Stop {
            return Err(DriverError::WaitTimeout {
                what: what.to_owned(),
                elapsed: sleeper.elapsed(),
            });
        }
    }
}

/// Runs `op` until it succeeds, fails with an error `is_recoverable`
/// rejects, or the policy stops. The last error is returned on stop.
///
/// `op` receives the 1-based attempt number.
pub async fn retry_while<T, E, F, Fut, P>(
    policy: &PollingPolicy,
    mut op: F,
    mut is_recoverable: P,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: FnMut(&E) -> bool,
{
    let mut sleeper = policy.start();
    let mut attempt = 1u32;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if !is_recoverable(&e) => return Err(e),
            Err(e) => {
                if sleeper.sleep().await == Action::Stop {
                    return Err(e);
                }
            }
        }
        attempt = attempt.saturating_add(1);
    }
}
