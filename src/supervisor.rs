use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{error, info};

/// A run at least this long counts as healthy and resets the backoff.
const DEFAULT_STABLE_AFTER: Duration = Duration::from_secs(60);

/// How long to wait before restarting a task that stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    delay: Duration,
    max_delay: Duration,
    stable_after: Duration,
}

impl RestartPolicy {
    /// Always wait `delay`, retry forever.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            delay,
            max_delay: delay,
            stable_after: DEFAULT_STABLE_AFTER,
        }
    }

    /// Double the delay after every failure, up to `max_delay`. A cap at or
    /// below the base delay keeps the policy fixed.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay.max(self.delay);
        self
    }

    /// Runs lasting at least this long restart from the initial delay.
    pub fn stable_after(&self) -> Duration {
        self.stable_after
    }

    pub fn initial_delay(&self) -> Duration {
        self.delay
    }

    /// Delay to use after `current` when the task failed again.
    pub fn next_delay(&self, current: Duration) -> Duration {
        (current * 2).min(self.max_delay)
    }
}

/// Run `task` forever, restarting it after `policy`'s delay whenever it
/// returns. A clean return, or a failure after a run longer than
/// `stable_after`, resets the backoff.
pub async fn supervise<F, Fut, E>(name: &str, policy: RestartPolicy, mut task: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: Display,
{
    let mut delay = policy.initial_delay();

    loop {
        info!("Starting {}", name);
        let started = Instant::now();

        match task().await {
            Ok(()) => {
                info!("{} ended cleanly. Restarting in {:?}", name, policy.initial_delay());
                delay = policy.initial_delay();
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                if started.elapsed() >= policy.stable_after() {
                    delay = policy.initial_delay();
                }
                error!("{} error: {}. Restarting in {:?}", name, e, delay);
                tokio::time::sleep(delay).await;
                delay = policy.next_delay(delay);
            }
        }
    }
}
