//! Bounded parallel execution of scrape sessions.
use std::{future::Future, sync::Arc, time::Duration};

use futures::future::join_all;
use tokio::{
    sync::{Mutex, Semaphore},
    task::{self, JoinError},
    time::{Instant, sleep, sleep_until},
};
use tracing::{debug, error};

use crate::config::SessionPolicy;

/// Runs units of work with a concurrency cap, spaced launches and a per-slot cooldown.
///
/// Rate shaping only: it keeps the target site's flood protection quiet. Units are
/// independent, so a failing or panicking unit does not stop its siblings.
#[derive(Debug, Clone)]
pub struct BoundedRunner {
    /// Maximum number of units in flight.
    concurrency: usize,
    /// Minimum time between two consecutive launches.
    spacing: Duration,
    /// How long a finished unit keeps holding its slot.
    cooldown: Duration,
}

impl BoundedRunner {
    pub fn new(concurrency: usize, spacing: Duration, cooldown: Duration) -> Self {
        Self {
            concurrency: concurrency.max(1),
            spacing,
            cooldown,
        }
    }

    /// A runner shaped by a domain's session policy.
    pub fn from_policy(policy: &SessionPolicy) -> Self {
        Self::new(
            policy.concurrency.get(),
            Duration::from_secs(policy.spacing_secs),
            Duration::from_secs(policy.cooldown_secs),
        )
    }

    /// Run `work` for every unit and wait for all of them, failed ones included.
    ///
    /// Results are returned in input order. A panicking unit shows up as a [`JoinError`].
    pub async fn run_all<T, F, Fut, R>(&self, units: Vec<T>, work: F) -> Vec<Result<R, JoinError>>
    where
        F: Fn(usize, T) -> Fut,
        Fut: Future<Output = R> + Send + 'static,
        R: Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let last_launch: Arc<Mutex<Option<Instant>>> = Arc::new(Mutex::new(None));

        let mut handles = Vec::with_capacity(units.len());
        for (index, unit) in units.into_iter().enumerate() {
            debug!(unit = index + 1, "queueing unit");

            let unit = work(index, unit);
            let semaphore = Arc::clone(&semaphore);
            let last_launch = Arc::clone(&last_launch);
            let spacing = self.spacing;
            let cooldown = self.cooldown;

            handles.push(task::spawn(async move {
                let permit = match semaphore.acquire_owned().await {
                    Ok(p) => Some(p),
                    Err(_) => {
                        error!("failed to acquire runner permit, running unbounded");
                        None
                    }
                };

                {
                    // Launches are serialized here so that spacing holds between actual starts.
                    let mut last = last_launch.lock().await;
                    if let Some(previous) = *last {
                        sleep_until(previous + spacing).await;
                    }
                    *last = Some(Instant::now());
                }

                let output = unit.await;

                if !cooldown.is_zero() {
                    sleep(cooldown).await;
                }
                drop(permit);
                output
            }));
        }

        join_all(handles).await
    }
}
