use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// Owned handle to a scheduled task.
///
/// Dropping the handle cancels the task, so storing it next to the state it
/// mutates ties the timer's lifetime to that state. Replacing a stored handle
/// cancels the superseded timer.
#[derive(Debug)]
pub struct TimerHandle {
    label: &'static str,
    task: Option<JoinHandle<()>>,
}

impl TimerHandle {
    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            if !task.is_finished() {
                debug!("Cancelling timer '{}'", self.label);
            }
            task.abort();
        }
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Run `fut` once after `delay`.
pub fn spawn_after<F>(label: &'static str, delay: Duration, fut: F) -> TimerHandle
where
    F: Future<Output = ()> + Send + 'static,
{
    let task = tokio::spawn(async move {
        time::sleep(delay).await;
        fut.await;
    });
    TimerHandle {
        label,
        task: Some(task),
    }
}

const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Run `tick` every `period`, first run one period from now.
///
/// Ticks are awaited sequentially and missed ticks are skipped, so a slow
/// tick never stacks up behind itself. Periods shorter than 1ms are raised
/// to 1ms.
pub fn spawn_every<F, Fut>(label: &'static str, period: Duration, mut tick: F) -> TimerHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    if period < MIN_PERIOD {
        warn!("Timer '{}' period {:?} is too short, using {:?}", label, period, MIN_PERIOD);
    }
    let period = period.max(MIN_PERIOD);
    let task = tokio::spawn(async move {
        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            tick().await;
        }
    });
    TimerHandle {
        label,
        task: Some(task),
    }
}
