// Supervisor for long-running stream consumer workers.
// Restarts a crashed worker with capped exponential backoff (1s -> 10s).

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// A long-lived worker loop. `run` is expected to block "forever"; returning
/// `Ok(())` is treated as a clean shutdown, returning `Err` triggers a
/// supervised restart.
pub trait SupervisedWorker: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn run(&self) -> Pin<Box<dyn Future<Output = Result<(), anyhow::Error>> + Send + '_>>;

    /// Check if the worker should terminate instead of being restarted.
    fn should_terminate(&self) -> bool {
        false
    }
}

/// Blanket implementation so Arc-wrapped workers can be passed directly.
impl<T: SupervisedWorker> SupervisedWorker for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn run(&self) -> Pin<Box<dyn Future<Output = Result<(), anyhow::Error>> + Send + '_>> {
        (**self).run()
    }

    fn should_terminate(&self) -> bool {
        (**self).should_terminate()
    }
}

pub struct Supervisor {
    initial_backoff: Duration,
    max_backoff: Duration,
    shutdown: Arc<AtomicBool>,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(10))
    }
}

impl Supervisor {
    pub fn new(initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self { initial_backoff, max_backoff, shutdown: Arc::new(AtomicBool::new(false)) }
    }

    /// Handle that stops the supervision loop at the next restart boundary.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Run the worker until shutdown. Crashes are logged and the worker is
    /// restarted after a backoff that doubles up to the cap.
    pub async fn start<T>(self, worker: T)
    where
        T: SupervisedWorker,
    {
        let mut backoff = self.initial_backoff;

        loop {
            if self.shutdown.load(Ordering::Relaxed) || worker.should_terminate() {
                tracing::info!("worker '{}' is shutting down", worker.name());
                break;
            }

            match worker.run().await {
                Ok(()) => {
                    tracing::info!("worker '{}' stopped cleanly", worker.name());
                    break;
                },
                Err(e) => {
                    tracing::warn!(
                        "worker '{}' crashed err={:#}; restarting in {:?}",
                        worker.name(),
                        e,
                        backoff
                    );
                    sleep(backoff).await;
                    backoff = (backoff * 2).min(self.max_backoff);
                },
            }
        }

        tracing::info!("worker '{}' supervision ended", worker.name());
    }
}

/// Spawn a supervised worker on a dedicated OS thread hosting its own
/// current-thread runtime. Keeps LLM/ANN latency in one worker from stalling
/// the request path or the other worker.
pub fn spawn_worker_thread<T>(worker: T) -> Arc<AtomicBool>
where
    T: SupervisedWorker,
{
    let supervisor = Supervisor::default();
    let shutdown = supervisor.shutdown_handle();
    let thread_name = worker.name().to_string();

    let spawned = std::thread::Builder::new()
        .name(thread_name.clone())
        .spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build();
            match runtime {
                Ok(rt) => rt.block_on(supervisor.start(worker)),
                Err(e) => {
                    tracing::error!("failed to build runtime for worker '{}': {}", thread_name, e)
                },
            }
        });

    if let Err(e) = spawned {
        tracing::error!("failed to spawn worker thread: {}", e);
    }

    shutdown
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct FlakyWorker {
        attempts: Arc<AtomicU32>,
        succeed_after: u32,
    }

    impl SupervisedWorker for FlakyWorker {
        fn name(&self) -> &str {
            "flaky"
        }

        fn run(&self) -> Pin<Box<dyn Future<Output = Result<(), anyhow::Error>> + Send + '_>> {
            Box::pin(async move {
                let n = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;
                if n < self.succeed_after {
                    anyhow::bail!("boom #{n}");
                }
                Ok(())
            })
        }
    }

    #[tokio::test]
    async fn restarts_until_clean_exit() {
        let attempts = Arc::new(AtomicU32::new(0));
        let worker = FlakyWorker { attempts: attempts.clone(), succeed_after: 3 };
        let supervisor =
            Supervisor::new(Duration::from_millis(1), Duration::from_millis(4));
        supervisor.start(worker).await;
        assert_eq!(attempts.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn shutdown_flag_stops_before_run() {
        let attempts = Arc::new(AtomicU32::new(0));
        let worker = FlakyWorker { attempts: attempts.clone(), succeed_after: 100 };
        let supervisor = Supervisor::default();
        supervisor.shutdown_handle().store(true, Ordering::Relaxed);
        supervisor.start(worker).await;
        assert_eq!(attempts.load(Ordering::Relaxed), 0);
    }
}
