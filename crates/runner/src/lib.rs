//! Process runner for the fieldstream services.
//!
//! A [`Runner`] owns a set of long-running app processes and an ordered list
//! of closers:
//! - app processes run concurrently and share one [`CancellationToken`]
//! - SIGINT/SIGTERM, or the first process to fail, cancels the token
//! - closers then run one after another, in registration order, under a
//!   shared timeout
//!
//! Closers are for work outside any process, such as flushing telemetry.
//! Shutdown steps that need ordering relative to each other belong inside
//! the process that owns them: the DMZ bridge closes device connections
//! before it disconnects from the broker, all within its own process.
//!
//! ```no_run
//! use fieldstream_runner::Runner;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let status = Runner::new()
//!         .with_app_process(|ctx| async move {
//!             ctx.cancelled().await;
//!             Ok(())
//!         })
//!         .with_closer("flush", || async move { Ok(()) })
//!         .with_closer_timeout(Duration::from_secs(5))
//!         .run()
//!         .await;
//!     std::process::exit(status.exit_code());
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

pub type AppProcess = Box<
    dyn FnOnce(CancellationToken) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>> + Send,
>;

pub type Closer = Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>> + Send>;

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    /// Shut down on signal or cancellation, or every process returned Ok.
    Clean,
    /// A process failed or panicked; carries its error text.
    Failed(String),
}

impl RunStatus {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Clean => 0,
            Self::Failed(_) => 1,
        }
    }
}

pub struct Runner {
    app_processes: Vec<AppProcess>,
    closers: Vec<(String, Closer)>,
    closer_timeout: Duration,
    cancellation_token: CancellationToken,
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}

impl Runner {
    /// New runner with a 10 second closer timeout.
    pub fn new() -> Self {
        Self {
            app_processes: Vec::new(),
            closers: Vec::new(),
            closer_timeout: Duration::from_secs(10),
            cancellation_token: CancellationToken::new(),
        }
    }

    pub fn with_app_process<F, Fut>(mut self, process: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.app_processes
            .push(Box::new(|token| Box::pin(process(token))));
        self
    }

    /// Add an already boxed process, as produced by the service modules.
    pub fn with_boxed_process(mut self, process: AppProcess) -> Self {
        self.app_processes.push(process);
        self
    }

    /// Add a named closer. Closers run in the order they were added.
    pub fn with_closer<F, Fut>(mut self, name: impl Into<String>, closer: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.closers
            .push((name.into(), Box::new(|| Box::pin(closer()))));
        self
    }

    pub fn with_closer_timeout(mut self, timeout: Duration) -> Self {
        self.closer_timeout = timeout;
        self
    }

    /// Use an externally owned token, so callers can trigger shutdown.
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    pub async fn run(self) -> RunStatus {
        let token = self.cancellation_token;
        let mut join_set = JoinSet::new();

        for process in self.app_processes {
            let process_token = token.clone();
            join_set.spawn(async move { process(process_token).await });
        }

        spawn_signal_handlers(token.clone());

        let mut status = RunStatus::Clean;
        while let Some(result) = join_set.join_next().await {
            match result {
                Ok(Ok(())) => {
                    tracing::debug!("app process completed");
                }
                Ok(Err(err)) => {
                    if !token.is_cancelled() {
                        tracing::error!("app process error: {:#}", err);
                        status = RunStatus::Failed(format!("{:#}", err));
                        token.cancel();
                    }
                }
                Err(err) => {
                    tracing::error!("app process panicked: {}", err);
                    if !token.is_cancelled() {
                        status = RunStatus::Failed(err.to_string());
                        token.cancel();
                    }
                }
            }

            if token.is_cancelled() {
                break;
            }
        }

        join_set.shutdown().await;

        if !self.closers.is_empty() {
            tracing::info!("running closers with timeout of {:?}", self.closer_timeout);
            match tokio::time::timeout(self.closer_timeout, run_closers(self.closers)).await {
                Ok(()) => tracing::info!("all closers completed"),
                Err(_) => tracing::error!("closers timed out after {:?}", self.closer_timeout),
            }
        }

        match &status {
            RunStatus::Clean => tracing::info!("application exiting normally"),
            RunStatus::Failed(err) => tracing::error!("application exiting with error: {}", err),
        }
        status
    }
}

fn spawn_signal_handlers(token: CancellationToken) {
    let ctrl_c_token = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("received shutdown signal");
                ctrl_c_token.cancel();
            }
            Err(err) => tracing::error!("error setting up signal handler: {}", err),
        }
    });

    #[cfg(unix)]
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                tracing::info!("received SIGTERM signal");
                token.cancel();
            }
            Err(err) => tracing::error!("error setting up SIGTERM handler: {}", err),
        }
    });
}

/// Run closers sequentially; a failing closer does not stop the rest.
async fn run_closers(closers: Vec<(String, Closer)>) {
    for (name, closer) in closers {
        match closer().await {
            Ok(()) => tracing::debug!(closer = %name, "closer completed"),
            Err(err) => tracing::error!(closer = %name, "closer error: {:#}", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn test_cancellation_runs_closers_in_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let token = CancellationToken::new();

        let first = order.clone();
        let second = order.clone();
        let runner = Runner::new()
            .with_app_process(|ctx| async move {
                ctx.cancelled().await;
                Ok(())
            })
            .with_closer("connections", move || async move {
                first.lock().unwrap().push("connections");
                Ok(())
            })
            .with_closer("broker", move || async move {
                second.lock().unwrap().push("broker");
                Ok(())
            })
            .with_cancellation_token(token.clone());

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let status = runner.run().await;
        assert_eq!(status, RunStatus::Clean);
        assert_eq!(*order.lock().unwrap(), vec!["connections", "broker"]);
    }

    #[tokio::test]
    async fn test_failing_process_cancels_others() {
        let sibling_stopped = Arc::new(Mutex::new(false));
        let flag = sibling_stopped.clone();

        let status = Runner::new()
            .with_app_process(|_ctx| async move { Err(anyhow::anyhow!("listener bind failed")) })
            .with_app_process(move |ctx| async move {
                ctx.cancelled().await;
                *flag.lock().unwrap() = true;
                Ok(())
            })
            .run()
            .await;

        assert_eq!(status.exit_code(), 1);
        assert!(matches!(status, RunStatus::Failed(ref e) if e.contains("listener bind failed")));
    }

    #[tokio::test]
    async fn test_failing_closer_does_not_block_later_closers() {
        let ran = Arc::new(Mutex::new(false));
        let flag = ran.clone();
        run_closers(vec![
            (
                "bad".to_string(),
                Box::new(|| Box::pin(async { Err(anyhow::anyhow!("nope")) }) as Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>) as Closer,
            ),
            (
                "good".to_string(),
                Box::new(move || {
                    Box::pin(async move {
                        *flag.lock().unwrap() = true;
                        Ok(())
                    }) as Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>
                }) as Closer,
            ),
        ])
        .await;
        assert!(*ran.lock().unwrap());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(RunStatus::Clean.exit_code(), 0);
        assert_eq!(RunStatus::Failed("x".into()).exit_code(), 1);
    }
}
