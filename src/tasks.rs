//! Periodic background work with an explicit shutdown channel
//!
//! Used for the progress heartbeat, progress retention cleanup and the
//! rollback expiry sweep. The owner keeps the [`PeriodicTask`] alive for as
//! long as the work should run; dropping it stops the thread and waits for it.

use std::io;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// A named thread running `tick` every `interval` until shut down
pub struct PeriodicTask {
    name: String,
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicTask {
    /// Spawn the task; the first tick happens one `interval` after spawning
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the thread cannot be spawned.
    pub fn spawn<F>(name: impl Into<String>, interval: Duration, mut tick: F) -> io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let name = name.into();
        let (tx, rx) = mpsc::channel::<()>();
        let thread_name = name.clone();

        let handle = thread::Builder::new().name(name.clone()).spawn(move || {
            tracing::debug!(task = %thread_name, ?interval, "Periodic task started");
            loop {
                match rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => tick(),
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            tracing::debug!(task = %thread_name, "Periodic task stopped");
        })?;

        Ok(Self {
            name,
            shutdown: Some(tx),
            handle: Some(handle),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Signal the thread and wait for the tick in progress to finish
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            tracing::error!(task = %self.name, "Periodic task panicked");
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_ticks_until_shutdown() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let task = PeriodicTask::spawn("ticker", Duration::from_millis(5), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        thread::sleep(Duration::from_millis(100));
        task.shutdown();
        let after_shutdown = ticks.load(Ordering::SeqCst);
        assert!(after_shutdown > 0);

        thread::sleep(Duration::from_millis(30));
        assert_eq!(ticks.load(Ordering::SeqCst), after_shutdown);
    }

    #[test]
    fn test_drop_stops_long_interval_promptly() {
        let task = PeriodicTask::spawn("sleeper", Duration::from_secs(3600), || {}).unwrap();
        assert_eq!(task.name(), "sleeper");
        let started = std::time::Instant::now();
        drop(task);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
