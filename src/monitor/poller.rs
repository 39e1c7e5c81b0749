//! Fixed-cadence polling task.
//!
//! The poller owns the clock: it wakes every interval, samples the status
//! file and sends events to the supervisor. It never touches the engine
//! process, so the supervisor stays the single owner of the child handle.

use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

use super::status::{self, ProgressSample};

/// Messages from the poller to the supervisor.
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    /// One interval elapsed. `sample` is `None` when the status file had nothing usable.
    Tick {
        tick: u64,
        sample: Option<ProgressSample>,
    },
    /// An incremental post-processing pass is due.
    SnapshotDue { tick: u64 },
}

/// Handle to a running poller task.
pub struct Poller {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Poller {
    /// Starts polling `status_file` every `interval`.
    ///
    /// The first tick fires one full interval after the call, never
    /// immediately. Every `snapshot_every`-th tick is followed by a
    /// [`MonitorEvent::SnapshotDue`].
    pub fn spawn(
        status_file: PathBuf,
        interval: Duration,
        snapshot_every: u64,
        events: mpsc::Sender<MonitorEvent>,
    ) -> Self {
        let (stop, mut stop_rx) = watch::channel(false);
        let snapshot_every = snapshot_every.max(1);

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut tick: u64 = 0;

            loop {
                tokio::select! {
                    biased;
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => {}
                }

                tick += 1;
                let sample = status::read_sample(&status_file).await;
                if !deliver(&events, &mut stop_rx, MonitorEvent::Tick { tick, sample }).await {
                    break;
                }
                if tick % snapshot_every == 0
                    && !deliver(&events, &mut stop_rx, MonitorEvent::SnapshotDue { tick }).await
                {
                    break;
                }
            }
            debug!(ticks = tick, "Poller stopped");
        });

        Self { stop, handle }
    }

    /// Stops the task and waits for it to finish.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        let _ = self.handle.await;
    }
}

/// Sends `event` unless the poller is stopped while the channel is full.
/// Returns `false` when the poller should exit.
async fn deliver(
    events: &mpsc::Sender<MonitorEvent>,
    stop_rx: &mut watch::Receiver<bool>,
    event: MonitorEvent,
) -> bool {
    tokio::select! {
        biased;
        _ = stop_rx.changed() => false,
        sent = events.send(event) => sent.is_ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test(start_paused = true)]
    async fn test_first_snapshot_at_tick_one_hundred() {
        let temp = TempDir::new().unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        let start = Instant::now();
        let poller = Poller::spawn(
            temp.path().join("03_Prod.mdinfo"),
            Duration::from_secs(30),
            100,
            tx,
        );

        let mut ticks = 0;
        let due = loop {
            match rx.recv().await.unwrap() {
                MonitorEvent::Tick { tick, sample } => {
                    ticks += 1;
                    assert_eq!(tick, ticks);
                    assert!(sample.is_none());
                }
                MonitorEvent::SnapshotDue { tick } => break tick,
            }
        };

        assert_eq!(due, 100);
        assert_eq!(ticks, 100);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(3000));
        assert!(elapsed < Duration::from_secs(3030));
        poller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_tick_before_first_interval() {
        let temp = TempDir::new().unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        let poller = Poller::spawn(temp.path().join("x.mdinfo"), Duration::from_secs(30), 5, tx);

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(rx.try_recv().is_err());

        let event = rx.recv().await.unwrap();
        assert_eq!(event, MonitorEvent::Tick { tick: 1, sample: None });
        poller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_samples_status_file() {
        let temp = TempDir::new().unwrap();
        let status = temp.path().join("03_Prod.mdinfo");
        std::fs::write(&status, "|         ns/day =      50.00   seconds/ns =  1728.00\n").unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        let poller = Poller::spawn(status, Duration::from_secs(1), 100, tx);

        match rx.recv().await.unwrap() {
            MonitorEvent::Tick { sample, .. } => {
                assert_eq!(sample.and_then(|s| s.ns_per_day), Some(50.0));
            }
            other => panic!("unexpected event {:?}", other),
        }
        poller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_while_channel_is_full() {
        let temp = TempDir::new().unwrap();
        let (tx, rx) = mpsc::channel(1);
        let poller = Poller::spawn(temp.path().join("x.mdinfo"), Duration::from_secs(1), 1, tx);

        // Nobody drains the channel, so the poller ends up blocked in send.
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(rx.len(), 1);

        tokio::time::timeout(Duration::from_secs(5), poller.stop())
            .await
            .expect("stop returns while a send is pending");
        drop(rx);
    }
}
