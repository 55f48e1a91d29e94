use std::panic::AssertUnwindSafe;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::fetcher::{FetchError, UsageSource};
use crate::models::{UsageReading, UsageSnapshot};

/// Messages processed on the thread that owns the [`Poller`].
#[derive(Debug)]
pub enum PollEvent {
    Tick(u64),
    Refresh,
    Finished(Result<UsageReading, FetchError>),
    Shutdown,
}

/// Cloneable handle for triggering the poller from other threads.
#[derive(Clone)]
pub struct PollHandle {
    tx: Sender<PollEvent>,
}

impl PollHandle {
    /// Request an out-of-band fetch. Returns false if the poller is gone.
    pub fn refresh(&self) -> bool {
        self.tx.send(PollEvent::Refresh).is_ok()
    }

    /// Ask [`Poller::run`] to return.
    pub fn shutdown(&self) -> bool {
        self.tx.send(PollEvent::Shutdown).is_ok()
    }
}

struct Timer {
    stop_tx: Sender<()>,
    thread: JoinHandle<()>,
}

type UpdateCallback = Box<dyn FnMut(&UsageSnapshot)>;

/// Owns the usage snapshot and drives fetch cycles.
///
/// Fetches run on worker threads; their results are applied only by whoever
/// calls [`Poller::pump`], [`Poller::wait_for_update`] or [`Poller::run`], so
/// the snapshot never leaves the owner thread.
pub struct Poller<S> {
    source: Arc<S>,
    snapshot: UsageSnapshot,
    tx: Sender<PollEvent>,
    rx: Receiver<PollEvent>,
    timer: Option<Timer>,
    generation: u64,
    in_flight: bool,
    cycles: u64,
    shutdown_requested: bool,
    on_update: Option<UpdateCallback>,
}

impl<S: UsageSource + 'static> Poller<S> {
    pub fn new(source: S) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            source: Arc::new(source),
            snapshot: UsageSnapshot::default(),
            tx,
            rx,
            timer: None,
            generation: 0,
            in_flight: false,
            cycles: 0,
            shutdown_requested: false,
            on_update: None,
        }
    }

    /// Called after every completed cycle, success or failure.
    pub fn on_update(&mut self, callback: impl FnMut(&UsageSnapshot) + 'static) {
        self.on_update = Some(Box::new(callback));
    }

    pub fn snapshot(&self) -> &UsageSnapshot {
        &self.snapshot
    }

    pub fn handle(&self) -> PollHandle {
        PollHandle { tx: self.tx.clone() }
    }

    pub fn is_running(&self) -> bool {
        self.timer.is_some()
    }

    pub fn is_fetching(&self) -> bool {
        self.in_flight
    }

    /// Number of fetch cycles dispatched so far.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Fetch now, then every `interval` until [`Poller::stop`].
    pub fn start(&mut self, interval: Duration) {
        self.stop();
        self.generation += 1;
        log::info!("Polling usage every {}s", interval.as_secs_f64());

        self.dispatch();
        self.timer = Some(spawn_timer(interval, self.generation, self.tx.clone()));
    }

    /// Cancel the schedule. A fetch already in flight still completes.
    pub fn stop(&mut self) {
        if let Some(timer) = self.timer.take() {
            drop(timer.stop_tx);
            let _ = timer.thread.join();
            log::info!("Polling stopped");
        }
    }

    /// Fetch out of band. Returns false if a fetch is already in flight.
    pub fn refresh(&mut self) -> bool {
        self.dispatch()
    }

    fn dispatch(&mut self) -> bool {
        if self.in_flight {
            log::debug!("Fetch already in flight, skipping");
            return false;
        }
        self.in_flight = true;
        self.cycles += 1;
        self.snapshot.is_loading = true;

        let source = Arc::clone(&self.source);
        let tx = self.tx.clone();
        std::thread::spawn(move || {
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| source.fetch()))
                .unwrap_or_else(|_| Err(FetchError::Internal("usage fetch panicked".to_string())));
            let _ = tx.send(PollEvent::Finished(result));
        });
        true
    }

    /// Handle at most one pending event, waiting up to `timeout`.
    /// Returns false once a shutdown has been requested.
    pub fn pump(&mut self, timeout: Duration) -> bool {
        if let Ok(event) = self.rx.recv_timeout(timeout) {
            self.handle_event(event);
        }
        !self.shutdown_requested
    }

    /// Process events until a fetch cycle completes or `timeout` passes.
    pub fn wait_for_update(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        while !self.shutdown_requested {
            let received = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return false;
                    }
                    self.rx.recv_timeout(remaining).ok()
                }
                None => self.rx.recv().ok(),
            };
            match received {
                Some(event) => {
                    let finished = matches!(event, PollEvent::Finished(_));
                    self.handle_event(event);
                    if finished {
                        return true;
                    }
                }
                None => return false,
            }
        }
        false
    }

    /// Process events until a [`PollHandle::shutdown`], then stop polling.
    pub fn run(&mut self) {
        while !self.shutdown_requested {
            match self.rx.recv() {
                Ok(event) => self.handle_event(event),
                Err(_) => break,
            }
        }
        self.stop();
    }

    fn handle_event(&mut self, event: PollEvent) {
        match event {
            PollEvent::Tick(generation) => {
                if self.timer.is_some() && generation == self.generation {
                    self.dispatch();
                }
            }
            PollEvent::Refresh => {
                self.dispatch();
            }
            PollEvent::Finished(result) => self.complete(result),
            PollEvent::Shutdown => self.shutdown_requested = true,
        }
    }

    fn complete(&mut self, result: Result<UsageReading, FetchError>) {
        self.in_flight = false;
        self.snapshot.is_loading = false;

        match result {
            Ok(reading) => {
                log::debug!("Usage updated");
                self.snapshot.apply_reading(reading, Utc::now());
            }
            Err(e) => {
                log::warn!("Usage fetch failed: {e}");
                self.snapshot.apply_error(e.to_string());
            }
        }

        if let Some(callback) = self.on_update.as_mut() {
            callback(&self.snapshot);
        }
    }
}

impl<S> Drop for Poller<S> {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            drop(timer.stop_tx);
            let _ = timer.thread.join();
        }
    }
}

/// Emits a tick on every `interval` boundary measured from the start.
fn spawn_timer(interval: Duration, generation: u64, tx: Sender<PollEvent>) -> Timer {
    let (stop_tx, stop_rx) = mpsc::channel::<()>();
    let thread = std::thread::spawn(move || {
        let started = Instant::now();
        let mut ticks: u32 = 0;
        loop {
            let next = interval
                .checked_mul(ticks.saturating_add(1))
                .and_then(|offset| started.checked_add(offset));
            let next = match next {
                Some(n) => n,
                None => {
                    // Beyond the clock's range: nothing left to schedule.
                    let _ = stop_rx.recv();
                    break;
                }
            };
            let wait = next.saturating_duration_since(Instant::now());
            match stop_rx.recv_timeout(wait) {
                Err(RecvTimeoutError::Timeout) => {
                    ticks = ticks.saturating_add(1);
                    if tx.send(PollEvent::Tick(generation)).is_err() {
                        break;
                    }
                }
                _ => break,
            }
        }
    });
    Timer { stop_tx, thread }
}
