//! Periodic cycle scheduler for the worker threads.
//!
//! A pacer releases its worker once per period while running, parks it while
//! paused, and releases it for good once stopped. Pause, resume and stop wake
//! a parked worker immediately.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Scheduling state of a pacer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacerState {
    Running,
    Paused,
    Stopped,
}

pub struct Pacer {
    period: Duration,
    state: Mutex<PacerState>,
    wake: Condvar,
}

impl Pacer {
    pub fn new(period: Duration, initial: PacerState) -> Self {
        Self {
            period,
            state: Mutex::new(initial),
            wake: Condvar::new(),
        }
    }

    pub const fn period(&self) -> Duration {
        self.period
    }

    pub fn state(&self) -> PacerState {
        *self.state.lock()
    }

    pub fn is_paused(&self) -> bool {
        self.state() == PacerState::Paused
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == PacerState::Stopped
    }

    pub fn pause(&self) {
        self.transition(PacerState::Paused);
    }

    pub fn resume(&self) {
        self.transition(PacerState::Running);
    }

    pub fn stop(&self) {
        let mut state = self.state.lock();
        *state = PacerState::Stopped;
        drop(state);
        self.wake.notify_all();
    }

    fn transition(&self, next: PacerState) {
        let mut state = self.state.lock();
        if *state == PacerState::Stopped {
            return;
        }
        *state = next;
        drop(state);
        self.wake.notify_all();
    }

    /// Block until the next cycle is due.
    ///
    /// `deadline` carries the schedule between calls. Returns `false` once
    /// the pacer has been stopped.
    pub fn wait_next(&self, deadline: &mut Instant) -> bool {
        let mut state = self.state.lock();
        loop {
            match *state {
                PacerState::Stopped => return false,
                PacerState::Paused => {
                    self.wake.wait(&mut state);
                    *deadline = Instant::now();
                }
                PacerState::Running => {
                    let now = Instant::now();
                    if now >= *deadline {
                        *deadline += self.period;
                        // Don't try to catch up after a stall.
                        if *deadline < now {
                            *deadline = now + self.period;
                        }
                        return true;
                    }
                    let until = *deadline;
                    let _ = self.wake.wait_until(&mut state, until);
                }
            }
        }
    }
}

/// Thread-safe reference to a pacer.
pub type SharedPacer = Arc<Pacer>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn spawn_counter(pacer: SharedPacer) -> (Arc<AtomicUsize>, std::thread::JoinHandle<()>) {
        let cycles = Arc::new(AtomicUsize::new(0));
        let counter = cycles.clone();
        let handle = std::thread::spawn(move || {
            let mut deadline = Instant::now();
            while pacer.wait_next(&mut deadline) {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        (cycles, handle)
    }

    #[test]
    fn test_runs_periodically() {
        let pacer = Arc::new(Pacer::new(Duration::from_millis(5), PacerState::Running));
        let (cycles, handle) = spawn_counter(pacer.clone());

        std::thread::sleep(Duration::from_millis(100));
        pacer.stop();
        handle.join().unwrap();

        assert!(cycles.load(Ordering::SeqCst) >= 5);
    }

    #[test]
    fn test_paused_pacer_does_not_cycle() {
        let pacer = Arc::new(Pacer::new(Duration::from_millis(2), PacerState::Paused));
        let (cycles, handle) = spawn_counter(pacer.clone());

        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(cycles.load(Ordering::SeqCst), 0);

        pacer.resume();
        std::thread::sleep(Duration::from_millis(50));
        assert!(cycles.load(Ordering::SeqCst) > 0);

        pacer.stop();
        handle.join().unwrap();
    }

    #[test]
    fn test_stop_wakes_paused_worker() {
        let pacer = Arc::new(Pacer::new(Duration::from_secs(60), PacerState::Paused));
        let (_, handle) = spawn_counter(pacer.clone());

        std::thread::sleep(Duration::from_millis(10));
        pacer.stop();
        handle.join().unwrap();
        assert!(pacer.is_stopped());
    }

    #[test]
    fn test_stopped_is_terminal() {
        let pacer = Pacer::new(Duration::from_millis(1), PacerState::Running);
        pacer.stop();
        pacer.resume();
        assert_eq!(pacer.state(), PacerState::Stopped);

        let mut deadline = Instant::now();
        assert!(!pacer.wait_next(&mut deadline));
    }
}
