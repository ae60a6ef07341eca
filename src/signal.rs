//! A waitable event, modeled on a Win32 event object.

use std::{
    sync::{Condvar, Mutex, MutexGuard},
    time::{Duration, Instant},
};

#[derive(Copy,Clone,Debug,Eq,PartialEq)]
pub enum ResetMode {
    /// stays signaled until `reset` is called
    Manual,
    /// cleared by the waiter it wakes
    Automatic,
}

#[derive(Default)]
struct SignalState {
    signaled: bool,
    generation: u64,
    waiters: usize,
}

pub struct Signal {
    mode: ResetMode,
    state: Mutex<SignalState>,
    changed: Condvar,
}

impl Signal {

    pub fn new(mode: ResetMode) -> Self {
        Self{
            mode,
            state: Mutex::new(SignalState::default()),
            changed: Condvar::new(),
        }
    }

    pub fn manual() -> Self { Self::new(ResetMode::Manual) }

    pub fn automatic() -> Self { Self::new(ResetMode::Automatic) }

    pub fn mode(&self) -> ResetMode { self.mode }

    fn lock(&self) -> MutexGuard<'_, SignalState> {
        // the state is plain values, a poisoned lock still holds a usable one
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set(&self) {
        let mut state = self.lock();
        state.signaled = true;
        state.generation = state.generation.wrapping_add(1);
        match self.mode {
            ResetMode::Manual => self.changed.notify_all(),
            ResetMode::Automatic => self.changed.notify_one(),
        }
    }

    pub fn reset(&self) {
        self.lock().signaled = false;
    }

    /// Releases the current waiters without leaving the signal set.
    ///
    /// An automatic signal releases at most one of them.
    pub fn pulse(&self) {
        let mut state = self.lock();
        match self.mode {
            ResetMode::Manual => {
                state.signaled = false;
                state.generation = state.generation.wrapping_add(1);
                self.changed.notify_all();
            }
            ResetMode::Automatic => {
                // the released waiter clears it again
                state.signaled = state.waiters > 0;
                if state.signaled {
                    self.changed.notify_one();
                }
            }
        }
    }

    pub fn is_set(&self) -> bool {
        self.lock().signaled
    }

    pub fn wait(&self) {
        self.wait_until(None);
    }

    /// Returns `false` if the timeout elapsed without the signal being raised.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.wait_until(Some(Instant::now() + timeout))
    }

    fn wait_until(&self, deadline: Option<Instant>) -> bool {
        let mut state = self.lock();
        let generation = state.generation;
        state.waiters += 1;

        let released = loop {
            if self.releases(&state, generation) {
                break true;
            }
            state = match deadline {
                None => self.changed.wait(state).unwrap_or_else(|e| e.into_inner()),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break false;
                    }
                    self.changed.wait_timeout(state, deadline - now)
                        .unwrap_or_else(|e| e.into_inner()).0
                }
            };
        };

        state.waiters -= 1;
        if released && self.mode == ResetMode::Automatic {
            state.signaled = false;
        }
        released
    }

    fn releases(&self, state: &SignalState, generation: u64) -> bool {
        match self.mode {
            ResetMode::Manual => state.signaled || state.generation != generation,
            // only a waiter that still finds it set may consume it
            ResetMode::Automatic => state.signaled,
        }
    }
}

impl Default for Signal {
    fn default() -> Self { Self::manual() }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::{sync::Arc, thread};

    #[test]
    fn manual_signal_stays_set() {
        let signal = Signal::manual();
        signal.set();
        assert!(signal.wait_timeout(Duration::from_millis(10)));
        assert!(signal.is_set());
        signal.reset();
        assert!(!signal.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn automatic_signal_clears_on_wake() {
        let signal = Signal::automatic();
        signal.set();
        assert!(signal.wait_timeout(Duration::from_millis(10)));
        assert!(!signal.is_set());
        assert!(!signal.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn set_wakes_blocked_waiter() {
        let signal = Arc::new(Signal::manual());
        let waiter = {
            let signal = signal.clone();
            thread::spawn(move || signal.wait_timeout(Duration::from_secs(10)))
        };
        thread::sleep(Duration::from_millis(50));
        signal.set();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn pulse_releases_waiter_without_latching() {
        let signal = Arc::new(Signal::manual());
        let waiter = {
            let signal = signal.clone();
            thread::spawn(move || signal.wait_timeout(Duration::from_secs(10)))
        };
        thread::sleep(Duration::from_millis(50));
        signal.pulse();
        assert!(waiter.join().unwrap());
        assert!(!signal.is_set());
    }

    fn race_two_waiters(signal: &Arc<Signal>, release: impl FnOnce(&Signal)) -> usize {
        let waiters: Vec<_> = (0..2).map(|_| {
            let signal = signal.clone();
            thread::spawn(move || signal.wait_timeout(Duration::from_millis(500)))
        }).collect();
        thread::sleep(Duration::from_millis(50));
        release(&**signal);
        waiters.into_iter().map(|w| w.join().unwrap()).filter(|&woke| woke).count()
    }

    #[test]
    fn automatic_set_releases_one_waiter() {
        let signal = Arc::new(Signal::automatic());
        assert_eq!(race_two_waiters(&signal, Signal::set), 1);
        assert!(!signal.is_set());
    }

    #[test]
    fn automatic_pulse_releases_one_waiter() {
        let signal = Arc::new(Signal::automatic());
        assert_eq!(race_two_waiters(&signal, Signal::pulse), 1);
        assert!(!signal.is_set());

        // nobody waiting, nothing latched
        signal.pulse();
        assert!(!signal.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn manual_set_releases_every_waiter() {
        let signal = Arc::new(Signal::manual());
        assert_eq!(race_two_waiters(&signal, Signal::set), 2);
        assert!(signal.is_set());
    }
}
