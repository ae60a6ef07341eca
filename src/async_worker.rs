//! Hosts async service work on a tokio runtime of its own.
//!
//! The worker future is handed a [`RunSignal`]; the service forwards its
//! Pause, Continue and Stop controls to [`AsyncWorker::pause`],
//! [`AsyncWorker::resume`] and [`AsyncWorker::stop`].

use std::{
    future::Future,
    sync::{Mutex, MutexGuard},
    thread::{self, JoinHandle},
};

use tokio::sync::watch;

use crate::{
    Error, Result,
    win32::{ERROR_SERVICE_NOT_ACTIVE, ERROR_UNHANDLED_EXCEPTION},
};

#[derive(Copy,Clone,Debug,Eq,PartialEq)]
pub enum RunLevel {
    Running,
    Paused,
    Stopped,
}

/// The worker's view of the requested run level.
#[derive(Clone)]
pub struct RunSignal(watch::Receiver<RunLevel>);

impl RunSignal {

    pub fn level(&self) -> RunLevel {
        *self.0.borrow()
    }

    pub fn is_stopped(&self) -> bool {
        self.level() == RunLevel::Stopped
    }

    /// Waits for the next change of run level and returns it.
    pub async fn changed(&mut self) -> RunLevel {
        match self.0.changed().await {
            Ok(()) => *self.0.borrow_and_update(),
            Err(_) => RunLevel::Stopped,
        }
    }

    /// Waits out a pause; `false` once the worker should stop.
    pub async fn proceed(&mut self) -> bool {
        loop {
            match *self.0.borrow_and_update() {
                RunLevel::Running => return true,
                RunLevel::Stopped => return false,
                RunLevel::Paused => {}
            }
            if self.0.changed().await.is_err() {
                return false;
            }
        }
    }

    pub async fn stopped(&mut self) {
        while self.level() != RunLevel::Stopped {
            if self.changed().await == RunLevel::Stopped {
                break;
            }
        }
    }
}

pub struct AsyncWorker {
    control: watch::Sender<RunLevel>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl AsyncWorker {

    /// Starts `worker` on a new multi-threaded runtime, blocking a dedicated thread on it.
    pub fn spawn<F, U>(worker: F) -> Result<Self>
    where
        F: FnOnce(RunSignal) -> U + Send + 'static,
        U: Future<Output = ()>,
    {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;

        let (control, level) = watch::channel(RunLevel::Running);
        let signal = RunSignal(level);

        let thread = thread::Builder::new()
            .name("async-worker".into())
            .spawn(move || {
                tracing::trace!("async worker starting");
                runtime.block_on(worker(signal));
                tracing::trace!("async worker finished");
            })?;

        Ok(Self{ control, thread: Mutex::new(Some(thread)) })
    }

    pub fn level(&self) -> RunLevel {
        *self.control.borrow()
    }

    pub fn pause(&self) -> Result<()> {
        self.request(RunLevel::Paused)
    }

    pub fn resume(&self) -> Result<()> {
        self.request(RunLevel::Running)
    }

    /// Requests a stop and waits for the worker future to complete.
    pub fn stop(&self) -> Result<()> {
        self.control.send_replace(RunLevel::Stopped);
        match self.lock_thread().take() {
            Some(thread) => thread.join().map_err(|_| {
                tracing::warn!("async worker panicked");
                Error{code:ERROR_UNHANDLED_EXCEPTION}
            }),
            None => Ok(()),
        }
    }

    fn request(&self, level: RunLevel) -> Result<()> {
        let mut result = Ok(());
        self.control.send_if_modified(|current| {
            if *current == RunLevel::Stopped {
                result = Err(Error{code:ERROR_SERVICE_NOT_ACTIVE});
                false
            } else if *current == level {
                false
            } else {
                tracing::debug!("async worker: {:?} -> {:?}", current, level);
                *current = level;
                true
            }
        });
        result
    }

    fn lock_thread(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.thread.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for AsyncWorker {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            tracing::warn!("async worker did not stop cleanly: {}", err);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::{sync::mpsc, time::Duration};

    const WAIT: Duration = Duration::from_secs(10);

    #[test]
    fn follows_requested_levels() {
        let (tx, rx) = mpsc::channel();
        let worker = AsyncWorker::spawn(move |mut signal| async move {
            loop {
                let level = signal.changed().await;
                tx.send(level).unwrap();
                if level == RunLevel::Stopped {
                    break;
                }
            }
        }).unwrap();

        assert_eq!(worker.level(), RunLevel::Running);
        worker.pause().unwrap();
        assert_eq!(rx.recv_timeout(WAIT), Ok(RunLevel::Paused));
        worker.resume().unwrap();
        assert_eq!(rx.recv_timeout(WAIT), Ok(RunLevel::Running));
        worker.stop().unwrap();
        assert_eq!(rx.recv_timeout(WAIT), Ok(RunLevel::Stopped));
        assert_eq!(worker.level(), RunLevel::Stopped);
    }

    #[test]
    fn proceed_waits_out_a_pause() {
        let (tx, rx) = mpsc::channel();
        let worker = AsyncWorker::spawn(move |mut signal| async move {
            let mut ticks = 0u32;
            while signal.proceed().await {
                ticks += 1;
                tx.send(ticks).unwrap();
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }).unwrap();

        assert_eq!(rx.recv_timeout(WAIT), Ok(1));
        worker.pause().unwrap();
        thread::sleep(Duration::from_millis(50));
        let last = rx.try_iter().last().unwrap_or(1);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(rx.try_recv(), Err(mpsc::TryRecvError::Empty));

        worker.resume().unwrap();
        assert_eq!(rx.recv_timeout(WAIT), Ok(last + 1));
        worker.stop().unwrap();
    }

    #[test]
    fn stopped_worker_rejects_requests() {
        let worker = AsyncWorker::spawn(|mut signal| async move {
            signal.stopped().await;
        }).unwrap();
        worker.resume().unwrap();
        worker.stop().unwrap();
        assert_eq!(worker.pause(), Err(Error{code:ERROR_SERVICE_NOT_ACTIVE}));
        assert_eq!(worker.resume(), Err(Error{code:ERROR_SERVICE_NOT_ACTIVE}));
        assert_eq!(worker.stop(), Ok(()));
    }

    #[test]
    fn worker_panic_is_reported() {
        let worker = AsyncWorker::spawn(|_signal| async move {
            panic!("worker failed");
        }).unwrap();
        assert_eq!(worker.stop(), Err(Error{code:ERROR_UNHANDLED_EXCEPTION}));
    }
}
