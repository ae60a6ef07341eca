//! The service status engine.
//!
//! Drives a [`Service`] through the status protocol: reports status changes to
//! the driver, keeps pending states alive with checkpoints, dispatches controls
//! to the service's handler table, and stops the service when it faults.

use std::{
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock},
    thread::{self, JoinHandle, ThreadId},
    time::Duration,
};

use tracing::{debug, error, trace, warn};

use crate::{
    control_handler::{accepted_controls, handlers_for},
    service::ControlCallback,
    win32::*,
    Error, EventData, ParameterHandle, ParameterStore, Result, Service, ServiceContext,
    ServiceControl, ServiceControlAccept, ServiceDriver, ServiceProcessType, ServiceStatus,
    ServiceStatusRecord, Signal, StatusHandle,
};

pub const CHECKPOINT_INTERVAL: Duration = Duration::from_millis(1000);
pub const PENDING_WAIT_HINT: u32 = 2000;
pub const STARTUP_WAIT_HINT: u32 = 5000;

const NOT_IMPLEMENTED: Error = Error{code:ERROR_CALL_NOT_IMPLEMENTED};

struct Reporter {
    name: String,
    driver: Arc<dyn ServiceDriver>,
    handle: StatusHandle,
    process_type: ServiceProcessType,
}

impl Reporter {
    fn report(&self, status: &ServiceStatusRecord) -> Result<()> {
        trace!("reporting status {:?} (checkpoint {})", status.current_state, status.checkpoint);
        self.driver.set_status(self.handle, status)
    }
}

/// Serializes whole status transitions, handlers included.
///
/// Re-entrant so that handlers may change the status themselves.
#[derive(Default)]
struct TransitionLock {
    owner: Mutex<Option<(ThreadId, usize)>>,
    released: Condvar,
}

struct TransitionGuard<'a>(&'a TransitionLock);

impl TransitionLock {

    fn lock_owner(&self) -> MutexGuard<'_, Option<(ThreadId, usize)>> {
        self.owner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock(&self) -> TransitionGuard<'_> {
        let me = thread::current().id();
        let mut owner = self.lock_owner();
        loop {
            match *owner {
                None => {
                    *owner = Some((me, 1));
                    break;
                }
                Some((id, depth)) if id == me => {
                    *owner = Some((me, depth + 1));
                    break;
                }
                Some(_) => {}
            }
            owner = self.released.wait(owner).unwrap_or_else(|e| e.into_inner());
        }
        TransitionGuard(self)
    }

    /// Drops every level the calling thread holds, for a thread that never unwinds its guards.
    fn release_all(&self) {
        let mut owner = self.lock_owner();
        if matches!(*owner, Some((id, _)) if id == thread::current().id()) {
            *owner = None;
            self.released.notify_all();
        }
    }
}

impl Drop for TransitionGuard<'_> {
    fn drop(&mut self) {
        let mut owner = self.0.lock_owner();
        if let Some((id, depth)) = *owner {
            if id == thread::current().id() {
                *owner = if depth > 1 { Some((id, depth - 1)) } else { None };
                self.0.released.notify_all();
            }
        }
    }
}

struct EngineState {
    status: ServiceStatus,
    worker: Option<JoinHandle<Result<()>>>,
}

pub struct ServiceEngine<S: Service> {
    service: S,
    reporter: OnceLock<Arc<Reporter>>,
    accepted: OnceLock<ServiceControlAccept>,
    state: Mutex<EngineState>,
    transition: TransitionLock,
    checkpoint_signal: Arc<Signal>,
    stop_signal: Signal,
    parameter_store: Mutex<Option<(Arc<dyn ParameterStore>, ParameterHandle)>>,
}

/// Runs `f`, turning a panic into `ERROR_UNHANDLED_EXCEPTION`.
pub(crate) fn catch_fault<T>(f: impl FnOnce() -> Result<T>) -> Result<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(_) => Err(Error{code:ERROR_UNHANDLED_EXCEPTION}),
    }
}

impl<S: Service> ServiceEngine<S> {

    pub fn new(service: S) -> Self {
        Self{
            service,
            reporter: OnceLock::new(),
            accepted: OnceLock::new(),
            state: Mutex::new(EngineState{ status: ServiceStatus::Stopped, worker: None }),
            transition: TransitionLock::default(),
            checkpoint_signal: Arc::new(Signal::manual()),
            stop_signal: Signal::manual(),
            parameter_store: Mutex::new(None),
        }
    }

    /// Creates a default instance of the service and runs it to completion.
    pub fn local_main(args: &[String], context: &ServiceContext) -> Result<()>
        where S: Default
    {
        Arc::new(Self::new(S::default())).main(args, context)
    }

    pub fn service(&self) -> &S { &self.service }

    /// Name the service was started under, once it has been.
    pub fn name(&self) -> Option<&str> {
        self.reporter.get().map(|reporter| reporter.name.as_str())
    }

    pub fn status(&self) -> ServiceStatus {
        self.lock_state().status
    }

    /// Controls the service advertises while running.
    pub fn accepted_controls(&self) -> ServiceControlAccept {
        *self.accepted.get_or_init(|| {
            let mut accepted = accepted_controls(S::control_handlers());
            if !self.service.parameters().is_empty() {
                accepted |= ServiceControlAccept::PARAMCHANGE;
            }
            accepted
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn reporter(&self) -> Result<&Arc<Reporter>> {
        self.reporter.get().ok_or(Error{code:ERROR_INVALID_HANDLE})
    }

    /// Sets and reports a new status.
    ///
    /// The exit codes are only reported with `Stopped`.
    pub fn set_status(&self, status: ServiceStatus, win32_exit_code: u32, service_specific_exit_code: u32) -> Result<()> {
        let mut state = self.lock_state();
        self.set_status_locked(&mut state, status, win32_exit_code, service_specific_exit_code)
    }

    /// Like `set_status`, but only reports whether it worked.
    pub fn try_set_status(&self, status: ServiceStatus, win32_exit_code: u32, service_specific_exit_code: u32) -> bool {
        match self.set_status(status, win32_exit_code, service_specific_exit_code) {
            Ok(()) => true,
            Err(err) => {
                warn!("failed to set status {:?}: {}", status, err);
                false
            }
        }
    }

    fn set_status_locked(&self, state: &mut EngineState, status: ServiceStatus, win32_exit_code: u32, service_specific_exit_code: u32) -> Result<()> {

        if state.status == status {
            return Ok(());
        }

        let reporter = self.reporter()?.clone();

        if let Some(worker) = state.worker.take() {
            self.checkpoint_signal.set();
            let result = worker.join();
            self.checkpoint_signal.reset();
            match result {
                Ok(result) => result?,
                Err(_) => return Err(Error{code:ERROR_UNHANDLED_EXCEPTION}),
            }
        }

        debug!("service status {:?} -> {:?}", state.status, status);

        let mut record = ServiceStatusRecord::stopped(reporter.process_type);
        record.current_state = status;

        if status.is_pending() {

            record.controls_accepted = match status {
                ServiceStatus::StartPending | ServiceStatus::StopPending => ServiceControlAccept::empty(),
                _ => self.accepted_controls()
                    - (ServiceControlAccept::STOP | ServiceControlAccept::PAUSE_CONTINUE | ServiceControlAccept::SHUTDOWN),
            };
            record.checkpoint = 1;
            record.wait_hint = if status == ServiceStatus::StartPending { STARTUP_WAIT_HINT } else { PENDING_WAIT_HINT };

            reporter.report(&record)?;

            let signal = self.checkpoint_signal.clone();
            state.worker = Some(thread::spawn(move || {
                while !signal.wait_timeout(CHECKPOINT_INTERVAL) {
                    record.checkpoint += 1;
                    reporter.report(&record)?;
                }
                Ok(())
            }));

        } else {

            if status == ServiceStatus::Stopped {
                record.win32_exit_code = win32_exit_code;
                record.service_specific_exit_code = service_specific_exit_code;
            } else {
                record.controls_accepted = self.accepted_controls();
            }

            reporter.report(&record)?;
        }

        state.status = status;
        Ok(())
    }

    /// Stops the service after an unrecoverable fault and parks the calling thread for good.
    ///
    /// Waits for a transition running on another thread to finish first.
    pub fn abort(&self, err: Error) -> ! {
        error!("service fault, stopping: {}", err);
        let _transition = self.transition.lock();
        self.try_set_status(ServiceStatus::Stopped, err.exit_code(), 0);
        self.stop_signal.set();
        // this thread never returns to drop its guards
        self.transition.release_all();
        loop {
            thread::park();
        }
    }

    fn transition(
        &self,
        control: ServiceControl,
        from: &[ServiceStatus],
        pending: ServiceStatus,
        target: ServiceStatus,
        (win32_exit_code, service_specific_exit_code): (u32, u32),
    ) -> Result<()> {

        // a transition on another thread completes before this one looks at the status
        let _transition = self.transition.lock();

        {
            let mut state = self.lock_state();
            if !from.contains(&state.status) {
                debug!("{:?} rejected while {:?}", control, state.status);
                return Err(NOT_IMPLEMENTED);
            }
            let result = self.set_status_locked(&mut state, pending, NO_ERROR, 0);
            if let Err(err) = result {
                drop(state);
                self.abort(err);
            }
        }

        for handler in handlers_for(S::control_handlers(), control) {
            if let Err(err) = catch_fault(|| handler.invoke(&self.service, 0, EventData::none())) {
                self.abort(err);
            }
        }

        let result = {
            let mut state = self.lock_state();
            // a handler may have moved the status on, Stopped above all
            if state.status == pending {
                self.set_status_locked(&mut state, target, win32_exit_code, service_specific_exit_code)
            } else {
                debug!("{:?} finished while {:?}, leaving it", control, state.status);
                Ok(())
            }
        };
        if let Err(err) = result {
            self.abort(err);
        }
        Ok(())
    }

    /// Pauses a running service. Fails with `ERROR_CALL_NOT_IMPLEMENTED` unless `Running`.
    pub fn pause(&self) -> Result<()> {
        self.transition(
            ServiceControl::Pause,
            &[ServiceStatus::Running],
            ServiceStatus::PausePending,
            ServiceStatus::Paused,
            (NO_ERROR, 0),
        )
    }

    /// Continues a paused service. Fails with `ERROR_CALL_NOT_IMPLEMENTED` unless `Paused`.
    pub fn resume(&self) -> Result<()> {
        self.transition(
            ServiceControl::Continue,
            &[ServiceStatus::Paused],
            ServiceStatus::ContinuePending,
            ServiceStatus::Running,
            (NO_ERROR, 0),
        )
    }

    pub fn stop(&self) -> Result<()> {
        self.stop_with(NO_ERROR, 0)
    }

    /// Stops a running or paused service, reporting the given exit codes.
    pub fn stop_with(&self, win32_exit_code: u32, service_specific_exit_code: u32) -> Result<()> {
        self.transition(
            ServiceControl::Stop,
            &[ServiceStatus::Running, ServiceStatus::Paused],
            ServiceStatus::StopPending,
            ServiceStatus::Stopped,
            (win32_exit_code, service_specific_exit_code),
        )?;
        self.stop_signal.set();
        Ok(())
    }

    /// Handles a control delivered by the driver and returns the result code for it.
    pub fn dispatch(self: &Arc<Self>, control: u32, event_type: u32, data: EventData) -> u32 {

        let control = ServiceControl::from_raw(control);
        trace!("control {:?} (event type {})", control, event_type);

        {
            let state = self.lock_state();
            if state.status == ServiceStatus::Stopped {
                return ERROR_CALL_NOT_IMPLEMENTED;
            }
            match control {
                ServiceControl::Interrogate => return NO_ERROR,
                ServiceControl::TriggerEvent if state.status == ServiceStatus::StopPending => {
                    return ERROR_SHUTDOWN_IN_PROGRESS
                }
                _ => {}
            }
        }

        let result = match control {
            ServiceControl::Stop => self.stop(),
            ServiceControl::Pause => self.pause(),
            ServiceControl::Continue => self.resume(),
            _ => return self.invoke_handlers(control, event_type, data),
        };

        match result {
            Ok(()) => NO_ERROR,
            Err(Error{code}) => code,
        }
    }

    fn invoke_handlers(self: &Arc<Self>, control: ServiceControl, event_type: u32, data: EventData) -> u32 {

        // reloading is the handling of a parameter change, user handlers are extra
        let reloaded = control == ServiceControl::ParameterChange && self.reload_parameters();

        let mut handled = false;
        for handler in handlers_for(S::control_handlers(), control) {
            match catch_fault(|| handler.invoke(&self.service, event_type, data)) {
                Ok(NO_ERROR) => handled = true,
                Ok(code) => return code,
                Err(err) => self.abort(err),
            }
        }

        if handled || reloaded {
            NO_ERROR
        } else {
            ERROR_CALL_NOT_IMPLEMENTED
        }
    }

    // reloads on a separate thread, returns false when there is nothing to reload
    fn reload_parameters(self: &Arc<Self>) -> bool {
        if self.service.parameters().is_empty() {
            return false;
        }
        let engine = self.clone();
        thread::spawn(move || {
            for (name, parameter) in engine.service.parameters() {
                trace!("reloading parameter {:?}", name);
                parameter.try_load();
            }
        });
        true
    }

    fn bind_parameters(&self, name: &str, context: &ServiceContext) {
        let store = context.parameter_store.clone()
            .unwrap_or_else(|| self.service.parameter_store());
        match store.open(name) {
            Ok(handle) => {
                for (parameter_name, parameter) in self.service.parameters() {
                    parameter.bind(store.clone(), handle, parameter_name);
                    parameter.try_load();
                }
                *self.lock_parameter_store() = Some((store, handle));
            }
            Err(err) => warn!("unable to open parameters for {:?}: {}", name, err),
        }
    }

    fn unbind_parameters(&self) {
        for (_, parameter) in self.service.parameters() {
            parameter.unbind();
        }
        if let Some((store, handle)) = self.lock_parameter_store().take() {
            store.close(handle);
        }
    }

    fn lock_parameter_store(&self) -> MutexGuard<'_, Option<(Arc<dyn ParameterStore>, ParameterHandle)>> {
        self.parameter_store.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Reads a typed configuration block from the service's parameter store.
    #[cfg(feature = "serde_config")]
    pub fn load_config<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        let (store, handle) = self.lock_parameter_store().clone()
            .ok_or(Error{code:ERROR_INVALID_HANDLE})?;
        crate::serde_config::load(&*store, handle)
    }

    /// Service entry point; `args[0]` is the service name.
    ///
    /// Registers with the driver, starts the service and blocks until it stops.
    /// A fault during startup stops the service with the fault's code, which
    /// is also returned.
    pub fn main(self: &Arc<Self>, args: &[String], context: &ServiceContext) -> Result<()> {

        let name = match args.first() {
            Some(name) if !name.is_empty() => name.as_str(),
            _ => return Err(Error{code:ERROR_INVALID_PARAMETER}),
        };

        let engine = Arc::downgrade(self);
        let callback: ControlCallback = Arc::new(move |control, event_type, data| {
            match engine.upgrade() {
                Some(engine) => engine.dispatch(control, event_type, data),
                None => ERROR_SERVICE_NOT_ACTIVE,
            }
        });

        let handle = context.driver.register_handler(name, callback)?;

        let reporter = Arc::new(Reporter{
            name: name.into(),
            driver: context.driver.clone(),
            handle,
            process_type: context.process_type,
        });
        self.reporter.set(reporter).map_err(|_| Error{code:ERROR_SERVICE_ALREADY_RUNNING})?;

        debug!("starting service {:?}", name);

        let result = catch_fault(|| {
            self.set_status(ServiceStatus::StartPending, NO_ERROR, 0)?;
            self.bind_parameters(name, context);
            self.service.on_start(self, &args[1..])?;
            {
                let mut state = self.lock_state();
                // a fault during startup may already have stopped the service
                if state.status == ServiceStatus::StartPending {
                    self.set_status_locked(&mut state, ServiceStatus::Running, NO_ERROR, 0)?;
                }
            }
            self.stop_signal.wait();
            Ok(())
        });

        if let Err(err) = result {
            error!("service {:?} failed: {}", name, err);
            self.try_set_status(ServiceStatus::Stopped, err.exit_code(), 0);
        }

        self.unbind_parameters();
        debug!("service {:?} exited", name);
        result
    }
}

impl<S: Service> Drop for ServiceEngine<S> {
    fn drop(&mut self) {
        let worker = self.state.get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .worker.take();
        if let Some(worker) = worker {
            self.checkpoint_signal.set();
            let _ = worker.join();
        }
    }
}
