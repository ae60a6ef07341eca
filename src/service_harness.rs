//! In-process stand-in for the service control manager.
//!
//! [`ServiceHarness`] runs a service on an ordinary thread, delivers controls
//! to it the way the service control manager would and serves its parameters
//! from memory, so services can be exercised by unit tests.

use std::{
    collections::BTreeMap,
    iter::once,
    sync::{Arc, Condvar, Mutex, MutexGuard},
    thread::{self, JoinHandle},
    time::Duration,
};

use tracing::{debug, warn};

use crate::{
    parameter::copy_value,
    service::ControlCallback,
    win32::*,
    Error, EventData, ParameterFormat, ParameterHandle, ParameterStore, ParameterValue, Result,
    Service, ServiceContext, ServiceControl, ServiceDriver, ServiceEngine, ServiceProcessType,
    ServiceStatus, ServiceStatusRecord, StatusHandle,
};

/// How long `start` waits for the service to show signs of life.
pub const START_TIMEOUT: Duration = Duration::from_millis(30000);

const PARAMETER_HANDLE: ParameterHandle = ParameterHandle(0x5eed);

struct StatusState {
    record: ServiceStatusRecord,
    callback: Option<ControlCallback>,
    handle: usize,
}

// shared with the service thread as its driver and parameter store
struct HarnessShared {
    status: Mutex<StatusState>,
    changed: Condvar,
    parameters: Mutex<BTreeMap<String, (String, ParameterValue)>>,
}

impl HarnessShared {

    fn lock_status(&self) -> MutexGuard<'_, StatusState> {
        self.status.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_parameters(&self) -> MutexGuard<'_, BTreeMap<String, (String, ParameterValue)>> {
        self.parameters.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn wait_until(&self, timeout: Option<Duration>, done: impl Fn(&ServiceStatusRecord) -> bool) -> bool {
        let state = self.lock_status();
        match timeout {
            None => {
                let _state = self.changed.wait_while(state, |state| !done(&state.record))
                    .unwrap_or_else(|e| e.into_inner());
                true
            }
            Some(timeout) => {
                let (state, _) = self.changed.wait_timeout_while(state, timeout, |state| !done(&state.record))
                    .unwrap_or_else(|e| e.into_inner());
                done(&state.record)
            }
        }
    }
}

impl ServiceDriver for HarnessShared {

    fn register_handler(&self, service_name: &str, callback: ControlCallback) -> Result<StatusHandle> {
        debug!("registering control handler for {:?}", service_name);
        let mut state = self.lock_status();
        state.callback = Some(callback);
        state.handle += 1;
        Ok(StatusHandle(state.handle))
    }

    fn set_status(&self, handle: StatusHandle, status: &ServiceStatusRecord) -> Result<()> {
        let mut state = self.lock_status();
        if handle.0 != state.handle {
            return Err(Error{code:ERROR_INVALID_HANDLE});
        }
        state.record = *status;
        self.changed.notify_all();
        Ok(())
    }
}

impl ParameterStore for HarnessShared {

    fn open(&self, _service_name: &str) -> Result<ParameterHandle> {
        Ok(PARAMETER_HANDLE)
    }

    fn load(&self, handle: ParameterHandle, name: &str, format: ParameterFormat, buffer: Option<&mut [u8]>) -> Result<usize> {
        if handle != PARAMETER_HANDLE {
            return Err(Error{code:ERROR_INVALID_HANDLE});
        }
        let parameters = self.lock_parameters();
        let (_, value) = parameters.get(&name.to_lowercase())
            .ok_or(Error{code:ERROR_FILE_NOT_FOUND})?;
        if value.format() != format {
            return Err(Error{code:ERROR_UNSUPPORTED_TYPE});
        }
        copy_value(&value.to_bytes(), buffer)
    }

    fn close(&self, _handle: ParameterHandle) {}
}

pub struct ServiceHarness<S: Service> {
    shared: Arc<HarnessShared>,
    factory: Box<dyn Fn() -> S + Send + Sync>,
    process_type: ServiceProcessType,
    engine: Mutex<Option<Arc<ServiceEngine<S>>>>,
    main_thread: Mutex<Option<JoinHandle<()>>>,
}

impl<S: Service + Default> ServiceHarness<S> {
    pub fn new() -> Self {
        Self::with_factory(S::default)
    }
}

impl<S: Service + Default> Default for ServiceHarness<S> {
    fn default() -> Self { Self::new() }
}

impl<S: Service> ServiceHarness<S> {

    /// Creates a harness that builds a fresh service instance with `factory` on every start.
    pub fn with_factory(factory: impl Fn() -> S + Send + Sync + 'static) -> Self {
        Self{
            shared: Arc::new(HarnessShared{
                status: Mutex::new(StatusState{
                    record: ServiceStatusRecord::stopped(ServiceProcessType::OWN_PROCESS),
                    callback: None,
                    handle: 0,
                }),
                changed: Condvar::new(),
                parameters: Mutex::new(BTreeMap::new()),
            }),
            factory: Box::new(factory),
            process_type: ServiceProcessType::OWN_PROCESS,
            engine: Mutex::new(None),
            main_thread: Mutex::new(None),
        }
    }

    fn lock_main_thread(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.main_thread.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_active(&self) -> bool {
        self.lock_main_thread().as_ref().map_or(false, |thread| !thread.is_finished())
    }

    /// The engine of the current (or last) run.
    pub fn engine(&self) -> Option<Arc<ServiceEngine<S>>> {
        self.engine.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Copy of the last status the service reported.
    pub fn status(&self) -> ServiceStatusRecord {
        self.shared.lock_status().record
    }

    /// Starts the service on a new thread and waits until it is running.
    pub fn start<I>(&self, name: &str, args: I) -> Result<()>
        where I: IntoIterator, I::Item: ToString
    {
        if name.is_empty() {
            return Err(Error{code:ERROR_INVALID_PARAMETER});
        }

        {
            let mut main_thread = self.lock_main_thread();

            match main_thread.take() {
                Some(thread) if !thread.is_finished() => {
                    *main_thread = Some(thread);
                    return Err(Error{code:ERROR_SERVICE_ALREADY_RUNNING});
                }
                Some(thread) => { let _ = thread.join(); }
                None => {}
            }

            {
                let mut state = self.shared.lock_status();
                state.record = ServiceStatusRecord::stopped(self.process_type);
                state.callback = None;
            }

            let args: Vec<String> = once(name.to_string())
                .chain(args.into_iter().map(|arg| arg.to_string()))
                .collect();

            let engine = Arc::new(ServiceEngine::new((self.factory)()));
            *self.engine.lock().unwrap_or_else(|e| e.into_inner()) = Some(engine.clone());

            let shared = self.shared.clone();
            let context = ServiceContext::new(self.process_type, shared.clone())
                .with_parameter_store(shared.clone());

            debug!("starting {:?} in harness", name);

            *main_thread = Some(thread::spawn(move || {
                if let Err(err) = engine.main(&args, &context) {
                    debug!("service main returned: {}", err);
                    // make failures that never reached the status protocol visible to waiters
                    let mut state = shared.lock_status();
                    if state.record.current_state == ServiceStatus::Stopped && state.record.win32_exit_code == NO_ERROR {
                        state.record.win32_exit_code = err.exit_code();
                    }
                    shared.changed.notify_all();
                }
            }));
        }

        let started = self.shared.wait_until(Some(START_TIMEOUT), |record| {
            record.current_state != ServiceStatus::Stopped || record.is_failed()
        });
        if !started {
            return Err(Error{code:ERROR_SERVICE_REQUEST_TIMEOUT});
        }

        self.shared.wait_until(None, |record| {
            matches!(record.current_state, ServiceStatus::Running | ServiceStatus::Stopped)
        });
        self.check_stopped()
    }

    // joins the service thread once stopped and raises a failed exit code
    fn check_stopped(&self) -> Result<()> {
        let record = self.status();
        if record.current_state == ServiceStatus::Stopped {
            let thread = self.lock_main_thread().take();
            if let Some(thread) = thread {
                let _ = thread.join();
            }
            if record.is_failed() {
                return Err(Error{code:record.exit_code()});
            }
        }
        Ok(())
    }

    /// Delivers a control the way the service control manager would.
    ///
    /// Fails without calling the service when the control cannot be delivered
    /// in the current state, otherwise returns the service's result code.
    pub fn send_control(&self, control: ServiceControl, event_type: u32, data: EventData) -> Result<u32> {

        let active = self.is_active();

        let callback = {
            let state = self.shared.lock_status();

            if !active {
                return Err(Error{code:ERROR_SERVICE_NOT_ACTIVE});
            }

            match state.record.current_state {
                ServiceStatus::Stopped => return Err(Error{code:ERROR_SERVICE_NOT_ACTIVE}),
                ServiceStatus::StopPending => return Err(Error{code:ERROR_SERVICE_CANNOT_ACCEPT_CTRL}),
                ServiceStatus::StartPending if control != ServiceControl::Stop => {
                    return Err(Error{code:ERROR_SERVICE_CANNOT_ACCEPT_CTRL})
                }
                _ => {}
            }

            if !control.accepted_by(state.record.controls_accepted) {
                return Err(Error{code:ERROR_INVALID_SERVICE_CONTROL});
            }

            state.callback.clone().ok_or(Error{code:ERROR_SERVICE_NOT_ACTIVE})?
        };

        // the service may report status from inside the handler, so no lock is held here
        Ok(callback(control.to_raw(), event_type, data))
    }

    fn control_and_wait(&self, control: ServiceControl, status: ServiceStatus) -> Result<()> {
        match self.send_control(control, 0, EventData::none())? {
            NO_ERROR => self.wait_for_status(status, None).map(|_| ()),
            code => Err(Error{code}),
        }
    }

    pub fn stop(&self) -> Result<()> {
        self.control_and_wait(ServiceControl::Stop, ServiceStatus::Stopped)
    }

    pub fn pause(&self) -> Result<()> {
        self.control_and_wait(ServiceControl::Pause, ServiceStatus::Paused)
    }

    pub fn resume(&self) -> Result<()> {
        self.control_and_wait(ServiceControl::Continue, ServiceStatus::Running)
    }

    /// Waits for the service to report `status`; `Ok(false)` on timeout.
    ///
    /// A service that stops with a failure ends the wait early, and the failure
    /// is returned as the error.
    pub fn wait_for_status(&self, status: ServiceStatus, timeout: Option<Duration>) -> Result<bool> {
        let reached = self.shared.wait_until(timeout, |record| {
            record.current_state == status || record.is_failed()
        });
        self.check_stopped()?;
        Ok(reached)
    }

    pub fn can_stop(&self) -> bool {
        if !self.is_active() {
            return false;
        }
        let record = self.status();
        !matches!(record.current_state, ServiceStatus::Stopped | ServiceStatus::StopPending)
            && ServiceControl::Stop.accepted_by(record.controls_accepted)
    }

    pub fn can_pause(&self) -> bool {
        if !self.is_active() {
            return false;
        }
        let record = self.status();
        record.current_state == ServiceStatus::Running
            && ServiceControl::Pause.accepted_by(record.controls_accepted)
    }

    pub fn can_continue(&self) -> bool {
        if !self.is_active() {
            return false;
        }
        let record = self.status();
        record.current_state == ServiceStatus::Paused
            && ServiceControl::Continue.accepted_by(record.controls_accepted)
    }

    /// Sets a parameter the service will see; names are case insensitive.
    pub fn set_parameter(&self, name: &str, value: impl Into<ParameterValue>) -> Result<()> {
        if name.is_empty() {
            return Err(Error{code:ERROR_INVALID_PARAMETER});
        }
        self.shared.lock_parameters().insert(name.to_lowercase(), (name.into(), value.into()));
        Ok(())
    }

    pub fn remove_parameter(&self, name: &str) -> bool {
        self.shared.lock_parameters().remove(&name.to_lowercase()).is_some()
    }

    /// Sets every field of a configuration block as a parameter.
    #[cfg(feature = "serde_config")]
    pub fn set_parameters(&self, config: &impl serde::Serialize) -> Result<()> {
        for (name, value) in crate::serde_config::to_values(config)? {
            self.set_parameter(&name, value)?;
        }
        Ok(())
    }
}

impl<S: Service> Drop for ServiceHarness<S> {
    fn drop(&mut self) {
        if let Some(thread) = self.lock_main_thread().take() {
            if thread.is_finished() {
                let _ = thread.join();
            } else {
                warn!("service is still running, detaching its thread");
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{control_handler_map, parameter_map, ServiceParameter, StringParameter};
    use assert_matches::assert_matches;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct Echo {
        greeting: StringParameter,
        seen: Mutex<Option<String>>,
        args: Mutex<Vec<String>>,
        stops: AtomicU32,
    }

    impl Echo {
        fn on_stop(&self) -> Result<()> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn on_pause(&self) -> Result<()> { Ok(()) }

        fn on_continue(&self) -> Result<()> { Ok(()) }
    }

    impl Service for Echo {
        fn on_start(&self, _engine: &Arc<ServiceEngine<Self>>, args: &[String]) -> Result<()> {
            *self.seen.lock().unwrap() = Some(self.greeting.value());
            *self.args.lock().unwrap() = args.to_vec();
            Ok(())
        }

        control_handler_map!{ Echo {
            ServiceControl::Stop => Echo::on_stop,
            ServiceControl::Pause => Echo::on_pause,
            ServiceControl::Continue => Echo::on_continue,
        }}

        parameter_map!{
            "Greeting" => greeting,
        }
    }

    #[derive(Default)]
    struct Bare;

    impl Service for Bare {
        fn on_start(&self, _engine: &Arc<ServiceEngine<Self>>, _args: &[String]) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct Faulty;

    impl Faulty {
        fn on_stop(&self) -> Result<()> {
            Err(Error{code:ERROR_GEN_FAILURE})
        }

        fn on_pause(&self) -> Result<()> {
            panic!("pause handler failed")
        }
    }

    impl Service for Faulty {
        fn on_start(&self, _engine: &Arc<ServiceEngine<Self>>, _args: &[String]) -> Result<()> {
            Ok(())
        }

        control_handler_map!{ Faulty {
            ServiceControl::Stop => Faulty::on_stop,
            ServiceControl::Pause => Faulty::on_pause,
        }}
    }

    #[derive(Default)]
    struct Broken;

    impl Service for Broken {
        fn on_start(&self, _engine: &Arc<ServiceEngine<Self>>, _args: &[String]) -> Result<()> {
            Err(Error{code:ERROR_FILE_NOT_FOUND})
        }
    }

    #[test]
    fn full_lifecycle() {
        let harness = ServiceHarness::<Echo>::new();
        assert!(!harness.can_stop());

        harness.start("Echo", ["one", "two"]).unwrap();
        assert_eq!(harness.status().current_state, ServiceStatus::Running);
        assert!(harness.can_stop());
        assert!(harness.can_pause());
        assert!(!harness.can_continue());

        harness.pause().unwrap();
        assert_eq!(harness.status().current_state, ServiceStatus::Paused);
        assert!(harness.can_continue());
        assert!(harness.can_stop());

        harness.resume().unwrap();
        assert_eq!(harness.status().current_state, ServiceStatus::Running);

        harness.stop().unwrap();
        let record = harness.status();
        assert_eq!(record.current_state, ServiceStatus::Stopped);
        assert_eq!(record.win32_exit_code, NO_ERROR);
        assert!(!harness.can_stop());

        let engine = harness.engine().unwrap();
        assert_eq!(engine.service().stops.load(Ordering::SeqCst), 1);
        assert_eq!(*engine.service().args.lock().unwrap(), ["one", "two"]);
        assert_eq!(engine.name(), Some("Echo"));
    }

    #[test]
    fn string_parameter_reaches_on_start() {
        let harness = ServiceHarness::<Echo>::new();
        harness.set_parameter("greeting", "hello there").unwrap();
        harness.start("Echo", Vec::<String>::new()).unwrap();

        let engine = harness.engine().unwrap();
        assert_eq!(engine.service().seen.lock().unwrap().as_deref(), Some("hello there"));
        assert!(!engine.service().greeting.is_defaulted());
        harness.stop().unwrap();
    }

    #[test]
    fn mismatched_format_is_a_type_error() {
        let harness = ServiceHarness::<Echo>::new();
        harness.set_parameter("Greeting", 12u32).unwrap();
        harness.start("Echo", Vec::<String>::new()).unwrap();

        let engine = harness.engine().unwrap();
        assert!(engine.service().greeting.is_defaulted());
        assert_eq!(engine.service().greeting.load(), Err(Error{code:ERROR_UNSUPPORTED_TYPE}));
        harness.stop().unwrap();
    }

    #[test]
    fn parameter_store_semantics() {
        let harness = ServiceHarness::<Echo>::new();
        harness.set_parameter("MixedCase", "abc").unwrap();
        let store = &*harness.shared;

        assert_eq!(store.load(PARAMETER_HANDLE, "mixedcase", ParameterFormat::String, None), Ok(8));
        let mut short = [0xffu8; 4];
        assert_eq!(
            store.load(PARAMETER_HANDLE, "MIXEDCASE", ParameterFormat::String, Some(&mut short)),
            Err(Error{code:ERROR_MORE_DATA})
        );
        assert_eq!(short, [0; 4]);
        assert_eq!(
            store.load(PARAMETER_HANDLE, "missing", ParameterFormat::String, None),
            Err(Error{code:ERROR_FILE_NOT_FOUND})
        );
        assert_eq!(
            store.load(ParameterHandle(1), "MixedCase", ParameterFormat::String, None),
            Err(Error{code:ERROR_INVALID_HANDLE})
        );
        assert_eq!(harness.set_parameter("", 1u32), Err(Error{code:ERROR_INVALID_PARAMETER}));
        assert!(harness.remove_parameter("MIXEDCASE"));
    }

    #[test]
    fn parameter_change_reloads() {
        let harness = ServiceHarness::<Echo>::new();
        harness.set_parameter("Greeting", "first").unwrap();
        harness.start("Echo", Vec::<String>::new()).unwrap();
        harness.set_parameter("Greeting", "second").unwrap();

        assert_eq!(harness.send_control(ServiceControl::ParameterChange, 0, EventData::none()), Ok(NO_ERROR));

        let engine = harness.engine().unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        while engine.service().greeting.value() != "second" {
            assert!(std::time::Instant::now() < deadline);
            thread::sleep(Duration::from_millis(5));
        }
        harness.stop().unwrap();
    }

    #[test]
    fn service_without_handlers() {
        let harness = ServiceHarness::<Bare>::new();
        harness.start("Bare", Vec::<String>::new()).unwrap();
        assert_eq!(harness.status().current_state, ServiceStatus::Running);
        assert!(!harness.can_stop());
        assert_eq!(harness.stop(), Err(Error{code:ERROR_INVALID_SERVICE_CONTROL}));
        assert_eq!(harness.send_control(ServiceControl::Interrogate, 0, EventData::none()), Ok(NO_ERROR));
        assert_eq!(harness.send_control(ServiceControl::Custom(200), 0, EventData::none()), Ok(ERROR_CALL_NOT_IMPLEMENTED));
        assert_eq!(harness.status().current_state, ServiceStatus::Running);
    }

    #[test]
    fn failing_stop_handler_surfaces_its_code() {
        let harness = Arc::new(ServiceHarness::<Faulty>::new());
        harness.start("Faulty", Vec::<String>::new()).unwrap();

        // the faulting control thread never returns
        let sender = harness.clone();
        thread::spawn(move || {
            let _ = sender.send_control(ServiceControl::Stop, 0, EventData::none());
        });

        assert_eq!(
            harness.wait_for_status(ServiceStatus::Stopped, Some(Duration::from_secs(10))),
            Err(Error{code:ERROR_GEN_FAILURE})
        );
        let record = harness.status();
        assert_eq!(record.current_state, ServiceStatus::Stopped);
        assert_eq!(record.win32_exit_code, ERROR_GEN_FAILURE);
    }

    #[test]
    fn panicking_handler_is_an_unhandled_exception() {
        let harness = Arc::new(ServiceHarness::<Faulty>::new());
        harness.start("Faulty", Vec::<String>::new()).unwrap();

        let sender = harness.clone();
        thread::spawn(move || {
            let _ = sender.send_control(ServiceControl::Pause, 0, EventData::none());
        });

        assert_eq!(
            harness.wait_for_status(ServiceStatus::Paused, Some(Duration::from_secs(10))),
            Err(Error{code:ERROR_UNHANDLED_EXCEPTION})
        );
    }

    #[test]
    fn startup_failure_is_returned_from_start() {
        let harness = ServiceHarness::<Broken>::new();
        assert_eq!(harness.start("Broken", Vec::<String>::new()), Err(Error{code:ERROR_FILE_NOT_FOUND}));
        assert_eq!(harness.status().current_state, ServiceStatus::Stopped);
        assert!(!harness.can_stop());
    }

    #[test]
    fn start_is_rejected_while_running() {
        let harness = ServiceHarness::<Echo>::new();
        assert_eq!(harness.start("", Vec::<String>::new()), Err(Error{code:ERROR_INVALID_PARAMETER}));
        harness.start("Echo", Vec::<String>::new()).unwrap();
        assert_eq!(harness.start("Echo", Vec::<String>::new()), Err(Error{code:ERROR_SERVICE_ALREADY_RUNNING}));
        harness.stop().unwrap();

        harness.start("Echo", Vec::<String>::new()).unwrap();
        harness.stop().unwrap();
    }

    #[test]
    fn controls_need_a_running_service() {
        let harness = ServiceHarness::<Echo>::new();
        assert_matches!(
            harness.send_control(ServiceControl::Stop, 0, EventData::none()),
            Err(Error{code:ERROR_SERVICE_NOT_ACTIVE})
        );
        assert_matches!(harness.pause(), Err(Error{code:ERROR_SERVICE_NOT_ACTIVE}));

        harness.start("Echo", Vec::<String>::new()).unwrap();
        harness.stop().unwrap();
        assert_matches!(harness.stop(), Err(Error{code:ERROR_SERVICE_NOT_ACTIVE}));
    }
}
