
use std::{
    ffi::{c_void, OsString},
    os::windows::ffi::OsStringExt,
    ptr::null_mut,
    sync::Arc,
};

use winapi::um::winsvc::{
    SERVICE_STATUS,
    SERVICE_STATUS_HANDLE,
    SERVICE_TABLE_ENTRYW,

    RegisterServiceCtrlHandlerExW,
    SetServiceStatus,
    StartServiceCtrlDispatcherW,
};

use crate::{
    registry,
    service::ControlCallback,
    win32::ERROR_INVALID_PARAMETER,
    Error, EventData, Result, Service, ServiceContext, ServiceDriver, ServiceEngine,
    ServiceProcessType, ServiceStatusRecord, StatusHandle,
    to_wstr,
};

pub type RawServiceMain = unsafe extern "system" fn(u32, *mut *mut u16);

/// Driver talking to the real service control manager.
#[derive(Copy,Clone,Debug,Default)]
pub struct ScmDriver;

unsafe extern "system" fn handler_function_ex(control: u32, event: u32, data: *mut c_void, context: *mut c_void) -> u32 {
    tracing::trace!("service control handler received: {}, {}", control, event);
    let callback = &*(context as *const ControlCallback);
    callback(control, event, EventData::from_raw(data))
}

impl ServiceDriver for ScmDriver {

    fn register_handler(&self, service_name: &str, callback: ControlCallback) -> Result<StatusHandle> {

        let service_name = to_wstr(service_name);

        // controls may arrive until the process exits, so the context is never freed
        let context = Box::into_raw(Box::new(callback));

        let handle = unsafe { RegisterServiceCtrlHandlerExW(
            service_name.as_ptr(),
            Some(handler_function_ex),
            context as *mut _,
        ) };

        if handle != null_mut() {
            Ok(StatusHandle(handle as usize))
        } else {
            drop(unsafe{ Box::from_raw(context) });
            Err(Error::from_last())
        }
    }

    fn set_status(&self, handle: StatusHandle, status: &ServiceStatusRecord) -> Result<()> {
        tracing::trace!("sending service status: {:?}", status.current_state);
        let mut raw = SERVICE_STATUS{
            dwServiceType: status.service_type.bits(),
            dwCurrentState: status.current_state.to_raw(),
            dwControlsAccepted: status.controls_accepted.bits(),
            dwWin32ExitCode: status.win32_exit_code,
            dwServiceSpecificExitCode: status.service_specific_exit_code,
            dwCheckPoint: status.checkpoint,
            dwWaitHint: status.wait_hint,
        };
        Error::check_true(unsafe { SetServiceStatus(handle.0 as SERVICE_STATUS_HANDLE, &mut raw) })
    }
}

unsafe fn collect_args(argc: u32, argv: *mut *mut u16) -> Vec<String> {
    (0..argc as usize)
        .map(|index| *argv.add(index))
        .filter(|arg| !arg.is_null())
        .map(|arg| {
            let mut len = 0;
            while *arg.add(len) != 0 {
                len += 1;
            }
            OsString::from_wide(std::slice::from_raw_parts(arg, len))
                .to_string_lossy()
                .into_owned()
        })
        .collect()
}

unsafe extern "system" fn service_main<S: Service + Default>(argc: u32, argv: *mut *mut u16) {

    let args = collect_args(argc, argv);

    let process_type = match args.first().map(|name| registry::read_process_type(name)) {
        Some(Ok(process_type)) if !process_type.is_empty() => process_type,
        _ => ServiceProcessType::OWN_PROCESS,
    };

    let context = ServiceContext::new(process_type, Arc::new(ScmDriver));

    if let Err(err) = ServiceEngine::<S>::local_main(&args, &context) {
        tracing::error!("service main failed: {}", err);
    }
}

pub struct ServiceTableEntry {
    name: Vec<u16>,
    service_main: RawServiceMain,
}

impl ServiceTableEntry {
    pub fn new<S: Service + Default>(name: &str) -> Self {
        Self{ name: to_wstr(name), service_main: service_main::<S> }
    }
}

/// The services hosted by this process.
#[derive(Default)]
pub struct ServiceTable {
    entries: Vec<ServiceTableEntry>,
}

impl ServiceTable {

    pub fn new() -> Self { Self::default() }

    pub fn with<S: Service + Default>(mut self, name: &str) -> Self {
        self.entries.push(ServiceTableEntry::new::<S>(name));
        self
    }

    pub fn push(&mut self, entry: ServiceTableEntry) {
        self.entries.push(entry);
    }

    /// Hands the table to the service control manager; returns when every service has stopped.
    pub fn start(&self) -> Result<()> {

        if self.entries.is_empty() {
            return Err(Error{code:ERROR_INVALID_PARAMETER});
        }

        let service_table: Vec<SERVICE_TABLE_ENTRYW> = self.entries.iter()
            .map(|entry| SERVICE_TABLE_ENTRYW{
                lpServiceName: entry.name.as_ptr() as *mut _,
                lpServiceProc: Some(entry.service_main),
            })
            .chain(Some(SERVICE_TABLE_ENTRYW{ lpServiceName: null_mut(), lpServiceProc: None }))
            .collect();

        Error::check_true(unsafe { StartServiceCtrlDispatcherW(service_table.as_ptr()) })
    }

    /// Like `start`, returning the error code for use as a process exit status.
    pub fn dispatch(&self) -> i32 {
        match self.start() {
            Ok(()) => 0,
            Err(Error{code}) => code as i32,
        }
    }
}
