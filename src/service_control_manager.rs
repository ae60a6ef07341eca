//! Client side of the service control manager: install, remove and drive
//! installed services.

use std::{
    ptr::null_mut,
    mem::MaybeUninit,
};

use winapi::um::{
    synchapi::SleepEx,
    winsvc::{
        OpenServiceW,
        StartServiceW,
        DeleteService,
        ControlService,
        CreateServiceW,
        OpenSCManagerW,
        CloseServiceHandle,
        QueryServiceStatusEx,
        SC_HANDLE,
        SC_MANAGER_ALL_ACCESS,
        SC_MANAGER_CONNECT,
        SERVICE_ALL_ACCESS,
        SERVICE_STATUS,
        SERVICE_STATUS_PROCESS,
        SC_STATUS_PROCESS_INFO,
    },
    winnt::{
        SERVICE_AUTO_START,
        SERVICE_DEMAND_START,
        SERVICE_ERROR_NORMAL,
    },
};

use crate::{
    registry,
    to_wstr,
    win32::{ERROR_GEN_FAILURE, ERROR_INVALID_PARAMETER},
    Error, Result,
    ServiceControl, ServiceControlAccept, ServiceProcessType, ServiceStatus, ServiceStatusRecord,
    get_this_module_filename_raw,
};

#[derive(Copy,Clone,Debug)]
pub enum Access {
    Connect,
    All,
}

impl Access {
    fn into_raw(self) -> u32 {
        match self {
            Access::Connect => SC_MANAGER_CONNECT,
            Access::All => SC_MANAGER_ALL_ACCESS,
        }
    }
}

#[derive(Copy,Clone,Debug,Eq,PartialEq)]
pub enum StartType {
    Auto,
    Demand,
}

pub use crate::win32::{LOCAL_SERVICE, LOCAL_SYSTEM, NETWORK_SERVICE};

/// An installed service, opened through [`ServiceControlManager`].
pub struct InstalledService(SC_HANDLE);

pub struct ServiceControlManager(SC_HANDLE);

fn record_from_raw(raw: &SERVICE_STATUS) -> ServiceStatusRecord {
    ServiceStatusRecord{
        service_type: ServiceProcessType::from_bits_truncate(raw.dwServiceType),
        current_state: ServiceStatus::from_raw(raw.dwCurrentState).unwrap_or(ServiceStatus::Stopped),
        controls_accepted: ServiceControlAccept::from_bits_truncate(raw.dwControlsAccepted),
        win32_exit_code: raw.dwWin32ExitCode,
        service_specific_exit_code: raw.dwServiceSpecificExitCode,
        checkpoint: raw.dwCheckPoint,
        wait_hint: raw.dwWaitHint,
    }
}

impl InstalledService {

    pub fn delete(&self) -> Result<()> {
        Error::check_true(unsafe { DeleteService(self.0) })
    }

    /// Starts the service unless it is already starting or running, and waits for `Running`.
    pub fn start(&self, arguments: &[&str]) -> Result<()> {
        match self.query_status()?.current_state {
            ServiceStatus::Running | ServiceStatus::StartPending => {}
            _ => self.raw_service_start(arguments)?,
        }
        self.wait_for_status(ServiceStatus::Running, ServiceStatus::StartPending)
    }

    /// Stops the service unless it is already stopping or stopped, and waits for `Stopped`.
    pub fn stop(&self) -> Result<()> {
        match self.query_status()?.current_state {
            ServiceStatus::Stopped | ServiceStatus::StopPending => {}
            _ => { self.control(ServiceControl::Stop)?; }
        }
        self.wait_for_status(ServiceStatus::Stopped, ServiceStatus::StopPending)
    }

    pub fn pause(&self) -> Result<()> {
        self.control(ServiceControl::Pause)?;
        self.wait_for_status(ServiceStatus::Paused, ServiceStatus::PausePending)
    }

    pub fn resume(&self) -> Result<()> {
        self.control(ServiceControl::Continue)?;
        self.wait_for_status(ServiceStatus::Running, ServiceStatus::ContinuePending)
    }

    /// Sends a control, returning the status the service reported back.
    pub fn control(&self, control: ServiceControl) -> Result<ServiceStatusRecord> {
        unsafe {

            let mut status = MaybeUninit::<SERVICE_STATUS>::uninit();

            Error::check_true(ControlService(
                self.0,
                control.to_raw(),
                status.as_mut_ptr(),
            ))?;

            Ok(record_from_raw(&status.assume_init()))
        }
    }

    pub fn query_status(&self) -> Result<ServiceStatusRecord> {
        unsafe {

            let mut status = MaybeUninit::<SERVICE_STATUS_PROCESS>::uninit();
            let mut bytes_needed : u32 = 0;

            Error::check_true(QueryServiceStatusEx(self.0,
                SC_STATUS_PROCESS_INFO,
                status.as_mut_ptr() as * mut _,
                std::mem::size_of::<SERVICE_STATUS_PROCESS>() as u32,
                &mut bytes_needed as *mut _,
            ))?;

            let st = status.assume_init();
            Ok(record_from_raw(&SERVICE_STATUS{
                dwServiceType: st.dwServiceType,
                dwCurrentState: st.dwCurrentState,
                dwControlsAccepted: st.dwControlsAccepted,
                dwWin32ExitCode: st.dwWin32ExitCode,
                dwServiceSpecificExitCode: st.dwServiceSpecificExitCode,
                dwCheckPoint: st.dwCheckPoint,
                dwWaitHint: st.dwWaitHint,
            }))
        }
    }

    fn raw_service_start(&self, arguments: &[&str]) -> Result<()> {
        let arguments: Vec<Vec<u16>> = arguments.iter().map(|arg| to_wstr(arg)).collect();
        let mut pointers: Vec<*const u16> = arguments.iter().map(|arg| arg.as_ptr()).collect();
        Error::check_true(unsafe { StartServiceW(
            self.0,
            pointers.len() as u32,
            if pointers.is_empty() { null_mut() } else { pointers.as_mut_ptr() as *mut _ },
        ) })
    }

    // polls while the service reports `pending`, sleeping for its wait hint
    fn wait_for_status(&self, target: ServiceStatus, pending: ServiceStatus) -> Result<()> {
        loop {
            let status = self.query_status()?;
            if status.current_state == target {
                break Ok(());
            }
            if status.current_state != pending {
                break Err(Error{code: if status.win32_exit_code != 0 { status.exit_code() } else { ERROR_GEN_FAILURE }});
            }
            // the documented advice is a tenth of the hint, between one and ten seconds
            let wait = (status.wait_hint / 10).clamp(1000, 10000);
            unsafe { SleepEx(wait, 1) };
        }
    }
}

impl ServiceControlManager {

    pub fn open_local(access: Access) -> Result<Self> {
        let handle = unsafe { OpenSCManagerW(null_mut(), null_mut(), access.into_raw()) };
        if handle != null_mut () {
            Ok(Self(handle))
        } else {
            Err(Error::from_last())
        }
    }

    pub fn open_service(
        &self,
        service_name: &str,
    ) -> Result<InstalledService> {

        let service_name = to_wstr(service_name);

        let handle = unsafe { OpenServiceW(self.0, service_name.as_ptr(), SERVICE_ALL_ACCESS) };

        if handle != null_mut() {
            Ok(InstalledService(handle))
        } else {
            Err(Error::from_last())
        }
    }

    /// create a service that starts this executable with the specified arguments
    ///
    /// The service's `Parameters` key is created along with it.
    pub fn create_self_service(
        &self,
        service_name: &str,
        display_name: &str,
        arguments: &[&str],
        start_type: StartType,
        service_start_name: &str,
    ) -> Result<InstalledService> {

        let mut binary_path_name = get_this_module_filename_raw()?;
        let raw_service_name = to_wstr(service_name);
        let display_name = to_wstr(display_name);
        let service_start_name = to_wstr(service_start_name);

        for argument in arguments {
            tracing::trace!("arg: {}", argument);
            if argument.contains('"') {
                return Err(Error{code:ERROR_INVALID_PARAMETER});
            }
            binary_path_name.push(' ' as u16);
            let mut argument = to_wstr(argument);
            argument.truncate(argument.len() - 1);
            if argument.contains(&(' ' as u16)) {
                argument.insert(0, '"' as u16);
                argument.push('"' as u16);
            }
            binary_path_name.append(&mut argument);
        }
        binary_path_name.push(0);

        let password: [u16;1] = [0];

        let handle = unsafe {
            CreateServiceW(
                self.0,
                raw_service_name.as_ptr(),
                display_name.as_ptr(),
                SERVICE_ALL_ACCESS,
                ServiceProcessType::OWN_PROCESS.bits(),
                match start_type {
                    StartType::Auto => SERVICE_AUTO_START,
                    StartType::Demand => SERVICE_DEMAND_START,
                },
                SERVICE_ERROR_NORMAL,
                binary_path_name.as_ptr(),
                null_mut(), // lpLoadOrderGroup
                null_mut(), // lpdwTagId
                null_mut(), // lpDependencies
                service_start_name.as_ptr(),
                password.as_ptr(),
            )
        };

        if handle == null_mut() {
            return Err(Error::from_last());
        }

        let service = InstalledService(handle);
        registry::HKEY_LOCAL_MACHINE.create(registry::parameters_path(service_name))?;
        Ok(service)
    }
}

impl Drop for InstalledService {
    fn drop(&mut self) {
        unsafe { CloseServiceHandle (self.0) };
    }
}

impl Drop for ServiceControlManager {
    fn drop(&mut self) {
        unsafe { CloseServiceHandle (self.0) };
    }
}
