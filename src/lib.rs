//! Windows Service Framework
//!
//! This crate lets an application implement a windows service by implementing
//! the [`Service`] trait and declaring its control handlers and parameters,
//! instead of hand writing the status reporting and control dispatch protocol
//! the service control manager expects. The same service type can be hosted by
//! the real service control manager or by [`ServiceHarness`], an in-process
//! emulator that runs the service on an ordinary thread for testing.
//!
//! ```
//! use svckit::{Service, ServiceEngine, ServiceControl, ServiceHarness, DWordParameter, Result};
//! use std::sync::Arc;
//!
//! #[derive(Default)]
//! struct Minimal {
//!     rate: DWordParameter,
//! }
//!
//! impl Minimal {
//!     fn on_stop(&self) -> Result<()> { Ok(()) }
//! }
//!
//! impl Service for Minimal {
//!     fn on_start(&self, _engine: &Arc<ServiceEngine<Self>>, _args: &[String]) -> Result<()> {
//!         Ok(())
//!     }
//!
//!     svckit::control_handler_map!{ Minimal {
//!         ServiceControl::Stop => Minimal::on_stop,
//!     }}
//!
//!     svckit::parameter_map!{
//!         "Rate" => rate,
//!     }
//! }
//!
//! let harness = ServiceHarness::<Minimal>::new();
//! harness.set_parameter("Rate", 250u32).unwrap();
//! harness.start("Minimal", Vec::<String>::new()).unwrap();
//! harness.stop().unwrap();
//! ```

pub mod win32;
pub mod signal;
pub mod service_control;
pub mod service_status;
pub mod control_handler;
pub mod parameter;
pub mod service;
pub mod service_engine;
pub mod service_harness;

#[cfg(windows)]
pub mod registry;

#[cfg(windows)]
pub mod service_dispatcher;

#[cfg(windows)]
pub mod service_control_manager;

#[cfg(feature = "async_main")]
pub mod async_worker;

#[cfg(feature = "serde_config")]
pub mod serde_config;

#[cfg(feature = "std_cli")]
pub mod std_cli;

use std::fmt;

pub use control_handler::ControlHandler;
pub use parameter::{
    BinaryParameter, DWordParameter, MultiStringParameter, Parameter, ParameterFormat,
    ParameterHandle, ParameterStore, ParameterValue, QWordParameter, ServiceParameter,
    StringParameter,
};
pub use service::{Service, ServiceContext, ServiceDriver, StatusHandle};
pub use service_control::{EventData, ServiceControl, ServiceControlAccept};
pub use service_engine::ServiceEngine;
pub use service_harness::ServiceHarness;
pub use service_status::{ServiceProcessType, ServiceStatus, ServiceStatusRecord};
pub use signal::{ResetMode, Signal};

#[derive(Copy,Clone,Eq,PartialEq,Hash)]
pub struct Error{pub code:u32}

pub type Result<T> = std::result::Result<T,Error>;

/// types that can be used for true/false checks
pub trait IsTrue {
    fn is_true(&self) -> bool;
}

impl IsTrue for bool { fn is_true(&self) -> bool { *self } }
impl IsTrue for u32 { fn is_true(&self) -> bool { *self != 0 } }
impl IsTrue for i32 { fn is_true(&self) -> bool { *self != 0 } }

impl Error {

    pub const fn new(code: u32) -> Self {
        Self{code}
    }

    #[cfg(windows)]
    pub fn from_last() -> Self {
        Self{code:unsafe{winapi::um::errhandlingapi::GetLastError()}}
    }

    #[cfg(windows)]
    pub fn check_true(value: impl IsTrue) -> Result<()> {
        if value.is_true() {
            Ok(())
        } else {
            Err(Error::from_last())
        }
    }

    pub fn check_code(code: i32) -> Result<()> {
        if code == 0 {
            Ok(())
        } else {
            Err(Error{code:code as u32})
        }
    }

    /// Exit code reported when this error stops a service; never reports success.
    pub fn exit_code(&self) -> u32 {
        if self.code == win32::ERROR_SUCCESS {
            win32::ERROR_SERVICE_SPECIFIC_ERROR
        } else {
            self.code
        }
    }

    fn format (&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match crate::format_error (self.code) {
            Some(message) => f.write_str(&message),
            None => write!(f, "unknown error code {}", self.code)
        }
    }
}

impl std::error::Error for Error {}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{}] ", self.code)?;
        self.format(f)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result { self.format(f) }
}

impl From<u32> for Error {
    fn from(code: u32) -> Self { Self{code} }
}

// io errors without an os code carry no win32 meaning
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self{code: err.raw_os_error().map(|code| code as u32).unwrap_or(win32::ERROR_GEN_FAILURE)}
    }
}


#[cfg(windows)]
fn osstr_to_wchars (os_str: &std::ffi::OsStr) -> Vec<u16> {
    use std::{iter::once, os::windows::ffi::OsStrExt};
    os_str.encode_wide ().chain (once (0)).collect ()
}

#[cfg(windows)]
fn to_wstr(input: impl AsRef<std::ffi::OsStr>) -> Vec<u16>
{
    osstr_to_wchars(input.as_ref())
}


#[cfg(windows)]
pub fn get_this_module_filename_raw() -> Result<Vec<u16>> {
    use std::ptr::null_mut;
    use winapi::{
        um::{psapi::GetModuleFileNameExW, processthreadsapi::GetCurrentProcess},
        shared::minwindef::MAX_PATH,
    };

    let mut buffer = Vec::<u16>::new();

    buffer.resize(MAX_PATH, 0);

    let len = unsafe { GetModuleFileNameExW(GetCurrentProcess(), null_mut(), buffer.as_mut_ptr(), buffer.len() as u32) };

    if len > 0 {
        buffer.resize(len as usize, 0);
        Ok(buffer)
    } else {
        Err(Error::from_last())
    }
}


/// Format a Win32 error code into a descriptive message.
#[cfg(windows)]
pub fn format_error(code: u32) -> Option<String> {

    use std::{mem::MaybeUninit, ptr::null_mut, os::windows::ffi::OsStringExt};
    use winapi::um::{
        winnt::WCHAR,
        winbase::{
        FormatMessageW,
        FORMAT_MESSAGE_FROM_SYSTEM
        }
    };

    unsafe {

        const BUF_SIZE: usize = 1024;

        let mut buffer: [MaybeUninit<WCHAR>; BUF_SIZE] = MaybeUninit::uninit ().assume_init();

        let len = FormatMessageW(
            FORMAT_MESSAGE_FROM_SYSTEM,
            null_mut(),
            code, 0,
            buffer.as_mut_ptr() as *mut u16,
            BUF_SIZE as u32,
            null_mut ()
        ) as usize;

        if len > 0 {

            let slice = std::slice::from_raw_parts(buffer.as_ptr() as *const WCHAR, len);

            let message = std::ffi::OsString::from_wide (slice);

            Some(String::from (message.to_string_lossy ().trim ()))

        } else {
            None
        }
    }

}

/// Format a Win32 error code into a descriptive message.
///
/// Off windows only the codes this crate produces itself are known.
#[cfg(not(windows))]
pub fn format_error(code: u32) -> Option<String> {
    win32::describe(code).map(String::from)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn exit_code_never_reports_success() {
        assert_eq!(Error::new(0).exit_code(), win32::ERROR_SERVICE_SPECIFIC_ERROR);
        assert_eq!(Error::new(win32::ERROR_FILE_NOT_FOUND).exit_code(), win32::ERROR_FILE_NOT_FOUND);
    }

    #[test]
    fn display_falls_back_to_code() {
        let message = Error::new(0xdead_beef).to_string();
        assert!(!message.is_empty());
    }
}
