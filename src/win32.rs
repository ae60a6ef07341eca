//! Win32 numeric constants used by the service protocol.
//!
//! These mirror the values in `winerror.h` and `winsvc.h` so the engine and the
//! harness can speak the protocol on any platform.

pub const NO_ERROR: u32 = 0;
pub const ERROR_SUCCESS: u32 = 0;
pub const ERROR_FILE_NOT_FOUND: u32 = 2;
pub const ERROR_INVALID_HANDLE: u32 = 6;
pub const ERROR_INVALID_DATA: u32 = 13;
pub const ERROR_GEN_FAILURE: u32 = 31;
pub const ERROR_INVALID_PARAMETER: u32 = 87;
pub const ERROR_CALL_NOT_IMPLEMENTED: u32 = 120;
pub const ERROR_MORE_DATA: u32 = 234;
pub const ERROR_UNHANDLED_EXCEPTION: u32 = 574;
pub const ERROR_INVALID_SERVICE_CONTROL: u32 = 1052;
pub const ERROR_SERVICE_REQUEST_TIMEOUT: u32 = 1053;
pub const ERROR_SERVICE_ALREADY_RUNNING: u32 = 1056;
pub const ERROR_SERVICE_CANNOT_ACCEPT_CTRL: u32 = 1061;
pub const ERROR_SERVICE_NOT_ACTIVE: u32 = 1062;
pub const ERROR_SERVICE_SPECIFIC_ERROR: u32 = 1066;
pub const ERROR_SHUTDOWN_IN_PROGRESS: u32 = 1115;
pub const ERROR_UNSUPPORTED_TYPE: u32 = 1630;

pub const SERVICE_STOPPED: u32 = 0x1;
pub const SERVICE_START_PENDING: u32 = 0x2;
pub const SERVICE_STOP_PENDING: u32 = 0x3;
pub const SERVICE_RUNNING: u32 = 0x4;
pub const SERVICE_CONTINUE_PENDING: u32 = 0x5;
pub const SERVICE_PAUSE_PENDING: u32 = 0x6;
pub const SERVICE_PAUSED: u32 = 0x7;

pub const SERVICE_CONTROL_STOP: u32 = 0x1;
pub const SERVICE_CONTROL_PAUSE: u32 = 0x2;
pub const SERVICE_CONTROL_CONTINUE: u32 = 0x3;
pub const SERVICE_CONTROL_INTERROGATE: u32 = 0x4;
pub const SERVICE_CONTROL_SHUTDOWN: u32 = 0x5;
pub const SERVICE_CONTROL_PARAMCHANGE: u32 = 0x6;
pub const SERVICE_CONTROL_NETBINDADD: u32 = 0x7;
pub const SERVICE_CONTROL_NETBINDREMOVE: u32 = 0x8;
pub const SERVICE_CONTROL_NETBINDENABLE: u32 = 0x9;
pub const SERVICE_CONTROL_NETBINDDISABLE: u32 = 0xA;
pub const SERVICE_CONTROL_DEVICEEVENT: u32 = 0xB;
pub const SERVICE_CONTROL_HARDWAREPROFILECHANGE: u32 = 0xC;
pub const SERVICE_CONTROL_POWEREVENT: u32 = 0xD;
pub const SERVICE_CONTROL_SESSIONCHANGE: u32 = 0xE;
pub const SERVICE_CONTROL_PRESHUTDOWN: u32 = 0xF;
pub const SERVICE_CONTROL_TIMECHANGE: u32 = 0x10;
pub const SERVICE_CONTROL_TRIGGEREVENT: u32 = 0x20;
// missing from older SDK headers
pub const SERVICE_CONTROL_USERMODEREBOOT: u32 = 0x40;

pub const SERVICE_ACCEPT_STOP: u32 = 0x1;
pub const SERVICE_ACCEPT_PAUSE_CONTINUE: u32 = 0x2;
pub const SERVICE_ACCEPT_SHUTDOWN: u32 = 0x4;
pub const SERVICE_ACCEPT_PARAMCHANGE: u32 = 0x8;
pub const SERVICE_ACCEPT_NETBINDCHANGE: u32 = 0x10;
pub const SERVICE_ACCEPT_HARDWAREPROFILECHANGE: u32 = 0x20;
pub const SERVICE_ACCEPT_POWEREVENT: u32 = 0x40;
pub const SERVICE_ACCEPT_SESSIONCHANGE: u32 = 0x80;
pub const SERVICE_ACCEPT_PRESHUTDOWN: u32 = 0x100;
pub const SERVICE_ACCEPT_TIMECHANGE: u32 = 0x200;
pub const SERVICE_ACCEPT_TRIGGEREVENT: u32 = 0x400;
pub const SERVICE_ACCEPT_USERMODEREBOOT: u32 = 0x800;

pub const SERVICE_WIN32_OWN_PROCESS: u32 = 0x10;
pub const SERVICE_WIN32_SHARE_PROCESS: u32 = 0x20;
pub const SERVICE_INTERACTIVE_PROCESS: u32 = 0x100;

// built-in accounts a service can be installed to run as
pub const LOCAL_SERVICE: &str = "NT AUTHORITY\\LocalService";
pub const NETWORK_SERVICE: &str = "NT AUTHORITY\\NetworkService";
pub const LOCAL_SYSTEM: &str = "LocalSystem";

/// Short description of the codes above, used where `FormatMessageW` is unavailable.
pub fn describe(code: u32) -> Option<&'static str> {
    Some(match code {
        ERROR_SUCCESS => "The operation completed successfully.",
        ERROR_FILE_NOT_FOUND => "The system cannot find the file specified.",
        ERROR_INVALID_HANDLE => "The handle is invalid.",
        ERROR_INVALID_DATA => "The data is invalid.",
        ERROR_GEN_FAILURE => "A device attached to the system is not functioning.",
        ERROR_INVALID_PARAMETER => "The parameter is incorrect.",
        ERROR_CALL_NOT_IMPLEMENTED => "This function is not supported on this system.",
        ERROR_MORE_DATA => "More data is available.",
        ERROR_UNHANDLED_EXCEPTION => "An exception occurred in the service when handling the control request.",
        ERROR_INVALID_SERVICE_CONTROL => "The requested control is not valid for this service.",
        ERROR_SERVICE_REQUEST_TIMEOUT => "The service did not respond to the start or control request in a timely fashion.",
        ERROR_SERVICE_ALREADY_RUNNING => "An instance of the service is already running.",
        ERROR_SERVICE_CANNOT_ACCEPT_CTRL => "The service cannot accept control messages at this time.",
        ERROR_SERVICE_NOT_ACTIVE => "The service has not been started.",
        ERROR_SERVICE_SPECIFIC_ERROR => "The service has returned a service-specific error code.",
        ERROR_SHUTDOWN_IN_PROGRESS => "A system shutdown is in progress.",
        ERROR_UNSUPPORTED_TYPE => "Data of this type is not supported.",
        _ => return None,
    })
}
