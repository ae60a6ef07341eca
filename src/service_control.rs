use std::ffi::c_void;

use bitflags::bitflags;

use crate::win32::*;

/// A control request delivered to a running service.
#[derive(Copy,Clone,Debug,Eq,PartialEq,Hash)]
pub enum ServiceControl {
    Stop,
    Pause,
    Continue,
    Interrogate,
    Shutdown,
    ParameterChange,
    NetBindAdd,
    NetBindRemove,
    NetBindEnable,
    NetBindDisable,
    DeviceEvent,
    HardwareProfileChange,
    PowerEvent,
    SessionChange,
    PreShutdown,
    TimeChange,
    TriggerEvent,
    UserModeReboot,
    /// any other code, user defined codes are 128 through 255
    Custom(u32),
}

impl ServiceControl {

    pub const USER_DEFINED: std::ops::RangeInclusive<u32> = 128..=255;

    pub fn from_raw(code: u32) -> Self {
        match code {
            SERVICE_CONTROL_STOP => Self::Stop,
            SERVICE_CONTROL_PAUSE => Self::Pause,
            SERVICE_CONTROL_CONTINUE => Self::Continue,
            SERVICE_CONTROL_INTERROGATE => Self::Interrogate,
            SERVICE_CONTROL_SHUTDOWN => Self::Shutdown,
            SERVICE_CONTROL_PARAMCHANGE => Self::ParameterChange,
            SERVICE_CONTROL_NETBINDADD => Self::NetBindAdd,
            SERVICE_CONTROL_NETBINDREMOVE => Self::NetBindRemove,
            SERVICE_CONTROL_NETBINDENABLE => Self::NetBindEnable,
            SERVICE_CONTROL_NETBINDDISABLE => Self::NetBindDisable,
            SERVICE_CONTROL_DEVICEEVENT => Self::DeviceEvent,
            SERVICE_CONTROL_HARDWAREPROFILECHANGE => Self::HardwareProfileChange,
            SERVICE_CONTROL_POWEREVENT => Self::PowerEvent,
            SERVICE_CONTROL_SESSIONCHANGE => Self::SessionChange,
            SERVICE_CONTROL_PRESHUTDOWN => Self::PreShutdown,
            SERVICE_CONTROL_TIMECHANGE => Self::TimeChange,
            SERVICE_CONTROL_TRIGGEREVENT => Self::TriggerEvent,
            SERVICE_CONTROL_USERMODEREBOOT => Self::UserModeReboot,
            other => Self::Custom(other),
        }
    }

    pub fn to_raw(self) -> u32 {
        match self {
            Self::Stop => SERVICE_CONTROL_STOP,
            Self::Pause => SERVICE_CONTROL_PAUSE,
            Self::Continue => SERVICE_CONTROL_CONTINUE,
            Self::Interrogate => SERVICE_CONTROL_INTERROGATE,
            Self::Shutdown => SERVICE_CONTROL_SHUTDOWN,
            Self::ParameterChange => SERVICE_CONTROL_PARAMCHANGE,
            Self::NetBindAdd => SERVICE_CONTROL_NETBINDADD,
            Self::NetBindRemove => SERVICE_CONTROL_NETBINDREMOVE,
            Self::NetBindEnable => SERVICE_CONTROL_NETBINDENABLE,
            Self::NetBindDisable => SERVICE_CONTROL_NETBINDDISABLE,
            Self::DeviceEvent => SERVICE_CONTROL_DEVICEEVENT,
            Self::HardwareProfileChange => SERVICE_CONTROL_HARDWAREPROFILECHANGE,
            Self::PowerEvent => SERVICE_CONTROL_POWEREVENT,
            Self::SessionChange => SERVICE_CONTROL_SESSIONCHANGE,
            Self::PreShutdown => SERVICE_CONTROL_PRESHUTDOWN,
            Self::TimeChange => SERVICE_CONTROL_TIMECHANGE,
            Self::TriggerEvent => SERVICE_CONTROL_TRIGGEREVENT,
            Self::UserModeReboot => SERVICE_CONTROL_USERMODEREBOOT,
            Self::Custom(code) => code,
        }
    }

    pub fn is_user_defined(self) -> bool {
        Self::USER_DEFINED.contains(&self.to_raw())
    }

    /// The accept flag a registered handler for this control advertises.
    ///
    /// `Interrogate`, `DeviceEvent` and custom codes never contribute a flag.
    pub fn accept_flag(self) -> ServiceControlAccept {
        match self {
            Self::Stop => ServiceControlAccept::STOP,
            Self::Pause | Self::Continue => ServiceControlAccept::PAUSE_CONTINUE,
            Self::Shutdown => ServiceControlAccept::SHUTDOWN,
            Self::ParameterChange => ServiceControlAccept::PARAMCHANGE,
            Self::NetBindAdd | Self::NetBindRemove
                | Self::NetBindEnable | Self::NetBindDisable => ServiceControlAccept::NETBINDCHANGE,
            Self::HardwareProfileChange => ServiceControlAccept::HARDWAREPROFILECHANGE,
            Self::PowerEvent => ServiceControlAccept::POWEREVENT,
            Self::SessionChange => ServiceControlAccept::SESSIONCHANGE,
            Self::PreShutdown => ServiceControlAccept::PRESHUTDOWN,
            Self::TimeChange => ServiceControlAccept::TIMECHANGE,
            Self::TriggerEvent => ServiceControlAccept::TRIGGEREVENT,
            Self::UserModeReboot => ServiceControlAccept::USERMODEREBOOT,
            Self::Interrogate | Self::DeviceEvent | Self::Custom(_) => ServiceControlAccept::empty(),
        }
    }

    /// Whether a service advertising `accepted` may be sent this control.
    pub fn accepted_by(self, accepted: ServiceControlAccept) -> bool {
        match self {
            Self::Interrogate => true,
            Self::DeviceEvent => false,
            Self::Custom(_) => self.is_user_defined(),
            other => accepted.contains(other.accept_flag()),
        }
    }
}

impl From<u32> for ServiceControl {
    fn from(code: u32) -> Self { Self::from_raw(code) }
}

impl From<ServiceControl> for u32 {
    fn from(control: ServiceControl) -> Self { control.to_raw() }
}

bitflags! {
    /// Controls a service advertises it will accept.
    #[derive(Copy,Clone,Debug,Default,Eq,PartialEq,Hash)]
    pub struct ServiceControlAccept: u32 {
        const STOP = SERVICE_ACCEPT_STOP;
        const PAUSE_CONTINUE = SERVICE_ACCEPT_PAUSE_CONTINUE;
        const SHUTDOWN = SERVICE_ACCEPT_SHUTDOWN;
        const PARAMCHANGE = SERVICE_ACCEPT_PARAMCHANGE;
        const NETBINDCHANGE = SERVICE_ACCEPT_NETBINDCHANGE;
        const HARDWAREPROFILECHANGE = SERVICE_ACCEPT_HARDWAREPROFILECHANGE;
        const POWEREVENT = SERVICE_ACCEPT_POWEREVENT;
        const SESSIONCHANGE = SERVICE_ACCEPT_SESSIONCHANGE;
        const PRESHUTDOWN = SERVICE_ACCEPT_PRESHUTDOWN;
        const TIMECHANGE = SERVICE_ACCEPT_TIMECHANGE;
        const TRIGGEREVENT = SERVICE_ACCEPT_TRIGGEREVENT;
        const USERMODEREBOOT = SERVICE_ACCEPT_USERMODEREBOOT;
    }
}

/// Opaque event data pointer passed along with some controls.
///
/// Its layout depends on the control and event type, see the documentation of
/// `HandlerEx` for details.
#[derive(Copy,Clone,Debug,Eq,PartialEq)]
pub struct EventData(*mut c_void);

// the pointer is only ever handed back to the handler of the control it arrived with
unsafe impl Send for EventData {}
unsafe impl Sync for EventData {}

impl EventData {

    pub const fn none() -> Self { Self(std::ptr::null_mut()) }

    pub fn from_raw(data: *mut c_void) -> Self { Self(data) }

    pub fn is_null(&self) -> bool { self.0.is_null() }

    /// # Safety
    ///
    /// The caller must know the layout the control and event type imply, and
    /// must not use the pointer after the handler returns.
    pub unsafe fn as_ptr<T>(&self) -> *mut T { self.0 as *mut T }
}

impl Default for EventData {
    fn default() -> Self { Self::none() }
}
