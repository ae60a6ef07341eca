use bitflags::bitflags;

use crate::{win32::*, ServiceControlAccept};

#[derive(Copy,Clone,Debug,Eq,PartialEq,Hash)]
pub enum ServiceStatus {
    Stopped,
    StartPending,
    StopPending,
    Running,
    ContinuePending,
    PausePending,
    Paused,
}

impl ServiceStatus {

    pub fn from_raw(state: u32) -> Option<Self> {
        match state {
            SERVICE_STOPPED => Some(Self::Stopped),
            SERVICE_START_PENDING => Some(Self::StartPending),
            SERVICE_STOP_PENDING => Some(Self::StopPending),
            SERVICE_RUNNING => Some(Self::Running),
            SERVICE_CONTINUE_PENDING => Some(Self::ContinuePending),
            SERVICE_PAUSE_PENDING => Some(Self::PausePending),
            SERVICE_PAUSED => Some(Self::Paused),
            _ => None,
        }
    }

    pub fn to_raw(self) -> u32 {
        match self {
            Self::Stopped => SERVICE_STOPPED,
            Self::StartPending => SERVICE_START_PENDING,
            Self::StopPending => SERVICE_STOP_PENDING,
            Self::Running => SERVICE_RUNNING,
            Self::ContinuePending => SERVICE_CONTINUE_PENDING,
            Self::PausePending => SERVICE_PAUSE_PENDING,
            Self::Paused => SERVICE_PAUSED,
        }
    }

    pub fn is_pending(self) -> bool {
        matches!(self, Self::StartPending | Self::StopPending | Self::ContinuePending | Self::PausePending)
    }
}

impl Default for ServiceStatus {
    fn default() -> Self { Self::Stopped }
}

bitflags! {
    #[derive(Copy,Clone,Debug,Default,Eq,PartialEq,Hash)]
    pub struct ServiceProcessType: u32 {
        const OWN_PROCESS = SERVICE_WIN32_OWN_PROCESS;
        const SHARE_PROCESS = SERVICE_WIN32_SHARE_PROCESS;
        const INTERACTIVE_PROCESS = SERVICE_INTERACTIVE_PROCESS;
    }
}

/// Snapshot of what a service reports to its controller, shaped like `SERVICE_STATUS`.
#[derive(Copy,Clone,Debug,Eq,PartialEq)]
pub struct ServiceStatusRecord {
    pub service_type: ServiceProcessType,
    pub current_state: ServiceStatus,
    pub controls_accepted: ServiceControlAccept,
    pub win32_exit_code: u32,
    pub service_specific_exit_code: u32,
    pub checkpoint: u32,
    pub wait_hint: u32,
}

impl ServiceStatusRecord {

    pub fn stopped(service_type: ServiceProcessType) -> Self {
        Self{
            service_type,
            current_state: ServiceStatus::Stopped,
            controls_accepted: ServiceControlAccept::empty(),
            win32_exit_code: NO_ERROR,
            service_specific_exit_code: 0,
            checkpoint: 0,
            wait_hint: 0,
        }
    }

    /// The exit code this record reports, taking the service specific code into account.
    pub fn exit_code(&self) -> u32 {
        if self.win32_exit_code == ERROR_SERVICE_SPECIFIC_ERROR && self.service_specific_exit_code != 0 {
            self.service_specific_exit_code
        } else {
            self.win32_exit_code
        }
    }

    /// Stopped with a non-success exit code.
    pub fn is_failed(&self) -> bool {
        self.current_state == ServiceStatus::Stopped && self.win32_exit_code != NO_ERROR
    }
}

impl Default for ServiceStatusRecord {
    fn default() -> Self { Self::stopped(ServiceProcessType::empty()) }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn pending_states() {
        use ServiceStatus::*;
        for status in [StartPending, StopPending, ContinuePending, PausePending] {
            assert!(status.is_pending());
            assert_eq!(ServiceStatus::from_raw(status.to_raw()), Some(status));
        }
        for status in [Stopped, Running, Paused] {
            assert!(!status.is_pending());
        }
        assert_eq!(ServiceStatus::from_raw(0), None);
    }

    #[test]
    fn service_specific_exit_code_is_surfaced() {
        let mut record = ServiceStatusRecord::default();
        assert!(!record.is_failed());
        record.win32_exit_code = ERROR_SERVICE_SPECIFIC_ERROR;
        record.service_specific_exit_code = 42;
        assert!(record.is_failed());
        assert_eq!(record.exit_code(), 42);
    }
}
