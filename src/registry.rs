//! Registry backed parameter store.
//!
//! Parameters of a service live under
//! `HKLM\System\CurrentControlSet\Services\<name>\Parameters`.

use std::{
    collections::HashMap,
    ffi::OsStr,
    mem::MaybeUninit,
    ptr::null_mut,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
};

use winapi::{
    shared::minwindef::HKEY,
    um::{
        winnt::{
            KEY_READ,
            KEY_WRITE,
            REG_BINARY,
            REG_DWORD,
            REG_EXPAND_SZ,
            REG_MULTI_SZ,
            REG_QWORD,
            REG_SZ,
        },
        winreg::{
            self,
            RegCloseKey,
            RegCreateKeyExW,
            RegOpenKeyExW,
            RegQueryValueExW,
        },
    },
};

use crate::{
    win32::{ERROR_INVALID_HANDLE, ERROR_MORE_DATA, ERROR_UNSUPPORTED_TYPE},
    Error, ParameterFormat, ParameterHandle, ParameterStore, Result, ServiceProcessType,
    to_wstr,
};

pub const SERVICES_KEY: &str = "System\\CurrentControlSet\\Services";

pub struct Key(HKEY);

// registry handles are not tied to the thread that opened them
unsafe impl Send for Key {}

pub const HKEY_LOCAL_MACHINE: Key = Key(winreg::HKEY_LOCAL_MACHINE);

impl Key {

    /// open a key for reading
    pub fn open(&self, path: impl AsRef<OsStr>) -> Result<Key> {
        tracing::trace!("opening: {:?}", path.as_ref());
        unsafe {
            let path = to_wstr(path);
            let mut subkey = MaybeUninit::<HKEY>::uninit();

            Error::check_code(
                RegOpenKeyExW(
                    /* hKey       */ self.0,
                    /* lpSubKey   */ path.as_ptr(),
                    /* ulOptions  */ 0u32,
                    /* samDesired */ KEY_READ,
                    /* phkResult  */ subkey.as_mut_ptr()
                )
            )?;

            Ok(Self(subkey.assume_init()))
        }
    }

    /// create a new or open an existing key for writing
    pub fn create(&self, path: impl AsRef<OsStr>) -> Result<Key> {
        tracing::trace!("creating: {:?}", path.as_ref());
        unsafe {
            let path = to_wstr(path);
            let mut subkey = MaybeUninit::<HKEY>::uninit();

            Error::check_code(
                RegCreateKeyExW(
                    /* hKey                 */ self.0,
                    /* lpSubKey             */ path.as_ptr(),
                    /* Reserved             */ 0u32,
                    /* lpClass              */ null_mut(),
                    /* dwOptions            */ 0u32,
                    /* samDesired           */ KEY_READ | KEY_WRITE,
                    /* lpSecurityAttributes */ null_mut(),
                    /* phkResult            */ subkey.as_mut_ptr(),
                    /* lpdwDisposition      */ null_mut(),
                )
            )?;

            Ok(Self(subkey.assume_init()))
        }
    }

    /// Reads the raw bytes of a value into `buffer`, returning `(type, length)`.
    ///
    /// Without a buffer only the type and length are returned.
    pub fn query_raw(&self, name: &str, buffer: Option<&mut [u8]>) -> Result<(u32, usize)> {
        let value_name = to_wstr(name);
        let (value_ptr, mut value_len) = match buffer {
            Some(buffer) => (buffer.as_mut_ptr(), buffer.len() as u32),
            None => (null_mut(), 0),
        };
        let mut value_type: u32 = 0;
        Error::check_code(unsafe { RegQueryValueExW(
            /* hKey        */ self.0,
            /* lpValueName */ value_name.as_ptr(),
            /* lpReserved  */ null_mut(),
            /* lpType      */ &mut value_type,
            /* lpData      */ value_ptr,
            /* lpcbData    */ &mut value_len,
        ) })?;
        Ok((value_type, value_len as usize))
    }

    pub fn query_dword(&self, name: &str) -> Result<u32> {
        let mut buffer = [0u8; 4];
        match self.query_raw(name, Some(&mut buffer))? {
            (REG_DWORD, 4) => Ok(u32::from_le_bytes(buffer)),
            _ => Err(Error{code:ERROR_UNSUPPORTED_TYPE}),
        }
    }
}

impl Drop for Key {
    fn drop(&mut self) {
        // the predefined root keys are not ours to close
        if self.0 != winreg::HKEY_LOCAL_MACHINE {
            unsafe { RegCloseKey(self.0); }
        }
    }
}

fn matches_format(value_type: u32, format: ParameterFormat) -> bool {
    match format {
        ParameterFormat::String => value_type == REG_SZ || value_type == REG_EXPAND_SZ,
        ParameterFormat::MultiString => value_type == REG_MULTI_SZ,
        ParameterFormat::Binary => value_type == REG_BINARY,
        ParameterFormat::DWord => value_type == REG_DWORD,
        ParameterFormat::QWord => value_type == REG_QWORD,
    }
}

pub fn parameters_path(service_name: &str) -> String {
    format!("{}\\{}\\Parameters", SERVICES_KEY, service_name)
}

/// The `Type` the service was installed with.
pub fn read_process_type(service_name: &str) -> Result<ServiceProcessType> {
    let key = HKEY_LOCAL_MACHINE.open(format!("{}\\{}", SERVICES_KEY, service_name))?;
    Ok(ServiceProcessType::from_bits_truncate(key.query_dword("Type")?))
}

#[derive(Default)]
pub struct RegistryParameterStore {
    keys: Mutex<HashMap<usize, Key>>,
    next_handle: AtomicUsize,
}

impl ParameterStore for RegistryParameterStore {

    fn open(&self, service_name: &str) -> Result<ParameterHandle> {
        let key = HKEY_LOCAL_MACHINE.open(parameters_path(service_name))?;
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed) + 1;
        self.keys.lock().unwrap_or_else(|e| e.into_inner()).insert(handle, key);
        Ok(ParameterHandle(handle))
    }

    fn load(&self, handle: ParameterHandle, name: &str, format: ParameterFormat, buffer: Option<&mut [u8]>) -> Result<usize> {
        let keys = self.keys.lock().unwrap_or_else(|e| e.into_inner());
        let key = keys.get(&handle.0).ok_or(Error{code:ERROR_INVALID_HANDLE})?;

        let (value_type, len) = key.query_raw(name, None)?;
        if !matches_format(value_type, format) {
            return Err(Error{code:ERROR_UNSUPPORTED_TYPE});
        }

        match buffer {
            None => Ok(len),
            Some(buffer) => {
                buffer.fill(0);
                if buffer.len() < len {
                    return Err(Error{code:ERROR_MORE_DATA});
                }
                let (_, len) = key.query_raw(name, Some(buffer))?;
                Ok(len)
            }
        }
    }

    fn close(&self, handle: ParameterHandle) {
        self.keys.lock().unwrap_or_else(|e| e.into_inner()).remove(&handle.0);
    }
}
