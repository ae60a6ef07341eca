//! Typed service parameters and the store they are loaded from.
//!
//! A service declares [`Parameter`] fields and lists them by name through
//! `Service::parameters` (usually with [`parameter_map!`](crate::parameter_map)).
//! The engine binds each of them to the service's [`ParameterStore`] on start,
//! loads them, and reloads them whenever a `ParameterChange` control arrives.

mod value;

use std::{
    convert::TryFrom,
    fmt,
    sync::{Arc, Mutex, MutexGuard},
};

use tracing::{debug, warn};

use crate::{
    Error, Result,
    win32::{ERROR_FILE_NOT_FOUND, ERROR_INVALID_HANDLE, ERROR_MORE_DATA},
};

pub use value::{ParameterFormat, ParameterValue};

/// Opaque handle returned by [`ParameterStore::open`].
#[derive(Copy,Clone,Debug,Eq,PartialEq,Hash)]
pub struct ParameterHandle(pub usize);

/// Persistent named values for a service.
pub trait ParameterStore: Send + Sync {

    fn open(&self, service_name: &str) -> Result<ParameterHandle>;

    /// Reads the named value into `buffer` and returns its length in bytes.
    ///
    /// Without a buffer only the length is returned. Fails with
    /// `ERROR_FILE_NOT_FOUND` when there is no such value, `ERROR_UNSUPPORTED_TYPE`
    /// when it is stored in another format and `ERROR_MORE_DATA` when the
    /// buffer is too small.
    fn load(&self, handle: ParameterHandle, name: &str, format: ParameterFormat, buffer: Option<&mut [u8]>) -> Result<usize>;

    fn close(&self, handle: ParameterHandle);
}

/// A store with no values in it.
#[derive(Copy,Clone,Debug,Default)]
pub struct EmptyParameterStore;

impl ParameterStore for EmptyParameterStore {

    fn open(&self, _service_name: &str) -> Result<ParameterHandle> {
        Ok(ParameterHandle(0))
    }

    fn load(&self, _handle: ParameterHandle, _name: &str, _format: ParameterFormat, _buffer: Option<&mut [u8]>) -> Result<usize> {
        Err(Error{code:ERROR_FILE_NOT_FOUND})
    }

    fn close(&self, _handle: ParameterHandle) {}
}

/// Copies an encoded value out the way [`ParameterStore::load`] describes.
pub fn copy_value(bytes: &[u8], buffer: Option<&mut [u8]>) -> Result<usize> {
    if let Some(buffer) = buffer {
        buffer.fill(0);
        if buffer.len() < bytes.len() {
            return Err(Error{code:ERROR_MORE_DATA});
        }
        buffer[..bytes.len()].copy_from_slice(bytes);
    }
    Ok(bytes.len())
}

/// Probes the length of a value, then reads and decodes it.
pub fn load_value(store: &dyn ParameterStore, handle: ParameterHandle, name: &str, format: ParameterFormat) -> Result<ParameterValue> {
    // the value may grow between the two calls
    loop {
        let len = store.load(handle, name, format, None)?;
        let mut buffer = vec![0u8; len];
        match store.load(handle, name, format, Some(&mut buffer)) {
            Ok(len) => {
                buffer.truncate(len);
                return ParameterValue::from_bytes(format, &buffer);
            }
            Err(Error{code:ERROR_MORE_DATA}) => continue,
            Err(err) => return Err(err),
        }
    }
}

/// Rust types a [`Parameter`] can hold.
pub trait ParameterType: TryFrom<ParameterValue, Error=Error> + Clone + Send + Sync + 'static {
    const FORMAT: ParameterFormat;
}

impl ParameterType for String { const FORMAT: ParameterFormat = ParameterFormat::String; }
impl ParameterType for u32 { const FORMAT: ParameterFormat = ParameterFormat::DWord; }
impl ParameterType for u64 { const FORMAT: ParameterFormat = ParameterFormat::QWord; }
impl ParameterType for Vec<String> { const FORMAT: ParameterFormat = ParameterFormat::MultiString; }
impl ParameterType for Vec<u8> { const FORMAT: ParameterFormat = ParameterFormat::Binary; }

/// Type erased view of a [`Parameter`], used by the engine.
pub trait ServiceParameter: Send + Sync {

    fn bind(&self, store: Arc<dyn ParameterStore>, handle: ParameterHandle, name: &str);

    fn unbind(&self);

    fn load(&self) -> Result<()>;

    /// Loads the value, keeping the current one on failure.
    fn try_load(&self) -> bool {
        match self.load() {
            Ok(()) => true,
            Err(err) => {
                warn!("failed to load parameter: {}", err);
                false
            }
        }
    }
}

#[derive(Clone)]
struct Binding {
    store: Arc<dyn ParameterStore>,
    handle: ParameterHandle,
    name: String,
}

struct Slot<T> {
    value: T,
    defaulted: bool,
    binding: Option<Binding>,
}

/// A named value read from the service's parameter store, with a default.
pub struct Parameter<T> {
    slot: Mutex<Slot<T>>,
}

pub type StringParameter = Parameter<String>;
pub type DWordParameter = Parameter<u32>;
pub type QWordParameter = Parameter<u64>;
pub type MultiStringParameter = Parameter<Vec<String>>;
pub type BinaryParameter = Parameter<Vec<u8>>;

impl<T: ParameterType> Parameter<T> {

    pub fn new(default: T) -> Self {
        Self{ slot: Mutex::new(Slot{ value: default, defaulted: true, binding: None }) }
    }

    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn value(&self) -> T {
        self.lock().value.clone()
    }

    /// True until a value has been loaded from the store.
    pub fn is_defaulted(&self) -> bool {
        self.lock().defaulted
    }

    pub fn name(&self) -> Option<String> {
        self.lock().binding.as_ref().map(|binding| binding.name.clone())
    }
}

impl<T: ParameterType + Default> Default for Parameter<T> {
    fn default() -> Self { Self::new(T::default()) }
}

impl<T: ParameterType + fmt::Debug> fmt::Debug for Parameter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.lock();
        f.debug_struct("Parameter")
            .field("name", &slot.binding.as_ref().map(|binding| &binding.name))
            .field("value", &slot.value)
            .field("defaulted", &slot.defaulted)
            .finish()
    }
}

impl<T: ParameterType> ServiceParameter for Parameter<T> {

    fn bind(&self, store: Arc<dyn ParameterStore>, handle: ParameterHandle, name: &str) {
        debug!("binding parameter {:?}", name);
        self.lock().binding = Some(Binding{ store, handle, name: name.into() });
    }

    fn unbind(&self) {
        self.lock().binding = None;
    }

    fn load(&self) -> Result<()> {
        let binding = self.lock().binding.clone().ok_or(Error{code:ERROR_INVALID_HANDLE})?;
        let value = load_value(&*binding.store, binding.handle, &binding.name, T::FORMAT)?;
        let value = T::try_from(value)?;
        let mut slot = self.lock();
        slot.value = value;
        slot.defaulted = false;
        Ok(())
    }
}

/// Implements `Service::parameters` from a list of `"Name" => field` pairs.
///
/// ```ignore
/// svckit::parameter_map!{
///     "Greeting" => greeting,
///     "Interval" => interval,
/// }
/// ```
#[macro_export]
macro_rules! parameter_map {
    ( $( $name:literal => $field:ident ),* $(,)? ) => {
        fn parameters(&self) -> ::std::vec::Vec<(&'static str, &dyn $crate::ServiceParameter)> {
            ::std::vec![
                $( ($name, &self.$field as &dyn $crate::ServiceParameter), )*
            ]
        }
    };
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::win32::ERROR_UNSUPPORTED_TYPE;
    use std::collections::HashMap;

    #[derive(Default)]
    struct MapStore(Mutex<HashMap<String, ParameterValue>>);

    impl MapStore {
        fn set(&self, name: &str, value: impl Into<ParameterValue>) {
            self.0.lock().unwrap().insert(name.into(), value.into());
        }
    }

    impl ParameterStore for MapStore {
        fn open(&self, _service_name: &str) -> Result<ParameterHandle> { Ok(ParameterHandle(1)) }

        fn load(&self, _handle: ParameterHandle, name: &str, format: ParameterFormat, buffer: Option<&mut [u8]>) -> Result<usize> {
            let values = self.0.lock().unwrap();
            let value = values.get(name).ok_or(Error{code:ERROR_FILE_NOT_FOUND})?;
            if value.format() != format {
                return Err(Error{code:ERROR_UNSUPPORTED_TYPE});
            }
            copy_value(&value.to_bytes(), buffer)
        }

        fn close(&self, _handle: ParameterHandle) {}
    }

    fn bound<T: ParameterType>(store: &Arc<MapStore>, name: &str, default: T) -> Parameter<T> {
        let parameter = Parameter::new(default);
        parameter.bind(store.clone(), ParameterHandle(1), name);
        parameter
    }

    #[test]
    fn load_replaces_default() {
        let store = Arc::new(MapStore::default());
        store.set("Greeting", "hello");
        let greeting = bound(&store, "Greeting", String::from("default"));
        assert!(greeting.is_defaulted());
        assert_eq!(greeting.value(), "default");
        greeting.load().unwrap();
        assert!(!greeting.is_defaulted());
        assert_eq!(greeting.value(), "hello");
        assert_eq!(greeting.name().as_deref(), Some("Greeting"));
    }

    #[test]
    fn try_load_keeps_previous_value() {
        let store = Arc::new(MapStore::default());
        let interval = bound(&store, "Interval", 10u32);
        assert!(!interval.try_load());
        assert_eq!(interval.value(), 10);

        store.set("Interval", "not a number");
        assert_eq!(interval.load(), Err(Error{code:ERROR_UNSUPPORTED_TYPE}));
        assert_eq!(interval.value(), 10);
        assert!(interval.is_defaulted());
    }

    #[test]
    fn unbound_parameter_cannot_load() {
        let list = MultiStringParameter::default();
        assert_eq!(list.load(), Err(Error{code:ERROR_INVALID_HANDLE}));
    }

    #[test]
    fn short_buffer_reports_more_data() {
        let mut buffer = [0xffu8; 2];
        assert_eq!(copy_value(&[1, 2, 3, 4], Some(&mut buffer)), Err(Error{code:ERROR_MORE_DATA}));
        assert_eq!(buffer, [0, 0]);
        assert_eq!(copy_value(&[1, 2, 3, 4], None), Ok(4));
    }
}
