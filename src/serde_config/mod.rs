//! Typed configuration blocks stored as service parameters.
//!
//! Each field of a flat struct maps onto the parameter of the same name.
//! Strings, integers, booleans, unit enum variants, string lists and byte
//! buffers are supported; floats, maps and nested structs are rejected with
//! `ERROR_INVALID_DATA`. Fields without a stored value fall back to serde
//! defaults (or `None`), otherwise loading fails with `ERROR_FILE_NOT_FOUND`.

mod serializer;
mod deserializer;

pub use serializer::*;
pub use deserializer::*;

use serde::{de::DeserializeOwned, Serialize};

use crate::{ParameterHandle, ParameterStore, ParameterValue, Result};

/// Flattens `value` into `(name, value)` pairs, one per present field.
pub fn to_values(value: &impl Serialize) -> Result<Vec<(String, ParameterValue)>> {
    let mut serializer = Serializer::new();
    value.serialize(&mut serializer)?;
    Ok(serializer.into_values())
}

pub fn load<T: DeserializeOwned>(store: &dyn ParameterStore, handle: ParameterHandle) -> Result<T> {
    let mut deserializer = Deserializer::new(store, handle);
    T::deserialize(&mut deserializer)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        parameter::copy_value,
        win32::{ERROR_FILE_NOT_FOUND, ERROR_INVALID_DATA, ERROR_UNSUPPORTED_TYPE},
        control_handler_map,
        Error, ParameterFormat, Service, ServiceControl, ServiceEngine, ServiceHarness,
    };

    use std::{
        collections::HashMap,
        sync::{Arc, Mutex},
    };

    use serde::Deserialize;

    #[derive(Default)]
    struct MapStore(Mutex<HashMap<String, ParameterValue>>);

    impl MapStore {
        fn with(values: Vec<(String, ParameterValue)>) -> Self {
            Self(Mutex::new(values.into_iter().collect()))
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

    #[derive(Serialize, Deserialize, Debug, Eq, PartialEq, Clone, Copy)]
    enum Level {
        Quiet,
        Verbose,
    }

    #[derive(Serialize, Deserialize, Debug, Eq, PartialEq)]
    struct Settings {
        greeting: String,
        port: u16,
        offset: i32,
        budget: u64,
        enabled: bool,
        level: Level,
        peers: Vec<String>,
        nickname: Option<String>,
    }

    impl Default for Settings {
        fn default() -> Self {
            Self{
                greeting: "Hello World".into(),
                port: 8080,
                offset: -3,
                budget: 1 << 40,
                enabled: true,
                level: Level::Verbose,
                peers: vec!["alpha".into(), "beta".into()],
                nickname: None,
            }
        }
    }

    #[derive(Serialize, Deserialize, Debug, Eq, PartialEq)]
    struct Sparse {
        greeting: String,
        #[serde(default)]
        retries: u32,
        label: Option<String>,
    }

    #[derive(Serialize)]
    struct Outer {
        inner: Sparse,
    }

    #[derive(Serialize)]
    struct Ratio {
        value: f64,
    }

    #[test]
    fn fields_become_values() {
        let values = to_values(&Settings::default()).unwrap();
        let names: Vec<&str> = values.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, ["greeting", "port", "offset", "budget", "enabled", "level", "peers"]);
        assert_eq!(values[1].1, ParameterValue::DWord(8080));
        assert_eq!(values[2].1, ParameterValue::DWord(-3i32 as u32));
        assert_eq!(values[3].1, ParameterValue::QWord(1 << 40));
        assert_eq!(values[5].1, ParameterValue::String("Verbose".into()));
        assert_eq!(values[6].1, ParameterValue::MultiString(vec!["alpha".into(), "beta".into()]));
    }

    #[test]
    fn stored_values_load_back() {
        let org = Settings{ nickname: Some("svc".into()), level: Level::Quiet, ..Settings::default() };
        let store = MapStore::with(to_values(&org).unwrap());
        let loaded: Settings = load(&store, ParameterHandle(1)).unwrap();
        assert_eq!(loaded, org);
    }

    #[test]
    fn missing_fields() {
        let store = MapStore::with(vec![("greeting".into(), "hi".into())]);
        let loaded: Sparse = load(&store, ParameterHandle(1)).unwrap();
        assert_eq!(loaded, Sparse{ greeting: "hi".into(), retries: 0, label: None });

        let empty = MapStore::default();
        assert_eq!(load::<Sparse>(&empty, ParameterHandle(1)), Err(Error{code:ERROR_FILE_NOT_FOUND}));
    }

    #[test]
    fn wrong_format() {
        let store = MapStore::with(vec![
            ("greeting".into(), "hi".into()),
            ("retries".into(), "three".into()),
        ]);
        assert_eq!(load::<Sparse>(&store, ParameterHandle(1)), Err(Error{code:ERROR_UNSUPPORTED_TYPE}));
    }

    #[test]
    fn unsupported_shapes() {
        let sparse = Sparse{ greeting: "hi".into(), retries: 1, label: None };
        assert_eq!(to_values(&Outer{ inner: sparse }), Err(Error{code:ERROR_INVALID_DATA}));
        assert_eq!(to_values(&Ratio{ value: 0.5 }), Err(Error{code:ERROR_INVALID_DATA}));
        assert_eq!(to_values(&42u32), Err(Error{code:ERROR_INVALID_DATA}));
        assert_eq!(to_values(&vec![1u32, 2]), Err(Error{code:ERROR_INVALID_DATA}));
    }

    #[derive(Default)]
    struct Configured {
        settings: Mutex<Option<Settings>>,
    }

    impl Configured {
        fn on_stop(&self) -> Result<()> { Ok(()) }
    }

    impl Service for Configured {
        fn on_start(&self, engine: &Arc<ServiceEngine<Self>>, _args: &[String]) -> Result<()> {
            *self.settings.lock().unwrap() = Some(engine.load_config()?);
            Ok(())
        }

        control_handler_map!{ Configured {
            ServiceControl::Stop => Configured::on_stop,
        }}
    }

    #[test]
    fn service_reads_its_configuration() {
        let harness = ServiceHarness::<Configured>::new();
        let settings = Settings{ port: 9000, ..Settings::default() };
        harness.set_parameters(&settings).unwrap();
        harness.start("Configured", Vec::<String>::new()).unwrap();

        let engine = harness.engine().unwrap();
        assert_eq!(engine.service().settings.lock().unwrap().as_ref(), Some(&settings));
        harness.stop().unwrap();
    }
}
