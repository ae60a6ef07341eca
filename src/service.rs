use std::sync::Arc;

use crate::{
    ControlHandler, EventData, ParameterStore, Result, ServiceEngine, ServiceParameter,
    ServiceProcessType, ServiceStatusRecord,
};

/// Implemented by a service.
///
/// Everything but `on_start` has a default. A service that declares no handlers
/// accepts no controls besides `Interrogate`; one that declares no parameters
/// never touches its parameter store.
pub trait Service: Send + Sync + Sized + 'static {

    /// Called on the service thread while the status is `StartPending`.
    ///
    /// The service becomes `Running` when this returns. Work that should
    /// outlive startup has to be moved to threads of the service's own; they
    /// may stop the service through `engine`.
    fn on_start(&self, engine: &Arc<ServiceEngine<Self>>, args: &[String]) -> Result<()>;

    fn control_handlers() -> &'static [ControlHandler<Self>] {
        &[]
    }

    fn parameters(&self) -> Vec<(&'static str, &dyn ServiceParameter)> {
        Vec::new()
    }

    /// Store used when the host does not provide one.
    fn parameter_store(&self) -> Arc<dyn ParameterStore> {
        default_parameter_store()
    }
}

#[cfg(windows)]
pub fn default_parameter_store() -> Arc<dyn ParameterStore> {
    Arc::new(crate::registry::RegistryParameterStore::default())
}

#[cfg(not(windows))]
pub fn default_parameter_store() -> Arc<dyn ParameterStore> {
    Arc::new(crate::parameter::EmptyParameterStore)
}

/// Handle returned by [`ServiceDriver::register_handler`].
#[derive(Copy,Clone,Debug,Eq,PartialEq,Hash)]
pub struct StatusHandle(pub usize);

/// Receives `(control, event_type, event_data)` and returns the result code.
pub type ControlCallback = Arc<dyn Fn(u32, u32, EventData) -> u32 + Send + Sync>;

/// The controller side of the service protocol: the real service control
/// manager, or the test harness.
pub trait ServiceDriver: Send + Sync {

    fn register_handler(&self, service_name: &str, callback: ControlCallback) -> Result<StatusHandle>;

    fn set_status(&self, handle: StatusHandle, status: &ServiceStatusRecord) -> Result<()>;
}

/// What the host hands to a service's main entry.
#[derive(Clone)]
pub struct ServiceContext {
    pub process_type: ServiceProcessType,
    pub driver: Arc<dyn ServiceDriver>,
    pub parameter_store: Option<Arc<dyn ParameterStore>>,
}

impl ServiceContext {

    pub fn new(process_type: ServiceProcessType, driver: Arc<dyn ServiceDriver>) -> Self {
        Self{ process_type, driver, parameter_store: None }
    }

    pub fn with_parameter_store(mut self, store: Arc<dyn ParameterStore>) -> Self {
        self.parameter_store = Some(store);
        self
    }
}
