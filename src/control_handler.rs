//! Per service type control handler tables.
//!
//! A service lists its handlers with [`control_handler_map!`](crate::control_handler_map),
//! in the order they should run. More than one handler may be registered for the
//! same control.

use crate::{EventData, Result, ServiceControl, ServiceControlAccept};

pub type HandlerFn<S> = dyn Fn(&S, u32, EventData) -> Result<u32> + Send + Sync;

pub struct ControlHandler<S> {
    control: ServiceControl,
    invoke: Box<HandlerFn<S>>,
}

impl<S: 'static> ControlHandler<S> {

    /// Accepts any of
    /// `fn(&S) -> Result<()>`,
    /// `fn(&S, u32, EventData) -> Result<()>`,
    /// `fn(&S) -> Result<u32>` and
    /// `fn(&S, u32, EventData) -> Result<u32>`.
    pub fn new<M>(control: ServiceControl, handler: impl IntoControlHandler<S, M>) -> Self {
        Self{ control, invoke: handler.into_handler() }
    }

    pub fn control(&self) -> ServiceControl { self.control }

    /// Runs the handler, a non-zero `Ok` code means the control was rejected.
    pub fn invoke(&self, service: &S, event_type: u32, data: EventData) -> Result<u32> {
        (self.invoke)(service, event_type, data)
    }
}

impl<S> std::fmt::Debug for ControlHandler<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlHandler").field("control", &self.control).finish()
    }
}

#[doc(hidden)]
pub struct Plain;
#[doc(hidden)]
pub struct WithEvent;
#[doc(hidden)]
pub struct WithResult;
#[doc(hidden)]
pub struct WithResultEvent;

/// Converts one of the supported handler signatures into the common form.
pub trait IntoControlHandler<S, M> {
    fn into_handler(self) -> Box<HandlerFn<S>>;
}

impl<S: 'static, F> IntoControlHandler<S, Plain> for F
    where F: Fn(&S) -> Result<()> + Send + Sync + 'static
{
    fn into_handler(self) -> Box<HandlerFn<S>> {
        Box::new(move |service, _, _| self(service).map(|()| 0))
    }
}

impl<S: 'static, F> IntoControlHandler<S, WithEvent> for F
    where F: Fn(&S, u32, EventData) -> Result<()> + Send + Sync + 'static
{
    fn into_handler(self) -> Box<HandlerFn<S>> {
        Box::new(move |service, event_type, data| self(service, event_type, data).map(|()| 0))
    }
}

impl<S: 'static, F> IntoControlHandler<S, WithResult> for F
    where F: Fn(&S) -> Result<u32> + Send + Sync + 'static
{
    fn into_handler(self) -> Box<HandlerFn<S>> {
        Box::new(move |service, _, _| self(service))
    }
}

impl<S: 'static, F> IntoControlHandler<S, WithResultEvent> for F
    where F: Fn(&S, u32, EventData) -> Result<u32> + Send + Sync + 'static
{
    fn into_handler(self) -> Box<HandlerFn<S>> {
        Box::new(self)
    }
}

/// Union of the accept flags of every registered handler.
pub fn accepted_controls<S>(handlers: &[ControlHandler<S>]) -> ServiceControlAccept {
    handlers.iter()
        .fold(ServiceControlAccept::empty(), |mask, handler| mask | handler.control.accept_flag())
}

/// Handlers registered for `control`, in declaration order.
pub fn handlers_for<S>(handlers: &'static [ControlHandler<S>], control: ServiceControl)
    -> impl Iterator<Item=&'static ControlHandler<S>>
{
    handlers.iter().filter(move |handler| handler.control == control)
}

/// Implements `Service::control_handlers` from a list of `control => handler` pairs.
///
/// ```ignore
/// svckit::control_handler_map!{ MyService {
///     ServiceControl::Stop => MyService::on_stop,
///     ServiceControl::Pause => MyService::on_pause,
///     ServiceControl::Continue => MyService::on_continue,
/// }}
/// ```
#[macro_export]
macro_rules! control_handler_map {
    ( $service:ty { $( $control:expr => $handler:expr ),* $(,)? } ) => {
        fn control_handlers() -> &'static [$crate::ControlHandler<Self>] {
            static TABLE: ::std::sync::OnceLock<::std::vec::Vec<$crate::ControlHandler<$service>>>
                = ::std::sync::OnceLock::new();
            TABLE.get_or_init(|| ::std::vec![
                $( $crate::ControlHandler::new($control, $handler), )*
            ])
        }
    };
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::win32::ERROR_SERVICE_CANNOT_ACCEPT_CTRL;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct Counter {
        calls: AtomicU32,
        last_event: AtomicU32,
    }

    impl Counter {
        fn plain(&self) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn with_event(&self, event_type: u32, _data: EventData) -> Result<()> {
            self.last_event.store(event_type, Ordering::SeqCst);
            Ok(())
        }

        fn refuse(&self) -> Result<u32> {
            Ok(ERROR_SERVICE_CANNOT_ACCEPT_CTRL)
        }

        fn echo(&self, event_type: u32, _data: EventData) -> Result<u32> {
            Ok(event_type)
        }
    }

    fn table() -> Vec<ControlHandler<Counter>> {
        vec![
            ControlHandler::new(ServiceControl::Stop, Counter::plain),
            ControlHandler::new(ServiceControl::SessionChange, Counter::with_event),
            ControlHandler::new(ServiceControl::Pause, Counter::refuse),
            ControlHandler::new(ServiceControl::Custom(200), Counter::echo),
        ]
    }

    #[test]
    fn all_signatures_are_adapted() {
        let counter = Counter::default();
        let handlers = table();

        assert_eq!(handlers[0].invoke(&counter, 0, EventData::none()), Ok(0));
        assert_eq!(counter.calls.load(Ordering::SeqCst), 1);

        assert_eq!(handlers[1].invoke(&counter, 7, EventData::none()), Ok(0));
        assert_eq!(counter.last_event.load(Ordering::SeqCst), 7);

        assert_eq!(handlers[2].invoke(&counter, 0, EventData::none()), Ok(ERROR_SERVICE_CANNOT_ACCEPT_CTRL));
        assert_eq!(handlers[3].invoke(&counter, 9, EventData::none()), Ok(9));
    }

    #[test]
    fn mask_is_union_of_handler_flags() {
        let handlers = table();
        assert_eq!(
            accepted_controls(&handlers),
            ServiceControlAccept::STOP | ServiceControlAccept::SESSIONCHANGE | ServiceControlAccept::PAUSE_CONTINUE
        );

        let interrogate_only = vec![
            ControlHandler::new(ServiceControl::Interrogate, Counter::plain),
            ControlHandler::new(ServiceControl::DeviceEvent, Counter::plain),
        ];
        assert_eq!(accepted_controls(&interrogate_only), ServiceControlAccept::empty());
        assert_eq!(accepted_controls::<Counter>(&[]), ServiceControlAccept::empty());
    }
}
