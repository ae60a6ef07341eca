//! Sample services.
//!
//! ```text
//! sample_services minimal run
//! sample_services parameter install
//! sample_services ticker run --log-filter debug
//! ```

use std::{
    sync::{Arc, Mutex},
    thread::{self, JoinHandle},
    time::Duration,
};

use structopt::StructOpt;
use svckit::{
    async_worker::AsyncWorker,
    control_handler_map, parameter_map,
    std_cli::{Command, ServiceDetail},
    win32::{ERROR_GEN_FAILURE, ERROR_UNHANDLED_EXCEPTION},
    DWordParameter, Error, Parameter, Result, Service, ServiceControl, ServiceEngine, Signal,
    StringParameter,
};

/// Does nothing but start and stop.
#[derive(Default)]
struct MinimalService;

impl MinimalService {
    fn on_stop(&self) -> Result<()> {
        Ok(())
    }
}

impl Service for MinimalService {
    fn on_start(&self, _engine: &Arc<ServiceEngine<Self>>, _args: &[String]) -> Result<()> {
        Ok(())
    }

    control_handler_map!{ MinimalService {
        ServiceControl::Stop => MinimalService::on_stop,
    }}
}

/// Logs `Message` every `MessageRate` milliseconds, picking up changes on
/// a parameter change control.
struct ParameterService {
    message_rate: DWordParameter,
    message: StringParameter,
    stop: Arc<Signal>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Default for ParameterService {
    fn default() -> Self {
        Self{
            message_rate: Parameter::new(1000),
            message: Parameter::new("Hello from ParameterService".into()),
            stop: Arc::new(Signal::automatic()),
            worker: Mutex::new(None),
        }
    }
}

impl ParameterService {
    fn on_stop(&self) -> Result<()> {
        self.stop.set();
        let worker = self.worker.lock().unwrap_or_else(|e| e.into_inner()).take();
        match worker {
            Some(worker) => worker.join().map_err(|_| Error{code:ERROR_UNHANDLED_EXCEPTION}),
            None => Err(Error{code:ERROR_GEN_FAILURE}),
        }
    }
}

impl Service for ParameterService {
    fn on_start(&self, engine: &Arc<ServiceEngine<Self>>, _args: &[String]) -> Result<()> {
        let engine = engine.clone();
        let worker = thread::spawn(move || {
            let service = engine.service();
            // values only change on a parameter change, so they are re-read every round
            while !service.stop.wait_timeout(Duration::from_millis(service.message_rate.value().into())) {
                tracing::info!("{}", service.message.value());
            }
        });
        *self.worker.lock().unwrap_or_else(|e| e.into_inner()) = Some(worker);
        Ok(())
    }

    control_handler_map!{ ParameterService {
        ServiceControl::Stop => ParameterService::on_stop,
    }}

    parameter_map!{
        "MessageRate" => message_rate,
        "Message" => message,
    }
}

/// Counts seconds on a tokio runtime; can be paused.
#[derive(Default)]
struct TickerService {
    worker: Mutex<Option<AsyncWorker>>,
}

impl TickerService {
    fn with_worker(&self, f: impl FnOnce(&AsyncWorker) -> Result<()>) -> Result<()> {
        match &*self.worker.lock().unwrap_or_else(|e| e.into_inner()) {
            Some(worker) => f(worker),
            None => Err(Error{code:ERROR_GEN_FAILURE}),
        }
    }

    fn on_stop(&self) -> Result<()> {
        self.with_worker(AsyncWorker::stop)
    }

    fn on_pause(&self) -> Result<()> {
        self.with_worker(AsyncWorker::pause)
    }

    fn on_continue(&self) -> Result<()> {
        self.with_worker(AsyncWorker::resume)
    }
}

impl Service for TickerService {
    fn on_start(&self, _engine: &Arc<ServiceEngine<Self>>, _args: &[String]) -> Result<()> {
        let worker = AsyncWorker::spawn(|mut signal| async move {
            let mut ticks = 0u64;
            while signal.proceed().await {
                ticks += 1;
                tracing::info!("tick {}", ticks);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            tracing::info!("stopped after {} ticks", ticks);
        })?;
        *self.worker.lock().unwrap_or_else(|e| e.into_inner()) = Some(worker);
        Ok(())
    }

    control_handler_map!{ TickerService {
        ServiceControl::Stop => TickerService::on_stop,
        ServiceControl::Pause => TickerService::on_pause,
        ServiceControl::Continue => TickerService::on_continue,
    }}
}

struct Minimal;

impl ServiceDetail for Minimal {
    const SERVICE_IDENTIFIER: &'static str = "MinimalServiceSample";
    const SERVICE_DISPLAY_NAME: &'static str = "Minimal Service Sample";
    type Service = MinimalService;
}

struct Parameters;

impl ServiceDetail for Parameters {
    const SERVICE_IDENTIFIER: &'static str = "ParameterServiceSample";
    const SERVICE_DISPLAY_NAME: &'static str = "Parameter Service Sample";
    type Service = ParameterService;
}

struct Ticker;

impl ServiceDetail for Ticker {
    const SERVICE_IDENTIFIER: &'static str = "TickerServiceSample";
    const SERVICE_DISPLAY_NAME: &'static str = "Ticker Service Sample";
    type Service = TickerService;
}

#[derive(StructOpt,Debug)]
enum Sample {
    /// a service that only starts and stops
    Minimal {
        #[structopt(subcommand)]
        command: Command,
    },
    /// a service configured through its parameters
    Parameter {
        #[structopt(subcommand)]
        command: Command,
    },
    /// a pausable service doing its work on tokio
    Ticker {
        #[structopt(subcommand)]
        command: Command,
    },
}

fn main() {
    let result = match Sample::from_args() {
        Sample::Minimal{command} => command.execute::<Minimal>(),
        Sample::Parameter{command} => command.execute::<Parameters>(),
        Sample::Ticker{command} => command.execute::<Ticker>(),
    };
    if let Err(err) = result {
        eprintln!("{}", err);
        std::process::exit(err.code as i32);
    }
}
