//! A ready made command line for service executables.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use svckit::{Result, Service, ServiceEngine};
//! # #[derive(Default)] struct Beacon;
//! # impl Service for Beacon {
//! #     fn on_start(&self, _engine: &Arc<ServiceEngine<Self>>, _args: &[String]) -> Result<()> { Ok(()) }
//! # }
//! use svckit::std_cli::{self, ServiceDetail};
//!
//! struct BeaconDetail;
//!
//! impl ServiceDetail for BeaconDetail {
//!     const SERVICE_IDENTIFIER: &'static str = "beacon";
//!     const SERVICE_DISPLAY_NAME: &'static str = "Beacon Service";
//!     type Service = Beacon;
//! }
//!
//! fn main() {
//!     std::process::exit(std_cli::main::<BeaconDetail>());
//! }
//! ```

use std::{
    fs::OpenOptions,
    io::{self, BufRead, Write},
};

use structopt::StructOpt;
use tracing_subscriber::fmt::{MakeWriter, Subscriber};

use crate::{
    win32::{ERROR_GEN_FAILURE, NO_ERROR},
    Error, EventData, Result, Service, ServiceControl, ServiceHarness, ServiceStatus,
};

#[cfg(not(windows))]
use crate::win32::ERROR_CALL_NOT_IMPLEMENTED;

#[derive(StructOpt,Debug,Default,Clone,Eq,PartialEq)]
pub struct LoggingConfig {

    /// path to write log to
    #[structopt(long)]
    pub log_file: Option<String>,

    /// filter to use while logging
    #[structopt(long)]
    pub log_filter: Option<String>,
}

pub trait ServiceDetail {

    const SERVICE_IDENTIFIER: &'static str;
    const SERVICE_DISPLAY_NAME: &'static str;

    /// account the installed service runs as
    const SERVICE_ACCOUNT: &'static str = crate::win32::NETWORK_SERVICE;

    type Service: Service + Default;
}

#[derive(StructOpt,Debug,Eq,PartialEq)]
pub enum Command {

    /// Execute service directly in this environment, controlled from stdin.
    Run{
        #[structopt(flatten)]
        log_config: LoggingConfig,

        /// arguments handed to the service on start
        args: Vec<String>,
    },

    /// install as a windows service
    Install{
        /// start the service when the system boots
        #[structopt(long)]
        auto_start: bool,

        #[structopt(flatten)]
        log_config: LoggingConfig,
    },

    /// uninstall as a windows service
    Uninstall,

    /// start the previously installed service
    Start{
        /// arguments handed to the service on start
        args: Vec<String>,
    },

    /// stop the previously installed and started service
    Stop,

    /// invoked by windows when started as a service [will fail if used elsewhere]
    RunAsService(LoggingConfig),
}

impl Command {
    pub fn execute<S: ServiceDetail>(self) -> Result<()> {
        match self {
            Command::Run{log_config, args} => {
                log_config.init_console()?;
                let stdin = io::stdin();
                let stdout = io::stdout();
                run_local::<S>(args, stdin.lock(), stdout.lock())
            }
            #[cfg(windows)]
            command => scm::execute::<S>(command),
            #[cfg(not(windows))]
            command => {
                tracing::error!("{:?} needs the windows service control manager", command);
                Err(Error{code:ERROR_CALL_NOT_IMPLEMENTED})
            }
        }
    }
}

/// Parses the process arguments and executes them, returning a process exit code.
pub fn main<S: ServiceDetail>() -> i32 {
    match Command::from_args().execute::<S>() {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("{}: {}", S::SERVICE_IDENTIFIER, err);
            err.code as i32
        }
    }
}

/// Hosts the service in a [`ServiceHarness`] and drives it with commands read from `input`.
///
/// Commands are `stop`, `pause`, `continue`, `interrogate` or a raw control
/// code. The service is stopped when the input ends.
pub fn run_local<S: ServiceDetail>(args: Vec<String>, input: impl BufRead, mut output: impl Write) -> Result<()> {

    let harness = ServiceHarness::<S::Service>::new();
    harness.start(S::SERVICE_IDENTIFIER, args)?;

    writeln!(output, "{} is running, commands: stop, pause, continue, interrogate, <control code>", S::SERVICE_IDENTIFIER)?;

    for line in input.lines() {
        let line = line?;
        let command = line.trim();

        let result = match command {
            "" => continue,
            "stop" => harness.stop(),
            "pause" => harness.pause(),
            "continue" => harness.resume(),
            "interrogate" => send(&harness, ServiceControl::Interrogate),
            other => match other.parse::<u32>() {
                Ok(code) => send(&harness, ServiceControl::from_raw(code)),
                Err(_) => {
                    writeln!(output, "unknown command: {}", other)?;
                    continue;
                }
            },
        };

        if let Err(err) = result {
            writeln!(output, "{}: {}", command, err)?;
        }

        let state = harness.status().current_state;
        writeln!(output, "status: {:?}", state)?;
        if state == ServiceStatus::Stopped {
            break;
        }
    }

    if harness.status().current_state != ServiceStatus::Stopped {
        tracing::debug!("input closed, stopping {}", S::SERVICE_IDENTIFIER);
        harness.stop()?;
    }

    let record = harness.status();
    if record.is_failed() {
        Err(Error{code:record.exit_code()})
    } else {
        Ok(())
    }
}

fn send<S: Service>(harness: &ServiceHarness<S>, control: ServiceControl) -> Result<()> {
    match harness.send_control(control, 0, EventData::none())? {
        NO_ERROR => Ok(()),
        code => Err(Error{code}),
    }
}

impl LoggingConfig {

    /// Logs to the configured file, if any.
    pub fn init(self) -> Result<()> {
        match self.log_file {
            Some(log_file) => {
                let file = OpenOptions::new().append(true).create(true).open(&log_file)?;
                let make_writer = move || -> Box<dyn Write> {
                    match file.try_clone() {
                        Ok(file) => Box::new(file),
                        Err(_) => Box::new(io::sink()),
                    }
                };
                install_subscriber(make_writer, false, self.log_filter)
            }
            None => Ok(()),
        }
    }

    /// Logs to the configured file, or to stderr without one.
    pub fn init_console(self) -> Result<()> {
        if self.log_file.is_some() {
            self.init()
        } else {
            install_subscriber(io::stderr, true, self.log_filter)
        }
    }

    /// Arguments that reproduce this configuration on another command line.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(4);
        if let Some(log_file) = &self.log_file {
            args.push("--log-file".into());
            args.push(log_file.clone());
        }
        if let Some(log_filter) = &self.log_filter {
            args.push("--log-filter".into());
            args.push(log_filter.clone());
        }
        args
    }
}

fn install_subscriber<W>(make_writer: W, ansi: bool, log_filter: Option<String>) -> Result<()>
where
    W: MakeWriter + Send + Sync + 'static,
{
    let builder = Subscriber::builder()
        .with_ansi(ansi)
        .with_writer(make_writer);

    let result = match log_filter {
        Some(log_filter) => builder.with_env_filter(log_filter).try_init(),
        None => builder.try_init(),
    };

    result.map_err(|err| {
        eprintln!("unable to initialize logging: {}", err);
        Error{code:ERROR_GEN_FAILURE}
    })
}

#[cfg(windows)]
mod scm {
    use super::*;
    use crate::{
        win32::ERROR_INVALID_PARAMETER,
        service_control_manager::{Access, InstalledService, ServiceControlManager, StartType},
        service_dispatcher::ServiceTable,
    };

    pub(super) fn execute<S: ServiceDetail>(command: Command) -> Result<()> {
        match command {
            Command::Run{..} => Err(Error{code:ERROR_INVALID_PARAMETER}),
            Command::RunAsService(log_config) => {
                log_config.init()?;
                ServiceTable::new().with::<S::Service>(S::SERVICE_IDENTIFIER).start()
            }
            Command::Install{auto_start, log_config} => {
                log_config.clone().init_console()?;

                let mut args = vec!["run-as-service".to_string()];
                args.extend(log_config.to_args());
                tracing::trace!("args: {:?}", args);

                let args: Vec<&str> = args.iter().map(String::as_str).collect();
                ServiceControlManager::open_local(Access::All)?
                    .create_self_service(
                        S::SERVICE_IDENTIFIER,
                        S::SERVICE_DISPLAY_NAME,
                        &args,
                        if auto_start { StartType::Auto } else { StartType::Demand },
                        S::SERVICE_ACCOUNT,
                    )?;
                Ok(())
            }
            Command::Uninstall => open_service::<S>()?.delete(),
            Command::Start{args} => {
                let args: Vec<&str> = args.iter().map(String::as_str).collect();
                open_service::<S>()?.start(&args)
            }
            Command::Stop => open_service::<S>()?.stop(),
        }
    }

    fn open_service<S: ServiceDetail>() -> Result<InstalledService> {
        ServiceControlManager::open_local(Access::Connect)?.open_service(S::SERVICE_IDENTIFIER)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{control_handler_map, Service, ServiceEngine};
    use std::{
        io::Cursor,
        sync::{atomic::{AtomicU32, Ordering}, Arc},
    };

    #[derive(Default)]
    struct Beacon {
        pauses: AtomicU32,
        customs: AtomicU32,
    }

    impl Beacon {
        fn on_stop(&self) -> Result<()> { Ok(()) }

        fn on_pause(&self) -> Result<()> {
            self.pauses.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn on_continue(&self) -> Result<()> { Ok(()) }

        fn on_custom(&self) -> Result<u32> {
            self.customs.fetch_add(1, Ordering::SeqCst);
            Ok(NO_ERROR)
        }
    }

    impl Service for Beacon {
        fn on_start(&self, _engine: &Arc<ServiceEngine<Self>>, _args: &[String]) -> Result<()> {
            Ok(())
        }

        control_handler_map!{ Beacon {
            ServiceControl::Stop => Beacon::on_stop,
            ServiceControl::Pause => Beacon::on_pause,
            ServiceControl::Continue => Beacon::on_continue,
            ServiceControl::Custom(200) => Beacon::on_custom,
        }}
    }

    struct BeaconDetail;

    impl ServiceDetail for BeaconDetail {
        const SERVICE_IDENTIFIER: &'static str = "beacon";
        const SERVICE_DISPLAY_NAME: &'static str = "Beacon Service";
        type Service = Beacon;
    }

    fn run(input: &str) -> (Result<()>, String) {
        let mut output = Vec::new();
        let result = run_local::<BeaconDetail>(vec!["--fast".into()], Cursor::new(input), &mut output);
        (result, String::from_utf8(output).unwrap())
    }

    #[test]
    fn parses_commands() {
        let command = Command::from_iter_safe(["beacon", "run", "--log-filter", "debug", "one", "two"]).unwrap();
        assert_eq!(command, Command::Run{
            log_config: LoggingConfig{ log_file: None, log_filter: Some("debug".into()) },
            args: vec!["one".into(), "two".into()],
        });

        let command = Command::from_iter_safe(["beacon", "install", "--auto-start", "--log-file", "c:\\beacon.log"]).unwrap();
        assert_eq!(command, Command::Install{
            auto_start: true,
            log_config: LoggingConfig{ log_file: Some("c:\\beacon.log".into()), log_filter: None },
        });

        assert_eq!(Command::from_iter_safe(["beacon", "run-as-service"]).unwrap(), Command::RunAsService(LoggingConfig::default()));
        assert!(Command::from_iter_safe(["beacon", "launch"]).is_err());
    }

    #[test]
    fn logging_args() {
        let config = LoggingConfig{ log_file: Some("svc.log".into()), log_filter: Some("info".into()) };
        assert_eq!(config.to_args(), ["--log-file", "svc.log", "--log-filter", "info"]);
        assert!(LoggingConfig::default().to_args().is_empty());
    }

    #[test]
    fn installs_as_network_service_by_default() {
        assert_eq!(BeaconDetail::SERVICE_ACCOUNT, crate::win32::NETWORK_SERVICE);
        assert_eq!(BeaconDetail::SERVICE_ACCOUNT, "NT AUTHORITY\\NetworkService");
    }

    #[test]
    fn drives_service_from_input() {
        let (result, output) = run("pause\ncontinue\ninterrogate\n200\nstop\nignored\n");
        assert_eq!(result, Ok(()));
        assert!(output.contains("status: Paused"));
        assert!(output.contains("status: Running"));
        assert!(output.ends_with("status: Stopped\n"));
        assert!(!output.contains("ignored"));
    }

    #[test]
    fn reports_bad_commands() {
        let (result, output) = run("jump\n7\n");
        assert_eq!(result, Ok(()));
        assert!(output.contains("unknown command: jump"));
        assert!(output.contains("7: "));
    }
}
