//! atc - AT-command channel tool
//!
//! Usage:
//!   atc send AT+CSQ --expect single --prefix +CSQ:   One command, print response
//!   atc monitor --device /dev/ttyACM0                 Print unsolicited lines
//!   atc run                                           All configured channels, stdin as requests

use at_channel::channel::{
    self, ChannelHandle, ChannelOptions, Command, Registry, Response, UnsolicitedFn,
};
use at_channel::cli::{self, Cli, Expect};
use at_channel::config::{self, ChannelConfig, Config};
use at_channel::constants::READER_READY_TIMEOUT_MS;
use at_channel::error::{ChannelError, Result};
use at_channel::logging::{self, FileLoggerConfig, TrafficLog};
use at_channel::transport::{Device, DeviceKind, StdDevice};
use at_channel::worker::{
    ChannelHandler, ChannelWorker, QueueItem, WorkQueue, WorkerHandle, WorkerState,
};
use clap::Parser;
use std::io::{self, BufRead};
use std::process::ExitCode;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init_tracing(cli.verbose);

    let config = config::load(cli.config.as_deref());
    if let Err(e) = config.validate() {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    let traffic = start_traffic_log(&config);
    let result = match cli.command {
        cli::Command::Send {
            device,
            kind,
            timeout_ms,
            expect,
            prefix,
            json,
            handshake,
            command,
        } => {
            let channel = channel_config(&config, device, kind, timeout_ms);
            let request = SendRequest {
                expect,
                prefix,
                json,
                handshake,
                command,
            };
            run_send(&config, channel, request, traffic)
        }
        cli::Command::Monitor { device, kind } => {
            let channel = channel_config(&config, device, kind, None);
            run_monitor(&config, channel, traffic)
        }
        cli::Command::Run => run_workers(&config, traffic),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn start_traffic_log(config: &Config) -> Option<TrafficLog> {
    if !config.traffic_log.enabled {
        return None;
    }
    match logging::spawn_file_logger(FileLoggerConfig::from(&config.traffic_log)) {
        Ok(log) => Some(log),
        Err(e) => {
            warn!(
                "Traffic log {} unavailable: {}",
                config.traffic_log.path.display(),
                e
            );
            None
        }
    }
}

/// Default channel from config with command-line overrides applied
fn channel_config(
    config: &Config,
    device: Option<String>,
    kind: Option<DeviceKind>,
    timeout_ms: Option<u64>,
) -> ChannelConfig {
    let mut channel = config.default_channel().cloned().unwrap_or_default();
    if let Some(device) = device {
        channel.device = device;
    }
    if let Some(kind) = kind {
        channel.kind = kind;
    }
    if let Some(timeout_ms) = timeout_ms {
        channel.command_timeout_ms = timeout_ms;
    }
    channel
}

fn channel_options(
    config: &Config,
    channel: &ChannelConfig,
    traffic: Option<TrafficLog>,
) -> ChannelOptions {
    ChannelOptions::new(channel.device.as_str())
        .default_channel(channel.default_channel)
        .command_timeout(channel.command_timeout())
        .rules(Arc::new(config.responses.clone()))
        .traffic(traffic)
}

// =============================================================================
// send
// =============================================================================

struct SendRequest {
    expect: Expect,
    prefix: Option<String>,
    json: bool,
    handshake: bool,
    command: String,
}

impl SendRequest {
    fn to_command(&self) -> Command {
        let prefix = self.prefix.clone().unwrap_or_default();
        match self.expect {
            Expect::None => Command::new(self.command.as_str()),
            Expect::Single => Command::single_line(self.command.as_str(), prefix),
            Expect::Numeric => Command::numeric(self.command.as_str()),
            Expect::Multi => Command::multi_line(self.command.as_str(), prefix),
            Expect::MultiNoPrefix => Command::multi_line_no_prefix(self.command.as_str()),
        }
    }
}

fn run_send(
    config: &Config,
    channel: ChannelConfig,
    request: SendRequest,
    traffic: Option<TrafficLog>,
) -> Result<ExitCode> {
    let device = StdDevice::new(&config.device);
    let link = device.open(&channel.device, channel.kind, channel.default_channel)?;

    let registry = Arc::new(Registry::new());
    let unsolicited: UnsolicitedFn = Arc::new(|line: &str, second: Option<&str>| match second {
        Some(second) => info!("Unsolicited: {} / {}", line, second),
        None => info!("Unsolicited: {}", line),
    });
    let opened = channel::open(
        link,
        Some(unsolicited),
        channel_options(config, &channel, traffic),
        &registry,
    )?;
    let handle = opened.wait_ready(Duration::from_millis(READER_READY_TIMEOUT_MS))?;

    if request.handshake {
        handle
            .handshake(&config.handshake)
            .map_err(|source| ChannelError::Command {
                command: config.handshake.command.clone(),
                source,
            })?;
    }

    let response = handle
        .send(request.to_command())
        .map_err(|source| ChannelError::Command {
            command: request.command.clone(),
            source,
        })?;
    opened.close();
    device.close(&channel.device);

    print_response(&response, request.json);
    Ok(if response.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_response(response: &Response, json: bool) {
    if json {
        match serde_json::to_string_pretty(response) {
            Ok(text) => println!("{}", text),
            Err(e) => error!("Failed to encode response: {}", e),
        }
        return;
    }
    for line in &response.intermediates {
        println!("{}", line);
    }
    if let Some(line) = &response.final_line {
        println!("{}", line);
    }
}

// =============================================================================
// monitor
// =============================================================================

fn run_monitor(
    config: &Config,
    mut channel: ChannelConfig,
    traffic: Option<TrafficLog>,
) -> Result<ExitCode> {
    channel.default_channel = true;
    let device = StdDevice::new(&config.device);
    let link = device.open(&channel.device, channel.kind, true)?;

    let registry = Arc::new(Registry::new());
    let unsolicited: UnsolicitedFn = Arc::new(|line: &str, second: Option<&str>| {
        println!("{}", line);
        if let Some(second) = second {
            println!("{}", second);
        }
    });
    let opened = channel::open(
        link,
        Some(unsolicited),
        channel_options(config, &channel, traffic),
        &registry,
    )?;
    let handle = opened.wait_ready(Duration::from_millis(READER_READY_TIMEOUT_MS))?;

    let (tx, rx) = mpsc::channel();
    handle.set_on_reader_closed(move || {
        let _ = tx.send(());
    });
    loop {
        match rx.recv_timeout(Duration::from_millis(500)) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            Err(mpsc::RecvTimeoutError::Timeout) if handle.is_closed() => break,
            Err(mpsc::RecvTimeoutError::Timeout) => {}
        }
    }

    let stats = handle.stats();
    opened.close();
    device.close(&channel.device);
    info!(
        "{} closed after {} bytes, {} unsolicited lines",
        channel.device, stats.rx_bytes, stats.unsolicited
    );
    Ok(ExitCode::SUCCESS)
}

// =============================================================================
// run
// =============================================================================

/// Prints responses to stdout, events to the log
struct ConsoleHandler {
    name: String,
}

impl ChannelHandler for ConsoleHandler {
    fn init(&self, channel: &ChannelHandle) {
        info!(
            "{} ready (timeout {:?})",
            channel.name(),
            channel.command_timeout()
        );
    }

    fn on_unsolicited(&self, line: &str, second: Option<&str>) {
        match second {
            Some(second) => println!("[{}] {} / {}", self.name, line, second),
            None => println!("[{}] {}", self.name, line),
        }
    }

    fn handle_request(&self, channel: &ChannelHandle, item: QueueItem) {
        let text = String::from_utf8_lossy(&item.payload).trim().to_string();
        if text.is_empty() {
            return;
        }
        // Empty prefix: every line before the final is part of the answer
        match channel.send(Command::multi_line(text.as_str(), "")) {
            Ok(response) => print_response(&response, false),
            Err(e) => eprintln!("[{}] {}: {}", self.name, text, e),
        }
    }

    fn on_timeout(&self) {
        warn!("{}: command timed out, channel needs recovery", self.name);
    }

    fn on_reader_closed(&self) {
        warn!("{}: device closed", self.name);
    }
}

fn run_workers(config: &Config, traffic: Option<TrafficLog>) -> Result<ExitCode> {
    let device: Arc<dyn Device> = Arc::new(StdDevice::new(&config.device));
    let registry = Arc::new(Registry::new());
    let rules = Arc::new(config.responses.clone());

    let mut workers: Vec<WorkerHandle> = Vec::new();
    let mut default_queue = None;
    for channel in &config.channels {
        let queue = Arc::new(WorkQueue::new());
        if channel.default_channel {
            default_queue = Some(queue.clone());
        }
        let worker = ChannelWorker {
            channel: channel.clone(),
            rules: rules.clone(),
            traffic: traffic.clone(),
            device: device.clone(),
            handler: Arc::new(ConsoleHandler {
                name: channel.device.clone(),
            }),
            queue,
            registry: registry.clone(),
        };
        workers.push(worker.spawn()?);
    }

    let Some(queue) = default_queue else {
        return Err(ChannelError::ConfigValidation {
            field: "channels",
            reason: "no default channel".to_string(),
        });
    };
    let Some(default_worker) = workers.iter().find(|w| {
        config
            .default_channel()
            .is_some_and(|c| c.device == w.name())
    }) else {
        return Ok(ExitCode::FAILURE);
    };

    let open_budget = config.device.open_retry_delay_ms * u64::from(config.device.open_retries);
    let ready_timeout = Duration::from_millis(READER_READY_TIMEOUT_MS + open_budget);
    if default_worker.wait_for(WorkerState::Running, ready_timeout) != WorkerState::Running {
        error!("Default channel {} failed to start", default_worker.name());
        return Ok(ExitCode::FAILURE);
    }

    let mut next_id: u32 = 0;
    for line in io::stdin().lock().lines() {
        let Ok(line) = line else {
            break;
        };
        if default_worker.state() == WorkerState::Closed {
            error!("Default channel {} closed", default_worker.name());
            break;
        }
        next_id = next_id.wrapping_add(1);
        queue.push(QueueItem::request(next_id, line.into_bytes(), 0));
    }

    for worker in &workers {
        worker.terminate();
    }
    for worker in workers {
        worker.join();
    }
    Ok(ExitCode::SUCCESS)
}
