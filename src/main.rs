use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use joycore_link::device::{DeviceAddress, PortEnumerator, PortEvent, PortScanner, SystemPorts, JOYCORE_PID, JOYCORE_VID};
use joycore_link::protocol::{LineProtocol, PropertyProtocol, RegisterProtocol};
use joycore_link::{CancellationToken, ChannelEventKind, ChannelState, LinkConfig, ReliableChannel, SerialError};

#[derive(Parser, Debug)]
#[command(name = "joycore-link", version, about = "Reliable serial link to JoyCore devices")]
struct Cli {
    /// JSON config file with serial, channel and scanner sections.
    #[arg(long, value_name = "FILE", global = true, env = "JOYCORE_LINK_CONFIG")]
    config: Option<PathBuf>,

    /// Baud rate, overriding the config file.
    #[arg(long, global = true)]
    baud: Option<u32>,

    /// Minimum log level (stderr). RUST_LOG overrides it.
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: log::LevelFilter,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List attached serial ports.
    Ports(PortsArgs),
    /// Send one line and print the reply.
    Query(QueryArgs),
    /// Read or write a numbered register.
    Reg(RegArgs),
    /// Read or write a named property.
    Prop(PropArgs),
    /// Print every line the device sends until Ctrl-C.
    Monitor(PortArg),
    /// Print attach/detach events until Ctrl-C.
    Watch(WatchArgs),
}

#[derive(Args, Debug)]
struct PortsArgs {
    /// Only show JoyCore (RP2040 CDC) devices.
    #[arg(long)]
    joycore: bool,
    /// Print as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct PortArg {
    /// Port name or path (ttyACM0, /dev/ttyACM0, COM3).
    port: String,
}

#[derive(Args, Debug)]
struct QueryArgs {
    port: String,
    text: String,
    /// Response timeout in milliseconds.
    #[arg(long, default_value_t = 2000)]
    timeout_ms: u64,
}

#[derive(Args, Debug)]
struct RegArgs {
    port: String,
    register: u16,
    /// Value to write; omit to read.
    value: Option<u32>,
}

#[derive(Args, Debug)]
struct PropArgs {
    port: String,
    name: String,
    /// Value to write; omit to read.
    value: Option<String>,
}

#[derive(Args, Debug)]
struct WatchArgs {
    /// Only report JoyCore (RP2040 CDC) devices.
    #[arg(long)]
    joycore: bool,
}

fn init_logging(level: log::LevelFilter) {
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp_millis()
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level);

    let mut config = match &cli.config {
        Some(path) => LinkConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => LinkConfig::default(),
    };
    if let Some(baud) = cli.baud {
        config.serial = config.serial.with_baud_rate(baud);
    }

    match cli.command {
        Command::Ports(args) => list_ports(&config, args),
        Command::Query(args) => {
            let line = open_line(&config, &args.port).await?.with_timeout(Duration::from_millis(args.timeout_ms));
            let reply = line.query(&args.text).await;
            close(line.channel()).await;
            println!("{}", reply?);
            Ok(())
        }
        Command::Reg(args) => {
            let registers = RegisterProtocol::new(open_line(&config, &args.port).await?);
            let result = match args.value {
                Some(value) => registers.set(args.register, value).await.map(|_| "OK".to_string()),
                None => registers.get(args.register).await.map(|v| format!("{} (0x{:X})", v, v)),
            };
            close(registers.line().channel()).await;
            println!("{}", result?);
            Ok(())
        }
        Command::Prop(args) => {
            let properties = PropertyProtocol::new(open_line(&config, &args.port).await?);
            let result = match &args.value {
                Some(value) => properties.set(&args.name, value).await.map(|_| "OK".to_string()),
                None => properties.get(&args.name).await,
            };
            close(properties.line().channel()).await;
            println!("{}", result?);
            Ok(())
        }
        Command::Monitor(args) => monitor(&config, &args.port).await,
        Command::Watch(args) => watch(&config, args).await,
    }
}

fn enumerator(config: &LinkConfig, joycore: bool) -> SystemPorts {
    if joycore {
        SystemPorts::usb(JOYCORE_VID, JOYCORE_PID)
    } else {
        config.scanner.enumerator()
    }
}

fn list_ports(config: &LinkConfig, args: PortsArgs) -> anyhow::Result<()> {
    let ports = enumerator(config, args.joycore).scan().context("enumerating serial ports")?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&ports)?);
        return Ok(());
    }
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        match (port.vid, port.pid) {
            (Some(vid), Some(pid)) => println!(
                "{}  {:04X}:{:04X}  {}",
                port.port_name,
                vid,
                pid,
                port.product.as_deref().unwrap_or("")
            ),
            _ => println!("{}", port.port_name),
        }
    }
    Ok(())
}

async fn open_channel(config: &LinkConfig, port: &str) -> anyhow::Result<Arc<ReliableChannel>> {
    let address = DeviceAddress::normalize(port);
    let channel = Arc::new(ReliableChannel::serial(address.as_str(), config.serial.clone(), config.channel.clone()));
    let token = CancellationToken::new();
    channel.connect(&token).await.with_context(|| format!("connecting to {}", address))?;
    Ok(channel)
}

async fn open_line(config: &LinkConfig, port: &str) -> anyhow::Result<LineProtocol> {
    Ok(LineProtocol::new(open_channel(config, port).await?))
}

async fn close(channel: &ReliableChannel) {
    if let Err(e) = channel.disconnect().await {
        log::warn!("Disconnect failed: {}", e);
    }
}

async fn monitor(config: &LinkConfig, port: &str) -> anyhow::Result<()> {
    let channel = open_channel(config, port).await?;
    let line = LineProtocol::new(channel.clone());
    let mut events = channel.subscribe();
    let mut state = channel.state_receiver();
    let stop = CancellationToken::new();

    let ctrl_c_stop = stop.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        ctrl_c_stop.cancel();
    });

    let result = loop {
        tokio::select! {
            read = line.read_line_with(&stop) => match read {
                Ok(text) => println!("{}", text),
                Err(SerialError::Timeout) => break Ok(()),
                Err(e) => break Err(e),
            },
            Ok(event) = events.recv() => {
                if event.kind == ChannelEventKind::ConnectionLost {
                    eprintln!("Connection to {} lost", event.address);
                }
            }
            Ok(()) = state.changed() => {
                if *state.borrow_and_update() == ChannelState::Closed {
                    break Err(SerialError::NotConnected);
                }
            }
        }
    };
    close(&channel).await;
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.requires_reconnect() => bail!("device disconnected: {}", e),
        Err(e) => Err(e.into()),
    }
}

async fn watch(config: &LinkConfig, args: WatchArgs) -> anyhow::Result<()> {
    let interval = Duration::from_millis(config.scanner.interval_ms);
    let (mut scanner, mut events) = PortScanner::start(enumerator(config, args.joycore), interval);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Some(PortEvent::PortAdded(info)) => println!("+ {}", info.port_name),
                Some(PortEvent::PortRemoved(name)) => println!("- {}", name),
                None => break,
            },
        }
    }
    scanner.stop().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_query_subcommand() {
        let cli = Cli::try_parse_from(["joycore-link", "query", "ttyACM0", "VERSION", "--timeout-ms", "500"])
            .expect("query args should parse");
        match cli.command {
            Command::Query(args) => {
                assert_eq!(args.port, "ttyACM0");
                assert_eq!(args.text, "VERSION");
                assert_eq!(args.timeout_ms, 500);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn reg_value_is_optional() {
        let cli = Cli::try_parse_from(["joycore-link", "reg", "COM3", "12"]).expect("reg args should parse");
        assert!(matches!(cli.command, Command::Reg(RegArgs { register: 12, value: None, .. })));
    }

    #[test]
    fn rejects_unknown_log_level() {
        assert!(Cli::try_parse_from(["joycore-link", "--log-level", "loud", "ports"]).is_err());
    }
}
