use clap::{Args, Parser, Subcommand};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Human,
    Json,
}

#[derive(Parser, Clone, Debug)]
#[clap(name = "dispatcher", version, about)]
pub struct ConfigOpts {
    #[arg(long, value_enum, default_value = "human", global = true)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Command {
    /// Run the dispatcher HTTP server until SIGINT or SIGTERM is received
    Server(ServerOpts),
}

#[derive(Args, Clone, Debug)]
pub struct ServerOpts {
    /// Port to listen on
    #[arg(long, value_parser = clap::value_parser!(u16).range(1..))]
    pub port: u16,

    /// Enable debug logging, source locations in log events and per request tracing
    #[arg(long)]
    pub debug: bool,

    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// Seconds in-flight requests are given to complete once shutdown begins
    #[arg(long, default_value_t = DEFAULT_GRACE_PERIOD.as_secs())]
    pub grace_period: u64,
}

/// Settings of a single server instance, fixed for its whole lifetime.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: IpAddr,
    /// 0 asks the OS for an ephemeral port.
    pub port: u16,
    pub debug: bool,
    pub grace_period: Duration,
}

impl ServerConfig {
    pub fn new(port: u16) -> Self {
        ServerConfig {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port,
            debug: false,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl From<&ServerOpts> for ServerConfig {
    fn from(opts: &ServerOpts) -> Self {
        ServerConfig {
            host: opts.host,
            port: opts.port,
            debug: opts.debug,
            grace_period: Duration::from_secs(opts.grace_period),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    fn parse(args: &[&str]) -> Result<ConfigOpts, clap::Error> {
        ConfigOpts::try_parse_from(std::iter::once("dispatcher").chain(args.iter().copied()))
    }

    #[test]
    fn server_with_port_and_debug() {
        let opts = parse(&["server", "--port=51000", "--debug"]).unwrap();
        assert_eq!(opts.log_format, LogFormat::Human);

        let Command::Server(server) = &opts.command;
        let config = ServerConfig::from(server);
        assert_eq!(config.port, 51000);
        assert!(config.debug);
        assert_eq!(config.grace_period, DEFAULT_GRACE_PERIOD);
        assert_eq!(config.socket_addr(), "0.0.0.0:51000".parse().unwrap());
    }

    #[test]
    fn log_format_is_global() {
        let before = parse(&["--log-format", "json", "server", "--port", "80"]).unwrap();
        let after = parse(&["server", "--port", "80", "--log-format", "json"]).unwrap();
        assert_eq!(before.log_format, LogFormat::Json);
        assert_eq!(after.log_format, LogFormat::Json);
    }

    #[test]
    fn host_and_grace_period() {
        let opts = parse(&[
            "server",
            "--port=8080",
            "--host=127.0.0.1",
            "--grace-period=1",
        ])
        .unwrap();
        let Command::Server(server) = &opts.command;
        let config = ServerConfig::from(server);
        assert_eq!(config.socket_addr(), "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.grace_period, Duration::from_secs(1));
        assert!(!config.debug);
    }

    #[test]
    fn port_is_required() {
        let err = parse(&["server"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn port_out_of_range() {
        for port in ["0", "65536", "-1", "abc"] {
            let err = parse(&["server", &format!("--port={port}")]).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ValueValidation, "port {port}");
        }
    }

    #[test]
    fn unknown_flag() {
        let err = parse(&["server", "--port=1", "--verbose"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownArgument);
    }

    #[test]
    fn subcommand_is_required() {
        assert!(parse(&["--port=1"]).is_err());
    }
}
