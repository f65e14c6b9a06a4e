//! bridge binary
//!
//! One executable, two roles, dispatched on argument count:
//!
//! ```text
//! bridge <localPort> <mountPath>                              bridge server
//! bridge <localPort|STDIN|-> <bridgeURL> <remoteHost> <remotePort>   client
//! ```
//!
//! Exit status: 0 on orderly shutdown, 1 on open failure or an unreachable
//! bridge, 2 on a usage error.

use std::env;

use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use httpbridge_client::{shutdown_signal, ClientConfig, LocalMode, Tunnel};
use httpbridge_core::TargetAddr;
use httpbridge_server::ServerConfig;

const USAGE: &str = "\
bridge - tunnel a TCP connection through plain HTTP

Usage:
  bridge <localPort> <mountPath>
      Run the bridge server: accept tunnel requests on <localPort>, serving
      the tunnel endpoint at <mountPath>.

  bridge <localPort|STDIN|-> <bridgeURL> <remoteHost> <remotePort>
      Run the bridge client: forward one local connection (or stdin/stdout
      when given STDIN or -) to <remoteHost>:<remotePort> through the bridge
      at <bridgeURL>.

Environment:
  http_proxy / https_proxy / no_proxy   proxy selection for the client;
                                        user:pass@ credentials are honored
  RUST_LOG                              log filter (default: info)
";

fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // Logs go to stderr: in stdio mode, stdout is the tunnel itself.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() {
    init_logging();

    let args: Vec<String> = env::args().skip(1).collect();
    let code = match args.len() {
        2 => report(run_server(&args).await),
        4 => report(run_client(&args).await),
        _ => {
            eprint!("{USAGE}");
            2
        }
    };
    std::process::exit(code);
}

fn report(result: Result<()>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => {
            error!("{:#}", e);
            1
        }
    }
}

async fn run_server(args: &[String]) -> Result<()> {
    let port: u16 = args[0]
        .parse()
        .with_context(|| format!("invalid listen port {:?}", args[0]))?;
    httpbridge_server::serve(port, &args[1], ServerConfig::default()).await?;
    Ok(())
}

async fn run_client(args: &[String]) -> Result<()> {
    let bridge_url = &args[1];
    let port: u16 = args[3]
        .parse()
        .with_context(|| format!("invalid remote port {:?}", args[3]))?;
    let target = TargetAddr::new(args[2].clone(), port);

    let local = match args[0].as_str() {
        "STDIN" | "-" => LocalMode::Stdio,
        raw => LocalMode::Listen(
            raw.parse()
                .with_context(|| format!("invalid local port {:?}", raw))?,
        ),
    };

    let tunnel = Tunnel::new(bridge_url, target, ClientConfig::default());
    info!("connection id {}", tunnel.id());

    // INT, HUP, and TERM all mean the same thing here: close the local
    // endpoint and let the pumps drain.
    let handle = tunnel.handle();
    let watcher = tokio::spawn(async move {
        shutdown_signal().await;
        info!("signal received, closing local endpoint");
        handle.cancel();
    });

    let result = tunnel.run(local).await;
    watcher.abort();
    result?;
    Ok(())
}
