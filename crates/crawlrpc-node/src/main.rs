use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use crawlrpc::transport::{HubConfig, shutdown_signal};
use crawlrpc::{
    HttpQueueStore, MemoryQueueStore, Method, MethodRegistry, NodeId, Params, RpcClient,
    RpcServer, ServerConfig, StaticNode, SystemInstaller,
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_QUEUE_URL: &str = "http://127.0.0.1:6390";

/// Used for `call` when the method has no default of its own.
const FALLBACK_CALL_TIMEOUT: Duration = Duration::from_secs(10);

const USAGE: &str = "\
Usage:
  crawlrpc-node hub [--listen <host:port>]
  crawlrpc-node serve --node-id <id> [--queue-url <url>] [--receive-timeout <secs>]
  crawlrpc-node call --node-id <id> --method <name> [--param <key=value>]... [--timeout <secs>] [--queue-url <url>]

Options:
  --listen <host:port>       Hub listen address [default: 0.0.0.0:6390]
  --queue-url <url>          Hub URL [default: $CRAWLRPC_QUEUE_URL or http://127.0.0.1:6390]
  --receive-timeout <secs>   Bound each receive; 0 waits forever [default: 0]
  --timeout <secs>           Reply wait for call [default: per-method]";

#[derive(Debug, PartialEq)]
enum Command {
    Hub {
        config: HubConfig,
    },
    Serve {
        node_id: String,
        queue_url: String,
        receive_timeout: Option<Duration>,
    },
    Call {
        node_id: String,
        method: String,
        params: Params,
        timeout: Option<Duration>,
        queue_url: String,
    },
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();

    let command = match parse_args(&args) {
        Ok(command) => command,
        Err(msg) => {
            if !msg.is_empty() {
                eprintln!("error: {msg}");
                eprintln!();
            }
            eprintln!("{USAGE}");
            process::exit(2);
        }
    };

    init_tracing();

    if let Err(e) = run(command).await {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match std::env::var("CRAWLRPC_LOG").as_deref() {
            Ok("trace") => "trace",
            Ok("debug") => "debug",
            Ok("warn") | Ok("warning") => "warn",
            Ok("error") => "error",
            _ => "info",
        };
        EnvFilter::new(format!("crawlrpc={level},crawlrpc_node={level}"))
    };

    let registry = tracing_subscriber::registry().with(filter);
    if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        let _ = registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init();
    } else {
        let _ = registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init();
    }
}

fn default_queue_url() -> String {
    std::env::var("CRAWLRPC_QUEUE_URL").unwrap_or_else(|_| DEFAULT_QUEUE_URL.to_string())
}

fn parse_args(args: &[String]) -> Result<Command, String> {
    let subcommand = args.get(1).map(String::as_str).unwrap_or("");
    if matches!(subcommand, "" | "--help" | "-h" | "help") {
        return Err(String::new());
    }

    let mut listen: Option<String> = None;
    let mut node_id: Option<String> = None;
    let mut method: Option<String> = None;
    let mut queue_url: Option<String> = None;
    let mut params = Params::new();
    let mut timeout: Option<Duration> = None;
    let mut receive_timeout = None;

    let mut i = 2;
    while i < args.len() {
        let flag = args[i].as_str();
        let mut value = || {
            i += 1;
            args.get(i)
                .cloned()
                .ok_or_else(|| format!("{flag} requires a value"))
        };
        match flag {
            "--listen" => listen = Some(value()?),
            "--node-id" => node_id = Some(value()?),
            "--method" => method = Some(value()?),
            "--queue-url" => queue_url = Some(value()?),
            "--param" => {
                let pair = value()?;
                let (key, val) = pair
                    .split_once('=')
                    .ok_or_else(|| format!("--param expects key=value, got '{pair}'"))?;
                params.insert(key.to_string(), val.to_string());
            }
            "--timeout" => timeout = Some(parse_secs(flag, &value()?)?),
            "--receive-timeout" => {
                receive_timeout = crawlrpc::queue::wait_from_secs(parse_u64(flag, &value()?)?)
            }
            "--help" | "-h" => return Err(String::new()),
            other => return Err(format!("unexpected argument: {other}")),
        }
        i += 1;
    }

    let queue_url = queue_url.unwrap_or_else(default_queue_url);
    let require_node = |node_id: Option<String>| node_id.ok_or("missing required flag: --node-id");

    match subcommand {
        "hub" => Ok(Command::Hub {
            config: parse_listen(listen.as_deref())?,
        }),
        "serve" => Ok(Command::Serve {
            node_id: require_node(node_id)?,
            queue_url,
            receive_timeout,
        }),
        "call" => Ok(Command::Call {
            node_id: require_node(node_id)?,
            method: method.ok_or("missing required flag: --method")?,
            params,
            timeout,
            queue_url,
        }),
        other => Err(format!("unknown command: {other}")),
    }
}

fn parse_secs(flag: &str, value: &str) -> Result<Duration, String> {
    parse_u64(flag, value).map(Duration::from_secs)
}

fn parse_u64(flag: &str, value: &str) -> Result<u64, String> {
    value
        .parse::<u64>()
        .map_err(|_| format!("{flag} expects whole seconds, got '{value}'"))
}

fn parse_listen(listen: Option<&str>) -> Result<HubConfig, String> {
    let Some(listen) = listen else {
        return Ok(HubConfig::default());
    };
    let (host, port) = listen
        .rsplit_once(':')
        .ok_or_else(|| format!("--listen expects host:port, got '{listen}'"))?;
    let port = port
        .parse::<u16>()
        .map_err(|_| format!("invalid port in --listen: '{port}'"))?;
    Ok(HubConfig {
        host: host.to_string(),
        port,
    })
}

async fn run(command: Command) -> anyhow::Result<()> {
    match command {
        Command::Hub { config } => {
            crawlrpc::transport::serve(config, Arc::new(MemoryQueueStore::new())).await
        }
        Command::Serve {
            node_id,
            queue_url,
            receive_timeout,
        } => {
            let store = Arc::new(HttpQueueStore::new(&queue_url)?);
            let registry = MethodRegistry::with_builtins(Arc::new(SystemInstaller::default()));
            let config = ServerConfig {
                receive_timeout,
                ..ServerConfig::new()
            };

            tracing::info!(%node_id, %queue_url, "Serving node RPC");
            let handle = RpcServer::new(store, Arc::new(StaticNode::new(node_id)), registry)
                .with_config(config)
                .start();

            shutdown_signal().await;
            handle.shutdown().await?;
            Ok(())
        }
        Command::Call {
            node_id,
            method,
            params,
            timeout,
            queue_url,
        } => {
            let timeout = timeout.unwrap_or_else(|| {
                method
                    .parse::<Method>()
                    .map(|m| m.default_timeout())
                    .unwrap_or(FALLBACK_CALL_TIMEOUT)
            });
            let client = RpcClient::new(Arc::new(HttpQueueStore::new(&queue_url)?));
            let result = client
                .call(&NodeId::new(node_id), &method, params, timeout)
                .await
                .with_context(|| format!("{method} failed"))?;
            println!("{result}");
            Ok(())
        }
    }
}
