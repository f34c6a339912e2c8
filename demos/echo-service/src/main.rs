//! Echo service over the IIOP transport
//!
//! Serves an echo object and invokes it, either in one process or split
//! into a server and a client.
//!
//! Operations:
//! - `null`: returns nothing
//! - `echo`: returns its arguments unchanged
//! - `reverse`: returns its arguments reversed
//!
//! Usage:
//!   cargo run -p echo-service
//!   cargo run -p echo-service -- server --port 2809 --alternate 2810
//!   cargo run -p echo-service -- client --ior IOR:...

use bytes::Bytes;
use clap::{Parser, Subcommand};
use giop::{HostPort, IiopProfile, Ior};
use orb_transport::{
    AcceptorConfig, DispatchOutcome, Endpoint, ObjectRegistry, ReadStrategy, Servant,
    TransportConfig, TransportManager,
};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

const ECHO_KEY: &[u8] = b"echo";
const ECHO_TYPE_ID: &str = "IDL:demo/Echo:1.0";

#[derive(Parser)]
#[command(name = "echo-service")]
#[command(about = "Echo server and client over IIOP")]
struct Args {
    /// Read connections with dedicated tasks instead of the multiplexer
    #[arg(long, global = true)]
    dedicated: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the echo object until interrupted
    Server {
        #[arg(short = 'H', long, default_value = "127.0.0.1")]
        host: String,

        #[arg(short, long, default_value = "2809")]
        port: u16,

        /// Extra ports advertised as alternate addresses
        #[arg(short, long)]
        alternate: Vec<u16>,

        /// Bind on first use instead of at startup
        #[arg(long)]
        lazy: bool,
    },
    /// Invoke a running server
    Client {
        /// Stringified reference printed by the server
        #[arg(long)]
        ior: Option<String>,

        #[arg(short = 'H', long, default_value = "127.0.0.1")]
        host: String,

        #[arg(short, long, default_value = "2809")]
        port: u16,

        #[arg(short, long, default_value = "Hello, ORB!")]
        message: String,
    },
    /// Run a server and a client in this process
    Demo,
}

fn create_registry() -> ObjectRegistry {
    let servant = Servant::new()
        .operation("null", |_args| async {
            info!("null called");
            DispatchOutcome::Reply(Bytes::new())
        })
        .operation("echo", |args: Bytes| async move {
            info!("echo called with {} bytes", args.len());
            DispatchOutcome::Reply(args)
        })
        .operation("reverse", |args: Bytes| async move {
            info!("reverse called with {} bytes", args.len());
            let mut reversed = args.to_vec();
            reversed.reverse();
            DispatchOutcome::Reply(Bytes::from(reversed))
        });
    let registry = ObjectRegistry::new();
    registry.register(Bytes::from_static(ECHO_KEY), servant);
    registry
}

fn transport_config(dedicated: bool) -> orb_transport::Result<TransportConfig> {
    let mut config = TransportConfig::from_env()?;
    if dedicated {
        config.read_strategy = ReadStrategy::Dedicated;
    }
    Ok(config)
}

async fn start_server(
    config: TransportConfig,
    host: &str,
    ports: &[u16],
    lazy: bool,
) -> orb_transport::Result<(Arc<TransportManager>, Ior)> {
    let manager = TransportManager::builder(config)
        .with_dispatcher(Arc::new(create_registry()))
        .build()?;
    let acceptor_config = AcceptorConfig {
        lazy,
        ..AcceptorConfig::default()
    };
    for port in ports {
        manager
            .register_acceptor(Endpoint::iiop(host, *port), &acceptor_config)
            .await?;
    }
    manager.start().await?;
    let reference = manager.create_reference(ECHO_TYPE_ID, Bytes::from_static(ECHO_KEY)).await?;
    Ok((manager, reference))
}

async fn run_client(config: TransportConfig, reference: Ior, message: &str) -> Result<(), Box<dyn std::error::Error>> {
    let client = TransportManager::new(config)?;
    let list = client.contact_info_list(reference);

    info!("Test 1: null");
    client.invoke(&list, "null", Bytes::new()).await?;
    info!("  null succeeded");

    info!("Test 2: echo {:?}", message);
    let result = client.invoke(&list, "echo", Bytes::from(message.to_string())).await?;
    assert_eq!(result.as_ref(), message.as_bytes());
    info!("  echo returned {:?}", String::from_utf8_lossy(&result));

    info!("Test 3: reverse \"hello\"");
    let result = client.invoke(&list, "reverse", Bytes::from("hello")).await?;
    assert_eq!(result.as_ref(), b"olleh");
    info!("  reverse returned {:?}", String::from_utf8_lossy(&result));

    info!("Test 4: echo 64KB (fragmented)");
    let large: Vec<u8> = (0..64 * 1024).map(|i| (i % 256) as u8).collect();
    let result = client.invoke(&list, "echo", Bytes::from(large.clone())).await?;
    assert_eq!(result.as_ref(), large.as_slice());
    info!("  echoed {} bytes", result.len());

    info!("client stats: {:?}", client.stats().snapshot());
    client.shutdown().await;
    Ok(())
}

fn stringify(reference: &Ior) -> String {
    let hex: String = reference.encode().iter().map(|b| format!("{:02x}", b)).collect();
    format!("IOR:{}", hex)
}

fn parse_ior(text: &str) -> Result<Ior, Box<dyn std::error::Error>> {
    let hex = text.strip_prefix("IOR:").ok_or("reference must start with IOR:")?;
    if hex.len() % 2 != 0 {
        return Err("odd number of hex digits".into());
    }
    let bytes = (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16))
        .collect::<Result<Vec<u8>, _>>()?;
    Ok(Ior::decode(Bytes::from(bytes))?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();
    let config = transport_config(args.dedicated)?;

    match args.command.unwrap_or(Command::Demo) {
        Command::Server {
            host,
            port,
            alternate,
            lazy,
        } => {
            let ports: Vec<u16> = std::iter::once(port).chain(alternate).collect();
            let (manager, reference) = start_server(config, &host, &ports, lazy).await?;
            info!("Echo service ready: {}", reference);
            println!("{}", stringify(&reference));
            tokio::signal::ctrl_c().await?;
            info!("Shutting down");
            manager.shutdown().await;
        }
        Command::Client {
            ior,
            host,
            port,
            message,
        } => {
            let reference = match ior {
                Some(text) => parse_ior(&text)?,
                None => Ior::with_profile(
                    ECHO_TYPE_ID,
                    IiopProfile::new(HostPort::new(host, port), Bytes::from_static(ECHO_KEY)),
                ),
            };
            run_client(config, reference, &message).await?;
            info!("All tests passed!");
        }
        Command::Demo => {
            let (manager, reference) = start_server(config.clone(), "127.0.0.1", &[0], false).await?;
            info!("Echo service ready: {}", reference);
            let result = run_client(config, reference, "Hello, ORB!").await;
            manager.shutdown().await;
            result?;
            info!("All tests passed!");
        }
    }
    Ok(())
}
