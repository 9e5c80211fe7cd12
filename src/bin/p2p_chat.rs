use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use async_trait::async_trait;
use clap::Parser;
use clap_derive::Parser;
use punchlink::config::SessionConfig;
use punchlink::message_dispatcher::MessageDispatcher;
use punchlink::peer_endpoint::resolve_peer;
use punchlink::session::Session;
use punchlink::session_events::SessionEvent;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::broadcast;
use tracing::Level;

/// Chat with a peer behind a NAT: discover your public address, exchange it with the peer out
///  of band, and type messages once the hole is punched.
#[derive(Parser)]
struct Args {
    /// local address for the session's socket
    #[clap(long, default_value = "0.0.0.0:0")]
    bind: SocketAddr,

    /// discovery server as host:port, can be repeated - the built-in servers are used if absent
    #[clap(long)]
    stun_server: Vec<String>,

    /// skip public address discovery, e.g. for testing on a local network
    #[clap(long, default_value_t = false)]
    no_discovery: bool,

    /// suppress duplicate deliveries by remembering this many sequence numbers per peer
    #[clap(long)]
    dedup_window: Option<usize>,

    /// give up on a message after this many transmissions
    #[clap(long)]
    max_transmissions: Option<u32>,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,

    #[clap(long, default_value_t = false)]
    very_verbose: bool,
}

struct ConsolePrinter;

#[async_trait]
impl MessageDispatcher for ConsolePrinter {
    async fn on_message(&self, _sender_addr: SocketAddr, _sequence: u64, payload: &str) {
        print!("\r\x1b[K[Peer]: {}\n> ", payload);
        let _ = std::io::stdout().flush();
    }
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match (args.verbose, args.very_verbose) {
        (_, true) => Level::TRACE,
        (true, _) => Level::DEBUG,
        (false, false) => Level::WARN,
    };

    // stdout belongs to the chat
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .try_init()
        .ok();

    let mut config = SessionConfig::default_ipv4();
    config.bind_addr = args.bind;
    if !args.stun_server.is_empty() {
        config.discovery_servers = args.stun_server;
    }
    config.duplicate_window = args.dedup_window;
    config.max_transmissions = args.max_transmissions;

    let session = Session::new(config, Arc::new(ConsolePrinter)).await?;

    if !args.no_discovery {
        println!("--- STEP 1: STUN DISCOVERY ---");
        match session.discover().await {
            Ok(public_addr) => println!("Your Public ID: {}", public_addr),
            Err(e) => println!("STUN Error: {:#}", e),
        }
    }
    println!("Local socket: {}", session.local_addr()?);

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    let peer = loop {
        let Some(host) = prompt(&mut stdin, "\nEnter Peer IP: ").await? else { return Ok(()) };
        let Some(port) = prompt(&mut stdin, "Enter Peer Port: ").await? else { return Ok(()) };

        match resolve_peer(&host, &port).await {
            Ok(peer) => break peer,
            Err(e) => println!("Error: {:#}", e),
        }
    };

    tokio::spawn(print_events(session.subscribe()));

    println!("\n--- STEP 2: PUNCHING HOLE ---");
    session.connect(peer).await?;
    println!("Link to {} is set up. Type 'exit' to quit.", peer);

    while let Some(line) = prompt(&mut stdin, "> ").await? {
        let line = line.trim();
        if line.eq_ignore_ascii_case("exit") {
            break;
        }
        if line.is_empty() {
            continue;
        }

        if let Err(e) = session.send(line).await {
            println!("Error: {:#}", e);
        }
    }

    session.shutdown().await;
    Ok(())
}

/// returns `None` at the end of input
async fn prompt(stdin: &mut Lines<BufReader<Stdin>>, text: &str) -> anyhow::Result<Option<String>> {
    print!("{}", text);
    std::io::stdout().flush()?;
    Ok(stdin.next_line().await?)
}

async fn print_events(mut events: broadcast::Receiver<SessionEvent>) {
    loop {
        match events.recv().await {
            Ok(SessionEvent::PeerReachable(addr)) => print!("\r\x1b[K[Link]: peer {} is reachable\n> ", addr),
            Ok(SessionEvent::DeliveryFailed(sequence)) => print!("\r\x1b[K[Link]: message #{} could not be delivered\n> ", sequence),
            Ok(SessionEvent::ReceiveLoopFailed(reason)) => print!("\r\x1b[K[Link]: receiving failed: {}\n> ", reason),
            Ok(SessionEvent::Acknowledged(_)) => continue,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => return,
        }
        let _ = std::io::stdout().flush();
    }
}
