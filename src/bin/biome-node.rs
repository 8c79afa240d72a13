use std::path::PathBuf;

use biome_p2p::{identity, BiomeP2p, BiomeP2pConfig, PeerId};
use clap::Parser;
use tokio::io::{self, AsyncBufReadExt};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "biome-node", about = "Interactive biome P2P node")]
struct Args {
    /// JSON config file; flags below override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Topic to join (repeatable, the first is the primary topic)
    #[arg(long = "topic")]
    topics: Vec<String>,

    /// Direct stream protocol, e.g. /biome/direct/1.0.0
    #[arg(long)]
    protocol: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    /// Bootstrap peer multiaddr (repeatable)
    #[arg(long)]
    bootstrap: Vec<String>,

    /// Bootstrap peers joined with ';'
    #[arg(long)]
    bootstrap_bundle: Option<String>,

    /// Base64 encoded private key
    #[arg(long)]
    key_base64: Option<String>,

    #[arg(long)]
    local_only: bool,

    #[arg(long)]
    no_mdns: bool,

    /// Print a fresh base64 private key and exit
    #[arg(long)]
    generate_key: bool,
}

impl Args {
    fn into_config(self) -> Result<BiomeP2pConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => BiomeP2pConfig::from_json_file(path)?,
            None => BiomeP2pConfig::default(),
        };

        if !self.topics.is_empty() {
            config.topics = self.topics;
        }
        if let Some(protocol) = self.protocol {
            config = config.with_protocol(&protocol);
        }
        if let Some(port) = self.port {
            config.listen_port = port;
        }
        config.bootstrap_peers.extend(self.bootstrap);
        if let Some(bundle) = self.bootstrap_bundle {
            config = config.with_bootstrap_bundle(&bundle);
        }
        if let Some(key) = self.key_base64 {
            config = config.with_private_key_base64(&key)?;
        }
        if self.local_only {
            config.local_only = true;
        }
        if self.no_mdns {
            config.enable_mdns = false;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    if args.generate_key {
        let key = identity::generate_private_key()?;
        println!("{}", identity::encode_private_key_base64(&key));
        return Ok(());
    }

    let node = BiomeP2p::start(args.into_config()?).await?;
    let handle = node.handle();

    println!("ID: {}", node.peer_id());

    // Print every delivery as it arrives
    if let Ok(inbox) = node.pubsub_inbox() {
        tokio::spawn(async move {
            while let Ok(msg) = inbox.recv().await {
                let topic = msg.topic.as_deref().unwrap_or("?");
                println!("[{}] {}: {}", topic, msg.sender, msg.data_lossy());
            }
        });
    }
    if let Ok(inbox) = node.stream_inbox() {
        tokio::spawn(async move {
            while let Ok(msg) = inbox.recv().await {
                println!("[direct] {}: {}", msg.sender, msg.data_lossy());
            }
        });
    }

    println!("commands: 'pub <msg>', 'send <peer> <msg>', 'peers', 'addrs', 'id', 'quit'");

    let mut stdin = io::BufReader::new(io::stdin()).lines();
    while let Ok(Some(line)) = stdin.next_line().await {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.is_empty() { continue; }

        match parts[0] {
            "pub" if parts.len() > 1 => {
                let content = parts[1..].join(" ");
                if let Err(e) = node.publish(content.into_bytes()).await {
                    println!("publish failed: {}", e);
                }
            },
            "send" if parts.len() > 2 => {
                let content = parts[2..].join(" ");
                let result = match parts[1].parse::<PeerId>() {
                    Ok(peer) => node.send_to(&peer, content.into_bytes()).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = result {
                    println!("send failed: {}", e);
                }
            },
            "peers" => {
                let peers = handle.connected_peers().await?;
                println!("Connected peers: {:?}", peers);
            },
            "addrs" => {
                for addr in handle.listen_addresses().await? {
                    println!("  {}/p2p/{}", addr, node.peer_id());
                }
            },
            "id" => println!("{}", node.peer_id()),
            "quit" => break,
            _ => println!("Unknown command"),
        }
    }

    node.shutdown().await?;
    Ok(())
}
