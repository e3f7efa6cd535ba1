use clap::{Parser, Subcommand};
use serde_json::Value;

use sockstack::p2p::tracker::{MessageQuery, TrackerClient};

#[derive(Parser)]
#[command(name = "chat-cli")]
#[command(about = "Command-line client for the sockstack chat tracker", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://127.0.0.1:8001")]
    url: String,

    #[arg(long, default_value = "guest")]
    user: String,

    #[arg(short, long, default_value = "guest")]
    password: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check credentials and print the login reply
    Login,
    /// Register a peer address
    SubmitInfo {
        #[arg(long)]
        peer_id: Option<String>,
        #[arg(long)]
        ip: Option<String>,
        #[arg(long)]
        port: u16,
    },
    /// List registered peers
    List,
    /// Record a connection from one peer to another
    Connect {
        to: String,
        #[arg(long)]
        from: Option<String>,
    },
    /// Deliver a message to every other peer
    Broadcast {
        message: String,
        #[arg(long)]
        from: Option<String>,
        #[arg(long)]
        channel: Option<String>,
    },
    /// Deliver a message to one peer (defaults to the connected target)
    Send {
        message: String,
        #[arg(long)]
        to: Option<String>,
        #[arg(long)]
        from: Option<String>,
        #[arg(long)]
        channel: Option<String>,
    },
    /// Read a mailbox, or a channel's history with --channel
    Messages {
        #[arg(long)]
        peer_id: Option<String>,
        #[arg(long)]
        peek: bool,
        #[arg(long)]
        channel: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// List channels
    Channels,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let mut client = TrackerClient::new(&cli.url)?;
    let login = client.login(&cli.user, &cli.password).await?;

    let reply = match cli.command {
        Commands::Login => login,
        Commands::SubmitInfo { peer_id, ip, port } => {
            let peer_id = peer_id.unwrap_or_else(|| cli.user.clone());
            client.submit_info(&peer_id, ip.as_deref(), port).await?
        }
        Commands::List => serde_json::to_value(client.get_list().await?)?,
        Commands::Connect { to, from } => client.connect_peer(from.as_deref(), &to).await?,
        Commands::Broadcast { message, from, channel } => {
            client
                .broadcast(from.as_deref(), &message, channel.as_deref())
                .await?
        }
        Commands::Send {
            message,
            to,
            from,
            channel,
        } => {
            client
                .send(from.as_deref(), to.as_deref(), &message, channel.as_deref())
                .await?
        }
        Commands::Messages {
            peer_id,
            peek,
            channel,
            limit,
        } => {
            let query = MessageQuery {
                peer_id,
                peek,
                channel,
                limit,
            };
            client.get_messages(&query).await?
        }
        Commands::Channels => client.channels().await?,
    };

    print_reply(&reply)
}

fn print_reply(reply: &Value) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(reply)?);
    Ok(())
}
