//! Command-line surface: serve the daemon, upload an entry, fetch a record.

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

use crate::client::{self, GetBody};
use crate::core::StationId;
use crate::{config, daemon, proto};

const DEFAULT_SERVER: &str = "127.0.0.1:4567";

#[derive(Parser)]
#[command(name = "stationd", version, about = "Weather station aggregation engine")]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the aggregation daemon in the foreground.
    Serve {
        /// Listen address, overriding the config file.
        #[arg(long)]
        listen: Option<String>,
        /// Data directory, overriding the config file.
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Upload an entry file's fields under a station identity.
    Put {
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
        /// Station identity; generated when omitted.
        #[arg(long)]
        station: Option<String>,
        /// Entry file of field:value lines.
        #[arg(long)]
        file: PathBuf,
    },
    /// Fetch a station's merged record.
    Get {
        #[arg(long, default_value = DEFAULT_SERVER)]
        server: String,
        /// Consumer identity for the session handshake; generated when
        /// omitted.
        #[arg(long)]
        client_id: Option<String>,
        /// Station identity, or `latest` for the most recently updated one.
        #[arg(long, default_value = proto::LATEST)]
        station: String,
    },
}

pub fn run(cli: Cli) -> crate::Result<()> {
    match cli.command {
        Command::Serve { listen, data_dir } => {
            let mut config = config::load_or_default();
            if let Some(listen) = listen {
                config.listen_addr = listen;
            }
            if let Some(data_dir) = data_dir {
                config.data_dir = Some(data_dir);
            }
            daemon::serve(&config)?;
            Ok(())
        }
        Command::Put {
            server,
            station,
            file,
        } => {
            let station = parse_identity(station)?;
            let reply = client::put_station(&server, &station, &file)?;
            println!("{} {} (clock {})", station, reply.status, reply.clock);
            Ok(())
        }
        Command::Get {
            server,
            client_id,
            station,
        } => {
            let client_id = parse_identity(client_id)?;
            let reply = client::get_station(&server, &client_id, &station)?;
            match reply.body {
                GetBody::Record(fields) => {
                    for (name, value) in &fields {
                        println!("{name}:{value}");
                    }
                }
                GetBody::Status(status) => println!("{status} (clock {})", reply.clock),
            }
            Ok(())
        }
    }
}

/// Parse the given identity, minting a random one when absent.
fn parse_identity(raw: Option<String>) -> crate::Result<StationId> {
    let raw = raw.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    Ok(StationId::parse(&raw)?)
}
