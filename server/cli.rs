use std::path::PathBuf;

use clap::{ArgAction, Parser, ValueHint};

#[derive(Parser, Debug)]
#[command(
    name = "pdu-server",
    about = "Serve length-framed PDUs over TCP or TLS and echo them back",
    author,
    version
)]
pub struct CliArguments {
    /// Verbose mode (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// If provided, only this config file is used.
    #[arg(short, long, value_hint = ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    /// The host the server binds to. Overwrites the host in the config file.
    #[arg(long)]
    pub host: Option<String>,

    /// The port the server listens on. Overwrites the port in the config file.
    #[arg(short, long)]
    pub port: Option<String>,

    /// Send every received frame to all connected clients instead of only the sender.
    #[arg(short, long)]
    pub broadcast: bool,

    /// Create self-signed certificates for a server and a client in this directory and exit.
    #[arg(long, value_hint = ValueHint::DirPath)]
    pub generate_certificates: Option<PathBuf>,

    /// Write the effective configuration to the config file and exit.
    #[arg(long)]
    pub write_config: bool,
}
