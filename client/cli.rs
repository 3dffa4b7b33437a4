use std::path::PathBuf;

use clap::{ArgAction, Parser, ValueHint};

#[derive(Parser, Debug)]
#[command(
    name = "pdu-client",
    about = "Send length-framed PDUs to a pdu-server and print the replies",
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

    /// The host to connect to. Overwrites the host in the config file.
    #[arg(long)]
    pub host: Option<String>,

    /// The port to connect to. Overwrites the port in the config file.
    #[arg(short, long)]
    pub port: Option<String>,

    /// The name the server's TLS certificate is checked against.
    #[arg(long)]
    pub server_name: Option<String>,

    /// Don't wait for a reply after sending each message.
    #[arg(long)]
    pub no_wait: bool,

    /// The messages to send. Each one is wrapped into its own frame.
    #[arg(required = true)]
    pub messages: Vec<String>,
}
