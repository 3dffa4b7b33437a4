use anyhow::{Context, Result};
use clap::Parser;
use simplelog::{Config, LevelFilter, SimpleLogger};

use pdu_transport::network::policy::{CloseMode, RwPolicy};
use pdu_transport::settings::Settings;
use pdu_transport::Client;

mod cli;
mod message;

use crate::cli::CliArguments;
use crate::message::{build_frame, ReplyCollector};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Parse commandline options.
    let opt = CliArguments::parse();

    // Set the verbosity level of the logger.
    let level = match opt.verbose {
        0 => LevelFilter::Error,
        1 => LevelFilter::Warn,
        2 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };
    SimpleLogger::init(level, Config::default())?;

    let (mut settings, _) = Settings::read(&opt.config).context("Failed to read configuration.")?;
    if let Some(host) = &opt.host {
        settings.client.host = host.clone();
    }
    if let Some(port) = &opt.port {
        settings.client.port = port.clone();
    }
    if let Some(server_name) = &opt.server_name {
        settings.client.server_name = Some(server_name.clone());
    }

    let framing = settings.shared.framing.clone();
    let collector = ReplyCollector::new(framing.clone());
    let replies = collector.replies.clone();
    let client = Client::connect(&settings, collector)
        .await
        .with_context(|| format!("Failed to connect to {}", settings.client.address()))?;

    let rw_policy = if opt.no_wait {
        RwPolicy::WaitWrite
    } else {
        RwPolicy::WaitRead
    };

    for message in &opt.messages {
        let frame = build_frame(&framing, message.as_bytes())?;
        client.send_msg(frame, rw_policy).await?;

        let received: Vec<_> = match replies.lock() {
            Ok(mut replies) => replies.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        for reply in received {
            let payload = &reply[framing.min_header_len.min(reply.len())..];
            println!("{}", String::from_utf8_lossy(payload));
        }

        if client.is_closed() {
            eprintln!("Server closed the connection");
            return Ok(());
        }
    }

    client.close(CloseMode::Graceful).await?;
    Ok(())
}
