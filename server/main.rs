use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use simplelog::{Config, ConfigBuilder, LevelFilter, SimpleLogger, TermLogger, TerminalMode};

use pdu_transport::network::certificate::create_certificates;
use pdu_transport::network::registry::ConnectionRegistry;
use pdu_transport::settings::Settings;
use pdu_transport::Server;

mod cli;
mod echo;

use crate::cli::CliArguments;
use crate::echo::EchoProcess;

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() -> Result<()> {
    // Parse commandline options.
    let opt = CliArguments::parse();
    init_logger(opt.verbose);

    let (mut settings, config_found) =
        Settings::read(&opt.config).context("Failed to read configuration.")?;
    if !config_found {
        info!("Running with default settings");
    }

    // Commandline options overwrite the config file.
    if let Some(host) = &opt.host {
        settings.server.host = host.clone();
    }
    if let Some(port) = &opt.port {
        settings.server.port = port.clone();
    }

    if opt.write_config {
        settings.save(&opt.config)?;
        println!("Configuration written");
        return Ok(());
    }

    if let Some(certs_dir) = &opt.generate_certificates {
        let names = vec![settings.server.host.clone(), "localhost".to_string()];
        let (cert, key) = create_certificates(certs_dir, "server", names)?;
        println!("Server certificate: {cert:?}\nServer key: {key:?}");

        let (cert, key) = create_certificates(certs_dir, "client", vec!["pdu-client".into()])?;
        println!("Client certificate: {cert:?}\nClient key: {key:?}");
        return Ok(());
    }

    let registry = Arc::new(ConnectionRegistry::new());
    let process = EchoProcess::new(
        settings.shared.framing.clone(),
        opt.broadcast.then(|| registry.clone()),
    );
    let server = Server::bind_with_registry(&settings, process, registry)
        .await
        .context("Failed to start server.")?;

    // Stop accepting and close all connections on SigInt/SigTerm.
    let shutdown = server.shutdown_handle();
    ctrlc::set_handler(move || shutdown.trigger())?;

    server.run().await?;
    Ok(())
}

fn init_logger(verbose: u8) {
    // Set the verbosity level of the logger.
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    // Try to initialize the logger with the timezone set to the Local time of the machine.
    let mut builder = ConfigBuilder::new();
    let logger_config = match builder.set_time_offset_to_local() {
        Err(_) => {
            warn!("Failed to determine the local time of this machine. Fallback to UTC.");
            Config::default()
        }
        Ok(builder) => builder.build(),
    };

    // Init a terminal logger. If this fails for some reason, try fallback to a SimpleLogger
    if TermLogger::init(
        level,
        logger_config.clone(),
        TerminalMode::Stderr,
        simplelog::ColorChoice::Auto,
    )
    .is_err()
    {
        let _ = SimpleLogger::init(level, logger_config);
    }
}
