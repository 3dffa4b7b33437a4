use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info, warn};

use pdu_transport::network::connection::Connection;
use pdu_transport::network::framing::{reassemble, FramingParams};
use pdu_transport::network::policy::Decision;
use pdu_transport::network::process::Process;
use pdu_transport::network::registry::ConnectionRegistry;
use pdu_transport::Error;

/// Sends every complete frame back.
///
/// If a registry is given, frames go to all active connections instead.
pub struct EchoProcess {
    framing: FramingParams,
    registry: Option<Arc<ConnectionRegistry>>,
}

impl EchoProcess {
    pub fn new(framing: FramingParams, registry: Option<Arc<ConnectionRegistry>>) -> Self {
        EchoProcess { framing, registry }
    }
}

#[async_trait]
impl Process for EchoProcess {
    async fn on_connect(&self, connection: &Connection) -> Result<(), Error> {
        match connection.peer_certificates() {
            Some(chain) => info!(
                "{} presented {} certificate(s)",
                connection.remote_address(),
                chain.len()
            ),
            None => debug!("{} presented no certificate", connection.remote_address()),
        }

        Ok(())
    }

    async fn on_receive(&self, connection: &Connection, buffer: Vec<u8>) -> Result<Decision, Error> {
        let (frames, leftover) = reassemble(&buffer, &self.framing)?;

        for frame in frames {
            debug!(
                "Echoing {} byte frame from {}",
                frame.len(),
                connection.remote_address()
            );

            let Some(registry) = &self.registry else {
                connection.write(&frame).await?;
                continue;
            };

            for (address, err) in registry.broadcast(&frame).await {
                warn!("Failed to forward frame to {address}: {err}");
            }
        }

        Ok(Decision::keep(leftover))
    }

    async fn on_close(&self, connection: &Connection) {
        info!("Goodbye {}", connection.remote_address());
    }
}
