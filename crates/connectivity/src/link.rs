//! Link Manager
//!
//! Periodically (re)establishes the network link and mirrors its state into
//! a [`ReadySignal`].

use crate::signal::ReadySignal;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tracing::{debug, error, info, warn};

/// Link error types
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Connection to {target} failed: {reason}")]
    Connect { target: String, reason: String },

    #[error("Link did not come up within {0}ms")]
    Timeout(u64),
}

/// Network link collaborator
pub trait Link: Send {
    /// Establish the link, or confirm it is still up
    fn connect(&mut self) -> impl Future<Output = Result<(), LinkError>> + Send;
}

/// Treats the link as up when a TCP connection to `host:port` succeeds
#[derive(Debug, Clone)]
pub struct TcpProbeLink {
    target: String,
}

impl TcpProbeLink {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            target: format!("{}:{}", host, port),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

impl Link for TcpProbeLink {
    async fn connect(&mut self) -> Result<(), LinkError> {
        let stream = TcpStream::connect(&self.target)
            .await
            .map_err(|e| LinkError::Connect {
                target: self.target.clone(),
                reason: e.to_string(),
            })?;
        drop(stream);
        Ok(())
    }
}

/// Link manager configuration
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Time between link checks
    pub check_period: Duration,
    /// Upper bound for one connection attempt
    pub connect_timeout: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            check_period: Duration::from_secs(5 * 60),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Background task that keeps `ready` in sync with the link state
pub struct LinkManager<L> {
    link: L,
    ready: ReadySignal,
    config: LinkConfig,
}

impl<L: Link> LinkManager<L> {
    pub fn new(link: L, ready: ReadySignal, config: LinkConfig) -> Self {
        Self {
            link,
            ready,
            config,
        }
    }

    /// Run one connection attempt and update the signal
    pub async fn check(&mut self) -> Result<(), LinkError> {
        let timeout_ms = self.config.connect_timeout.as_millis() as u64;
        let result = match tokio::time::timeout(self.config.connect_timeout, self.link.connect())
            .await
        {
            Ok(result) => result,
            Err(_) => Err(LinkError::Timeout(timeout_ms)),
        };

        match &result {
            Ok(()) => {
                if self.ready.set(true) {
                    info!("Link manager: connected");
                } else {
                    debug!("Link manager: already connected");
                }
            }
            Err(e) => {
                if self.ready.set(false) {
                    warn!("Link manager: link lost: {}", e);
                } else {
                    error!("Link manager: failed to connect, retrying: {}", e);
                }
            }
        }
        result
    }

    /// Run the check loop forever
    pub async fn run(mut self) {
        info!(
            "Starting link manager (check every {}s)",
            self.config.check_period.as_secs()
        );

        loop {
            let _ = self.check().await;
            tokio::time::sleep(self.config.check_period).await;
        }
    }
}
