//! Service announcement: register this instance with a discovery registry.
//!
//! Registration is best-effort. Any failure is logged and startup carries on.

use serde::Serialize;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::time::Duration;
use toolrelay_config::AnnounceConfig;
use tracing::{info, warn};

/// Body of `POST /api/register`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Announcement {
    pub name: String,
    pub address: String,
    pub port: u16,
    pub tags: Vec<String>,
    pub meta: BTreeMap<String, String>,
}

#[derive(Debug, thiserror::Error)]
pub enum AnnounceError {
    #[error("no non-loopback local address found")]
    NoAddress,

    #[error("registry unreachable: {0}")]
    Network(String),

    #[error("registry rejected registration: HTTP {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// The address to advertise.
///
/// An explicit override wins. Otherwise the address of the interface that
/// routes outbound traffic is used, provided it is not loopback.
pub async fn resolve_address(advertise: Option<&str>) -> Result<String, AnnounceError> {
    if let Some(address) = advertise.map(str::trim).filter(|a| !a.is_empty()) {
        return Ok(address.to_string());
    }

    // Connecting a UDP socket sends nothing; it only selects a route.
    let socket = tokio::net::UdpSocket::bind("0.0.0.0:0")
        .await
        .map_err(|_| AnnounceError::NoAddress)?;
    socket
        .connect("192.0.2.1:9")
        .await
        .map_err(|_| AnnounceError::NoAddress)?;
    let ip = socket.local_addr().map_err(|_| AnnounceError::NoAddress)?.ip();

    if is_internal(ip) {
        return Err(AnnounceError::NoAddress);
    }
    Ok(ip.to_string())
}

fn is_internal(ip: IpAddr) -> bool {
    ip.is_loopback() || ip.is_unspecified()
}

impl Announcement {
    pub fn new(config: &AnnounceConfig, address: String, port: u16) -> Self {
        Self {
            name: config.service_name.clone(),
            address,
            port,
            tags: config.tags.clone(),
            meta: config.meta.clone(),
        }
    }
}

/// `http://<registry-host>:<registry-port>/api/register`
pub fn register_url(config: &AnnounceConfig) -> String {
    format!("http://{}:{}/api/register", config.registry_host, config.registry_port)
}

/// Send one registration.
pub async fn register(
    client: &reqwest::Client,
    config: &AnnounceConfig,
    announcement: &Announcement,
) -> Result<(), AnnounceError> {
    let response = client
        .post(register_url(config))
        .json(announcement)
        .send()
        .await
        .map_err(|e| AnnounceError::Network(e.to_string()))?;

    let status = response.status();
    if status.as_u16() != 200 {
        let body = response.text().await.unwrap_or_default();
        return Err(AnnounceError::Rejected {
            status: status.as_u16(),
            body,
        });
    }
    Ok(())
}

/// Resolve the address and register, logging the outcome.
///
/// Returns whether registration succeeded. Never fails startup.
pub async fn announce(config: &AnnounceConfig, port: u16) -> bool {
    let address = match resolve_address(config.advertise_address.as_deref()).await {
        Ok(address) => address,
        Err(e) => {
            warn!(error = %e, "Service announcement skipped");
            return false;
        }
    };

    let announcement = Announcement::new(config, address, port);
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap_or_default();

    match register(&client, config, &announcement).await {
        Ok(()) => {
            info!(
                name = %announcement.name,
                address = %announcement.address,
                port,
                registry = %register_url(config),
                "Service registered"
            );
            true
        }
        Err(e) => {
            warn!(error = %e, registry = %register_url(config), "Service registration failed");
            false
        }
    }
}
