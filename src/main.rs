//! CMP Engine - Certificate Management Protocol server
//!
//! Bootstraps an in-memory certificate authority (root CA and issuing CA),
//! verifies the stored hierarchy and serves CMP requests over a Unix socket.
//!
//! # Usage
//!
//! ```bash
//! cmp-engine [config.toml]
//! RUST_LOG=cmp_engine=debug cmp-engine /etc/cmp-engine/config.toml
//! ```

use anyhow::{anyhow, Context, Result};
use cmp_engine::authority::{AuthoritySettings, MemoryAuthority};
use cmp_engine::configs::AppConfig;
use cmp_engine::external_interface;
use cmp_engine::handlers::CmpEngine;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => AppConfig::from_file(&path)?,
        None => AppConfig::load()?,
    };
    info!(
        authority = %config.cmp.authority,
        profile = %config.cmp.profile,
        protection = ?config.cmp.protection,
        "Configuration loaded"
    );

    let authority = MemoryAuthority::bootstrap(AuthoritySettings::from_config(&config))
        .context("Failed to bootstrap certificate authority")?;
    if !authority.store().validate()? {
        return Err(anyhow!("Certificate authority hierarchy failed verification"));
    }
    info!("Certificate authority hierarchy verified");

    let engine = CmpEngine::new(Arc::new(authority));
    external_interface::start_socket_server(engine, &config)
}
