//! Command line arguments.

use crate::config::Config;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "callwire")]
#[command(version, about = "Signaling relay for peer-to-peer calls")]
pub struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Host to bind to (overrides the config file)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on (overrides the config file)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Directory holding the client UI (overrides the config file)
    #[arg(long)]
    pub static_dir: Option<String>,

    /// PEM certificate chain for TLS (overrides the config file)
    #[arg(long, requires = "tls_key")]
    pub tls_cert: Option<String>,

    /// PEM private key for TLS (overrides the config file)
    #[arg(long, requires = "tls_cert")]
    pub tls_key: Option<String>,

    /// Reply with peer-unavailable when a signal cannot be delivered
    #[arg(long)]
    pub notify_unavailable: bool,
}

impl Cli {
    /// Apply command line overrides on top of a loaded configuration.
    pub fn apply(&self, config: &mut Config) {
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(dir) = &self.static_dir {
            config.static_dir = dir.clone();
        }
        if let Some(cert) = &self.tls_cert {
            config.tls.cert_path = Some(cert.clone());
        }
        if let Some(key) = &self.tls_key {
            config.tls.key_path = Some(key.clone());
        }
        if self.notify_unavailable {
            config.relay.notify_unavailable = true;
        }
    }
}
