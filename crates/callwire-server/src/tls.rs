//! TLS termination for the HTTP listener.
//!
//! When both `tls.cert_path` and `tls.key_path` are configured the server
//! accepts TLS connections itself and serves the same router over them, so
//! WebSocket upgrades arrive as `wss://`.

use crate::config::TlsConfig;
use crate::handlers::shutdown_signal;
use anyhow::{anyhow, bail, Context, Result};
use axum::Router;
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

/// Build a rustls server configuration from PEM files.
///
/// # Errors
///
/// Returns an error if either file is missing or unreadable, holds no
/// certificate or key, or the key does not match the certificate.
pub fn load_server_config(tls: &TlsConfig) -> Result<Arc<ServerConfig>> {
    let (Some(cert_path), Some(key_path)) = (&tls.cert_path, &tls.key_path) else {
        bail!("tls.cert_path and tls.key_path must be set together");
    };

    let cert_pem = std::fs::read(cert_path)
        .with_context(|| format!("Failed to read certificate: {cert_path}"))?;
    let key_pem =
        std::fs::read(key_path).with_context(|| format!("Failed to read private key: {key_path}"))?;

    let certs = rustls_pemfile::certs(&mut cert_pem.as_slice())
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Invalid certificate PEM: {cert_path}"))?;
    if certs.is_empty() {
        bail!("No certificate found in {cert_path}");
    }

    let key = rustls_pemfile::private_key(&mut key_pem.as_slice())
        .with_context(|| format!("Invalid private key PEM: {key_path}"))?
        .ok_or_else(|| anyhow!("No private key found in {key_path}"))?;

    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("Certificate and private key do not form a usable pair")?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(Arc::new(config))
}

/// Serve `app` over TLS until Ctrl-C.
///
/// Each connection is handshaked on its own task. Connections already open
/// when the shutdown signal arrives are left to finish on their own.
///
/// # Errors
///
/// Currently infallible once listening; accept errors are logged and skipped.
pub async fn serve_tls(listener: TcpListener, app: Router, tls: Arc<ServerConfig>) -> Result<()> {
    let acceptor = TlsAcceptor::from(tls);
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(error = %e, "Accept failed");
                    continue;
                }
            },
            () = &mut shutdown => break,
        };

        let acceptor = acceptor.clone();
        let service = TowerToHyperService::new(app.clone());
        tokio::spawn(async move {
            let stream = match acceptor.accept(stream).await {
                Ok(stream) => stream,
                Err(e) => {
                    debug!(%peer, error = %e, "TLS handshake failed");
                    return;
                }
            };

            let conn = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .with_upgrades();
            if let Err(e) = conn.await {
                debug!(%peer, error = %e, "Connection closed with error");
            }
        });
    }

    info!("Callwire server stopped");
    Ok(())
}
