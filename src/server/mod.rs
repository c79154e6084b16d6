pub mod api;
pub mod error;

use log::info;
use std::error::Error;
use std::net::SocketAddr;

use crate::agent::ChatAgent;
use crate::cli::Args;

pub use api::router;
pub use error::ApiError;

pub struct Server {
    addr: String,
    agent: ChatAgent,
    args: Args,
}

impl Server {
    pub fn new(addr: String, agent: ChatAgent, args: Args) -> Self {
        Self { addr, agent, args }
    }

    pub async fn run(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        let addr = self.addr.parse::<SocketAddr>()?;
        let app = router(self.agent.clone());

        match (self.args.enable_tls, &self.args.tls_cert_path, &self.args.tls_key_path) {
            (true, Some(cert_path), Some(key_path)) => {
                let tls_config = axum_server::tls_rustls::RustlsConfig::from_pem_file(
                    cert_path,
                    key_path
                ).await?;
                info!("HTTPS server listening on: https://{}", addr);
                axum_server::bind_rustls(addr, tls_config).serve(app.into_make_service()).await?;
            }
            (true, _, _) => {
                return Err("TLS enabled but --tls-cert-path or --tls-key-path is missing".into());
            }
            _ => {
                let listener = tokio::net::TcpListener::bind(addr).await?;
                info!("HTTP server listening on: http://{}", addr);
                axum::serve(listener, app.into_make_service()).await?;
            }
        }

        Ok(())
    }
}
