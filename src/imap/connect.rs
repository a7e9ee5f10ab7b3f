//! Dialing IMAP servers over implicit TLS or STARTTLS using tokio-rustls.
use std::fmt::Debug;
use std::sync::Arc;

use async_imap::Client;
use async_trait::async_trait;
use futures::io::{AsyncRead, AsyncWrite};
use once_cell::sync::OnceCell;
use rustls_native_certs::load_native_certs;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::{ClientConfig, RootCertStore, ServerName};
use tokio_rustls::TlsConnector;
use tokio_util::compat::TokioAsyncReadCompatExt;
use tracing::debug;

use crate::config::ImapConfig;
use crate::errors::{EmailError, EmailResult};

pub trait ImapStream: AsyncRead + AsyncWrite + Unpin + Send + Debug {}

impl<T> ImapStream for T where T: AsyncRead + AsyncWrite + Unpin + Send + Debug {}

pub type BoxedStream = Box<dyn ImapStream>;
pub type ImapSession = async_imap::Session<BoxedStream>;

/// Opens a transport to the server and consumes its greeting. Login is left
/// to the caller.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, config: &ImapConfig) -> EmailResult<Client<BoxedStream>>;
}

/// Dials real servers: implicit TLS when `tls` is on, STARTTLS otherwise.
#[derive(Debug, Default, Clone, Copy)]
pub struct NetworkDialer;

#[async_trait]
impl Dialer for NetworkDialer {
    async fn dial(&self, config: &ImapConfig) -> EmailResult<Client<BoxedStream>> {
        let port = config.port();
        let tcp = TcpStream::connect((config.host.as_str(), port))
            .await
            .map_err(|e| {
                EmailError::Transport(format!("connecting to {}:{port}: {e}", config.host))
            })?;

        if config.use_tls() {
            let tls = tls_handshake(&config.host, tcp).await?;
            let stream: BoxedStream = Box::new(tls.compat());
            let mut client = Client::new(stream);
            read_greeting(&mut client).await?;
            return Ok(client);
        }

        let mut plain = Client::new(tcp.compat());
        read_greeting(&mut plain).await?;
        plain.run_command_and_check_ok("STARTTLS", None).await?;
        let tcp = plain.into_inner().into_inner();

        debug!(host = %config.host, "Upgrading IMAP connection via STARTTLS");
        let tls = tls_handshake(&config.host, tcp).await?;
        let stream: BoxedStream = Box::new(tls.compat());
        Ok(Client::new(stream))
    }
}

/// Reads the untagged server greeting so that the next command sees its own
/// tagged response.
pub async fn read_greeting<T: ImapStream>(client: &mut Client<T>) -> EmailResult<()> {
    client
        .read_response()
        .await?
        .ok_or_else(|| EmailError::Transport("connection closed before greeting".into()))?;
    Ok(())
}

async fn tls_handshake(host: &str, tcp: TcpStream) -> EmailResult<TlsStream<TcpStream>> {
    let connector = TlsConnector::from(tls_config()?);
    let server_name = ServerName::try_from(host)
        .map_err(|_| EmailError::Transport(format!("invalid DNS name {host:?}")))?;
    connector
        .connect(server_name, tcp)
        .await
        .map_err(|e| EmailError::Transport(format!("TLS handshake with {host}: {e}")))
}

static TLS_CONFIG: OnceCell<Arc<ClientConfig>> = OnceCell::new();

fn tls_config() -> EmailResult<Arc<ClientConfig>> {
    TLS_CONFIG
        .get_or_try_init(|| {
            let certs = load_native_certs()
                .map_err(|e| EmailError::Transport(format!("loading native certs: {e}")))?;
            let ders: Vec<Vec<u8>> = certs.into_iter().map(|cert| cert.0).collect();

            let mut root_store = RootCertStore::empty();
            let (added, ignored) = root_store.add_parsable_certificates(&ders);
            debug!(added, ignored, "Loaded native root certificates");

            let config = ClientConfig::builder()
                .with_safe_defaults()
                .with_root_certificates(root_store)
                .with_no_client_auth();
            Ok(Arc::new(config))
        })
        .cloned()
}
