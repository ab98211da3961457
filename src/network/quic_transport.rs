use crate::network::error::{NetworkError, NetworkResult};
use crate::network::types::{ConnectionConfig, PathStream};
use quinn::{Endpoint, Incoming, ServerConfig, TransportConfig};
use std::net::SocketAddr;
use std::sync::Arc;

/// ALPN identifier both ends of a path must agree on
pub const ALPN_PROTOCOL: &[u8] = b"mpsession/1";

/// Install the ring crypto provider for rustls if no provider is set yet
pub fn install_crypto_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

/// Secure per-path stream transport over QUIC.
///
/// Outbound paths are dialed from one client endpoint; every listen address
/// gets its own server endpoint through [`QuicTransport::listen`].
pub struct QuicTransport {
    client: Endpoint,
    config: ConnectionConfig,
}

impl QuicTransport {
    pub async fn new(config: ConnectionConfig) -> NetworkResult<Self> {
        install_crypto_provider();

        if config.insecure_skip_verify {
            tracing::warn!(
                "TLS certificate verification is disabled; peers are not authenticated"
            );
        }

        let client = Self::make_client_endpoint(&config)?;
        Ok(Self { client, config })
    }

    fn transport_config(config: &ConnectionConfig) -> NetworkResult<TransportConfig> {
        let idle: quinn::IdleTimeout = config
            .max_idle_timeout
            .try_into()
            .map_err(|_| NetworkError::InvalidConfig("idle timeout out of range".into()))?;

        let mut transport = TransportConfig::default();
        transport
            .max_idle_timeout(Some(idle))
            .keep_alive_interval(Some(config.keep_alive_interval));
        Ok(transport)
    }

    /// Create server endpoint with an ephemeral self-signed certificate
    fn make_server_endpoint(
        config: &ConnectionConfig,
        bind_addr: SocketAddr,
    ) -> NetworkResult<Endpoint> {
        let cert = rcgen::generate_simple_self_signed(vec![config.server_name.clone()])
            .map_err(|e| NetworkError::CertificateError(e.to_string()))?;
        let cert_der = rustls::pki_types::CertificateDer::from(cert.cert.der().to_vec());
        let priv_key = rustls::pki_types::PrivateKeyDer::try_from(cert.key_pair.serialize_der())
            .map_err(|e| NetworkError::CertificateError(e.to_string()))?;

        let mut crypto = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![cert_der], priv_key)
            .map_err(|e| NetworkError::CertificateError(e.to_string()))?;
        crypto.alpn_protocols = vec![ALPN_PROTOCOL.to_vec()];

        let mut server_config = ServerConfig::with_crypto(Arc::new(
            quinn::crypto::rustls::QuicServerConfig::try_from(crypto)
                .map_err(|e| NetworkError::CertificateError(e.to_string()))?,
        ));
        server_config.transport_config(Arc::new(Self::transport_config(config)?));

        Endpoint::server(server_config, bind_addr)
            .map_err(|e| NetworkError::ConnectionFailed(format!("bind {bind_addr}: {e}")))
    }

    /// Create client endpoint
    /// If `insecure_skip_verify` is set, accepts any certificate
    /// Otherwise uses system root certificates for verification
    fn make_client_endpoint(config: &ConnectionConfig) -> NetworkResult<Endpoint> {
        let mut endpoint = Endpoint::client(config.bind_addr)
            .map_err(|e| NetworkError::ConnectionFailed(e.to_string()))?;

        let mut crypto = if config.insecure_skip_verify {
            rustls::ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(SkipServerVerification))
                .with_no_client_auth()
        } else {
            let mut root_store = rustls::RootCertStore::empty();

            match rustls_native_certs::load_native_certs() {
                Ok(certs) => {
                    for cert in certs {
                        if let Err(e) = root_store.add(cert) {
                            tracing::warn!("Failed to add certificate to root store: {}", e);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to load native certificates: {}. Using webpki roots.",
                        e
                    );
                }
            }

            if root_store.is_empty() {
                root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            }

            rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth()
        };
        crypto.alpn_protocols = vec![ALPN_PROTOCOL.to_vec()];

        let mut client_config = quinn::ClientConfig::new(Arc::new(
            quinn::crypto::rustls::QuicClientConfig::try_from(crypto)
                .map_err(|e| NetworkError::CertificateError(e.to_string()))?,
        ));
        client_config.transport_config(Arc::new(Self::transport_config(config)?));
        endpoint.set_default_client_config(client_config);

        Ok(endpoint)
    }

    /// Open a listener on `addr`
    pub async fn listen(&self, addr: SocketAddr) -> NetworkResult<QuicListener> {
        let endpoint = Self::make_server_endpoint(&self.config, addr)?;
        let local_addr = endpoint.local_addr()?;
        tracing::debug!(%local_addr, "listening for paths");
        Ok(QuicListener {
            endpoint,
            local_addr,
        })
    }

    /// Connect to `remote_addr` and open the path's stream
    pub async fn dial(&self, remote_addr: SocketAddr) -> NetworkResult<PathStream> {
        let connection = self
            .client
            .connect(remote_addr, &self.config.server_name)?
            .await?;
        let (send, recv) = connection.open_bi().await?;

        tracing::debug!(%remote_addr, "dialed path");
        Ok(PathStream {
            remote_addr: connection.remote_address(),
            connection,
            send,
            recv,
        })
    }

    /// Get local address of the dialing endpoint
    pub fn local_addr(&self) -> NetworkResult<SocketAddr> {
        self.client.local_addr().map_err(NetworkError::IoError)
    }

    pub fn close(&self) {
        self.client.close(0u32.into(), b"closing");
    }
}

/// Accepts inbound paths on one listen address
pub struct QuicListener {
    endpoint: Endpoint,
    local_addr: SocketAddr,
}

impl QuicListener {
    /// Next connection attempt, before its handshake has run
    pub async fn next_incoming(&self) -> NetworkResult<Incoming> {
        self.endpoint
            .accept()
            .await
            .ok_or_else(|| NetworkError::ConnectionClosed("Endpoint closed".into()))
    }

    /// Finish an inbound connection and accept the stream its peer opened
    pub async fn establish(incoming: Incoming) -> NetworkResult<PathStream> {
        let connection = incoming.await?;
        let (send, recv) = connection.accept_bi().await?;
        Ok(PathStream {
            remote_addr: connection.remote_address(),
            connection,
            send,
            recv,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn close(&self) {
        self.endpoint.close(0u32.into(), b"closing");
    }
}

impl Drop for QuicListener {
    fn drop(&mut self) {
        self.close();
    }
}

// Certificate verifier that accepts any certificate (INSECURE)
#[derive(Debug)]
struct SkipServerVerification;

impl rustls::client::danger::ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ED25519,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[tokio::test]
    async fn test_create_transport() {
        let transport = QuicTransport::new(ConnectionConfig::default()).await;
        assert!(transport.is_ok());
        assert!(transport.unwrap().local_addr().is_ok());
    }

    #[tokio::test]
    async fn test_listen_assigns_port() {
        let transport = QuicTransport::new(ConnectionConfig::default()).await.unwrap();
        let listener = transport.listen(loopback()).await.unwrap();
        assert_ne!(listener.local_addr().port(), 0);
    }

    #[tokio::test]
    async fn test_dial_accept_exchange() {
        let transport = Arc::new(QuicTransport::new(ConnectionConfig::default()).await.unwrap());
        let listener = transport.listen(loopback()).await.unwrap();
        let server_addr = listener.local_addr();

        let server_task = tokio::spawn(async move {
            let incoming = listener.next_incoming().await.unwrap();
            let mut path = QuicListener::establish(incoming).await.unwrap();
            let mut buf = [0u8; 5];
            path.recv.read_exact(&mut buf).await.unwrap();
            assert_eq!(&buf, b"hello");
            path.send.write_all(b"world").await.unwrap();
            path.send.finish().unwrap();
            let _ = path.send.stopped().await;
        });

        let mut path = transport.dial(server_addr).await.unwrap();
        assert_eq!(path.remote_addr, server_addr);
        path.send.write_all(b"hello").await.unwrap();

        let reply = path.recv.read_to_end(64).await.unwrap();
        assert_eq!(reply, b"world");

        tokio::time::timeout(Duration::from_secs(5), server_task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_dial_refused_address_fails() {
        let config = ConnectionConfig {
            max_idle_timeout: Duration::from_millis(500),
            ..Default::default()
        };
        let transport = QuicTransport::new(config).await.unwrap();
        // nothing listens here once the listener is dropped
        let addr = {
            let listener = transport.listen(loopback()).await.unwrap();
            listener.local_addr()
        };
        let result = tokio::time::timeout(Duration::from_secs(10), transport.dial(addr)).await;
        assert!(matches!(result, Ok(Err(_))));
    }
}
