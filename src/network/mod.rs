pub mod error;
pub mod quic_transport;
pub mod types;

pub use error::{NetworkError, NetworkResult};
pub use quic_transport::{install_crypto_provider, QuicListener, QuicTransport, ALPN_PROTOCOL};
pub use types::{ConnectionConfig, PathStatus, PathStream};
