//! Atelier session gateway.
//!
//! Accepts WebSocket connections, verifies the handshake token, binds each
//! connection to a project room and relays room events, persisting through
//! the workspace store.

pub mod auth;
pub mod config;
pub mod connection;
pub mod gateway;
pub mod room;
pub mod transport;

pub use auth::{AuthError, Claims, JwtAuthority};
pub use config::{AuthConfig, GatewayConfig, RateLimitConfig, ServerConfig};
pub use connection::{ConnectionContext, ConnectionId, RateWindow};
pub use gateway::{Admission, Gateway, HandshakeError};
pub use room::{Outbox, RoomRegistry};
pub use transport::{bind, serve, TransportError};
