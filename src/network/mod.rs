//! Network Layer
//!
//! WebSocket front end for the progression engine.
//! This layer owns no progression rules - everything runs through `engine/`.

pub mod auth;
pub mod handler;
pub mod protocol;
pub mod server;

pub use auth::{
    player_for_subject, validate_token, AuthConfig, AuthError, Identity, JwtSessionResolver, KeySource, SessionResolver,
    TokenClaims,
};
pub use handler::{Connection, RequestHandler};
pub use protocol::{ClientMessage, ErrorCode, ServerError, ServerMessage, SyncProgressRequest};
pub use server::{ServeError, ProgressionServer, ServerConfig};
