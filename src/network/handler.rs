//! Request Dispatch
//!
//! Turns one decoded [`ClientMessage`] into one [`ServerMessage`]. Requests
//! other than ping and auth are refused before auth without touching any
//! counter. Everything except ping then passes the rate limiter, keyed by
//! player id once authenticated and by remote IP before. Admin messages
//! finally need the admin role.

use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::core::ids::PlayerId;
use crate::engine::ProgressionEngine;
use crate::error::{EngineError, EngineResult};
use crate::network::auth::{Identity, SessionResolver};
use crate::network::protocol::{AuthRequest, AuthResult, ClientMessage, ServerMessage, SyncProgressRequest};

/// Per-connection state.
#[derive(Clone, Debug)]
pub struct Connection {
    /// Remote address. Its IP is the rate-limit key before auth.
    pub peer: SocketAddr,
    /// Identity after a successful auth.
    pub identity: Option<Identity>,
}

impl Connection {
    /// Unauthenticated connection from `peer`.
    pub fn new(peer: SocketAddr) -> Self {
        Self { peer, identity: None }
    }

    /// Key for rate limiting. Every connection from one IP shares a key
    /// until it authenticates.
    pub fn rate_key(&self) -> String {
        match &self.identity {
            Some(identity) => identity.player.to_uuid_string(),
            None => format!("ip:{}", self.peer.ip()),
        }
    }
}

/// Dispatches client requests to the engine.
#[derive(Clone)]
pub struct RequestHandler {
    engine: Arc<ProgressionEngine>,
    resolver: Arc<dyn SessionResolver>,
    server_version: String,
}

impl RequestHandler {
    /// Create a handler.
    pub fn new(engine: Arc<ProgressionEngine>, resolver: Arc<dyn SessionResolver>, server_version: impl Into<String>) -> Self {
        Self {
            engine,
            resolver,
            server_version: server_version.into(),
        }
    }

    /// Engine behind this handler.
    pub fn engine(&self) -> &Arc<ProgressionEngine> {
        &self.engine
    }

    /// Handle one request, always producing a reply.
    pub async fn handle(&self, conn: &mut Connection, msg: ClientMessage) -> ServerMessage {
        match self.dispatch(conn, msg).await {
            Ok(reply) => reply,
            Err(err) => {
                debug!("Request from {} failed: {}", conn.peer, err);
                ServerMessage::error(&err)
            }
        }
    }

    /// Handle a binary frame (a bincode batch payload).
    pub async fn handle_binary(&self, conn: &mut Connection, data: &[u8]) -> ServerMessage {
        match SyncProgressRequest::from_bytes(data) {
            Ok(req) => self.handle(conn, ClientMessage::SyncProgress(req)).await,
            Err(e) => ServerMessage::error(&EngineError::invalid(format!("bad binary frame: {e}"))),
        }
    }

    async fn dispatch(&self, conn: &mut Connection, msg: ClientMessage) -> EngineResult<ServerMessage> {
        match &msg {
            ClientMessage::Ping { timestamp } => {
                return Ok(ServerMessage::Pong {
                    timestamp: *timestamp,
                    server_time: chrono::Utc::now().timestamp_millis().max(0) as u64,
                });
            }
            ClientMessage::Auth(_) => {}
            _ if conn.identity.is_none() => return Err(unauthenticated()),
            _ => {}
        }

        if let Some(action) = msg.rate_action() {
            self.engine.check_and_consume_rate_limit(action, &conn.rate_key()).await?;
        }

        let msg = match msg {
            ClientMessage::Auth(req) => return Ok(self.authenticate(conn, req)),
            other => other,
        };
        let identity = conn.identity.ok_or_else(unauthenticated)?;
        if msg.requires_admin() && !identity.admin {
            warn!("Player {} attempted admin action {:?}", identity.player.short(), msg.rate_action());
            return Err(EngineError::Forbidden);
        }
        let player = identity.player;
        let engine = &self.engine;

        let reply = match msg {
            ClientMessage::Register => ServerMessage::Registered(engine.register_player(player).await?),
            ClientMessage::CheckEligibility { mode } => {
                ServerMessage::Eligibility(engine.check_eligibility(player, mode).await?)
            }
            ClientMessage::RecordGameResult { mode, result } => {
                ServerMessage::GameRecorded(engine.record_game_result(player, mode, result).await?)
            }
            ClientMessage::SyncProgress(req) => ServerMessage::ProgressSynced(
                engine
                    .sync_batch_progress(player, req.mode, req.family, req.attempts, req.claimed, req.is_complete)
                    .await?,
            ),
            ClientMessage::GetProgress => ServerMessage::Progress(engine.get_progress(player).await?),
            ClientMessage::Reorder { family, member, direction } => {
                let records = engine.reorder_family(family.clone(), member, direction).await?;
                ServerMessage::Reordered { family, records }
            }
            ClientMessage::UpsertContent(record) => ServerMessage::ContentSaved(engine.upsert_content(record).await?),
            ClientMessage::ListViolations { unread_only } => ServerMessage::Violations {
                violations: engine.list_violations(unread_only).await?,
            },
            ClientMessage::MarkViolationRead { id } => {
                ServerMessage::ViolationRead(engine.mark_violation_read(id).await?)
            }
            ClientMessage::ResetPlayer { player_id } => {
                let target = PlayerId::from_uuid_str(&player_id)
                    .ok_or_else(|| EngineError::invalid(format!("bad player id: {player_id}")))?;
                ServerMessage::PlayerReset(engine.admin_reset_player(target).await?)
            }
            ClientMessage::Auth(_) | ClientMessage::Ping { .. } => {
                return Err(EngineError::invalid("unexpected message"));
            }
        };
        Ok(reply)
    }

    fn authenticate(&self, conn: &mut Connection, req: AuthRequest) -> ServerMessage {
        match self.resolver.resolve(&req.token) {
            Ok(identity) => {
                debug!(
                    "Client {} authenticated as {} (admin: {}, client {})",
                    conn.peer,
                    identity.player.short(),
                    identity.admin,
                    req.client_version
                );
                conn.identity = Some(identity);
                ServerMessage::AuthResult(AuthResult {
                    success: true,
                    player_id: Some(identity.player.to_uuid_string()),
                    admin: identity.admin,
                    error: None,
                    server_version: self.server_version.clone(),
                })
            }
            Err(e) => {
                warn!("Auth failed for {}: {}", conn.peer, e);
                conn.identity = None;
                ServerMessage::AuthResult(AuthResult {
                    success: false,
                    player_id: None,
                    admin: false,
                    error: Some(e.to_string()),
                    server_version: self.server_version.clone(),
                })
            }
        }
    }
}

fn unauthenticated() -> EngineError {
    EngineError::Unauthenticated("must authenticate first".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::network::auth::{AuthConfig, JwtSessionResolver, TokenClaims};
    use crate::network::protocol::ErrorCode;
    use crate::rewards::modes::{GameMode, GameResult};
    use crate::rewards::ordering::{ContentRecord, Direction, FamilyKey};
    use crate::rewards::ratelimit::RateAction;
    use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};

    fn peer(addr: &str) -> SocketAddr {
        addr.parse().unwrap()
    }

    fn auth_with(token: &str) -> ClientMessage {
        ClientMessage::Auth(AuthRequest { token: token.into(), client_version: "1".into() })
    }

    const SECRET: &str = "handler-test-secret-0123456789";

    fn token(sub: &str, roles: &[&str]) -> String {
        let claims = TokenClaims {
            sub: sub.into(),
            exp: chrono::Utc::now().timestamp() as u64 + 3600,
            iat: 0,
            iss: None,
            aud: None,
            roles: roles.iter().map(|r| r.to_string()).collect(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
    }

    fn handler() -> RequestHandler {
        let engine = Arc::new(ProgressionEngine::new(EngineConfig::default()));
        let resolver = Arc::new(JwtSessionResolver::new(AuthConfig::hmac(SECRET)));
        RequestHandler::new(engine, resolver, "test")
    }

    async fn login(h: &RequestHandler, sub: &str, roles: &[&str]) -> Connection {
        let mut conn = Connection::new(peer("192.0.2.10:7000"));
        let reply = h.handle(&mut conn, auth_with(&token(sub, roles))).await;
        assert!(matches!(reply, ServerMessage::AuthResult(AuthResult { success: true, .. })));
        conn
    }

    fn error_code(reply: &ServerMessage) -> Option<ErrorCode> {
        match reply {
            ServerMessage::Error(e) => Some(e.code),
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_requires_auth() {
        let h = handler();
        let mut conn = Connection::new(peer("10.0.0.1:5000"));
        let reply = h.handle(&mut conn, ClientMessage::GetProgress).await;
        assert_eq!(error_code(&reply), Some(ErrorCode::NotAuthenticated));
    }

    #[tokio::test]
    async fn test_unauthenticated_requests_leave_no_trace() {
        let h = handler();
        let mut conn = Connection::new(peer("10.0.0.1:5000"));
        let limit = RateAction::ReadProgress.policy().max;
        for _ in 0..limit + 5 {
            let reply = h.handle(&mut conn, ClientMessage::GetProgress).await;
            assert_eq!(error_code(&reply), Some(ErrorCode::NotAuthenticated));
        }
        assert!(h.engine().list_violations(false).await.unwrap().is_empty());

        // Auth from the same IP still has its full budget
        let reply = h.handle(&mut conn, auth_with(&token("kid-0", &[]))).await;
        assert!(matches!(reply, ServerMessage::AuthResult(AuthResult { success: true, .. })));
        let reply = h.handle(&mut conn, ClientMessage::Register).await;
        assert!(matches!(reply, ServerMessage::Registered(_)));
    }

    #[tokio::test]
    async fn test_reconnecting_shares_auth_budget_per_ip() {
        let h = handler();
        let limit = RateAction::Auth.policy().max;
        let mut conns: Vec<Connection> = (0..3)
            .map(|i| Connection::new(peer(&format!("10.0.0.1:{}", 40000 + i))))
            .collect();

        for n in 0..limit {
            let conn = &mut conns[n as usize % 3];
            let reply = h.handle(conn, auth_with("guess")).await;
            assert!(matches!(reply, ServerMessage::AuthResult(AuthResult { success: false, .. })));
        }

        // A fresh connection from the same IP is already over budget
        let mut late = Connection::new(peer("10.0.0.1:40099"));
        let reply = h.handle(&mut late, auth_with(&token("kid-9", &[]))).await;
        assert_eq!(error_code(&reply), Some(ErrorCode::RateLimited));
        assert!(late.identity.is_none());

        // Another IP keeps its own budget
        let mut other = Connection::new(peer("10.0.0.2:40000"));
        let reply = h.handle(&mut other, auth_with(&token("kid-9", &[]))).await;
        assert!(matches!(reply, ServerMessage::AuthResult(AuthResult { success: true, .. })));
    }

    #[tokio::test]
    async fn test_bad_token_rejected() {
        let h = handler();
        let mut conn = Connection::new(peer("10.0.0.1:5000"));
        let reply = h.handle(&mut conn, auth_with("garbage")).await;
        assert!(matches!(reply, ServerMessage::AuthResult(AuthResult { success: false, .. })));
        assert!(conn.identity.is_none());
    }

    #[tokio::test]
    async fn test_play_flow() {
        let h = handler();
        let mut conn = login(&h, "kid-1", &[]).await;

        let reply = h.handle(&mut conn, ClientMessage::Register).await;
        assert!(matches!(reply, ServerMessage::Registered(_)));

        let result = GameResult::Guess { won: true, guesses: 1, hint_used: true };
        let reply = h
            .handle(&mut conn, ClientMessage::RecordGameResult { mode: GameMode::DailyWord, result: result.clone() })
            .await;
        match reply {
            ServerMessage::GameRecorded(out) => {
                assert_eq!(out.xp_awarded, 15);
                assert_eq!(out.currency_awarded, 5);
            }
            other => panic!("unexpected {other:?}"),
        }

        let reply = h
            .handle(&mut conn, ClientMessage::RecordGameResult { mode: GameMode::DailyWord, result })
            .await;
        assert_eq!(error_code(&reply), Some(ErrorCode::AlreadyCompletedToday));
    }

    #[tokio::test]
    async fn test_admin_gate() {
        let h = handler();
        let mut kid = login(&h, "kid-2", &[]).await;
        let reorder = ClientMessage::Reorder {
            family: FamilyKey::Levels,
            member: "l1".into(),
            direction: Direction::Up,
        };
        let reply = h.handle(&mut kid, reorder.clone()).await;
        assert_eq!(error_code(&reply), Some(ErrorCode::Forbidden));

        let mut admin = login(&h, "staff-1", &["admin"]).await;
        let record = ContentRecord {
            id: "l1".into(),
            family: FamilyKey::Levels,
            order: 0,
            created_at: chrono::Utc::now(),
        };
        let reply = h.handle(&mut admin, ClientMessage::UpsertContent(record)).await;
        assert!(matches!(reply, ServerMessage::ContentSaved(_)));

        let reply = h.handle(&mut admin, reorder).await;
        assert!(matches!(reply, ServerMessage::Reordered { .. }));
    }

    #[tokio::test]
    async fn test_rate_limited_reply_carries_retry() {
        let h = handler();
        let mut conn = login(&h, "kid-3", &[]).await;
        h.handle(&mut conn, ClientMessage::Register).await;

        let limit = RateAction::ReadProgress.policy().max;
        for _ in 0..limit {
            let reply = h.handle(&mut conn, ClientMessage::GetProgress).await;
            assert!(matches!(reply, ServerMessage::Progress(_)));
        }

        match h.handle(&mut conn, ClientMessage::GetProgress).await {
            ServerMessage::Error(e) => {
                assert_eq!(e.code, ErrorCode::RateLimited);
                assert!(e.retry_after_ms.is_some());
            }
            other => panic!("unexpected {other:?}"),
        }

        // Ping is never limited
        assert!(matches!(
            h.handle(&mut conn, ClientMessage::Ping { timestamp: 7 }).await,
            ServerMessage::Pong { timestamp: 7, .. }
        ));
    }

    #[tokio::test]
    async fn test_binary_sync_frame() {
        let h = handler();
        let mut conn = login(&h, "kid-4", &[]).await;
        h.handle(&mut conn, ClientMessage::Register).await;

        let reply = h.handle_binary(&mut conn, b"\x01\x02").await;
        assert_eq!(error_code(&reply), Some(ErrorCode::InvalidInput));
    }
}
