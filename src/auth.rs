use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use reqwest::header::CONTENT_TYPE;
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::models::Principal;
use crate::session::{Gate, SessionEvent};
use crate::storage::{self, StoredSession};
use crate::supabase;

#[derive(Debug, Clone)]
pub struct Config {
    /// Sessions expiring within this window are refreshed on restore.
    pub refresh_skew: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            refresh_skew: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuthSession {
    pub user: Principal,
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
}

impl AuthSession {
    fn to_stored(&self) -> StoredSession {
        StoredSession {
            user_id: self.user.id.clone(),
            email: self.user.email.clone(),
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
            token_type: self.token_type.clone(),
            expires_at: self.expires_at,
            updated_at: Utc::now(),
        }
    }

    fn from_stored(stored: StoredSession) -> Self {
        Self {
            user: Principal {
                id: stored.user_id,
                email: stored.email,
            },
            access_token: stored.access_token,
            refresh_token: stored.refresh_token,
            token_type: stored.token_type,
            expires_at: stored.expires_at,
        }
    }
}

/// Bridges the remote auth service to the local session gate: every session
/// change is persisted, applied to the client and published to the gate.
pub struct Flow {
    cfg: Config,
    client: Arc<supabase::Client>,
    store: Arc<storage::Store>,
    gate: Arc<Gate>,
}

impl Flow {
    pub fn new(
        client: Arc<supabase::Client>,
        store: Arc<storage::Store>,
        gate: Arc<Gate>,
        cfg: Config,
    ) -> Self {
        Self {
            cfg,
            client,
            store,
            gate,
        }
    }

    /// Resumes the persisted session, if any. Sessions close to expiry are
    /// refreshed first; a session that cannot be refreshed is dropped.
    pub fn restore(&self) -> Result<Option<Principal>> {
        let Some(stored) = self.store.load_session()? else {
            debug!("no persisted session");
            return Ok(None);
        };
        let mut session = AuthSession::from_stored(stored);
        let skew = chrono::Duration::from_std(self.cfg.refresh_skew)
            .unwrap_or_else(|_| chrono::Duration::seconds(0));
        if session.expires_at - skew <= Utc::now() {
            match self.refresh(&session.refresh_token) {
                Ok(fresh) => session = fresh,
                Err(err) => {
                    warn!(error = %format!("{err:#}"), "session refresh failed, signing out");
                    self.store.clear_session()?;
                    return Ok(None);
                }
            }
        }
        self.activate(&session)?;
        Ok(Some(session.user))
    }

    pub fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Principal> {
        let email = email.trim();
        if email.is_empty() {
            bail!("auth: email is required");
        }
        if password.is_empty() {
            bail!("auth: password is required");
        }
        let session = self
            .token_request("password", &json!({ "email": email, "password": password }))
            .context("auth: sign in")?;
        self.activate(&session)?;
        info!(user = %session.user.id, "signed in");
        Ok(session.user)
    }

    pub fn sign_out(&self) -> Result<()> {
        if self.client.has_access_token() {
            let req = self
                .client
                .auth_request(Method::POST, "logout", &[])?
                .header(CONTENT_TYPE, "application/json");
            if let Err(err) = self.client.send(req) {
                // the local session is dropped regardless
                warn!(error = %err, "remote sign out failed");
            }
        }
        self.store.clear_session()?;
        self.client.set_access_token(None);
        self.gate.handle(SessionEvent::SignedOut);
        Ok(())
    }

    fn refresh(&self, refresh_token: &str) -> Result<AuthSession> {
        if refresh_token.is_empty() {
            bail!("auth: stored session has no refresh token");
        }
        self.token_request(
            "refresh_token",
            &json!({ "refresh_token": refresh_token }),
        )
        .context("auth: refresh session")
    }

    fn activate(&self, session: &AuthSession) -> Result<()> {
        self.store.save_session(session.to_stored())?;
        self.client
            .set_access_token(Some(session.access_token.clone()));
        self.gate.handle(SessionEvent::SignedIn(session.user.clone()));
        Ok(())
    }

    fn token_request(&self, grant_type: &str, body: &serde_json::Value) -> Result<AuthSession> {
        let params = vec![("grant_type".to_string(), grant_type.to_string())];
        let req = self
            .client
            .auth_request(Method::POST, "token", &params)?
            .header(CONTENT_TYPE, "application/json")
            .json(body);
        let resp = self.client.send(req)?;
        let payload: TokenResponse = resp.json().context("auth: decode token response")?;
        payload.into_session()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: i64,
    #[serde(default)]
    expires_at: Option<i64>,
    #[serde(default)]
    refresh_token: String,
    user: Option<UserResponse>,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

impl TokenResponse {
    fn into_session(self) -> Result<AuthSession> {
        if self.access_token.is_empty() {
            bail!("auth: missing access token");
        }
        let Some(user) = self.user else {
            bail!("auth: token response missing user");
        };
        let absolute = self
            .expires_at
            .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0));
        let expires_at = match absolute {
            Some(at) => at,
            None => {
                let secs = if self.expires_in <= 0 { 3600 } else { self.expires_in };
                Utc::now() + chrono::Duration::seconds(secs)
            }
        };
        Ok(AuthSession {
            user: Principal {
                id: user.id,
                email: user.email.unwrap_or_default(),
            },
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            token_type: self.token_type.unwrap_or_else(|| "bearer".into()),
            expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use tempfile::tempdir;

    struct Fixture {
        _dir: tempfile::TempDir,
        client: Arc<supabase::Client>,
        store: Arc<storage::Store>,
        gate: Arc<Gate>,
        flow: Flow,
    }

    fn fixture(url: &str) -> Fixture {
        let dir = tempdir().unwrap();
        let store = Arc::new(
            storage::Store::open(storage::Options {
                path: Some(dir.path().join("state.db")),
            })
            .unwrap(),
        );
        let client = Arc::new(
            supabase::Client::new(supabase::ClientConfig {
                url: url.to_string(),
                anon_key: "anon".into(),
                user_agent: "picshare-test".into(),
                timeout: Some(Duration::from_secs(5)),
                http_client: None,
            })
            .unwrap(),
        );
        let gate = Arc::new(Gate::new());
        let flow = Flow::new(client.clone(), store.clone(), gate.clone(), Config::default());
        Fixture {
            _dir: dir,
            client,
            store,
            gate,
            flow,
        }
    }

    fn token_body(access: &str, expires_in: i64) -> String {
        json!({
            "access_token": access,
            "token_type": "bearer",
            "expires_in": expires_in,
            "refresh_token": "refresh-2",
            "user": { "id": "u1", "email": "sam@example.com" }
        })
        .to_string()
    }

    #[test]
    fn password_sign_in_authenticates_gate() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/auth/v1/token")
            .match_query(Matcher::UrlEncoded("grant_type".into(), "password".into()))
            .match_body(Matcher::PartialJson(json!({"email": "sam@example.com"})))
            .with_status(200)
            .with_body(token_body("access-1", 3600))
            .create();

        let fx = fixture(&server.url());
        let events = fx.gate.subscribe();
        let principal = fx
            .flow
            .sign_in_with_password(" sam@example.com ", "secret")
            .unwrap();
        mock.assert();

        assert_eq!(principal.id, "u1");
        assert!(fx.gate.is_authenticated());
        assert!(fx.client.has_access_token());
        assert_eq!(
            events.try_recv().unwrap(),
            SessionEvent::SignedIn(principal)
        );
        assert_eq!(
            fx.store.load_session().unwrap().unwrap().access_token,
            "access-1"
        );
    }

    #[test]
    fn rejected_credentials_leave_gate_anonymous() {
        let mut server = mockito::Server::new();
        server
            .mock("POST", "/auth/v1/token")
            .match_query(Matcher::Any)
            .with_status(400)
            .with_body(r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#)
            .create();

        let fx = fixture(&server.url());
        let err = fx
            .flow
            .sign_in_with_password("sam@example.com", "wrong")
            .unwrap_err();
        assert!(format!("{err:#}").contains("Invalid login credentials"));
        assert!(!fx.gate.is_authenticated());
    }

    #[test]
    fn restore_uses_fresh_session_without_network() {
        let fx = fixture("http://127.0.0.1:9");
        fx.store
            .save_session(StoredSession {
                user_id: "u1".into(),
                email: "sam@example.com".into(),
                access_token: "still-valid".into(),
                refresh_token: "r".into(),
                token_type: "bearer".into(),
                expires_at: Utc::now() + chrono::Duration::hours(1),
                updated_at: Utc::now(),
            })
            .unwrap();
        let restored = fx.flow.restore().unwrap();
        assert_eq!(restored.map(|p| p.id), Some("u1".to_string()));
        assert!(fx.gate.is_authenticated());
    }

    #[test]
    fn restore_refreshes_expiring_session() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/auth/v1/token")
            .match_query(Matcher::UrlEncoded(
                "grant_type".into(),
                "refresh_token".into(),
            ))
            .match_body(Matcher::Json(json!({"refresh_token": "old-refresh"})))
            .with_status(200)
            .with_body(token_body("access-2", 3600))
            .create();

        let fx = fixture(&server.url());
        fx.store
            .save_session(StoredSession {
                user_id: "u1".into(),
                email: "sam@example.com".into(),
                access_token: "expired".into(),
                refresh_token: "old-refresh".into(),
                token_type: "bearer".into(),
                expires_at: Utc::now() - chrono::Duration::minutes(5),
                updated_at: Utc::now(),
            })
            .unwrap();

        fx.flow.restore().unwrap();
        mock.assert();
        let stored = fx.store.load_session().unwrap().unwrap();
        assert_eq!(stored.access_token, "access-2");
        assert_eq!(stored.refresh_token, "refresh-2");
    }

    #[test]
    fn restore_drops_unrefreshable_session() {
        let mut server = mockito::Server::new();
        server
            .mock("POST", "/auth/v1/token")
            .match_query(Matcher::Any)
            .with_status(401)
            .with_body(r#"{"msg":"Invalid Refresh Token"}"#)
            .create();

        let fx = fixture(&server.url());
        fx.store
            .save_session(StoredSession {
                user_id: "u1".into(),
                email: "sam@example.com".into(),
                access_token: "expired".into(),
                refresh_token: "revoked".into(),
                token_type: "bearer".into(),
                expires_at: Utc::now() - chrono::Duration::minutes(5),
                updated_at: Utc::now(),
            })
            .unwrap();

        assert!(fx.flow.restore().unwrap().is_none());
        assert!(!fx.gate.is_authenticated());
        assert!(fx.store.load_session().unwrap().is_none());
    }

    #[test]
    fn sign_out_clears_everything() {
        let mut server = mockito::Server::new();
        server
            .mock("POST", "/auth/v1/token")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(token_body("access-1", 3600))
            .create();
        let logout = server
            .mock("POST", "/auth/v1/logout")
            .match_header("authorization", "Bearer access-1")
            .with_status(204)
            .create();

        let fx = fixture(&server.url());
        fx.flow
            .sign_in_with_password("sam@example.com", "secret")
            .unwrap();
        fx.flow.sign_out().unwrap();
        logout.assert();
        assert!(!fx.gate.is_authenticated());
        assert!(!fx.client.has_access_token());
        assert!(fx.store.load_session().unwrap().is_none());
    }
}
