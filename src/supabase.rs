use std::time::Duration;

use parking_lot::RwLock;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use reqwest::blocking::{Client as HttpClient, RequestBuilder, Response};
use reqwest::header::{ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use url::Url;

const REST_PATH: &str = "rest/v1/";
const AUTH_PATH: &str = "auth/v1/";
const PUBLIC_OBJECT_PATH: &str = "storage/v1/object/public";
const SINGLE_OBJECT: &str = "application/vnd.pgrst.object+json";

const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'/');

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("decode response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("remote error {status}: {message}")]
    Api { status: u16, message: String },
}

impl RemoteError {
    pub fn status(&self) -> Option<u16> {
        match self {
            RemoteError::Api { status, .. } => Some(*status),
            RemoteError::Transport(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub url: String,
    pub anon_key: String,
    pub user_agent: String,
    pub timeout: Option<Duration>,
    pub http_client: Option<HttpClient>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Order {
    column: String,
    ascending: bool,
}

/// Declarative row query rendered as PostgREST query parameters.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RemoteQuery {
    table: String,
    select: Option<String>,
    eq: Vec<(String, String)>,
    any_ilike: Vec<(Vec<String>, String)>,
    order: Vec<Order>,
    range: Option<(u64, u64)>,
}

impl RemoteQuery {
    pub fn from(table: &str) -> Self {
        Self {
            table: table.to_string(),
            ..Self::default()
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn select(mut self, columns: &str) -> Self {
        let compact = columns.split_whitespace().collect::<Vec<_>>().join("");
        self.select = Some(compact);
        self
    }

    pub fn eq(mut self, column: &str, value: impl ToString) -> Self {
        self.eq.push((column.to_string(), value.to_string()));
        self
    }

    /// Case-insensitive substring match against any of `columns`.
    pub fn ilike_any(mut self, columns: &[&str], term: &str) -> Self {
        self.any_ilike.push((
            columns.iter().map(|c| c.to_string()).collect(),
            term.to_string(),
        ));
        self
    }

    pub fn order(mut self, column: &str, ascending: bool) -> Self {
        self.order.push(Order {
            column: column.to_string(),
            ascending,
        });
        self
    }

    /// Inclusive zero-based row window.
    pub fn range(mut self, from: u64, to: u64) -> Self {
        self.range = Some((from, to.max(from)));
        self
    }

    pub fn into_params(self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        if let Some(select) = self.select {
            params.push(("select".into(), select));
        }
        for (column, value) in self.eq {
            params.push((column, format!("eq.{}", value)));
        }
        for (columns, term) in self.any_ilike {
            let pattern = quote_filter_value(&format!("*{}*", term));
            let clauses = columns
                .iter()
                .map(|c| format!("{}.ilike.{}", c, pattern))
                .collect::<Vec<_>>()
                .join(",");
            params.push(("or".into(), format!("({})", clauses)));
        }
        if !self.order.is_empty() {
            let order = self
                .order
                .iter()
                .map(|o| {
                    format!(
                        "{}.{}",
                        o.column,
                        if o.ascending { "asc" } else { "desc" }
                    )
                })
                .collect::<Vec<_>>()
                .join(",");
            params.push(("order".into(), order));
        }
        if let Some((from, to)) = self.range {
            params.push(("offset".into(), from.to_string()));
            params.push(("limit".into(), (to - from + 1).to_string()));
        }
        params
    }
}

fn quote_filter_value(value: &str) -> String {
    if value
        .chars()
        .any(|c| matches!(c, ',' | '(' | ')' | '"' | '\\' | ':'))
    {
        let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
        format!("\"{}\"", escaped)
    } else {
        value.to_string()
    }
}

pub struct Client {
    http: HttpClient,
    base_url: Url,
    anon_key: String,
    user_agent: String,
    access_token: RwLock<Option<String>>,
}

impl Client {
    pub fn new(config: ClientConfig) -> anyhow::Result<Self> {
        if config.user_agent.trim().is_empty() {
            anyhow::bail!("supabase client user agent required");
        }
        if config.anon_key.trim().is_empty() {
            anyhow::bail!("supabase client anon key required");
        }
        let mut base = config.url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)?;
        let http = match config.http_client {
            Some(client) => client,
            None => HttpClient::builder()
                .timeout(config.timeout.unwrap_or(Duration::from_secs(20)))
                .build()?,
        };

        Ok(Client {
            http,
            base_url,
            anon_key: config.anon_key,
            user_agent: config.user_agent,
            access_token: RwLock::new(None),
        })
    }

    /// Signed-in requests carry the user's token instead of the anon key.
    pub fn set_access_token(&self, token: Option<String>) {
        *self.access_token.write() = token;
    }

    pub fn has_access_token(&self) -> bool {
        self.access_token.read().is_some()
    }

    pub fn select<T>(&self, query: RemoteQuery) -> Result<Vec<T>, RemoteError>
    where
        T: DeserializeOwned,
    {
        let path = format!("{}{}", REST_PATH, query.table());
        let params = query.into_params();
        debug!(path = %path, ?params, "select");
        let resp = self.send(self.request(Method::GET, &path, &params)?)?;
        let rows = resp.json::<Vec<T>>()?;
        Ok(rows)
    }

    pub fn select_single<T>(&self, query: RemoteQuery) -> Result<T, RemoteError>
    where
        T: DeserializeOwned,
    {
        let path = format!("{}{}", REST_PATH, query.table());
        let params = query.into_params();
        debug!(path = %path, ?params, "select single");
        let req = self
            .request(Method::GET, &path, &params)?
            .header(ACCEPT, SINGLE_OBJECT);
        let resp = self.send(req)?;
        Ok(resp.json::<T>()?)
    }

    pub fn rpc(&self, function: &str, args: &Value) -> Result<Value, RemoteError> {
        let path = format!("{}rpc/{}", REST_PATH, function);
        debug!(function, "rpc");
        let req = self.request(Method::POST, &path, &[])?.json(args);
        let resp = self.send(req)?;
        let body = resp.text()?;
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&body)?)
    }

    pub fn public_url(&self, bucket: &str, path: &str) -> String {
        let encoded = path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(|segment| utf8_percent_encode(segment, SEGMENT).to_string())
            .collect::<Vec<_>>()
            .join("/");
        let base = self.base_url.as_str().trim_end_matches('/');
        format!("{}/{}/{}/{}", base, PUBLIC_OBJECT_PATH, bucket, encoded)
    }

    pub fn download(&self, url: &str) -> Result<Vec<u8>, RemoteError> {
        debug!(url, "download");
        let req = self.http.get(url).header(USER_AGENT, &self.user_agent);
        let resp = self.send(req)?;
        Ok(resp.bytes()?.to_vec())
    }

    pub(crate) fn auth_request(
        &self,
        method: Method,
        path: &str,
        params: &[(String, String)],
    ) -> Result<RequestBuilder, RemoteError> {
        self.request(method, &format!("{}{}", AUTH_PATH, path), params)
    }

    pub(crate) fn send(&self, req: RequestBuilder) -> Result<Response, RemoteError> {
        let resp = req.send()?;
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status().as_u16();
        let body = resp.text().unwrap_or_default();
        Err(RemoteError::Api {
            status,
            message: error_message(&body),
        })
    }

    fn request(
        &self,
        method: Method,
        path: &str,
        params: &[(String, String)],
    ) -> Result<RequestBuilder, RemoteError> {
        let mut url = self.base_url.join(path)?;
        if !params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in params {
                pairs.append_pair(k, v);
            }
        }
        let bearer = self
            .access_token
            .read()
            .clone()
            .unwrap_or_else(|| self.anon_key.clone());
        Ok(self
            .http
            .request(method, url)
            .header(USER_AGENT, self.user_agent.clone())
            .header("apikey", self.anon_key.clone())
            .header(AUTHORIZATION, format!("Bearer {}", bearer)))
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    code: Option<Value>,
}

fn error_message(body: &str) -> String {
    let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) else {
        return body.trim().to_string();
    };
    let text = parsed
        .message
        .or(parsed.msg)
        .or(parsed.error_description)
        .or(parsed.error)
        .unwrap_or_else(|| body.trim().to_string());
    match parsed.code {
        Some(Value::String(code)) if !code.is_empty() => format!("{} ({})", text, code),
        _ => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn client(url: &str) -> Client {
        Client::new(ClientConfig {
            url: url.to_string(),
            anon_key: "anon".into(),
            user_agent: "picshare-test".into(),
            timeout: Some(Duration::from_secs(5)),
            http_client: None,
        })
        .unwrap()
    }

    #[test]
    fn renders_postgrest_params() {
        let params = RemoteQuery::from("images")
            .select("*, categories(name, color)")
            .eq("is_public", true)
            .ilike_any(&["title", "description"], "sea")
            .order("view_count", false)
            .order("created_at", false)
            .range(12, 23)
            .into_params();
        assert_eq!(
            params,
            vec![
                ("select".to_string(), "*,categories(name,color)".to_string()),
                ("is_public".to_string(), "eq.true".to_string()),
                (
                    "or".to_string(),
                    "(title.ilike.*sea*,description.ilike.*sea*)".to_string()
                ),
                (
                    "order".to_string(),
                    "view_count.desc,created_at.desc".to_string()
                ),
                ("offset".to_string(), "12".to_string()),
                ("limit".to_string(), "12".to_string()),
            ]
        );
    }

    #[test]
    fn quotes_reserved_search_characters() {
        let params = RemoteQuery::from("images")
            .ilike_any(&["title"], "a,b (c)")
            .into_params();
        assert_eq!(params[0].1, "(title.ilike.\"*a,b (c)*\")");
    }

    #[test]
    fn public_url_encodes_segments() {
        let c = client("https://demo.supabase.co");
        assert_eq!(
            c.public_url("images", "u1/my photo.jpg"),
            "https://demo.supabase.co/storage/v1/object/public/images/u1/my%20photo.jpg"
        );
    }

    #[test]
    fn select_sends_key_headers() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/rest/v1/categories")
            .match_header("apikey", "anon")
            .match_header("authorization", "Bearer anon")
            .match_query(Matcher::UrlEncoded("order".into(), "name.asc".into()))
            .with_status(200)
            .with_body(r##"[{"id":"c1","name":"Art","description":"","color":"#8B5CF6"}]"##)
            .create();

        let c = client(&server.url());
        let rows: Vec<crate::models::Category> = c
            .select(RemoteQuery::from("categories").order("name", true))
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "Art");
        mock.assert();
    }

    #[test]
    fn user_token_replaces_anon_bearer() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/rest/v1/rpc/increment_view_count")
            .match_header("authorization", "Bearer user-token")
            .match_body(Matcher::Json(serde_json::json!({"image_uuid": "a1"})))
            .with_status(204)
            .create();

        let c = client(&server.url());
        c.set_access_token(Some("user-token".into()));
        let value = c
            .rpc("increment_view_count", &serde_json::json!({"image_uuid": "a1"}))
            .unwrap();
        assert!(value.is_null());
        mock.assert();
    }

    #[test]
    fn api_errors_carry_service_message() {
        let mut server = mockito::Server::new();
        server
            .mock("GET", "/rest/v1/images")
            .with_status(400)
            .with_body(r#"{"message":"column images.bogus does not exist","code":"42703"}"#)
            .create();

        let c = client(&server.url());
        let err = c
            .select::<Value>(RemoteQuery::from("images"))
            .unwrap_err();
        assert_eq!(err.status(), Some(400));
        assert!(err.to_string().contains("does not exist (42703)"));
    }
}
