//! HTTP remote speaking the PostgREST/Supabase surface.
//!
//! Reads hit `/rest/v1/reports`, identity checks and sign-in links go through
//! `/auth/v1`. The session access token arrives out of band (the magic-link
//! redirect) and is handed over with [`HttpRemote::set_access_token`].

use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use bearmap_core::{LatLng, NewReport, Record, RecordId, ReportKind};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{FetchWindow, Identity, RemoteError, RemoteSource, SessionGate};

const REPORT_COLUMNS: &str = "id,kind,note,lat,lng,created_at";

pub const ENV_URL: &str = "BEARMAP_SUPABASE_URL";
pub const ENV_ANON_KEY: &str = "BEARMAP_SUPABASE_ANON_KEY";
pub const ENV_REDIRECT_URL: &str = "BEARMAP_REDIRECT_URL";

/// Connection settings for the hosted backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    pub url: String,
    pub anon_key: String,
    /// Where the sign-in link should send the user back to.
    pub redirect_url: Option<String>,
}

impl RemoteConfig {
    /// Read settings from the process environment.
    ///
    /// Returns `None` unless both the URL and the anon key are set and
    /// non-empty; no remote means the engine runs local-only.
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        Some(Self {
            url: non_empty(ENV_URL)?,
            anon_key: non_empty(ENV_ANON_KEY)?,
            redirect_url: non_empty(ENV_REDIRECT_URL),
        })
    }
}

/// Row shape returned by the `reports` table.
#[derive(Debug, Deserialize)]
struct ReportRow {
    id: serde_json::Value,
    kind: ReportKind,
    note: Option<String>,
    lat: f64,
    lng: f64,
    created_at: DateTime<Utc>,
}

impl ReportRow {
    fn into_record(self) -> Result<Record, RemoteError> {
        // Supabase ids may be uuids or bigints depending on the table.
        let id = match self.id {
            serde_json::Value::String(s) => s,
            serde_json::Value::Number(n) => n.to_string(),
            other => return Err(RemoteError::Validation(format!("unexpected id: {other}"))),
        };
        Ok(Record::new(
            RecordId::from_server(id)?,
            self.kind,
            self.note.as_deref(),
            LatLng::new(self.lat, self.lng),
            self.created_at,
        )?)
    }
}

#[derive(Debug, Serialize)]
struct InsertRow<'a> {
    user_id: &'a str,
    kind: ReportKind,
    note: Option<&'a str>,
    lat: f64,
    lng: f64,
    created_at: String,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    id: String,
}

#[derive(Debug, Serialize)]
struct OtpRequest<'a> {
    email: &'a str,
    create_user: bool,
}

#[derive(Debug, Default)]
struct Session {
    access_token: Option<String>,
    user_id: Option<String>,
}

/// Query parameters for a windowed read.
fn window_query(window: &FetchWindow) -> Vec<(&'static str, String)> {
    vec![
        ("select", REPORT_COLUMNS.to_string()),
        (
            "created_at",
            format!(
                "gte.{}",
                window.since.to_rfc3339_opts(SecondsFormat::Millis, true)
            ),
        ),
        ("lat", format!("gte.{}", window.bbox.min_lat())),
        ("lat", format!("lte.{}", window.bbox.max_lat())),
        ("lng", format!("gte.{}", window.bbox.min_lng())),
        ("lng", format!("lte.{}", window.bbox.max_lng())),
        ("order", "created_at.desc".to_string()),
        ("limit", window.limit.to_string()),
    ]
}

/// Map a non-success status onto the error taxonomy.
fn status_error(status: u16, body: String) -> RemoteError {
    match status {
        401 | 403 => RemoteError::Auth(body),
        400 | 409 | 422 => RemoteError::Validation(body),
        _ => RemoteError::Server { status, body },
    }
}

pub struct HttpRemote {
    client: reqwest::Client,
    base_url: String,
    anon_key: String,
    redirect_url: Option<String>,
    session: RwLock<Session>,
}

impl HttpRemote {
    pub fn new(config: RemoteConfig) -> Self {
        Self::with_client(config, reqwest::Client::new())
    }

    /// Use a preconfigured client (timeouts, proxy settings).
    pub fn with_client(config: RemoteConfig, client: reqwest::Client) -> Self {
        Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            anon_key: config.anon_key,
            redirect_url: config.redirect_url,
            session: RwLock::new(Session::default()),
        }
    }

    /// Install the access token delivered by the sign-in redirect.
    pub fn set_access_token(&self, token: impl Into<String>) {
        let mut session = self.session.write().unwrap_or_else(PoisonError::into_inner);
        session.access_token = Some(token.into());
        session.user_id = None;
    }

    fn access_token(&self) -> Option<String> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .access_token
            .clone()
    }

    fn clear_session(&self) {
        *self.session.write().unwrap_or_else(PoisonError::into_inner) = Session::default();
    }

    fn bearer(&self) -> String {
        let token = self.access_token().unwrap_or_else(|| self.anon_key.clone());
        format!("Bearer {token}")
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .header("apikey", &self.anon_key)
            .header("Authorization", self.bearer())
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, RemoteError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(status_error(status.as_u16(), body))
    }

    /// User id for the current session, looked up once per token.
    async fn user_id(&self) -> Result<Option<String>, RemoteError> {
        let cached = {
            let session = self.session.read().unwrap_or_else(PoisonError::into_inner);
            if session.access_token.is_none() {
                return Ok(None);
            }
            session.user_id.clone()
        };
        if cached.is_some() {
            return Ok(cached);
        }

        let resp = self
            .request(reqwest::Method::GET, "/auth/v1/user")
            .send()
            .await?;
        match Self::check(resp).await {
            Ok(resp) => {
                let user: UserResponse = resp.json().await?;
                let mut session = self.session.write().unwrap_or_else(PoisonError::into_inner);
                session.user_id = Some(user.id.clone());
                Ok(Some(user.id))
            }
            Err(RemoteError::Auth(body)) => {
                warn!(body = %body, "session token rejected, clearing session");
                self.clear_session();
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl SessionGate for HttpRemote {
    async fn current_identity(&self) -> Result<Option<Identity>, RemoteError> {
        Ok(self.user_id().await?.map(Identity::new))
    }

    async fn authenticate(&self, email: &str) -> Result<(), RemoteError> {
        let mut req = self
            .request(reqwest::Method::POST, "/auth/v1/otp")
            .json(&OtpRequest {
                email,
                create_user: true,
            });
        if let Some(redirect) = &self.redirect_url {
            req = req.query(&[("redirect_to", redirect)]);
        }
        info!(url = %self.base_url, "requesting sign-in link");
        Self::check(req.send().await?).await?;
        Ok(())
    }

    async fn sign_out(&self) -> Result<(), RemoteError> {
        if self.access_token().is_some() {
            let resp = self
                .request(reqwest::Method::POST, "/auth/v1/logout")
                .send()
                .await?;
            Self::check(resp).await?;
        }
        self.clear_session();
        Ok(())
    }
}

#[async_trait]
impl RemoteSource for HttpRemote {
    async fn fetch_window(&self, window: &FetchWindow) -> Result<Vec<Record>, RemoteError> {
        let resp = self
            .request(reqwest::Method::GET, "/rest/v1/reports")
            .query(&window_query(window))
            .send()
            .await?;
        let rows: Vec<ReportRow> = Self::check(resp).await?.json().await?;
        let records = rows
            .into_iter()
            .map(ReportRow::into_record)
            .collect::<Result<Vec<_>, _>>()?;
        info!(count = records.len(), "fetched report window");
        Ok(records)
    }

    async fn insert(&self, report: &NewReport) -> Result<Record, RemoteError> {
        let user_id = self.user_id().await?.ok_or(RemoteError::Unauthenticated)?;
        let row = InsertRow {
            user_id: &user_id,
            kind: report.kind,
            note: report.note.as_deref(),
            lat: report.location.lat,
            lng: report.location.lng,
            created_at: report
                .created_at
                .to_rfc3339_opts(SecondsFormat::Millis, true),
        };
        let resp = self
            .request(reqwest::Method::POST, "/rest/v1/reports")
            .query(&[("select", REPORT_COLUMNS)])
            .header("Prefer", "return=representation")
            .json(&row)
            .send()
            .await?;
        let rows: Vec<ReportRow> = Self::check(resp).await?.json().await?;
        let record = rows
            .into_iter()
            .next()
            .ok_or_else(|| RemoteError::Validation("insert returned no row".into()))?
            .into_record()?;
        info!(id = %record.id(), "inserted report");
        Ok(record)
    }
}
