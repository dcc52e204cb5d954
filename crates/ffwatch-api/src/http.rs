// HTTP plumbing shared by the REST client and the long-poll socket.
//
// `HttpConfig` builds `reqwest::Client` instances with uniform TLS, timeout,
// and cookie settings. `ApiClient` wraps one of those clients with base-URL
// joining, optional basic auth, and status-code based error signaling.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use reqwest::cookie::Jar;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::error::Error;

const USER_AGENT: &str = concat!("ffwatch/", env!("CARGO_PKG_VERSION"));

// ── HttpConfig ───────────────────────────────────────────────────────

/// TLS verification mode (api-level mirror of core's `TlsVerification`).
#[derive(Debug, Clone)]
pub enum TlsMode {
    /// Use the system certificate store.
    System,
    /// Use a custom CA certificate from the given PEM file.
    CustomCa(PathBuf),
    /// Accept any certificate (for self-signed development servers).
    DangerAcceptInvalid,
}

/// Shared configuration for building HTTP clients.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub tls: TlsMode,
    pub timeout: Duration,
    pub cookie_jar: Option<Arc<Jar>>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            tls: TlsMode::System,
            timeout: Duration::from_secs(30),
            cookie_jar: None,
        }
    }
}

impl HttpConfig {
    /// Build a `reqwest::Client` from this config.
    pub fn build_client(&self) -> Result<reqwest::Client, Error> {
        let mut builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(USER_AGENT);

        match &self.tls {
            TlsMode::System => {}
            TlsMode::CustomCa(path) => {
                let cert_pem = std::fs::read(path)
                    .map_err(|e| Error::Tls(format!("failed to read CA cert: {e}")))?;
                let cert = reqwest::Certificate::from_pem(&cert_pem)
                    .map_err(|e| Error::Tls(format!("invalid CA cert: {e}")))?;
                builder = builder.add_root_certificate(cert);
            }
            TlsMode::DangerAcceptInvalid => {
                builder = builder.danger_accept_invalid_certs(true);
            }
        }

        if let Some(ref jar) = self.cookie_jar {
            builder = builder.cookie_provider(Arc::clone(jar));
        }

        builder
            .build()
            .map_err(|e| Error::Tls(format!("failed to build HTTP client: {e}")))
    }

    /// Create a config with a fresh cookie jar, so the push channel and the
    /// REST client share one server session.
    pub fn with_cookie_jar(mut self) -> Self {
        self.cookie_jar = Some(Arc::new(Jar::default()));
        self
    }
}

// ── Credentials ──────────────────────────────────────────────────────

/// HTTP basic-auth credentials attached to every request.
#[derive(Debug, Clone)]
pub struct BasicAuth {
    pub username: String,
    pub password: SecretString,
}

impl BasicAuth {
    /// Encoded `Authorization` value for requests that bypass reqwest,
    /// such as the WebSocket upgrade.
    pub fn header_value(&self, http: &reqwest::Client) -> Option<String> {
        let request = http
            .get("http://localhost/")
            .basic_auth(&self.username, Some(self.password.expose_secret()))
            .build()
            .ok()?;
        request
            .headers()
            .get(reqwest::header::AUTHORIZATION)?
            .to_str()
            .ok()
            .map(str::to_owned)
    }
}

// ── ApiClient ────────────────────────────────────────────────────────

/// Async JSON client for the console REST API.
///
/// All paths are relative to the API base (e.g. `https://host/iaf/api/`).
/// Non-2xx responses become [`Error::Http`] with the status code and body,
/// so callers can tell "not found" from "server down".
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    auth: Option<BasicAuth>,
}

impl ApiClient {
    /// Build a client for `base_url` from an [`HttpConfig`].
    pub fn new(base_url: &str, config: &HttpConfig) -> Result<Self, Error> {
        let http = config.build_client()?;
        Self::from_reqwest(base_url, http)
    }

    /// Wrap an existing `reqwest::Client`.
    pub fn from_reqwest(base_url: &str, http: reqwest::Client) -> Result<Self, Error> {
        Ok(Self {
            http,
            base_url: normalize_base_url(base_url)?,
            auth: None,
        })
    }

    /// Attach basic-auth credentials to every request.
    pub fn with_basic_auth(mut self, auth: BasicAuth) -> Self {
        self.auth = Some(auth);
        self
    }

    /// The API base URL (always ends with `/`).
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// The underlying HTTP client.
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Join a relative path (e.g. `"/adapters?expanded=all"`) onto the base URL.
    pub fn url(&self, path: &str) -> Result<Url, Error> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }

    // ── HTTP verbs ───────────────────────────────────────────────────

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, Error> {
        let url = self.url(path)?;
        debug!("GET {url}");

        let resp = self.authorize(self.http.get(url)).send().await?;
        handle_response(resp).await
    }

    pub async fn put<T: DeserializeOwned, B: Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, Error> {
        let url = self.url(path)?;
        debug!("PUT {url}");

        let resp = self.authorize(self.http.put(url)).json(body).send().await?;
        handle_response(resp).await
    }

    pub async fn put_no_response<B: Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<(), Error> {
        let url = self.url(path)?;
        debug!("PUT {url}");

        let resp = self.authorize(self.http.put(url)).json(body).send().await?;
        handle_empty(resp).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, Error> {
        let url = self.url(path)?;
        debug!("POST {url}");

        let resp = self.authorize(self.http.post(url)).json(body).send().await?;
        handle_response(resp).await
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.auth {
            Some(ref auth) => {
                builder.basic_auth(&auth.username, Some(auth.password.expose_secret()))
            }
            None => builder,
        }
    }
}

/// Ensure the base URL ends with `/` so relative joins append instead of
/// replacing the last path segment.
fn normalize_base_url(raw: &str) -> Result<Url, Error> {
    let mut url = Url::parse(raw)?;
    let path = url.path().trim_end_matches('/').to_owned();
    url.set_path(&format!("{path}/"));
    Ok(url)
}

async fn handle_response<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, Error> {
    let status = resp.status();
    let body = resp.text().await?;

    if !status.is_success() {
        return Err(Error::Http {
            status: status.as_u16(),
            body,
        });
    }

    // Empty 2xx bodies decode as JSON `null`.
    let text = if body.trim().is_empty() { "null" } else { &body };
    serde_json::from_str(text).map_err(|e| Error::Deserialization {
        message: e.to_string(),
        body,
    })
}

async fn handle_empty(resp: reqwest::Response) -> Result<(), Error> {
    let status = resp.status();
    if status.is_success() {
        return Ok(());
    }
    let body = resp.text().await.unwrap_or_default();
    Err(Error::Http {
        status: status.as_u16(),
        body,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn base_url_gets_trailing_slash() {
        let url = normalize_base_url("https://host:8080/iaf/api").unwrap();
        assert_eq!(url.as_str(), "https://host:8080/iaf/api/");

        let url = normalize_base_url("https://host/iaf/api/").unwrap();
        assert_eq!(url.as_str(), "https://host/iaf/api/");
    }

    #[test]
    fn url_joins_relative_paths_with_query() {
        let client =
            ApiClient::from_reqwest("https://host/iaf/api", reqwest::Client::new()).unwrap();
        let url = client.url("/adapters?expanded=all").unwrap();
        assert_eq!(url.as_str(), "https://host/iaf/api/adapters?expanded=all");
    }

    #[test]
    fn default_config_uses_system_tls() {
        let config = HttpConfig::default();
        assert!(matches!(config.tls, TlsMode::System));
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert!(config.cookie_jar.is_none());
        assert!(config.with_cookie_jar().cookie_jar.is_some());
    }

    #[test]
    fn basic_auth_header_value() {
        let auth = BasicAuth {
            username: "user".into(),
            password: SecretString::from("pass"),
        };
        assert_eq!(
            auth.header_value(&reqwest::Client::new()).as_deref(),
            Some("Basic dXNlcjpwYXNz")
        );
    }
}
