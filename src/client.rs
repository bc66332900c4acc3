use std::fmt;

use reqwest::{header::HeaderValue, Response};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::{
    options::env_override,
    transport::{CallKind, Transport},
    ClientOptions, LichessError, NdjsonStream, Request, Result,
};

#[derive(Clone)]
/// HTTP client for the Lichess API and its explorer and tablebase hosts.
///
/// Cloning is cheap; clones share one connection pool.
pub struct LichessClient {
    transport: Transport,
}

impl fmt::Debug for LichessClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let authorization = if self.transport.has_authorization() {
            "<redacted>"
        } else {
            "<none>"
        };
        f.debug_struct("LichessClient")
            .field("authorization", &authorization)
            .field("options", self.transport.options())
            .finish()
    }
}

impl Default for LichessClient {
    fn default() -> Self {
        Self::new()
    }
}

impl LichessClient {
    /// Creates an anonymous client with default options.
    pub fn new() -> Self {
        Self {
            transport: Transport::new(reqwest::Client::new(), ClientOptions::default(), None),
        }
    }

    /// Creates a client on top of an existing `reqwest` client, sharing its pool.
    pub fn with_http_client(http: reqwest::Client) -> Self {
        Self {
            transport: Transport::new(http, ClientOptions::default(), None),
        }
    }

    /// Creates a client from environment variables.
    ///
    /// Reads:
    /// - `LICHESS_AUTHORIZATION` — full `Authorization` header value (optional)
    /// - host overrides, see [`ClientOptions::from_env`]
    ///
    /// # Example
    ///
    /// ```no_run
    /// use lichess_http::LichessClient;
    ///
    /// let client = LichessClient::from_env().expect("invalid LICHESS_* env vars");
    /// ```
    pub fn from_env() -> Result<Self> {
        let client = Self::new().with_options(ClientOptions::from_env()?);
        match env_override("LICHESS_AUTHORIZATION")? {
            Some(value) => client.with_authorization(&value),
            None => Ok(client),
        }
    }

    /// Sets the `Authorization` header value sent with every request.
    ///
    /// The value is used verbatim, e.g. `"Bearer lip_..."`, and is redacted
    /// from `Debug` output.
    pub fn with_authorization(self, authorization: &str) -> Result<Self> {
        let mut value = HeaderValue::from_str(authorization.trim()).map_err(|err| {
            LichessError::InvalidConfig(format!("invalid authorization value: {err}"))
        })?;
        value.set_sensitive(true);
        Ok(Self {
            transport: self.transport.with_authorization(Some(value)),
        })
    }

    /// Applies retry, timeout and host options.
    pub fn with_options(self, options: ClientOptions) -> Self {
        Self {
            transport: self.transport.with_options(options),
        }
    }

    pub fn options(&self) -> &ClientOptions {
        self.transport.options()
    }

    /// Sends a request and returns the raw response.
    ///
    /// Transient network failures and 429 responses are retried according to
    /// [`ClientOptions`]. Every other status, errors included, is returned
    /// as-is.
    pub async fn execute(&self, request: &Request, cancel: &CancellationToken) -> Result<Response> {
        self.transport.execute(request, CallKind::Json, cancel).await
    }

    /// Sends a request and decodes its JSON body.
    ///
    /// Non-success statuses become the matching [`LichessError`] kind.
    pub async fn send_json<T: DeserializeOwned>(
        &self,
        request: &Request,
        cancel: &CancellationToken,
    ) -> Result<T> {
        self.transport.send_json(request, cancel).await
    }

    /// Sends a request and returns its body as text (PGN exports and the like).
    pub async fn send_text(&self, request: &Request, cancel: &CancellationToken) -> Result<String> {
        self.transport.send_text(request, cancel).await
    }

    /// Opens an NDJSON stream.
    ///
    /// The returned cursor keeps `cancel` and stops with
    /// [`LichessError::Cancelled`] once it fires.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use lichess_http::{LichessClient, Request};
    /// use tokio_util::sync::CancellationToken;
    ///
    /// # async fn run() -> lichess_http::Result<()> {
    /// let client = LichessClient::new();
    /// let cancel = CancellationToken::new();
    /// let mut games = client
    ///     .execute_streaming::<serde_json::Value>(
    ///         &Request::get("/api/games/user/DrNykterstein").query("max", 10),
    ///         &cancel,
    ///     )
    ///     .await?;
    /// while let Some(game) = games.next().await {
    ///     println!("{}", game?["id"]);
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn execute_streaming<T: DeserializeOwned>(
        &self,
        request: &Request,
        cancel: &CancellationToken,
    ) -> Result<NdjsonStream<T>> {
        self.transport.execute_streaming(request, cancel).await
    }
}
