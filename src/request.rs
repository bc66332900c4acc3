use bytes::Bytes;
use reqwest::{
    header::{HeaderName, HeaderValue},
    Method, Url,
};
use serde::Serialize;

use crate::{ClientOptions, LichessError, Result};

/// Lichess host a request is routed to.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub enum Host {
    /// `lichess.org`.
    #[default]
    Api,
    /// Opening explorer.
    Explorer,
    /// Endgame tablebase.
    Tablebase,
}

impl Host {
    pub(crate) fn base_url(self, options: &ClientOptions) -> &str {
        match self {
            Self::Api => &options.api_base_url,
            Self::Explorer => &options.explorer_base_url,
            Self::Tablebase => &options.tablebase_base_url,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Body {
    pub(crate) content_type: HeaderValue,
    pub(crate) bytes: Bytes,
}

/// Description of one logical API call.
///
/// The transport borrows it for every attempt, so a request can be re-sent
/// without being rebuilt.
#[derive(Clone, Debug, PartialEq)]
pub struct Request {
    method: Method,
    host: Host,
    path: String,
    query: Vec<(String, String)>,
    headers: Vec<(HeaderName, HeaderValue)>,
    body: Option<Body>,
}

impl Request {
    pub fn new(method: Method, host: Host, path: impl Into<String>) -> Self {
        Self {
            method,
            host,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// `GET` on the main API host.
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, Host::Api, path)
    }

    /// `POST` on the main API host.
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, Host::Api, path)
    }

    /// Routes the request to another host.
    pub fn on(mut self, host: Host) -> Self {
        self.host = host;
        self
    }

    /// Appends a query parameter.
    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    /// Adds a request header. `Accept` set here wins over the transport's
    /// default for the call kind.
    pub fn header(mut self, name: &str, value: &str) -> Result<Self> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|err| LichessError::InvalidRequest(format!("header name '{name}': {err}")))?;
        let value = HeaderValue::from_str(value).map_err(|err| {
            LichessError::InvalidRequest(format!("header '{}' value: {err}", name.as_str()))
        })?;
        self.headers.push((name, value));
        Ok(self)
    }

    /// Sets a raw body with its content type.
    pub fn body(mut self, content_type: &str, bytes: impl Into<Bytes>) -> Result<Self> {
        let content_type = HeaderValue::from_str(content_type)
            .map_err(|err| LichessError::InvalidRequest(format!("content type: {err}")))?;
        self.body = Some(Body {
            content_type,
            bytes: bytes.into(),
        });
        Ok(self)
    }

    /// Serializes `payload` as the JSON body.
    pub fn json<T: Serialize + ?Sized>(self, payload: &T) -> Result<Self> {
        let bytes = serde_json::to_vec(payload)
            .map_err(|err| LichessError::InvalidRequest(format!("json body: {err}")))?;
        self.body("application/json", bytes)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn host(&self) -> Host {
        self.host
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether the request may be sent again after it reached the server.
    ///
    /// Only `GET` and `HEAD` qualify; anything carrying a body never does.
    pub fn is_idempotent(&self) -> bool {
        self.body.is_none() && matches!(self.method, Method::GET | Method::HEAD)
    }

    pub(crate) fn headers(&self) -> &[(HeaderName, HeaderValue)] {
        &self.headers
    }

    pub(crate) fn body_ref(&self) -> Option<&Body> {
        self.body.as_ref()
    }

    pub(crate) fn has_header(&self, name: &HeaderName) -> bool {
        self.headers.iter().any(|(existing, _)| existing == name)
    }

    /// Resolves the absolute URL against the configured host.
    pub(crate) fn url(&self, options: &ClientOptions) -> Result<Url> {
        let base = self.host.base_url(options).trim_end_matches('/');
        let path = self.path.trim_start_matches('/');
        let mut url = Url::parse(&format!("{base}/{path}")).map_err(|err| {
            LichessError::InvalidRequest(format!("invalid url '{base}/{path}': {err}"))
        })?;
        if !self.query.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(self.query.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        }
        Ok(url)
    }
}
