use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use chrono::Utc;
use reqwest::{
    header::{self, HeaderValue},
    RequestBuilder, Response, StatusCode, Url,
};
use serde::de::DeserializeOwned;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

use crate::{
    backoff::backoff_delay,
    classify::{classify, failed_before_send, FaultClass},
    rate_limit::RateLimitSignal,
    ClientOptions, JsonCodec, LichessError, NdjsonStream, Request, Result,
};

const ACCEPT_JSON: &str = "application/json";
const ACCEPT_NDJSON: &str = "application/x-ndjson";

/// Shape of a call, which selects its `Accept` header and timeout.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum CallKind {
    Json,
    Streaming,
}

impl CallKind {
    fn accept(self) -> &'static str {
        match self {
            Self::Json => ACCEPT_JSON,
            Self::Streaming => ACCEPT_NDJSON,
        }
    }

    fn timeout(self, options: &ClientOptions) -> Option<Duration> {
        match self {
            Self::Json => Some(options.default_timeout),
            Self::Streaming => options.streaming_timeout,
        }
    }
}

/// Retry bookkeeping of one in-flight call.
#[derive(Debug)]
pub(crate) struct AttemptContext {
    pub(crate) sends: u32,
    pub(crate) transient_attempts: u32,
    pub(crate) rate_limit_attempts: u32,
    #[cfg_attr(not(feature = "tracing"), allow(dead_code))]
    pub(crate) started_at: Instant,
}

impl AttemptContext {
    pub(crate) fn new() -> Self {
        Self {
            sends: 0,
            transient_attempts: 0,
            rate_limit_attempts: 0,
            started_at: Instant::now(),
        }
    }
}

/// What a send produced when it did not simply deliver a response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Observation {
    Failure {
        class: FaultClass,
        before_send: bool,
    },
    RateLimited(RateLimitSignal),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Decision {
    Retry(Duration),
    Stop,
}

/// Retry state machine step. Bumps the matching counter when it retries.
pub(crate) fn decide(
    options: &ClientOptions,
    idempotent: bool,
    ctx: &mut AttemptContext,
    observation: Observation,
) -> Decision {
    match observation {
        Observation::Failure { class, before_send } => {
            let eligible = class.is_transient()
                && options.enable_transient_retry
                && ctx.transient_attempts < options.max_transient_retries
                && (idempotent || before_send);
            if !eligible {
                return Decision::Stop;
            }
            ctx.transient_attempts = ctx.transient_attempts.saturating_add(1);
            Decision::Retry(backoff_delay(
                ctx.transient_attempts,
                options.transient_retry_base_delay,
                options.transient_retry_max_delay,
            ))
        }
        Observation::RateLimited(signal) => {
            if !options.auto_retry_on_rate_limit || !idempotent {
                return Decision::Stop;
            }
            if options.unlimited_rate_limit_retries
                || ctx.rate_limit_attempts < options.max_rate_limit_retries
            {
                ctx.rate_limit_attempts = ctx.rate_limit_attempts.saturating_add(1);
                Decision::Retry(signal.wait)
            } else {
                Decision::Stop
            }
        }
    }
}

/// The single path every API call goes through.
#[derive(Clone)]
pub(crate) struct Transport {
    http: reqwest::Client,
    options: Arc<ClientOptions>,
    codec: JsonCodec,
    authorization: Option<HeaderValue>,
}

impl Transport {
    pub(crate) fn new(
        http: reqwest::Client,
        options: ClientOptions,
        authorization: Option<HeaderValue>,
    ) -> Self {
        Self {
            http,
            codec: JsonCodec::new(options.max_line_bytes),
            options: Arc::new(options),
            authorization,
        }
    }

    pub(crate) fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub(crate) fn with_options(self, options: ClientOptions) -> Self {
        Self::new(self.http, options, self.authorization)
    }

    pub(crate) fn with_authorization(mut self, authorization: Option<HeaderValue>) -> Self {
        self.authorization = authorization;
        self
    }

    pub(crate) fn has_authorization(&self) -> bool {
        self.authorization.is_some()
    }

    /// Sends `request` until it yields a response, retrying transient faults
    /// and 429s as the options allow. Statuses other than 429 are returned
    /// untouched.
    pub(crate) async fn execute(
        &self,
        request: &Request,
        kind: CallKind,
        cancel: &CancellationToken,
    ) -> Result<Response> {
        let url = request.url(&self.options)?;
        let idempotent = request.is_idempotent();
        let mut ctx = AttemptContext::new();

        loop {
            if cancel.is_cancelled() {
                return Err(LichessError::Cancelled);
            }
            ctx.sends = ctx.sends.saturating_add(1);

            #[cfg(feature = "tracing")]
            tracing::debug!(
                method = %request.method(),
                url = %url,
                send = ctx.sends,
                "sending request"
            );

            let sent = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(LichessError::Cancelled),
                sent = self.build(request, &url, kind).send() => sent,
            };

            let (decision, terminal) = match sent {
                Ok(response) if response.status() != StatusCode::TOO_MANY_REQUESTS => {
                    return Ok(response);
                }
                Ok(response) => {
                    let signal = RateLimitSignal::extract(
                        response.headers(),
                        Utc::now(),
                        self.options.rate_limit_fallback_delay,
                    );
                    drop(response);
                    let decision = decide(
                        &self.options,
                        idempotent,
                        &mut ctx,
                        Observation::RateLimited(signal),
                    );
                    let terminal = LichessError::RateLimitExceeded {
                        retry_after: signal.wait,
                        attempts: ctx.sends,
                    };
                    (decision, terminal)
                }
                Err(err) => {
                    let class = classify(&err);
                    let observation = Observation::Failure {
                        class,
                        before_send: failed_before_send(&err),
                    };
                    let decision = decide(&self.options, idempotent, &mut ctx, observation);
                    let terminal = match class {
                        FaultClass::Transient => LichessError::TransientNetwork {
                            attempts: ctx.sends,
                            source: err,
                        },
                        FaultClass::Fatal => LichessError::Transport(err),
                    };
                    (decision, terminal)
                }
            };

            match decision {
                Decision::Retry(delay) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(
                        error = %terminal,
                        delay_ms = delay.as_millis() as u64,
                        transient_attempts = ctx.transient_attempts,
                        rate_limit_attempts = ctx.rate_limit_attempts,
                        "retrying request"
                    );
                    drop(terminal);
                    pause(delay, cancel).await?;
                }
                Decision::Stop => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(
                        error = %terminal,
                        sends = ctx.sends,
                        elapsed_ms = ctx.started_at.elapsed().as_millis() as u64,
                        "request failed"
                    );
                    return Err(terminal);
                }
            }
        }
    }

    /// Executes a streaming call and hands the body to an NDJSON cursor.
    pub(crate) async fn execute_streaming<T: DeserializeOwned>(
        &self,
        request: &Request,
        cancel: &CancellationToken,
    ) -> Result<NdjsonStream<T>> {
        let response = self.execute(request, CallKind::Streaming, cancel).await?;
        let response = ensure_success(response, cancel).await?;
        Ok(NdjsonStream::from_response(
            response,
            self.codec,
            cancel.clone(),
        ))
    }

    pub(crate) async fn send_json<T: DeserializeOwned>(
        &self,
        request: &Request,
        cancel: &CancellationToken,
    ) -> Result<T> {
        let response = self.execute(request, CallKind::Json, cancel).await?;
        let response = ensure_success(response, cancel).await?;
        let body = read_body(response, cancel).await?;
        self.codec.decode_body(&body)
    }

    pub(crate) async fn send_text(
        &self,
        request: &Request,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let response = self.execute(request, CallKind::Json, cancel).await?;
        let response = ensure_success(response, cancel).await?;
        let body = read_body(response, cancel).await?;
        String::from_utf8(body.to_vec())
            .map_err(|err| LichessError::Decode(format!("response body is not utf-8: {err}")))
    }

    fn build(&self, request: &Request, url: &Url, kind: CallKind) -> RequestBuilder {
        let mut builder = self
            .http
            .request(request.method().clone(), url.clone())
            .header(header::USER_AGENT, self.options.user_agent.as_str());

        if let Some(authorization) = &self.authorization {
            builder = builder.header(header::AUTHORIZATION, authorization.clone());
        }
        if !request.has_header(&header::ACCEPT) {
            builder = builder.header(header::ACCEPT, kind.accept());
        }
        for (name, value) in request.headers() {
            builder = builder.header(name.clone(), value.clone());
        }
        if let Some(body) = request.body_ref() {
            builder = builder
                .header(header::CONTENT_TYPE, body.content_type.clone())
                .body(body.bytes.clone());
        }
        match kind.timeout(&self.options) {
            Some(timeout) => builder.timeout(timeout),
            None => builder,
        }
    }
}

/// Sleeps for `delay` unless the call is cancelled first.
async fn pause(delay: Duration, cancel: &CancellationToken) -> Result<()> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(LichessError::Cancelled),
        _ = sleep(delay) => Ok(()),
    }
}

async fn read_body(response: Response, cancel: &CancellationToken) -> Result<Bytes> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(LichessError::Cancelled),
        body = response.bytes() => body.map_err(LichessError::Transport),
    }
}

/// Maps a non-success response through the error taxonomy.
async fn ensure_success(response: Response, cancel: &CancellationToken) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = read_body(response, cancel).await?;
    Err(LichessError::from_status(
        status,
        String::from_utf8_lossy(&body).into_owned(),
    ))
}
