//! Admission control middleware.
//!
//! Every request passes through [`admission_middleware`] before any handler:
//!
//! 1. a request id is generated and attached to the request and task context
//! 2. the client identity is derived
//! 3. the body is size-checked (declared length, then streamed bytes)
//! 4. the path's rate limit scope is checked
//! 5. the request is dispatched, with handler panics converted to 500s
//!
//! Every response, rejections included, gets the hardening headers and one
//! completion log line.

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::Method;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use futures::FutureExt;
use std::any::Any;
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::body::{BodyRejection, RequestBodyGuard};
use super::client::extract_client_identity;
use super::error::ApiError;
use super::headers::{apply_security_headers, CspMode};
use crate::config::AdmissionConfig;
use crate::error::Result;
use crate::ratelimit::{
    LimiterFault, RateLimitDecision, ScopeRateLimiter, ScopeResolver, WindowCounterStore,
};

tokio::task_local! {
    static REQUEST_ID: String;
}

/// Request id of the request being processed on this task, if any.
pub fn current_request_id() -> Option<String> {
    REQUEST_ID.try_with(Clone::clone).ok()
}

/// Request extension carrying the request id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

/// How admission control disposed of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionOutcome {
    /// Checked against a rate limit scope and admitted
    Admitted,
    /// No rate limit scope applies
    Exempt,
    /// Body exceeded the size limit
    PayloadTooLarge,
    /// A rate limit rule denied the request
    RateLimited,
    /// The limiter failed and the request was refused
    LimiterFault,
}

impl AdmissionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdmissionOutcome::Admitted => "admitted",
            AdmissionOutcome::Exempt => "exempt",
            AdmissionOutcome::PayloadTooLarge => "payload_too_large",
            AdmissionOutcome::RateLimited => "rate_limited",
            AdmissionOutcome::LimiterFault => "limiter_fault",
        }
    }
}

/// Admission control state shared by every request.
pub struct AdmissionMiddleware {
    body_guard: RequestBodyGuard,
    limiter: Arc<ScopeRateLimiter>,
    scopes: ScopeResolver,
    trust_proxy_headers: bool,
    csp: CspMode,
}

impl AdmissionMiddleware {
    pub fn new(
        body_guard: RequestBodyGuard,
        limiter: Arc<ScopeRateLimiter>,
        scopes: ScopeResolver,
        trust_proxy_headers: bool,
        csp: CspMode,
    ) -> Self {
        Self {
            body_guard,
            limiter,
            scopes,
            trust_proxy_headers,
            csp,
        }
    }

    /// Build admission control from configuration, using the system clock
    /// and the default scope routes.
    pub fn from_config(config: &AdmissionConfig) -> Result<Self> {
        let policy = config.rate_limit_policy()?;
        info!(
            scopes = policy.len(),
            policy = ?policy.summary(),
            body_limit = config.max_request_body_bytes,
            trust_proxy_headers = config.trust_proxy_headers,
            csp_report_only = config.csp_report_only,
            "Admission control configured"
        );

        let store = WindowCounterStore::with_eviction_threshold(config.eviction_threshold);
        Ok(Self::new(
            RequestBodyGuard::new(config.max_request_body_bytes),
            Arc::new(ScopeRateLimiter::new(policy, store)),
            ScopeResolver::default(),
            config.trust_proxy_headers,
            CspMode::from_report_only(config.csp_report_only),
        ))
    }

    pub fn limiter(&self) -> &ScopeRateLimiter {
        &self.limiter
    }

    pub fn body_guard(&self) -> &RequestBodyGuard {
        &self.body_guard
    }

    async fn process(&self, request_id: String, mut request: Request, next: Next) -> Response {
        let started = Instant::now();
        let method = request.method().clone();
        let path = request.uri().path().to_string();

        request.extensions_mut().insert(RequestId(request_id.clone()));
        let peer = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        let client = extract_client_identity(request.headers(), peer, self.trust_proxy_headers);

        let (outcome, mut response) = self.admit(request, next, &method, &path, &client).await;

        apply_security_headers(response.headers_mut(), &request_id, self.csp);

        info!(
            request_id = %request_id,
            method = %method,
            path = %path,
            status = response.status().as_u16(),
            duration_ms = started.elapsed().as_secs_f64() * 1000.0,
            client = %client,
            outcome = outcome.as_str(),
            "Request completed"
        );

        response
    }

    async fn admit(
        &self,
        request: Request,
        next: Next,
        method: &Method,
        path: &str,
        client: &str,
    ) -> (AdmissionOutcome, Response) {
        let request = if carries_body(method) {
            match self.limit_body(request).await {
                Ok(request) => request,
                Err(rejection) => {
                    warn!(client = %client, error = %rejection, "Rejected request body");
                    let error = ApiError::PayloadTooLarge {
                        limit_bytes: self.body_guard.limit(),
                    };
                    return (AdmissionOutcome::PayloadTooLarge, error.into_response());
                }
            }
        } else {
            request
        };

        let outcome = match self.scopes.resolve(method, path) {
            None => AdmissionOutcome::Exempt,
            Some(scope) => match self.check_rate_limit(scope, client) {
                Ok(decision) if decision.admitted => AdmissionOutcome::Admitted,
                Ok(decision) => {
                    warn!(
                        scope = %scope,
                        client = %client,
                        retry_after = decision.retry_after_secs,
                        "Rate limit exceeded"
                    );
                    let error = ApiError::RateLimited {
                        retry_after_secs: decision.retry_after_secs,
                    };
                    return (AdmissionOutcome::RateLimited, error.into_response());
                }
                Err(fault) => {
                    error!(scope = %scope, client = %client, error = %fault, "Rate limiter fault, rejecting request");
                    return (
                        AdmissionOutcome::LimiterFault,
                        ApiError::LimiterUnavailable.into_response(),
                    );
                }
            },
        };

        let response = match AssertUnwindSafe(next.run(request)).catch_unwind().await {
            Ok(response) => response,
            Err(payload) => {
                ApiError::Internal(format!("handler panicked: {}", panic_message(&*payload)))
                    .into_response()
            }
        };

        (outcome, response)
    }

    async fn limit_body(&self, request: Request) -> std::result::Result<Request, BodyRejection> {
        self.body_guard.precheck(request.headers())?;

        let (parts, body) = request.into_parts();
        let bytes = self.body_guard.enforce(body).await?;
        Ok(Request::from_parts(parts, Body::from(bytes)))
    }

    fn check_rate_limit(
        &self,
        scope: &str,
        client: &str,
    ) -> std::result::Result<RateLimitDecision, LimiterFault> {
        panic::catch_unwind(AssertUnwindSafe(|| self.limiter.check(scope, client)))
            .unwrap_or_else(|payload| Err(LimiterFault::Panicked(panic_message(&*payload))))
    }
}

/// Methods whose body is size-checked.
fn carries_body(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Axum middleware entry point; install with `middleware::from_fn_with_state`.
pub async fn admission_middleware(
    State(admission): State<Arc<AdmissionMiddleware>>,
    request: Request,
    next: Next,
) -> Response {
    let request_id = Uuid::new_v4().simple().to_string();
    let span = info_span!(
        "request",
        request_id = %request_id,
        method = %request.method(),
        path = %request.uri().path()
    );

    REQUEST_ID
        .scope(
            request_id.clone(),
            admission.process(request_id, request, next).instrument(span),
        )
        .await
}
