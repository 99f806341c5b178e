//! Response hardening headers.

use axum::http::header::{
    CONTENT_SECURITY_POLICY, CONTENT_SECURITY_POLICY_REPORT_ONLY, REFERRER_POLICY,
    X_CONTENT_TYPE_OPTIONS, X_FRAME_OPTIONS,
};
use axum::http::{HeaderMap, HeaderName, HeaderValue};

/// Header carrying the per-request identifier.
pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Content security policy for a JSON-only API.
pub const CSP_DIRECTIVES: &str =
    "default-src 'none'; frame-ancestors 'none'; base-uri 'none'; form-action 'none'";

/// Whether the CSP is enforced or only reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CspMode {
    Enforce,
    ReportOnly,
}

impl CspMode {
    pub fn from_report_only(report_only: bool) -> Self {
        if report_only {
            CspMode::ReportOnly
        } else {
            CspMode::Enforce
        }
    }

    pub fn header_name(&self) -> HeaderName {
        match self {
            CspMode::Enforce => CONTENT_SECURITY_POLICY,
            CspMode::ReportOnly => CONTENT_SECURITY_POLICY_REPORT_ONLY,
        }
    }
}

/// Attach the request id and the hardening headers, replacing existing values.
pub fn apply_security_headers(headers: &mut HeaderMap, request_id: &str, csp: CspMode) {
    if let Ok(value) = HeaderValue::from_str(request_id) {
        headers.insert(X_REQUEST_ID, value);
    }
    headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    headers.insert(X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(REFERRER_POLICY, HeaderValue::from_static("no-referrer"));
    headers.insert(csp.header_name(), HeaderValue::from_static(CSP_DIRECTIVES));
}
