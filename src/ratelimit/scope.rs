//! Mapping from request paths to rate limit scopes.

use http::Method;
use std::collections::HashMap;

/// Scope charged by `POST /generate_response`.
pub const GENERATE_RESPONSE: &str = "generate_response";
/// Scope charged by `POST /feedback/thumb`.
pub const FEEDBACK_THUMB: &str = "feedback_thumb";
/// Scope charged by `POST /feedback/edit`.
pub const FEEDBACK_EDIT: &str = "feedback_edit";

/// Static path-to-scope table.
///
/// Paths match exactly. Unmapped paths and `OPTIONS` pre-flight requests are
/// never rate limited.
#[derive(Debug, Clone)]
pub struct ScopeResolver {
    routes: HashMap<String, String>,
}

impl ScopeResolver {
    /// A resolver with no mapped paths.
    pub fn empty() -> Self {
        Self {
            routes: HashMap::new(),
        }
    }

    /// Map `path` to `scope`.
    pub fn with_route(mut self, path: impl Into<String>, scope: impl Into<String>) -> Self {
        self.routes.insert(path.into(), scope.into());
        self
    }

    /// Resolve the scope for a request, if any.
    pub fn resolve(&self, method: &Method, path: &str) -> Option<&str> {
        if method == Method::OPTIONS {
            return None;
        }
        self.routes.get(path).map(String::as_str)
    }
}

impl Default for ScopeResolver {
    fn default() -> Self {
        Self::empty()
            .with_route("/generate_response", GENERATE_RESPONSE)
            .with_route("/feedback/thumb", FEEDBACK_THUMB)
            .with_route("/feedback/edit", FEEDBACK_EDIT)
    }
}
