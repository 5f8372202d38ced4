use actix_web::{http::header::HeaderValue, HttpRequest};

/// Bearer token the caller sent in `Authorization`, if any.
pub fn bearer_credential(request: &HttpRequest) -> Option<String> {
    let authorization = request
        .headers()
        .get(actix_web::http::header::AUTHORIZATION)
        .map(HeaderValue::to_str)?
        .ok()?;
    let (scheme, token) = authorization.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

/// Credential forwarded to the ledger: the caller's own token wins over the
/// one configured for the server.
pub fn ledger_credential(request: &HttpRequest, configured: Option<&str>) -> Option<String> {
    bearer_credential(request).or_else(|| {
        configured
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(str::to_string)
    })
}
