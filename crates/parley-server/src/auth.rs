//! Session credential extraction for the WebSocket upgrade.
//!
//! Identity is established before the hub ever sees the socket. The upgrade
//! request carries a credential in one of three places, checked in order:
//! an `Authorization: Bearer` header, the [`SESSION_COOKIE`] cookie, or a
//! `token` query parameter (for clients that cannot set headers).

use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum_extra::extract::CookieJar;
use serde::Deserialize;

/// Cookie holding the session credential.
pub const SESSION_COOKIE: &str = "parley_session";

/// Query parameters accepted on `/ws`.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct CredentialQuery {
    /// Session credential.
    pub token: Option<String>,
}

/// Pull the first non-empty credential from the request.
pub fn extract_credential(
    headers: &HeaderMap,
    jar: &CookieJar,
    query: &CredentialQuery,
) -> Option<String> {
    bearer_token(headers)
        .or_else(|| jar.get(SESSION_COOKIE).map(|c| c.value().to_owned()))
        .or_else(|| query.token.clone())
        .filter(|token| !token.trim().is_empty())
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    scheme
        .eq_ignore_ascii_case("bearer")
        .then(|| token.trim().to_owned())
        .filter(|token| !token.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use axum::http::header::COOKIE;

    fn headers(pairs: &[(axum::http::HeaderName, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            let _ = map.insert(name.clone(), HeaderValue::from_str(value).unwrap());
        }
        map
    }

    fn query(token: Option<&str>) -> CredentialQuery {
        CredentialQuery {
            token: token.map(str::to_owned),
        }
    }

    #[test]
    fn bearer_header_wins() {
        let h = headers(&[
            (AUTHORIZATION, "Bearer tok-header"),
            (COOKIE, "parley_session=tok-cookie"),
        ]);
        let jar = CookieJar::from_headers(&h);
        assert_eq!(
            extract_credential(&h, &jar, &query(Some("tok-query"))),
            Some("tok-header".into())
        );
    }

    #[test]
    fn cookie_beats_query() {
        let h = headers(&[(COOKIE, "other=1; parley_session=tok-cookie")]);
        let jar = CookieJar::from_headers(&h);
        assert_eq!(
            extract_credential(&h, &jar, &query(Some("tok-query"))),
            Some("tok-cookie".into())
        );
    }

    #[test]
    fn query_is_last_resort() {
        let h = HeaderMap::new();
        let jar = CookieJar::from_headers(&h);
        assert_eq!(
            extract_credential(&h, &jar, &query(Some("tok-query"))),
            Some("tok-query".into())
        );
    }

    #[test]
    fn non_bearer_scheme_is_ignored() {
        let h = headers(&[(AUTHORIZATION, "Basic dXNlcjpwYXNz")]);
        let jar = CookieJar::from_headers(&h);
        assert_eq!(extract_credential(&h, &jar, &query(None)), None);
    }

    #[test]
    fn blank_credential_is_none() {
        let h = HeaderMap::new();
        let jar = CookieJar::from_headers(&h);
        assert_eq!(extract_credential(&h, &jar, &query(Some("  "))), None);
    }
}
