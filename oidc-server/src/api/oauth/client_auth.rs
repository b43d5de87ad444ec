//! Client authentication at the token, revocation and introspection endpoints

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use http::header::AUTHORIZATION;
use http::HeaderMap;
use oidc_engine::request::ClientCredentials;
use oidc_engine::OAuthError;
use url::form_urlencoded;

/// Parse `Authorization: Basic`. Both halves are form-urlencoded before
/// base64 encoding (RFC 6749 section 2.3.1).
pub(crate) fn basic_credentials(headers: &HeaderMap) -> Result<Option<ClientCredentials>, OAuthError> {
    let Some(value) = headers.get(AUTHORIZATION) else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|_| OAuthError::invalid_client("malformed Authorization header"))?;
    let Some((scheme, encoded)) = value.split_once(' ') else {
        return Err(OAuthError::invalid_client("malformed Authorization header"));
    };
    if !scheme.eq_ignore_ascii_case("basic") {
        return Ok(None);
    }

    let decoded = STANDARD
        .decode(encoded.trim())
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .ok_or_else(|| OAuthError::invalid_client("malformed Basic credentials"))?;
    let (client_id, secret) = decoded
        .split_once(':')
        .ok_or_else(|| OAuthError::invalid_client("malformed Basic credentials"))?;
    let client_id = form_decode(client_id);
    if client_id.is_empty() {
        return Err(OAuthError::invalid_client("empty client_id"));
    }
    let secret = form_decode(secret);
    Ok(Some(ClientCredentials::new(
        client_id,
        (!secret.is_empty()).then_some(secret),
    )))
}

fn form_decode(raw: &str) -> String {
    form_urlencoded::parse(format!("v={raw}").as_bytes())
        .next()
        .map(|(_, value)| value.into_owned())
        .unwrap_or_default()
}

/// Credentials from HTTP Basic or the request body, whichever was used
pub(crate) fn client_credentials(
    headers: &HeaderMap,
    body_client_id: Option<&str>,
    body_client_secret: Option<&str>,
) -> Result<ClientCredentials, OAuthError> {
    ClientCredentials::resolve(basic_credentials(headers)?, body_client_id, body_client_secret)
}
