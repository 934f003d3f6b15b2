//! Absorbs the bearer token from a sign-in redirect URL.
//!
//! The identity provider sends the user back to the application URL with
//! the token either in the fragment (`#token=...`) or in the query
//! (`?token=...`). The token is stored once and the URL is cleaned so it
//! can be shown or shared without leaking the credential.

use url::Url;

use super::{CredentialError, CredentialStore};

/// Errors while absorbing a redirect URL.
#[derive(Debug, thiserror::Error)]
pub enum RedirectError {
    /// The URL could not be parsed.
    #[error("invalid redirect URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The token could not be stored.
    #[error(transparent)]
    Store(#[from] CredentialError),
}

/// A token extracted from a redirect URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Absorbed {
    /// The bearer token.
    pub token: String,
    /// The redirect URL with the token payload removed.
    pub cleaned_url: String,
}

/// Extracts the token from `raw` without storing it.
///
/// The fragment wins when both fragment and query carry a token. Returns
/// `Ok(None)` when the URL carries no non-empty token.
///
/// # Errors
///
/// Returns [`RedirectError::InvalidUrl`] if `raw` is not a valid URL.
pub fn absorb_token(raw: &str) -> Result<Option<Absorbed>, RedirectError> {
    let mut url = Url::parse(raw)?;

    // Everything after `#token=` is the token, `&` included.
    let fragment_token = url
        .fragment()
        .and_then(|f| f.strip_prefix("token="))
        .map(str::to_string);
    let query_token = url
        .query_pairs()
        .find(|(key, _)| key == "token")
        .map(|(_, value)| value.into_owned());

    let Some(token) = fragment_token
        .or(query_token)
        .filter(|t| !t.is_empty())
    else {
        return Ok(None);
    };

    url.set_fragment(None);
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != "token")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }

    let path = url.path().to_string();
    if let Some(stripped) = path
        .strip_suffix("/undefined/")
        .or_else(|| path.strip_suffix("/undefined"))
    {
        let stripped = if stripped.is_empty() { "/" } else { stripped };
        url.set_path(stripped);
    }

    Ok(Some(Absorbed {
        token,
        cleaned_url: url.to_string(),
    }))
}

/// Stores the token carried by `raw`, if any, and returns the cleaned URL.
///
/// A URL without a token leaves the store untouched and returns `Ok(None)`.
///
/// # Errors
///
/// Returns [`RedirectError`] if the URL is invalid or the store rejects
/// the token.
pub fn absorb_into(
    store: &dyn CredentialStore,
    raw: &str,
) -> Result<Option<String>, RedirectError> {
    let Some(absorbed) = absorb_token(raw)? else {
        tracing::debug!("redirect URL carries no token");
        return Ok(None);
    };
    store.set(&absorbed.token)?;
    tracing::info!(url = %absorbed.cleaned_url, "absorbed token from sign-in redirect");
    Ok(Some(absorbed.cleaned_url))
}
