//! Federated authentication through a sectoral identity provider.

use crate::constants::callback;
use crate::error::{InternalError, Result};
use crate::models::directory::KKAppEntry;
use crate::models::token::query_parameter;
use serde::{Deserialize, Serialize};
use url::Url;

/// Request to start federated authentication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtAuthRequest {
    /// Identifier of the chosen sectoral identity provider.
    pub kk_app_id: String,

    /// State of this attempt.
    pub state: String,

    /// S256 hash of the code verifier.
    pub code_challenge: String,

    /// Code challenge method.
    pub code_challenge_method: String,

    /// Nonce of this attempt.
    pub nonce: String,
}

/// Callback of the sectoral identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtAuthVerify {
    /// Authorization code.
    pub code: String,

    /// State of the originating request.
    pub state: String,

    /// Redirect URI of the sectoral identity provider.
    pub kk_app_redirect_uri: String,
}

impl ExtAuthVerify {
    /// Read `code`, `state` and `kk_app_redirect_uri` from a callback URL.
    ///
    /// # Errors
    ///
    /// Returns [`InternalError::MissingCallbackParameter`] naming the first
    /// absent parameter.
    pub fn from_callback(url: &Url) -> Result<Self> {
        Ok(Self {
            code: query_parameter(url, callback::CODE)?,
            state: query_parameter(url, callback::STATE)?,
            kk_app_redirect_uri: query_parameter(url, callback::KK_APP_REDIRECT_URI)?,
        })
    }
}

/// Random values of a pending federated authentication, stored by state.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtAuthChallengeSession {
    /// Code verifier.
    pub verifier_code: String,

    /// Nonce the ID token must carry.
    pub nonce: String,

    /// The sectoral identity provider the flow was started with.
    pub entry: KKAppEntry,
}

impl std::fmt::Debug for ExtAuthChallengeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtAuthChallengeSession")
            .field("entry", &self.entry)
            .finish_non_exhaustive()
    }
}

/// `scheme://host/path` of a callback URL, dropping query and fragment.
///
/// # Errors
///
/// Returns [`InternalError::InvalidRedirectUri`] for URLs that cannot be a base.
pub fn redirect_without_query(url: &Url) -> Result<String> {
    if url.cannot_be_a_base() {
        return Err(InternalError::InvalidRedirectUri.into());
    }
    let mut redirect = url.clone();
    redirect.set_query(None);
    redirect.set_fragment(None);
    Ok(redirect.into())
}
