use crate::identity::Principal;
use crate::scope::Scope;

pub const AUTHORIZATION_HEADER: &str = "authorization";
pub const WORKSPACE_HEADER: &str = "x-workspace-id";

/// Credential material pulled from inbound request metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestCredentials {
    pub bearer: Option<String>,
    pub workspace: Option<String>,
}

impl RequestCredentials {
    /// Header names match case-insensitively. An `Authorization` header with
    /// any scheme other than `Bearer` counts as no credential.
    pub fn from_headers<'a, I>(headers: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut credentials = Self::default();
        for (name, value) in headers {
            if name.eq_ignore_ascii_case(AUTHORIZATION_HEADER) {
                credentials.bearer = parse_bearer(value);
            } else if name.eq_ignore_ascii_case(WORKSPACE_HEADER) {
                let value = value.trim();
                credentials.workspace = (!value.is_empty()).then(|| value.to_string());
            }
        }
        credentials
    }
}

fn parse_bearer(value: &str) -> Option<String> {
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

/// Outcome of [`crate::FormVault::authorize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authorization {
    Scoped(Scope),
    /// Only for operations that run before a workspace exists.
    Unscoped(Principal),
}

impl Authorization {
    pub fn principal_user_id(&self) -> crate::ids::UserId {
        match self {
            Authorization::Scoped(scope) => scope.user_id(),
            Authorization::Unscoped(principal) => principal.user_id(),
        }
    }

    pub fn into_scope(self) -> Option<Scope> {
        match self {
            Authorization::Scoped(scope) => Some(scope),
            Authorization::Unscoped(_) => None,
        }
    }
}
