use oidc_engine::consent::ConsentDecision;
use oidc_engine::request::AuthorizeRequest;
use serde::Deserialize;
use utoipa::ToSchema;

/// Consent screen submission: the user's answer plus the original authorize
/// parameters, carried through the form unchanged
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ConsentForm {
    pub decision: ConsentDecision,
    #[serde(flatten)]
    pub authorize: AuthorizeRequest,
}
