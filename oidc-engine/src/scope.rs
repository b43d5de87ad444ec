use serde::{Deserialize, Serialize};
use std::fmt;

/// An ordered, de-duplicated set of OAuth scope values.
///
/// Scopes arrive as a space-delimited string (RFC 6749 section 3.3). The
/// original order is kept so that `scope` round-trips to clients the way
/// they asked for it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(transparent)]
pub struct ScopeSet(Vec<String>);

impl ScopeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a space-delimited scope string
    pub fn parse(raw: &str) -> Self {
        raw.split_whitespace().collect()
    }

    pub fn contains(&self, scope: &str) -> bool {
        self.0.iter().any(|s| s == scope)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Non-strict subset: every scope in `self` is also in `other`
    pub fn is_subset_of(&self, other: &ScopeSet) -> bool {
        self.iter().all(|s| other.contains(s))
    }

    /// Scopes of `self` that `other` lacks
    pub fn difference(&self, other: &ScopeSet) -> ScopeSet {
        self.iter().filter(|s| !other.contains(s)).collect()
    }

    /// Merge `other` into a copy of `self`, keeping first-seen order
    pub fn union(&self, other: &ScopeSet) -> ScopeSet {
        self.iter().chain(other.iter()).collect()
    }

    pub fn insert(&mut self, scope: impl Into<String>) {
        let scope = scope.into();
        if !scope.is_empty() && !self.contains(&scope) {
            self.0.push(scope);
        }
    }
}

impl<S: Into<String>> FromIterator<S> for ScopeSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = ScopeSet::new();
        for scope in iter {
            set.insert(scope);
        }
        set
    }
}

impl fmt::Display for ScopeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dedupes_and_keeps_order() {
        let scopes = ScopeSet::parse("  openid profile  openid email ");
        assert_eq!(scopes.to_string(), "openid profile email");
        assert_eq!(scopes.len(), 3);
    }

    #[test]
    fn test_subset() {
        let allowed = ScopeSet::parse("openid profile email");
        assert!(ScopeSet::parse("openid email").is_subset_of(&allowed));
        assert!(ScopeSet::parse("").is_subset_of(&allowed));
        assert!(allowed.is_subset_of(&allowed));
        assert!(!ScopeSet::parse("openid admin").is_subset_of(&allowed));
    }

    #[test]
    fn test_union_and_difference() {
        let granted = ScopeSet::parse("openid profile");
        let requested = ScopeSet::parse("profile email");
        assert_eq!(granted.union(&requested).to_string(), "openid profile email");
        assert_eq!(requested.difference(&granted).to_string(), "email");
    }

    #[test]
    fn test_serializes_as_list() {
        let scopes = ScopeSet::parse("openid email");
        let json = serde_json::to_string(&scopes).unwrap();
        assert_eq!(json, r#"["openid","email"]"#);
        let back: ScopeSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, scopes);
    }
}
