use confique::Config;

/// Signing key material
#[derive(Debug, Config, Clone)]
pub struct KeysConfig {
    /// PEM file of the RSA signing key, PKCS#8 or PKCS#1. A key is generated
    /// at startup when unset.
    #[config(env = "OIDC_KEYS_SIGNING_KEY_PATH")]
    pub signing_key_path: Option<String>,

    /// Key id published in the JWKS and stamped into token headers (default: key-1)
    #[config(env = "OIDC_KEYS_SIGNING_KEY_ID", default = "key-1")]
    pub signing_key_id: String,

    /// Keys that signed tokens which may still be live, as a comma separated
    /// list of `kid=path` pairs
    #[config(env = "OIDC_KEYS_PREVIOUS_KEY_PATHS")]
    pub previous_key_paths: Option<String>,
}

impl KeysConfig {
    /// Parse `previous_key_paths` into `(kid, path)` pairs
    pub fn previous_keys(&self) -> Result<Vec<(String, String)>, String> {
        let Some(raw) = self.previous_key_paths.as_deref() else {
            return Ok(Vec::new());
        };
        raw.split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| match entry.split_once('=') {
                Some((kid, path)) if !kid.trim().is_empty() && !path.trim().is_empty() => {
                    Ok((kid.trim().to_string(), path.trim().to_string()))
                }
                _ => Err(format!("expected kid=path, got '{entry}'")),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(previous: Option<&str>) -> KeysConfig {
        KeysConfig {
            signing_key_path: None,
            signing_key_id: "key-1".to_string(),
            previous_key_paths: previous.map(str::to_string),
        }
    }

    #[test]
    fn test_previous_keys() {
        let keys = config(Some("old=/keys/old.pem, older = /keys/older.pem,"))
            .previous_keys()
            .unwrap();
        assert_eq!(
            keys,
            vec![
                ("old".to_string(), "/keys/old.pem".to_string()),
                ("older".to_string(), "/keys/older.pem".to_string()),
            ]
        );
        assert!(config(None).previous_keys().unwrap().is_empty());
    }

    #[test]
    fn test_previous_keys_malformed() {
        assert!(config(Some("/keys/old.pem")).previous_keys().is_err());
        assert!(config(Some("=/keys/old.pem")).previous_keys().is_err());
    }
}
