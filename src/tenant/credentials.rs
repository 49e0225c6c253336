//! Tenant credential table.
//!
//! Credentials are loaded once at startup from a YAML or JSON file:
//!
//! ```yaml
//! tenants:
//!   - tenant_id: demo
//!     api_key: demo-key
//!     plan: starter
//!   - tenant_id: acme
//!     api_key_sha256: 5e884898da28047151d0e56f8dc6292773603d0d6aabbdd62a11ef721d1542d8
//!     plan: enterprise
//! ```
//!
//! Only the SHA-256 digest of each key is kept in memory.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::{Plan, ANONYMOUS_TENANT};
use crate::config::ConfigError;
use crate::util::hex_sha256;

/// A tenant identity and the plan that sets its quota.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantCredential {
    pub tenant_id: String,
    /// Lowercase hex SHA-256 of the API key
    pub api_key_sha256: String,
    pub plan: Plan,
}

impl TenantCredential {
    /// Build a credential from a raw API key.
    pub fn new(tenant_id: impl Into<String>, api_key: impl AsRef<str>, plan: Plan) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            api_key_sha256: hex_sha256(api_key.as_ref()),
            plan,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CredentialFile {
    #[serde(default)]
    tenants: Vec<CredentialEntry>,
}

#[derive(Debug, Deserialize)]
struct CredentialEntry {
    tenant_id: String,
    #[serde(default)]
    api_key: Option<String>,
    #[serde(default)]
    api_key_sha256: Option<String>,
    plan: Plan,
}

impl CredentialEntry {
    fn into_credential(self, path: &Path) -> Result<TenantCredential, ConfigError> {
        let tenant_id = self.tenant_id.trim().to_string();
        if tenant_id.is_empty() {
            return Err(ConfigError::InvalidValue(
                path.display().to_string(),
                "tenant_id cannot be empty".to_string(),
            ));
        }
        if tenant_id == ANONYMOUS_TENANT {
            return Err(ConfigError::InvalidValue(
                path.display().to_string(),
                format!("tenant_id '{}' is reserved for unauthenticated callers", ANONYMOUS_TENANT),
            ));
        }
        let api_key_sha256 = match (self.api_key, self.api_key_sha256) {
            (Some(key), None) if !key.is_empty() => hex_sha256(&key),
            (None, Some(digest)) if digest.len() == 64 && hex::decode(&digest).is_ok() => {
                digest.to_lowercase()
            }
            _ => {
                return Err(ConfigError::InvalidValue(
                    path.display().to_string(),
                    format!(
                        "tenant '{}' needs exactly one of api_key or a 64-character api_key_sha256",
                        tenant_id
                    ),
                ))
            }
        };
        Ok(TenantCredential {
            tenant_id,
            api_key_sha256,
            plan: self.plan,
        })
    }
}

/// Load the credential table from a YAML or JSON file.
///
/// JSON is chosen by a `.json` extension; anything else is parsed as YAML.
/// Duplicate tenant ids are rejected.
pub fn load_credentials(path: &PathBuf) -> Result<Vec<TenantCredential>, ConfigError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Unreadable(path.clone(), e.to_string()))?;

    let is_json = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let file: CredentialFile = if is_json {
        serde_json::from_str(&contents)
            .map_err(|e| ConfigError::Unreadable(path.clone(), e.to_string()))?
    } else {
        serde_yaml::from_str(&contents)
            .map_err(|e| ConfigError::Unreadable(path.clone(), e.to_string()))?
    };

    let mut seen = std::collections::HashSet::new();
    let mut credentials = Vec::with_capacity(file.tenants.len());
    for entry in file.tenants {
        let credential = entry.into_credential(path)?;
        if !seen.insert(credential.tenant_id.clone()) {
            return Err(ConfigError::InvalidValue(
                path.display().to_string(),
                format!("duplicate tenant '{}'", credential.tenant_id),
            ));
        }
        credentials.push(credential);
    }

    tracing::info!(
        "Loaded {} tenant credentials from {}",
        credentials.len(),
        path.display()
    );
    Ok(credentials)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_temp(suffix: &str, contents: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_yaml_with_raw_and_hashed_keys() {
        let digest = hex_sha256("secret");
        let file = write_temp(
            ".yaml",
            &format!(
                "tenants:\n  - tenant_id: demo\n    api_key: demo-key\n    plan: starter\n  - tenant_id: acme\n    api_key_sha256: {}\n    plan: enterprise\n",
                digest
            ),
        );

        let creds = load_credentials(&file.path().to_path_buf()).unwrap();
        assert_eq!(creds.len(), 2);
        assert_eq!(creds[0], TenantCredential::new("demo", "demo-key", Plan::Starter));
        assert_eq!(creds[1].api_key_sha256, digest);
        assert_eq!(creds[1].plan, Plan::Enterprise);
    }

    #[test]
    fn loads_json() {
        let file = write_temp(
            ".json",
            r#"{"tenants":[{"tenant_id":"acme","api_key":"k","plan":"professional"}]}"#,
        );
        let creds = load_credentials(&file.path().to_path_buf()).unwrap();
        assert_eq!(creds, vec![TenantCredential::new("acme", "k", Plan::Professional)]);
    }

    #[test]
    fn rejects_entry_with_both_key_forms() {
        let file = write_temp(
            ".yaml",
            &format!(
                "tenants:\n  - tenant_id: demo\n    api_key: k\n    api_key_sha256: {}\n    plan: starter\n",
                hex_sha256("k")
            ),
        );
        assert!(matches!(
            load_credentials(&file.path().to_path_buf()),
            Err(ConfigError::InvalidValue(_, _))
        ));
    }

    #[test]
    fn rejects_duplicate_tenants() {
        let file = write_temp(
            ".yaml",
            "tenants:\n  - tenant_id: demo\n    api_key: a\n    plan: starter\n  - tenant_id: demo\n    api_key: b\n    plan: starter\n",
        );
        assert!(load_credentials(&file.path().to_path_buf()).is_err());
    }

    #[test]
    fn rejects_reserved_anonymous_tenant() {
        let file = write_temp(
            ".yaml",
            "tenants:\n  - tenant_id: anonymous\n    api_key: k\n    plan: enterprise\n",
        );
        assert!(matches!(
            load_credentials(&file.path().to_path_buf()),
            Err(ConfigError::InvalidValue(_, _))
        ));
    }

    #[test]
    fn missing_file_is_unreadable() {
        let path = PathBuf::from("/nonexistent/tenants.yaml");
        assert!(matches!(
            load_credentials(&path),
            Err(ConfigError::Unreadable(_, _))
        ));
    }
}
