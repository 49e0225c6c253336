//! Agent manifests discovered on disk.
//!
//! Layout: `<agents_dir>/<core>/<agent_id>.yaml` (`.yml` and `.json` work too).
//! Only directories named after a known core are scanned.
//!
//! ```yaml
//! name: Lead Qualifier
//! description: Scores inbound leads
//! enabled: true
//! timeout_secs: 5
//! template:
//!   operation: score
//!   required_fields: [lead_id, company_size]
//!   response:
//!     lead_id: "{{lead_id}}"
//!     qualified: true
//! ```
//!
//! A manifest without `template` adjusts the agent of the same id that is
//! already registered (name, description, enabled flag, timeout).

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use walkdir::WalkDir;

use super::registry::AgentRegistration;
use super::types::Operation;

const MANIFEST_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

/// Declarative template agent definition.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TemplateSpec {
    #[serde(default = "default_operation")]
    pub operation: Operation,
    #[serde(default)]
    pub required_fields: Vec<String>,
    #[serde(default)]
    pub response: Value,
}

fn default_operation() -> Operation {
    Operation::Execute
}

#[derive(Debug, Deserialize)]
struct ManifestFile {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    enabled: Option<bool>,
    #[serde(default)]
    timeout_secs: Option<u64>,
    #[serde(default)]
    template: Option<TemplateSpec>,
}

/// A parsed manifest bound to its core.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentManifest {
    pub id: String,
    pub category: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub enabled: Option<bool>,
    pub timeout: Option<Duration>,
    pub template: Option<TemplateSpec>,
}

impl AgentManifest {
    /// Parse a manifest file. The id defaults to the file stem.
    pub fn from_path(path: &Path, category: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        let file: ManifestFile = if is_json {
            serde_json::from_str(&contents)?
        } else {
            serde_yaml::from_str(&contents)?
        };

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let id = file.id.unwrap_or(stem).trim().to_string();
        if id.is_empty() || id.contains('.') || id.contains('/') {
            anyhow::bail!("invalid agent id '{}'", id);
        }

        Ok(Self {
            id,
            category: category.to_string(),
            name: file.name,
            description: file.description,
            enabled: file.enabled,
            timeout: file.timeout_secs.map(|s| Duration::from_secs(s.max(1))),
            template: file.template,
        })
    }

    /// Copy the manifest's overrides onto a registration.
    pub fn apply_to(&self, registration: &mut AgentRegistration) {
        if let Some(name) = &self.name {
            registration.display_name = name.clone();
        }
        if let Some(description) = &self.description {
            registration.description = description.clone();
        }
        if let Some(enabled) = self.enabled {
            registration.enabled = enabled;
        }
        if let Some(timeout) = self.timeout {
            registration.timeout = Some(timeout);
        }
    }
}

fn is_manifest(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| MANIFEST_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Read every manifest under `<dir>/<core>/` for the given cores.
///
/// Unreadable manifests are logged and skipped. Directories that are not a
/// known core are reported and ignored.
pub fn scan_manifests(dir: &Path, cores: &[String]) -> Vec<AgentManifest> {
    if !dir.is_dir() {
        tracing::warn!("Agents directory {} does not exist", dir.display());
        return Vec::new();
    }

    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_dir())
    {
        let name = entry.file_name().to_string_lossy();
        if !cores.iter().any(|c| c.as_str() == &*name) {
            tracing::warn!("Ignoring {}: not a known core", entry.path().display());
        }
    }

    let mut manifests = Vec::new();
    for core in cores {
        let core_dir = dir.join(core);
        if !core_dir.is_dir() {
            continue;
        }

        let mut paths: Vec<_> = WalkDir::new(&core_dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file() && is_manifest(e.path()))
            .map(|e| e.into_path())
            .collect();
        paths.sort();

        for path in paths {
            match AgentManifest::from_path(&path, core) {
                Ok(manifest) => manifests.push(manifest),
                Err(e) => tracing::warn!("Skipping manifest {}: {}", path.display(), e),
            }
        }
    }

    tracing::info!("Found {} agent manifests in {}", manifests.len(), dir.display());
    manifests
}
