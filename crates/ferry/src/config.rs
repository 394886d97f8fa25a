//! Configuration types for the marshalling engine and the host loader.
//!
//! Both configs deserialize from JSON; missing keys take their defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{MarshalError, MarshalResult};

/// How host member names appear in the script realm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberNaming {
    /// Keep host names (`GetArea`)
    #[default]
    Preserve,
    /// Lower the first letter (`getArea`)
    CamelCase,
}

impl MemberNaming {
    pub fn apply(self, name: &str) -> String {
        match self {
            MemberNaming::Preserve => name.to_string(),
            MemberNaming::CamelCase => {
                let mut chars = name.chars();
                match chars.next() {
                    Some(first) => first.to_lowercase().chain(chars).collect(),
                    None => String::new(),
                }
            }
        }
    }
}

/// Marshaller configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarshalConfig {
    /// Materialize every member (and its dependency types) at export time
    /// instead of on first access.
    /// Default: false
    pub eager_export: bool,

    /// Naming of projected members.
    /// Default: preserve
    pub member_naming: MemberNaming,

    /// Global property holding the root namespace object.
    /// Default: "host"
    pub root_namespace: String,
}

impl Default for MarshalConfig {
    fn default() -> Self {
        Self {
            eager_export: false,
            member_naming: MemberNaming::Preserve,
            root_namespace: "host".to_string(),
        }
    }
}

impl MarshalConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_str(text: &str) -> MarshalResult<Self> {
        serde_json::from_str(text).map_err(|e| MarshalError::invalid_module("<marshal config>", e.to_string()))
    }

    pub fn from_file(path: impl AsRef<Path>) -> MarshalResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|e| MarshalError::invalid_module(path.display().to_string(), e.to_string()))
    }

    pub fn with_eager_export(mut self, eager: bool) -> Self {
        self.eager_export = eager;
        self
    }

    pub fn with_member_naming(mut self, naming: MemberNaming) -> Self {
        self.member_naming = naming;
        self
    }

    pub fn with_root_namespace(mut self, name: impl Into<String>) -> Self {
        self.root_namespace = name.into();
        self
    }

    /// Script-side name of a host member
    pub fn script_name(&self, name: &str) -> String {
        self.member_naming.apply(name)
    }
}

/// Host module loader configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Directory relative search paths are resolved against
    pub base_dir: PathBuf,

    /// Directories probed for `<name><manifest_suffix>`
    pub search_paths: Vec<PathBuf>,

    /// File suffix of module manifests
    pub manifest_suffix: String,

    /// Fall back to the directory of the module currently loading
    pub probe_requester_dir: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            base_dir: std::env::current_dir().unwrap_or_default(),
            search_paths: Vec::new(),
            manifest_suffix: ".module.json".to_string(),
            probe_requester_dir: true,
        }
    }
}

impl LoaderConfig {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            ..Default::default()
        }
    }

    pub fn from_json_str(text: &str) -> MarshalResult<Self> {
        serde_json::from_str(text).map_err(|e| MarshalError::invalid_module("<loader config>", e.to_string()))
    }

    pub fn from_file(path: impl AsRef<Path>) -> MarshalResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|e| MarshalError::invalid_module(path.display().to_string(), e.to_string()))
    }

    pub fn search_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.search_paths.push(path.into());
        self
    }

    pub fn with_probe_requester_dir(mut self, probe: bool) -> Self {
        self.probe_requester_dir = probe;
        self
    }

    /// Directories to probe, in order: the base directory, then each search
    /// path (relative ones against the base directory)
    pub fn probe_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = vec![self.base_dir.clone()];
        for path in &self.search_paths {
            let dir = if path.is_absolute() {
                path.clone()
            } else {
                self.base_dir.join(path)
            };
            if !dirs.contains(&dir) {
                dirs.push(dir);
            }
        }
        dirs
    }

    /// File name of the manifest for a module
    pub fn manifest_file_name(&self, module: &str) -> String {
        format!("{}{}", module, self.manifest_suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camel_case_naming() {
        assert_eq!(MemberNaming::CamelCase.apply("GetArea"), "getArea");
        assert_eq!(MemberNaming::CamelCase.apply(""), "");
        assert_eq!(MemberNaming::Preserve.apply("GetArea"), "GetArea");
    }

    #[test]
    fn test_marshal_config_partial_json() {
        let config = MarshalConfig::from_json_str(r#"{ "member_naming": "camel_case" }"#).unwrap();
        assert_eq!(config.member_naming, MemberNaming::CamelCase);
        assert!(!config.eager_export);
        assert_eq!(config.root_namespace, "host");
    }

    #[test]
    fn test_marshal_config_rejects_bad_json() {
        assert!(matches!(
            MarshalConfig::from_json_str("{ eager_export: }"),
            Err(MarshalError::InvalidModule { .. })
        ));
    }

    #[test]
    fn test_probe_dirs_resolve_relative_paths() {
        let config = LoaderConfig::new("/opt/app").search_path("lib").search_path("/usr/share/mods");
        assert_eq!(
            config.probe_dirs(),
            vec![
                PathBuf::from("/opt/app"),
                PathBuf::from("/opt/app/lib"),
                PathBuf::from("/usr/share/mods"),
            ]
        );
        assert_eq!(config.manifest_file_name("Contoso.Core"), "Contoso.Core.module.json");
    }
}
