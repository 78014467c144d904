//! Stage template catalog.
//!
//! Template sets are versioned reference data. The built-in `standard-2024`
//! set covers the five delivery stages; additional sets can be loaded from a
//! TOML file and selected by version without touching the code that consumes
//! them.
//!
//! ```toml
//! active_version = "compact-2025"
//!
//! [[sets]]
//! version = "compact-2025"
//!
//! [[sets.stages]]
//! key = "consultation"
//! stage_name = "Consultation"
//! sort_order = 1
//! typical_duration_days = 2
//! required_role = "designer"
//! checklist = ["Site visit"]
//! ```

use crate::errors::{ConfigError, ConfigResult};
use crate::graph::DependencyGraph;
use crate::types::ProjectRole;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

/// Version identifier of the built-in template set
pub const DEFAULT_TEMPLATE_VERSION: &str = "standard-2024";

/// Definition of one standard stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageTemplate {
    /// Stable identifier used by `depends_on` references
    pub key: String,
    pub stage_name: String,
    pub sort_order: u32,
    pub typical_duration_days: u32,
    /// Assignment hint only; never an authorization gate
    #[serde(default)]
    pub required_role: Option<ProjectRole>,
    #[serde(default)]
    pub depends_on: Option<String>,
    #[serde(default)]
    pub checklist: Vec<String>,
}

impl StageTemplate {
    pub fn new(key: &str, stage_name: &str, sort_order: u32, typical_duration_days: u32) -> Self {
        StageTemplate {
            key: key.to_string(),
            stage_name: stage_name.to_string(),
            sort_order,
            typical_duration_days,
            required_role: None,
            depends_on: None,
            checklist: Vec::new(),
        }
    }

    pub fn with_role(mut self, role: ProjectRole) -> Self {
        self.required_role = Some(role);
        self
    }

    pub fn after(mut self, key: &str) -> Self {
        self.depends_on = Some(key.to_string());
        self
    }

    pub fn with_checklist(mut self, items: &[&str]) -> Self {
        self.checklist = items.iter().map(|s| s.to_string()).collect();
        self
    }
}

/// An ordered, immutable version of the stage list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateSet {
    pub version: String,
    pub stages: Vec<StageTemplate>,
}

impl TemplateSet {
    /// Create a validated set; stages are stored in `sort_order`.
    pub fn new(version: impl Into<String>, mut stages: Vec<StageTemplate>) -> ConfigResult<Self> {
        stages.sort_by_key(|s| s.sort_order);
        let set = TemplateSet {
            version: version.into(),
            stages,
        };
        set.validate()?;
        Ok(set)
    }

    /// Built-in interior-design delivery pipeline
    pub fn standard() -> Self {
        TemplateSet {
            version: DEFAULT_TEMPLATE_VERSION.to_string(),
            stages: vec![
                StageTemplate::new("consultation", "Consultation", 1, 3)
                    .with_role(ProjectRole::Designer)
                    .with_checklist(&[
                        "Initial client meeting",
                        "Site measurement",
                        "Requirements and budget brief",
                    ]),
                StageTemplate::new("design", "Design", 2, 14)
                    .with_role(ProjectRole::Designer)
                    .after("consultation")
                    .with_checklist(&[
                        "Concept moodboard",
                        "2D layouts",
                        "3D renders",
                        "Client design sign-off",
                    ]),
                StageTemplate::new("procurement", "Procurement", 3, 10)
                    .with_role(ProjectRole::Manager)
                    .after("design")
                    .with_checklist(&[
                        "Bill of quantities",
                        "Vendor quotations",
                        "Purchase orders placed",
                    ]),
                StageTemplate::new("execution", "Execution", 4, 30)
                    .with_role(ProjectRole::Manager)
                    .after("procurement")
                    .with_checklist(&[
                        "Site preparation",
                        "Civil and electrical work",
                        "Installation and finishing",
                        "Quality inspection",
                    ]),
                StageTemplate::new("handover", "Handover", 5, 2)
                    .with_role(ProjectRole::Manager)
                    .after("execution")
                    .with_checklist(&[
                        "Snag list closed",
                        "Client walkthrough",
                        "Warranty documents delivered",
                    ]),
            ],
        }
    }

    /// Check ordering, uniqueness and dependency references
    pub fn validate(&self) -> ConfigResult<()> {
        if self.version.trim().is_empty() {
            return Err(ConfigError::Invalid("template version must not be empty".into()));
        }
        if self.stages.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "template set {} has no stages",
                self.version
            )));
        }

        for (index, stage) in self.stages.iter().enumerate() {
            let expected = index as u32 + 1;
            if stage.sort_order != expected {
                return Err(ConfigError::Invalid(format!(
                    "template set {}: sort_order must be contiguous from 1, found {} at position {}",
                    self.version, stage.sort_order, expected
                )));
            }
        }

        let mut keys = HashSet::new();
        let mut names = HashSet::new();
        for stage in &self.stages {
            if !keys.insert(stage.key.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate stage key {}", stage.key)));
            }
            if !names.insert(stage.stage_name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate stage name {}",
                    stage.stage_name
                )));
            }
        }

        let mut graph = DependencyGraph::new();
        for stage in &self.stages {
            graph
                .add_node(&stage.key)
                .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        }
        for stage in &self.stages {
            if let Some(dep) = &stage.depends_on {
                graph.add_dependency(&stage.key, dep).map_err(|e| {
                    ConfigError::Invalid(format!("stage {}: {}", stage.key, e))
                })?;
            }
        }
        graph
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("template set {}: {}", self.version, e)))
    }

    pub fn get(&self, key: &str) -> Option<&StageTemplate> {
        self.stages.iter().find(|s| s.key == key)
    }

    /// Sum of typical durations, in days
    pub fn total_duration_days(&self) -> u32 {
        self.stages.iter().map(|s| s.typical_duration_days).sum()
    }
}

/// On-disk layout of a catalog file
#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    active_version: Option<String>,
    sets: Vec<TemplateSet>,
}

/// Collection of template sets with one active version.
#[derive(Debug, Clone)]
pub struct TemplateCatalog {
    sets: Vec<TemplateSet>,
    active: String,
}

impl Default for TemplateCatalog {
    fn default() -> Self {
        TemplateCatalog {
            sets: vec![TemplateSet::standard()],
            active: DEFAULT_TEMPLATE_VERSION.to_string(),
        }
    }
}

impl TemplateCatalog {
    /// Build a catalog from validated sets; `active` defaults to the last set.
    pub fn new(sets: Vec<TemplateSet>, active: Option<&str>) -> ConfigResult<Self> {
        let mut seen = HashSet::new();
        for set in &sets {
            set.validate()?;
            if !seen.insert(set.version.clone()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate template version {}",
                    set.version
                )));
            }
        }

        let active = match active {
            Some(version) => version.to_string(),
            None => sets
                .last()
                .map(|s| s.version.clone())
                .ok_or_else(|| ConfigError::Invalid("catalog has no template sets".into()))?,
        };

        let catalog = TemplateCatalog { sets, active };
        if catalog.version(&catalog.active).is_none() {
            return Err(ConfigError::Invalid(format!(
                "active template version {} is not defined",
                catalog.active
            )));
        }
        Ok(catalog)
    }

    /// Parse a catalog from TOML text
    pub fn from_toml(content: &str) -> ConfigResult<Self> {
        let file: CatalogFile =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        let sets = file
            .sets
            .into_iter()
            .map(|set| TemplateSet::new(set.version, set.stages))
            .collect::<ConfigResult<Vec<_>>>()?;
        Self::new(sets, file.active_version.as_deref())
    }

    /// Load a catalog file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let catalog = Self::from_toml(&content)?;
        info!(
            path = %path.display(),
            versions = catalog.sets.len(),
            active = %catalog.active,
            "loaded stage template catalog"
        );
        Ok(catalog)
    }

    /// Switch the active version
    pub fn activate(&mut self, version: &str) -> ConfigResult<()> {
        if self.version(version).is_none() {
            return Err(ConfigError::Invalid(format!(
                "unknown template version {}",
                version
            )));
        }
        self.active = version.to_string();
        Ok(())
    }

    pub fn version(&self, version: &str) -> Option<&TemplateSet> {
        self.sets.iter().find(|s| s.version == version)
    }

    pub fn versions(&self) -> Vec<&str> {
        self.sets.iter().map(|s| s.version.as_str()).collect()
    }

    pub fn active(&self) -> &TemplateSet {
        // `new`, `default` and `activate` keep `active` pointing at a known set
        self.version(&self.active).unwrap_or(&self.sets[0])
    }

    /// Stages of the active set in `sort_order`
    pub fn list_templates(&self) -> &[StageTemplate] {
        &self.active().stages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_catalog() {
        let catalog = TemplateCatalog::default();
        let stages = catalog.list_templates();

        let names: Vec<&str> = stages.iter().map(|s| s.stage_name.as_str()).collect();
        assert_eq!(
            names,
            vec!["Consultation", "Design", "Procurement", "Execution", "Handover"]
        );
        for (i, stage) in stages.iter().enumerate() {
            assert_eq!(stage.sort_order, i as u32 + 1);
            assert!(!stage.checklist.is_empty());
        }
        assert!(TemplateSet::standard().validate().is_ok());
        assert_eq!(TemplateSet::standard().total_duration_days(), 59);
    }

    #[test]
    fn test_non_contiguous_sort_order_rejected() {
        let result = TemplateSet::new(
            "gap",
            vec![
                StageTemplate::new("a", "A", 1, 1),
                StageTemplate::new("c", "C", 3, 1),
            ],
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let result = TemplateSet::new(
            "dangling",
            vec![StageTemplate::new("a", "A", 1, 1).after("missing")],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_cyclic_dependencies_rejected() {
        let result = TemplateSet::new(
            "cyclic",
            vec![
                StageTemplate::new("a", "A", 1, 1).after("b"),
                StageTemplate::new("b", "B", 2, 1).after("a"),
            ],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_sets_are_sorted() {
        let set = TemplateSet::new(
            "unsorted",
            vec![
                StageTemplate::new("b", "B", 2, 1),
                StageTemplate::new("a", "A", 1, 1),
            ],
        )
        .unwrap();
        assert_eq!(set.stages[0].key, "a");
    }

    #[test]
    fn test_load_from_toml() {
        let content = r#"
            active_version = "compact-2025"

            [[sets]]
            version = "compact-2025"

            [[sets.stages]]
            key = "consultation"
            stage_name = "Consultation"
            sort_order = 1
            typical_duration_days = 2
            required_role = "designer"
            checklist = ["Site visit"]

            [[sets.stages]]
            key = "execution"
            stage_name = "Execution"
            sort_order = 2
            typical_duration_days = 20
            required_role = "manager"
            depends_on = "consultation"
        "#;

        let catalog = TemplateCatalog::from_toml(content).unwrap();
        assert_eq!(catalog.active().version, "compact-2025");
        assert_eq!(catalog.list_templates().len(), 2);
        assert_eq!(
            catalog.list_templates()[1].required_role,
            Some(ProjectRole::Manager)
        );
    }

    #[test]
    fn test_activate_unknown_version() {
        let mut catalog = TemplateCatalog::default();
        assert!(catalog.activate("nope").is_err());
        assert!(catalog.activate(DEFAULT_TEMPLATE_VERSION).is_ok());
        assert_eq!(catalog.versions(), vec![DEFAULT_TEMPLATE_VERSION]);
    }
}
