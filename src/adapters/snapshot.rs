use crate::config::EngineConfig;
use crate::domain::model::{CurriculumTier, ExamDefinition, PlacementRule};
use crate::domain::ports::CatalogSource;
use crate::utils::error::{EngineError, Result};
use crate::utils::validation::{validate_non_empty_string, validate_required_field, Validate};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 從 JSON 快照讀取的課程、考卷與分級規則
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StaticCatalog {
    #[serde(default)]
    pub tiers: Vec<CurriculumTier>,
    #[serde(default)]
    pub exams: Vec<ExamDefinition>,
    #[serde(default)]
    pub placement_rules: Vec<PlacementRule>,
}

impl StaticCatalog {
    pub fn new(
        tiers: Vec<CurriculumTier>,
        exams: Vec<ExamDefinition>,
        placement_rules: Vec<PlacementRule>,
    ) -> Self {
        Self {
            tiers,
            exams,
            placement_rules,
        }
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let catalog: Self = serde_json::from_str(content)?;
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(EngineError::IoError)?;
        let catalog = Self::from_json_str(&content)?;

        tracing::info!(
            "📂 Read catalog snapshot {} ({} tiers, {} exams)",
            path.as_ref().display(),
            catalog.tiers.len(),
            catalog.exams.len()
        );
        Ok(catalog)
    }

    /// 使用設定中的 `catalog.snapshot_path`
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        let path = validate_required_field("catalog.snapshot_path", &config.catalog.snapshot_path)?;
        Self::from_json_file(path)
    }
}

impl Validate for StaticCatalog {
    fn validate(&self) -> Result<()> {
        for tier in &self.tiers {
            validate_non_empty_string(&format!("tiers[{}].name", tier.id), &tier.name)?;
        }
        for exam in &self.exams {
            validate_non_empty_string(&format!("exams[{}].title", exam.id), &exam.title)?;
        }
        Ok(())
    }
}

#[async_trait]
impl CatalogSource for StaticCatalog {
    async fn tiers(&self) -> Result<Vec<CurriculumTier>> {
        Ok(self.tiers.clone())
    }

    async fn exams(&self) -> Result<Vec<ExamDefinition>> {
        Ok(self.exams.clone())
    }

    async fn placement_rules(&self) -> Result<Vec<PlacementRule>> {
        Ok(self.placement_rules.clone())
    }
}
