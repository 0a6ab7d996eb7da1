use crate::core::clock::DEFAULT_GRACE_PERIOD_SECONDS;
use crate::core::coordinator::SessionSettings;
use crate::core::grader::GradingPolicy;
use crate::utils::error::{EngineError, Result};
use crate::utils::validation::{
    validate_one_of, validate_path, validate_positive_number, validate_range, Validate,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::OnceLock;

pub const LOG_FORMATS: [&str; 2] = ["compact", "json"];
pub const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// 引擎設定，所有區段皆可省略
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub session: SessionConfig,
    pub grading: GradingConfig,
    pub placement: PlacementConfig,
    pub catalog: CatalogConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub grace_period_seconds: i64,
    pub lock_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            grace_period_seconds: DEFAULT_GRACE_PERIOD_SECONDS,
            lock_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GradingConfig {
    pub short_answer_case_sensitive: bool,
    pub trim_whitespace: bool,
}

impl Default for GradingConfig {
    fn default() -> Self {
        Self {
            short_answer_case_sensitive: false,
            trim_whitespace: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementConfig {
    pub allow_student_difficulty_change: bool,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            allow_student_difficulty_change: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// JSON 課程快照，給 `StaticCatalog::from_json_file` 使用
    pub snapshot_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

impl EngineConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(EngineError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置並驗證
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = substitute_env_vars(content)?;

        let config: Self =
            toml::from_str(&processed_content).map_err(|e| EngineError::ConfigValidationError {
                field: "toml_parsing".to_string(),
                message: format!("TOML parsing error: {}", e),
            })?;

        config.validate()?;
        Ok(config)
    }

    pub fn grace_period(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.session.grace_period_seconds)
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            grace_period: self.grace_period(),
            lock_timeout: std::time::Duration::from_millis(self.session.lock_timeout_ms),
            allow_student_difficulty_change: self.placement.allow_student_difficulty_change,
        }
    }

    pub fn grading_policy(&self) -> GradingPolicy {
        GradingPolicy {
            case_sensitive: self.grading.short_answer_case_sensitive,
            trim_whitespace: self.grading.trim_whitespace,
        }
    }
}

impl Validate for EngineConfig {
    fn validate(&self) -> Result<()> {
        validate_range(
            "session.grace_period_seconds",
            self.session.grace_period_seconds,
            0,
            600,
        )?;
        validate_positive_number("session.lock_timeout_ms", self.session.lock_timeout_ms, 1)?;

        if let Some(path) = &self.catalog.snapshot_path {
            validate_path("catalog.snapshot_path", path)?;
        }

        validate_one_of("logging.level", &self.logging.level, &LOG_LEVELS)?;
        validate_one_of("logging.format", &self.logging.format, &LOG_FORMATS)?;
        Ok(())
    }
}

/// 替換環境變數 (例如 ${GRACE_SECONDS})，未設定的變數保持原樣
fn substitute_env_vars(content: &str) -> Result<String> {
    static PATTERN: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();

    let re = PATTERN
        .get_or_init(|| Regex::new(r"\$\{([^}]+)\}"))
        .as_ref()
        .map_err(|e| EngineError::ConfigValidationError {
            field: "env_substitution".to_string(),
            message: e.to_string(),
        })?;

    let result = re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
    });

    Ok(result.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();

        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.grace_period(), chrono::Duration::seconds(60));
        assert!(config.placement.allow_student_difficulty_change);
        assert_eq!(config.grading_policy(), GradingPolicy::default());
    }

    #[test]
    fn test_partial_sections() {
        let config = EngineConfig::from_toml_str(
            r#"
[session]
grace_period_seconds = 300

[grading]
short_answer_case_sensitive = true
"#,
        )
        .unwrap();

        assert_eq!(config.session.grace_period_seconds, 300);
        assert_eq!(config.session.lock_timeout_ms, 5000);
        assert!(config.grading_policy().case_sensitive);
        assert!(config.grading_policy().trim_whitespace);
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("PLACEMENT_ENGINE_TEST_LEVEL", "debug");
        let config = EngineConfig::from_toml_str(
            r#"
[logging]
level = "${PLACEMENT_ENGINE_TEST_LEVEL}"
"#,
        )
        .unwrap();
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let too_long = EngineConfig::from_toml_str("[session]\ngrace_period_seconds = 3600\n");
        assert!(matches!(
            too_long,
            Err(EngineError::InvalidConfigValueError { .. })
        ));

        let bad_format = EngineConfig::from_toml_str("[logging]\nformat = \"xml\"\n");
        assert!(matches!(
            bad_format,
            Err(EngineError::InvalidConfigValueError { .. })
        ));

        let not_toml = EngineConfig::from_toml_str("[session");
        assert!(matches!(
            not_toml,
            Err(EngineError::ConfigValidationError { .. })
        ));
    }
}
