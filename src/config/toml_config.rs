use crate::config::validate_provider;
use crate::core::catalog::RuleCatalog;
use crate::core::ConfigProvider;
use crate::utils::error::{EtlError, Result};
use crate::utils::validation::{validate_non_empty_string, Validate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::OnceLock;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TomlConfig {
    pub pipeline: PipelineConfig,
    pub source: SourceConfig,
    #[serde(default)]
    pub catalog: RuleCatalog,
    #[serde(default)]
    pub load: LoadConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub input_path: String,
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadConfig {
    #[serde(default = "default_table_name")]
    pub table_name: String,
    #[serde(default)]
    pub overwrite: bool,
    #[serde(default)]
    pub verify_columns: Vec<String>,
    pub export_csv: Option<String>,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            table_name: default_table_name(),
            overwrite: false,
            verify_columns: Vec::new(),
            export_csv: None,
        }
    }
}

fn default_sample_size() -> usize {
    1
}

fn default_table_name() -> String {
    "fact_orders".to_string()
}

impl TomlConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(EtlError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        // 處理環境變數替換
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| EtlError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${INPUT_PATH})，未設定的變數保持原樣
    fn substitute_env_vars(content: &str) -> Result<String> {
        static ENV_VAR: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();
        let re = ENV_VAR
            .get_or_init(|| Regex::new(r"\$\{([^}]+)\}"))
            .as_ref()
            .map_err(|e| EtlError::ConfigError {
                message: format!("Invalid substitution pattern: {}", e),
            })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    /// 驗證配置的合理性
    pub fn validate_config(&self) -> Result<()> {
        validate_non_empty_string("pipeline.name", &self.pipeline.name)?;
        validate_provider(self)
    }
}

impl ConfigProvider for TomlConfig {
    fn input_path(&self) -> &str {
        &self.source.input_path
    }

    fn sample_size(&self) -> usize {
        self.source.sample_size
    }

    fn table_name(&self) -> &str {
        &self.load.table_name
    }

    fn overwrite(&self) -> bool {
        self.load.overwrite
    }

    fn verify_columns(&self) -> &[String] {
        &self.load.verify_columns
    }

    fn export_path(&self) -> Option<&str> {
        self.load.export_csv.as_deref()
    }

    fn catalog(&self) -> &RuleCatalog {
        &self.catalog
    }
}

impl Validate for TomlConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}
