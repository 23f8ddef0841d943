//! 配置格式编解码
//!
//! TOML 为主，JSON 作为机器生成配置的备选。

use std::path::Path;

use contracts::{ContractError, StationBlueprint};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    /// 扩展名匹配不区分大小写
    pub fn from_extension(ext: &str) -> Option<Self> {
        if ext.eq_ignore_ascii_case("toml") {
            Some(Self::Toml)
        } else if ext.eq_ignore_ascii_case("json") {
            Some(Self::Json)
        } else {
            None
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, ContractError> {
        let ext = path.extension().and_then(|e| e.to_str()).ok_or_else(|| {
            ContractError::config_parse(format!(
                "{} has no extension, expected .toml or .json",
                path.display()
            ))
        })?;
        Self::from_extension(ext)
            .ok_or_else(|| ContractError::config_parse(format!("unsupported config format: .{ext}")))
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Toml => "TOML",
            Self::Json => "JSON",
        }
    }

    /// Text to blueprint, without semantic checks
    pub fn decode(self, content: &str) -> Result<StationBlueprint, ContractError> {
        let parsed = match self {
            Self::Toml => toml::from_str(content).map_err(|e| Box::new(e) as BoxedError),
            Self::Json => serde_json::from_str(content).map_err(|e| Box::new(e) as BoxedError),
        };
        parsed.map_err(|e| ContractError::ConfigParse {
            message: format!("{} parse error: {e}", self.label()),
            source: Some(e),
        })
    }

    pub fn encode(self, blueprint: &StationBlueprint) -> Result<String, ContractError> {
        let text = match self {
            Self::Toml => toml::to_string_pretty(blueprint).map_err(|e| e.to_string()),
            Self::Json => serde_json::to_string_pretty(blueprint).map_err(|e| e.to_string()),
        };
        text.map_err(|e| ContractError::config_parse(format!("{} serialize error: {e}", self.label())))
    }
}

type BoxedError = Box<dyn std::error::Error + Send + Sync>;
