//! # Config Loader
//!
//! 工作站配置加载：TOML/JSON 解析 + 语义校验，输出 `StationBlueprint`。
//!
//! ```no_run
//! use config_loader::ConfigLoader;
//! use std::path::Path;
//!
//! let blueprint = ConfigLoader::load_from_path(Path::new("config/station.toml")).unwrap();
//! println!("experiments: {}", blueprint.experiments.len());
//! ```

mod parser;
mod validator;

pub use contracts::StationBlueprint;
pub use parser::ConfigFormat;
pub use validator::collect_warnings;

use contracts::ContractError;
use std::path::Path;
use tracing::debug;

/// Bundled two-experiment station: angular momentum rig + pendulum
const BUILTIN_STATION: &str = include_str!("../../../config/station.toml");

pub struct ConfigLoader;

impl ConfigLoader {
    /// Format follows the file extension (`.toml` / `.json`)
    pub fn load_from_path(path: &Path) -> Result<StationBlueprint, ContractError> {
        let format = ConfigFormat::from_path(path)?;
        let content = std::fs::read_to_string(path)?;
        debug!(path = %path.display(), format = format.label(), bytes = content.len(), "Loading station config");
        Self::load_from_str(&content, format)
    }

    /// Decode then validate
    pub fn load_from_str(
        content: &str,
        format: ConfigFormat,
    ) -> Result<StationBlueprint, ContractError> {
        let blueprint = format.decode(content)?;
        validator::validate(&blueprint)?;
        Ok(blueprint)
    }

    pub fn builtin() -> Result<StationBlueprint, ContractError> {
        Self::load_from_str(BUILTIN_STATION, ConfigFormat::Toml)
    }

    pub fn to_toml(blueprint: &StationBlueprint) -> Result<String, ContractError> {
        ConfigFormat::Toml.encode(blueprint)
    }

    pub fn to_json(blueprint: &StationBlueprint) -> Result<String, ContractError> {
        ConfigFormat::Json.encode(blueprint)
    }
}
