use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const CONFIG_VERSION: &str = "1.0";
pub const DEFAULT_BASKET_NAME: &str = "default";
/// Total supply in satoshis, no single amount can exceed it
pub const MAX_SATOSHIS: u64 = 2_100_000_000_000_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    pub version: String,
    #[serde(default)]
    pub fee_model: FeeModelConfig,
    #[serde(default)]
    pub commission: Commission,
    #[serde(default)]
    pub default_basket: BasketPolicy,
    /// Rows fetched per candidate query while funding
    #[serde(default = "default_candidate_batch_size")]
    pub candidate_batch_size: u32,
    /// Shuffle outputs so change and commission are not positionally distinguishable
    #[serde(default = "default_randomize_outputs")]
    pub randomize_outputs: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeModelConfig {
    pub model: String,
    pub value: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Commission {
    #[default]
    Disabled,
    Enabled {
        public_key: String,
        satoshis: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasketPolicy {
    pub desired_utxo_count: u32,
    pub min_utxo_value: u64,
}

fn default_candidate_batch_size() -> u32 {
    1000
}

fn default_randomize_outputs() -> bool {
    true
}

impl Default for FeeModelConfig {
    fn default() -> Self {
        FeeModelConfig { model: "sat/kb".to_string(), value: 1 }
    }
}

impl Default for BasketPolicy {
    fn default() -> Self {
        BasketPolicy { desired_utxo_count: 32, min_utxo_value: 1000 }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            version: CONFIG_VERSION.to_string(),
            fee_model: FeeModelConfig::default(),
            commission: Commission::Disabled,
            default_basket: BasketPolicy::default(),
            candidate_batch_size: default_candidate_batch_size(),
            randomize_outputs: default_randomize_outputs(),
        }
    }
}

impl StorageConfig {
    /// Load and validate storage configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, String> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref)
            .map_err(|e| format!("Failed to read config file '{}': {}", path_ref.display(), e))?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, String> {
        let config: StorageConfig = serde_yaml::from_str(contents).map_err(|e| format!("Failed to parse YAML: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), String> {
        if self.version != CONFIG_VERSION {
            return Err(format!("Unsupported config version: '{}'. Expected '{}'", self.version, CONFIG_VERSION));
        }
        if self.candidate_batch_size == 0 {
            return Err("candidate_batch_size must be > 0".to_string());
        }
        if self.default_basket.desired_utxo_count == 0 {
            return Err("default_basket.desired_utxo_count must be > 0".to_string());
        }
        if let Commission::Enabled { public_key, satoshis } = &self.commission {
            if public_key.is_empty() {
                return Err("commission public_key cannot be empty".to_string());
            }
            if !public_key.chars().all(|c| c.is_ascii_hexdigit()) || public_key.len() != 66 {
                return Err(format!("commission public_key must be a 33 byte compressed key in hex: '{}'", public_key));
            }
            if *satoshis == 0 || *satoshis > MAX_SATOSHIS {
                return Err(format!("commission satoshis must be between 1 and {}", MAX_SATOSHIS));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PUB_KEY: &str = "02a1633cafcc01ebfb6d78e39f687a1f0995c62fc95f51ead10a02ee0be551b5dc";

    #[test]
    fn test_parse_minimal() {
        let config = StorageConfig::parse("version: \"1.0\"\n").unwrap();
        assert_eq!(config, StorageConfig::default());
    }

    #[test]
    fn test_parse_full() {
        let yaml = format!(
            "version: \"1.0\"
fee_model:
  model: sat/kb
  value: 50
commission:
  mode: enabled
  public_key: {PUB_KEY}
  satoshis: 10
default_basket:
  desired_utxo_count: 6
  min_utxo_value: 1000
candidate_batch_size: 250
randomize_outputs: false
"
        );
        let config = StorageConfig::parse(&yaml).unwrap();
        assert_eq!(config.fee_model.value, 50);
        assert_eq!(config.commission, Commission::Enabled { public_key: PUB_KEY.to_string(), satoshis: 10 });
        assert_eq!(config.default_basket.desired_utxo_count, 6);
        assert_eq!(config.candidate_batch_size, 250);
        assert!(!config.randomize_outputs);
    }

    #[test]
    fn test_validation_version() {
        assert!(StorageConfig::parse("version: \"2.0\"\n").is_err());
    }

    #[test]
    fn test_validation_batch_size() {
        let config = StorageConfig { candidate_batch_size: 0, ..Default::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_commission() {
        let config = StorageConfig {
            commission: Commission::Enabled { public_key: PUB_KEY.to_string(), satoshis: 0 },
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config =
            StorageConfig { commission: Commission::Enabled { public_key: "02ab".to_string(), satoshis: 5 }, ..Default::default() };
        assert!(config.validate().is_err());

        let config = StorageConfig {
            commission: Commission::Enabled { public_key: PUB_KEY.to_string(), satoshis: MAX_SATOSHIS + 1 },
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config =
            StorageConfig { commission: Commission::Enabled { public_key: PUB_KEY.to_string(), satoshis: 5 }, ..Default::default() };
        assert!(config.validate().is_ok());
    }
}
