use anyhow::{Context, Result};
use rand::Rng;
use rift_flooding::FlooderConfig;
use rift_protocol::{FabricConfig, IpPrefix, SystemId};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub node: NodeConfig,
    #[serde(default)]
    pub fabric: FabricConfig,
    #[serde(default)]
    pub flooding: FloodingConfig,
    #[serde(default)]
    pub prefixes: Vec<PrefixConfig>,
    pub logging: LoggingConfig,

    #[serde(skip)]
    config_file_path: PathBuf,
    #[serde(skip)]
    pub data_directory: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(with = "hex_system_id")]
    pub system_id: SystemId,
    pub name: String,
    pub level: u8,
    /// Advertise the overload flag and stop originating default routes south
    #[serde(default)]
    pub overload: bool,
}

/// Flooding and aging timers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FloodingConfig {
    pub service_interval_ms: u64,
    pub tide_interval_ms: u64,
    pub inbound_capacity: usize,
    pub aging_interval_ms: u64,
    pub summary_log_interval_secs: u64,
}

impl Default for FloodingConfig {
    fn default() -> Self {
        let flooder = FlooderConfig::default();
        Self {
            service_interval_ms: flooder.service_interval.as_millis() as u64,
            tide_interval_ms: flooder.tide_interval.as_millis() as u64,
            inbound_capacity: flooder.inbound_capacity,
            aging_interval_ms: rift_tiedb::DEFAULT_AGING_INTERVAL.as_millis() as u64,
            summary_log_interval_secs: 60,
        }
    }
}

impl FloodingConfig {
    pub fn flooder_config(&self) -> FlooderConfig {
        FlooderConfig {
            service_interval: Duration::from_millis(self.service_interval_ms),
            tide_interval: Duration::from_millis(self.tide_interval_ms),
            inbound_capacity: self.inbound_capacity,
        }
    }

    pub fn aging_interval(&self) -> Duration {
        Duration::from_millis(self.aging_interval_ms)
    }

    pub fn summary_log_interval(&self) -> Duration {
        Duration::from_secs(self.summary_log_interval_secs)
    }
}

/// A prefix advertised north by this node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefixConfig {
    #[serde(with = "prefix_string")]
    pub prefix: IpPrefix,
    #[serde(default = "default_prefix_metric")]
    pub metric: u32,
}

fn default_prefix_metric() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    #[serde(default)]
    pub json: bool,
    pub file: Option<PathBuf>,
}

impl Config {
    /// Load configuration from file
    pub fn load(config_path: Option<PathBuf>, data_dir: Option<PathBuf>) -> Result<Self> {
        let config_path = config_path.unwrap_or_else(Self::default_config_path);
        let data_dir = data_dir.unwrap_or_else(Self::default_data_dir);

        if !config_path.exists() {
            anyhow::bail!(
                "Configuration file not found: {}\nRun with --init to create a new configuration",
                config_path.display()
            );
        }

        let contents =
            fs::read_to_string(&config_path).context("Failed to read configuration file")?;

        let mut config: Config =
            serde_yaml::from_str(&contents).context("Failed to parse configuration file")?;

        config.config_file_path = config_path;
        config.data_directory = data_dir;
        config.validate()?;

        Ok(config)
    }

    /// Create a new default configuration with a random system id
    pub fn create_default(config_path: Option<PathBuf>, data_dir: Option<PathBuf>) -> Result<Self> {
        let config_path = config_path.unwrap_or_else(Self::default_config_path);
        let data_dir = data_dir.unwrap_or_else(Self::default_data_dir);

        if config_path.exists() {
            anyhow::bail!(
                "Configuration file already exists: {}",
                config_path.display()
            );
        }

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::create_dir_all(&data_dir)?;

        let system_id = SystemId::new(rand::thread_rng().gen_range(1..=u64::MAX))?;

        let config = Config {
            node: NodeConfig {
                system_id,
                name: format!("rift-{}", system_id.to_hex()),
                level: 0,
                overload: false,
            },
            fabric: FabricConfig::default(),
            flooding: FloodingConfig::default(),
            prefixes: Vec::new(),
            logging: LoggingConfig {
                level: "info".to_string(),
                json: false,
                file: Some(data_dir.join("logs").join("riftnode.log")),
            },
            config_file_path: config_path.clone(),
            data_directory: data_dir,
        };

        let yaml = serde_yaml::to_string(&config)?;
        fs::write(&config_path, yaml)
            .with_context(|| format!("Failed to write {}", config_path.display()))?;

        Ok(config)
    }

    /// Reject values the node cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.node.level > self.fabric.top_of_fabric_level {
            anyhow::bail!(
                "Node level {} is above the top of fabric ({})",
                self.node.level,
                self.fabric.top_of_fabric_level
            );
        }
        if self.fabric.default_lifetime == 0 {
            anyhow::bail!("fabric.default_lifetime must be positive");
        }
        if self.fabric.flush_lifetime == 0 {
            anyhow::bail!("fabric.flush_lifetime must be positive");
        }

        let flooding = &self.flooding;
        for (name, value) in [
            ("service_interval_ms", flooding.service_interval_ms),
            ("tide_interval_ms", flooding.tide_interval_ms),
            ("aging_interval_ms", flooding.aging_interval_ms),
            ("summary_log_interval_secs", flooding.summary_log_interval_secs),
        ] {
            if value == 0 {
                anyhow::bail!("flooding.{} must be positive", name);
            }
        }
        if flooding.inbound_capacity == 0 {
            anyhow::bail!("flooding.inbound_capacity must be positive");
        }

        for entry in &self.prefixes {
            if entry.metric == self.fabric.invalid_distance {
                anyhow::bail!("Prefix {} has an invalid metric", entry.prefix);
            }
        }

        Ok(())
    }

    pub fn config_path(&self) -> &Path {
        &self.config_file_path
    }

    fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("riftnode")
            .join("config.yaml")
    }

    fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("riftnode")
    }
}

mod hex_system_id {
    use rift_protocol::SystemId;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(system_id: &SystemId, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&system_id.to_hex())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SystemId, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes: [u8; 8] = hex::decode(&s)
            .map_err(serde::de::Error::custom)?
            .try_into()
            .map_err(|_| serde::de::Error::custom("system id must be 8 bytes"))?;
        SystemId::new(u64::from_be_bytes(bytes)).map_err(serde::de::Error::custom)
    }
}

mod prefix_string {
    use rift_protocol::IpPrefix;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(prefix: &IpPrefix, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&prefix.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<IpPrefix, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_config(dir: &TempDir) -> Config {
        Config::create_default(
            Some(dir.path().join("config.yaml")),
            Some(dir.path().join("data")),
        )
        .unwrap()
    }

    #[test]
    fn test_create_default_and_load() {
        let dir = TempDir::new().unwrap();
        let created = create_config(&dir);
        assert!(!created.node.system_id.is_illegal());
        assert_eq!(created.node.level, 0);
        assert!(dir.path().join("data").is_dir());

        let loaded = Config::load(
            Some(dir.path().join("config.yaml")),
            Some(dir.path().join("data")),
        )
        .unwrap();
        assert_eq!(loaded.node.system_id, created.node.system_id);
        assert_eq!(loaded.node.name, created.node.name);
        assert_eq!(loaded.fabric, FabricConfig::default());
        assert_eq!(loaded.config_path(), dir.path().join("config.yaml"));
    }

    #[test]
    fn test_init_refuses_to_overwrite() {
        let dir = TempDir::new().unwrap();
        create_config(&dir);
        assert!(Config::create_default(Some(dir.path().join("config.yaml")), None).is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = Config::load(Some(dir.path().join("missing.yaml")), None).unwrap_err();
        assert!(err.to_string().contains("--init"));
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            r#"
node:
  system_id: "00000000000000a1"
  name: leaf-1
  level: 0
fabric:
  default_lifetime: 3600
prefixes:
  - prefix: 10.1.0.0/16
  - prefix: 2001:db8::/32
    metric: 5
logging:
  level: debug
  file: null
"#,
        )
        .unwrap();

        let config = Config::load(Some(path), Some(dir.path().to_path_buf())).unwrap();
        assert_eq!(config.node.system_id.as_u64(), 0xa1);
        assert_eq!(config.fabric.default_lifetime, 3600);
        assert_eq!(config.fabric.lifetime_diff2ignore, 300);
        assert_eq!(config.fabric.flush_lifetime, 60);
        assert!(!config.node.overload);
        assert_eq!(config.flooding.service_interval_ms, 1000);
        assert_eq!(config.prefixes.len(), 2);
        assert_eq!(config.prefixes[0].metric, 1);
        assert_eq!(config.prefixes[1].prefix, "2001:db8::/32".parse::<IpPrefix>().unwrap());
        assert!(!config.logging.json);
    }

    #[test]
    fn test_zero_system_id_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "node:\n  system_id: \"0000000000000000\"\n  name: bad\n  level: 0\nlogging:\n  level: info\n  file: null\n",
        )
        .unwrap();
        assert!(Config::load(Some(path), None).is_err());
    }

    #[test]
    fn test_level_above_top_of_fabric_rejected() {
        let dir = TempDir::new().unwrap();
        let mut config = create_config(&dir);
        config.node.level = 25;
        assert!(config.validate().is_err());
        config.node.level = 24;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let dir = TempDir::new().unwrap();
        let mut config = create_config(&dir);
        config.flooding.tide_interval_ms = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("tide_interval_ms"));
    }

    #[test]
    fn test_zero_flush_lifetime_rejected() {
        let dir = TempDir::new().unwrap();
        let mut config = create_config(&dir);
        config.fabric.flush_lifetime = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("flush_lifetime"));
    }

    #[test]
    fn test_flooder_config_conversion() {
        let flooding = FloodingConfig {
            service_interval_ms: 250,
            tide_interval_ms: 500,
            inbound_capacity: 32,
            aging_interval_ms: 1000,
            summary_log_interval_secs: 10,
        };
        let flooder = flooding.flooder_config();
        assert_eq!(flooder.service_interval, Duration::from_millis(250));
        assert_eq!(flooder.tide_interval, Duration::from_millis(500));
        assert_eq!(flooder.inbound_capacity, 32);
        assert_eq!(flooding.aging_interval(), Duration::from_secs(1));
    }
}
