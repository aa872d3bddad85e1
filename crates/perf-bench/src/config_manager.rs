use crate::bench_config::{BenchRunConfig, BenchmarkRequest};
use crate::errors::{BenchError, BenchResult};
use std::collections::HashMap;
use std::path::Path;

/// Manages configuration and the environment handed to pipeline commands
pub struct ConfigManager {
    config: BenchRunConfig,
    env_vars: HashMap<String, String>,
}

impl ConfigManager {
    /// Wrap an in-memory config; loads its env file, if any
    pub fn new(config: BenchRunConfig) -> BenchResult<Self> {
        let mut manager = Self {
            config,
            env_vars: HashMap::new(),
        };
        manager.load_environment_variables()?;
        Ok(manager)
    }

    /// Create a new ConfigManager from a YAML or JSON config string
    pub fn from_string(config_str: String) -> BenchResult<Self> {
        Self::new(BenchRunConfig::from_string(config_str)?)
    }

    pub fn from_path(path: &Path) -> BenchResult<Self> {
        Self::new(BenchRunConfig::from_path(path)?)
    }

    /// Get a reference to the underlying configuration
    pub fn config(&self) -> &BenchRunConfig {
        &self.config
    }

    /// Apply changes (typically command-line overrides) and reload the env file
    pub fn update<F: FnOnce(&mut BenchRunConfig)>(&mut self, f: F) -> BenchResult<()> {
        f(&mut self.config);
        self.env_vars.clear();
        self.load_environment_variables()
    }

    /// Validate the request part of the config
    pub fn request(&self) -> BenchResult<BenchmarkRequest> {
        self.config.request.validate()
    }

    fn load_environment_variables(&mut self) -> BenchResult<()> {
        if let Some(env_file) = &self.config.env_file {
            let iter = dotenvy::from_path_iter(env_file).map_err(|e| {
                BenchError::ConfigError(format!(
                    "Failed to open env file at {}: {}",
                    env_file.display(),
                    e
                ))
            })?;
            for item in iter {
                let (key, value) = item.map_err(|e| {
                    BenchError::ConfigError(format!(
                        "Failed to parse env file at {}: {}",
                        env_file.display(),
                        e
                    ))
                })?;
                self.env_vars.insert(key, value);
            }
            tracing::debug!(
                env_file = %env_file.display(),
                vars = self.env_vars.len(),
                "loaded env file"
            );
        }
        Ok(())
    }

    /// Variables passed to every pipeline command, sorted by name
    pub fn get_environment_variables(&self) -> Vec<(String, String)> {
        let mut vars: Vec<_> = self
            .env_vars
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        vars.sort();
        vars
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_env_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let env_file = dir.path().join("bench.env");
        fs::write(
            &env_file,
            "# accelerator settings\nCUDA_VISIBLE_DEVICES=0\nOTX_CACHE='/tmp/cache'\n",
        )
        .unwrap();

        let config = format!("env-file: {}\n", env_file.display());
        let manager = ConfigManager::from_string(config).unwrap();
        assert_eq!(
            manager.get_environment_variables(),
            vec![
                ("CUDA_VISIBLE_DEVICES".to_string(), "0".to_string()),
                ("OTX_CACHE".to_string(), "/tmp/cache".to_string()),
            ]
        );
    }

    #[test]
    fn test_missing_env_file() {
        let result = ConfigManager::from_string("env-file: /nonexistent/bench.env".to_string());
        assert!(matches!(result, Err(BenchError::ConfigError(_))));
    }

    #[test]
    fn test_update_applies_overrides() {
        let mut manager = ConfigManager::new(BenchRunConfig::default()).unwrap();
        manager
            .update(|cfg| {
                cfg.request.num_repeat = -2;
                cfg.max_parallel = 4;
            })
            .unwrap();
        assert_eq!(manager.config().max_parallel, 4);
        assert!(matches!(
            manager.request(),
            Err(BenchError::InvalidRequest(_))
        ));
    }
}
