//
// Copyright 2025-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

use clap::Parser;
use serde::{Deserialize, Serialize};
use serde_env_field::EnvField;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Arguments {
    #[arg(
        short = 'c',
        long = "config",
        help = "Path to configuration file",
        default_value = "server/config.yaml"
    )]
    pub config_file: String,

    #[arg(
        short = 'e',
        long = "env",
        help = "Path to environment file",
        default_value = "server/.env"
    )]
    pub env_file: Option<String>,
}

impl Default for Arguments {
    fn default() -> Self {
        Self {
            config_file: "config.yaml".to_string(),
            env_file: Some(".env".to_string()),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Configuration {
    pub character_database: DatabaseConfig,
    pub account_database: DatabaseConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    /// Path of the reference data YAML file
    pub reference_data: EnvField<String>,
}

impl Configuration {
    pub fn load(path: &str) -> Result<Configuration, String> {
        let conf = serde_yaml::from_reader(
            std::fs::File::open(path).map_err(|e| format!("Failed to open config file: {}", e))?,
        )
        .map_err(|e| format!("Failed to parse config file: {}", e))?;

        Ok(conf)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: EnvField<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: Default::default(),
            max_connections: default_max_connections(),
        }
    }
}

/// When the derived stat snapshot is written
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatsPolicy {
    EveryCycle,
    /// Only on the logout save
    #[default]
    FinalOnly,
    Never,
}

impl StatsPolicy {
    pub fn should_save(&self, final_save: bool) -> bool {
        match self {
            StatsPolicy::EveryCycle => true,
            StatsPolicy::FinalOnly => final_save,
            StatsPolicy::Never => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub realm_id: u32,
    /// Seconds between auto-save passes
    pub auto_save_interval: u64,
    pub stats_policy: StatsPolicy,
    /// Most items per compensation mail
    pub compensation_batch_size: usize,
    /// Seconds after logout before conjured items vanish
    pub conjured_expiry: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            realm_id: 1,
            auto_save_interval: 60,
            stats_policy: StatsPolicy::default(),
            compensation_batch_size: 12,
            conjured_expiry: 900,
        }
    }
}

impl PersistenceConfig {
    pub fn auto_save_interval(&self) -> Duration {
        Duration::from_secs(self.auto_save_interval.max(1))
    }

    pub fn conjured_expiry(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.conjured_expiry).unwrap_or(i64::MAX))
    }
}
