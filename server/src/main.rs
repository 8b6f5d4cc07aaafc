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
use realmkeep_server::config::{Arguments, Configuration, DatabaseConfig};
use realmkeep_server::persistence::PersistenceManager;
use realmkeep_server::persistence::postgres::PgRecordStore;
use realmkeep_server::persistence::table::StoreTarget;
use realmkeep_server::reference::ReferenceData;
use realmkeep_server::world::WorldState;
use sqlx::PgPool;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

async fn connect(name: &str, config: &DatabaseConfig) -> PgPool {
    tracing::info!("Connecting to {} database", name);
    sqlx::postgres::PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await
        .expect("Failed to connect to database")
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load arguments from the command line
    let arguments: Arguments = Parser::parse();

    // Initialize tracing/logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .with_ansi(true)
        .init();

    // Load environment variables from .env file if specified
    if let Some(ref env_file) = arguments.env_file {
        if std::path::Path::new(env_file).exists() {
            tracing::debug!("Loading environment variables from file: {}", env_file);
            dotenv::from_filename(env_file).ok();
        }
    } else {
        // Try default .env file
        tracing::debug!("Loading environment variables from default file");
        dotenv::dotenv().ok();
    }

    // Load configuration from a file with environment variable substitution
    let config: Configuration =
        Configuration::load(&arguments.config_file).expect("Unable to load configuration file");

    tracing::debug!("Configuration loaded: {:?}", config);
    tracing::info!("Starting Realmkeep persistence daemon...");

    let reference = ReferenceData::load(&config.reference_data).expect("Unable to load reference data");
    tracing::info!(
        "Reference data loaded: {} item templates, {} maps",
        reference.items.len(),
        reference.maps.len()
    );

    let character_store = PgRecordStore::new(
        connect("character", &config.character_database).await,
        StoreTarget::Character,
    );
    let account_store = PgRecordStore::new(
        connect("account", &config.account_database).await,
        StoreTarget::Account,
    );
    character_store.migrate().await?;
    account_store.migrate().await?;
    tracing::info!("Migrations applied");

    let manager = Arc::new(PersistenceManager::new(
        Arc::new(character_store),
        Arc::new(account_store),
        Arc::new(reference),
        Arc::new(WorldState::new()),
        config.persistence.clone(),
    ));
    let count = manager.initialize().await?;
    tracing::info!("Persistence manager initialized with {} stored characters", count);

    // Start an auto-save task
    let auto_save = manager.clone().start_auto_save_task();

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");
    auto_save.abort();
    let saved = manager.shutdown().await;
    tracing::info!("Shutdown complete: {} characters saved", saved);
    Ok(())
}
