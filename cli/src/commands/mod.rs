// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the bastion CLI

pub mod config;
pub mod db;
pub mod serve;
pub mod vault;

pub use self::config::ConfigCommand;
pub use self::db::DbCommand;
pub use self::serve::ServeCommand;
pub use self::vault::VaultCommand;

use std::path::PathBuf;

use anyhow::{Context, Result};
use bastion_core::domain::config::{resolve_secret, BastionConfigManifest};
use bastion_core::infrastructure::MasterKey;

/// Load and validate the manifest every command starts from.
pub(crate) fn load_config(config_path: Option<PathBuf>) -> Result<BastionConfigManifest> {
    let config = BastionConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;
    config
        .validate()
        .context("Configuration validation failed")?;
    Ok(config)
}

pub(crate) fn master_key(config: &BastionConfigManifest) -> Result<MasterKey> {
    let encoded = resolve_secret(&config.spec.vault.master_key)
        .context("Failed to resolve spec.vault.master_key")?;
    MasterKey::from_base64(&encoded).context("Invalid vault master key")
}
