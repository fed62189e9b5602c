//! Configuration resolution for carvet-vv
//!
//! Vision endpoint settings resolve through three tiers with
//! Database → ENV → TOML priority; the database wins so the key can be
//! rotated at runtime without restarting the listing platform.

use sqlx::SqlitePool;

use carvet_common::config::TomlConfig;
use carvet_common::{Error, Result};

use crate::db::settings::get_setting;
use crate::services::vision::{VisionConfig, DEFAULT_BASE_URL, DEFAULT_MODEL};

/// Settings table keys
pub const VISION_API_KEY_SETTING: &str = "vision_api_key";
pub const VISION_MODEL_SETTING: &str = "vision_model";
pub const VISION_BASE_URL_SETTING: &str = "vision_base_url";

/// Environment variable names
pub const VISION_API_KEY_ENV: &str = "CARVET_VISION_API_KEY";
pub const VISION_MODEL_ENV: &str = "CARVET_VISION_MODEL";
pub const VISION_BASE_URL_ENV: &str = "CARVET_VISION_BASE_URL";

/// Validate an API key (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

/// Resolve the vision API key from 3-tier configuration
///
/// Priority: Database → ENV → TOML. Warns when more than one source is
/// populated, since that usually means a stale leftover key.
pub async fn resolve_vision_api_key(
    db: &SqlitePool,
    toml_config: &TomlConfig,
) -> Result<String> {
    let db_key = get_setting(db, VISION_API_KEY_SETTING).await?;
    let env_key = std::env::var(VISION_API_KEY_ENV).ok();
    let toml_key = toml_config.vision_api_key.clone();

    let mut sources = Vec::new();
    if db_key.as_deref().is_some_and(is_valid_key) {
        sources.push("database");
    }
    if env_key.as_deref().is_some_and(is_valid_key) {
        sources.push("environment");
    }
    if toml_key.as_deref().is_some_and(is_valid_key) {
        sources.push("TOML");
    }

    if sources.len() > 1 {
        tracing::warn!(
            "Vision API key found in multiple sources: {}. Using {} (highest priority).",
            sources.join(", "),
            sources[0]
        );
    }

    for (key, source) in [(db_key, "database"), (env_key, "environment"), (toml_key, "TOML")] {
        if let Some(key) = key {
            if is_valid_key(&key) {
                tracing::info!("Vision API key loaded from {}", source);
                return Ok(key);
            }
        }
    }

    Err(Error::Config(format!(
        "Vision API key not configured. Please configure using one of:\n\
         1. Database: INSERT INTO settings (key, value) VALUES ('{}', 'your-key')\n\
         2. Environment: {}=your-key-here\n\
         3. TOML config: ~/.config/carvet/config.toml (vision_api_key = \"your-key\")",
        VISION_API_KEY_SETTING, VISION_API_KEY_ENV
    )))
}

/// Resolve full vision endpoint configuration
///
/// Model and base URL fall back to compiled defaults; only the key is
/// mandatory.
pub async fn resolve_vision_config(
    db: &SqlitePool,
    toml_config: &TomlConfig,
) -> Result<VisionConfig> {
    let api_key = resolve_vision_api_key(db, toml_config).await?;

    let model = resolve_optional(
        db,
        VISION_MODEL_SETTING,
        VISION_MODEL_ENV,
        toml_config.vision_model.clone(),
    )
    .await?
    .unwrap_or_else(|| DEFAULT_MODEL.to_string());

    let base_url = resolve_optional(
        db,
        VISION_BASE_URL_SETTING,
        VISION_BASE_URL_ENV,
        toml_config.vision_base_url.clone(),
    )
    .await?
    .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

    Ok(VisionConfig {
        api_key,
        model,
        base_url,
    })
}

async fn resolve_optional(
    db: &SqlitePool,
    setting_key: &str,
    env_var: &str,
    toml_value: Option<String>,
) -> Result<Option<String>> {
    if let Some(value) = get_setting(db, setting_key).await? {
        if !value.trim().is_empty() {
            return Ok(Some(value));
        }
    }
    if let Ok(value) = std::env::var(env_var) {
        if !value.trim().is_empty() {
            return Ok(Some(value));
        }
    }
    Ok(toml_value.filter(|v| !v.trim().is_empty()))
}
