// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Filesystem model discovery and the profile table.
//!
//! Deliberately simple: a non-recursive `*.gguf` directory scan, no
//! quantization-tag parsing beyond a best-effort substring match.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::config::Profile;

const KNOWN_QUANT_TAGS: &[&str] = &["Q4_K_M", "Q4_0", "Q5_K_M", "Q6_K", "Q8_0", "F16", "F32"];

/// A discovered model file.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ModelInfo {
    pub id: String,
    pub path: PathBuf,
    pub filename: String,
    pub size: u64,
    pub size_display: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quant_type: Option<String>,
}

/// Scans `model_dir` for `*.gguf` files. Rescans are cheap and explicit via
/// `rescan()`; nothing watches the filesystem in the background.
pub struct ModelRegistry {
    model_dir: Option<PathBuf>,
    models: RwLock<Vec<ModelInfo>>,
}

impl ModelRegistry {
    pub fn new(model_dir: Option<PathBuf>) -> Self {
        let registry = Self { model_dir, models: RwLock::new(Vec::new()) };
        let _ = registry.rescan();
        registry
    }

    /// Re-scan the configured directory and replace the cached listing.
    pub fn rescan(&self) -> anyhow::Result<Vec<ModelInfo>> {
        let dir = match &self.model_dir {
            Some(dir) => dir,
            None => {
                *self.models.write().unwrap_or_else(|e| e.into_inner()) = Vec::new();
                return Ok(Vec::new());
            }
        };

        let mut models = Vec::new();
        let entries = std::fs::read_dir(dir)?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("gguf") {
                continue;
            }
            if let Some(info) = model_info_for(&path) {
                models.push(info);
            }
        }
        models.sort_by(|a, b| a.id.cmp(&b.id));

        *self.models.write().unwrap_or_else(|e| e.into_inner()) = models.clone();
        Ok(models)
    }

    pub fn list(&self) -> Vec<ModelInfo> {
        self.models.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn find(&self, model_id: &str) -> Option<ModelInfo> {
        self.list().into_iter().find(|m| m.id == model_id)
    }
}

fn model_info_for(path: &Path) -> Option<ModelInfo> {
    let filename = path.file_name()?.to_str()?.to_owned();
    let id = path.file_stem()?.to_str()?.to_owned();
    let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    let quant_type = KNOWN_QUANT_TAGS
        .iter()
        .find(|tag| filename.to_ascii_uppercase().contains(*tag))
        .map(|tag| tag.to_string());

    Some(ModelInfo {
        id,
        path: path.to_path_buf(),
        filename,
        size,
        size_display: human_size(size),
        quant_type,
    })
}

fn human_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{size:.1} {}", UNITS[unit])
}

/// Launch profiles, loaded once at startup and never mutated afterward.
pub struct ProfileTable {
    profiles: HashMap<String, Profile>,
    active: RwLock<Option<String>>,
}

impl ProfileTable {
    pub fn new(profiles: HashMap<String, Profile>) -> Self {
        Self { profiles, active: RwLock::new(None) }
    }

    pub fn get(&self, name: &str) -> Option<Profile> {
        self.profiles.get(name).cloned()
    }

    pub fn default_profile(&self) -> Option<Profile> {
        self.profiles.get("default").cloned().or_else(|| self.profiles.values().next().cloned())
    }

    pub fn set_active(&self, name: impl Into<String>) {
        *self.active.write().unwrap_or_else(|e| e.into_inner()) = Some(name.into());
    }

    /// Profile list, each annotated with whether it is currently active.
    pub fn list_with_active(&self) -> Vec<(Profile, bool)> {
        let active = self.active.read().unwrap_or_else(|e| e.into_inner()).clone();
        let mut profiles: Vec<_> = self.profiles.values().cloned().collect();
        profiles.sort_by(|a, b| a.name.cmp(&b.name));
        profiles
            .into_iter()
            .map(|p| {
                let is_active = active.as_deref() == Some(p.name.as_str());
                (p, is_active)
            })
            .collect()
    }
}
