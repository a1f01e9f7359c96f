use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::prompts::Persona;
use crate::providers::retry::RetryPolicy;

const DEFAULT_SETTINGS_TOML: &str = include_str!("../settings.toml");

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub addr: String,
    pub route: String,
    pub provider: String,
    pub model: Option<String>,
    pub endpoint: Option<String>,
    pub max_tokens: Option<u32>,
    pub timeout_secs: u64,
    pub max_attempts: usize,
    pub persona_name: String,
    pub persona_names: HashMap<String, String>,
    pub years_of_experience: u32,
}

impl Default for Settings {
    fn default() -> Self {
        let persona = Persona::default();
        Self {
            addr: "0.0.0.0:8787".to_string(),
            route: "/api/analyze".to_string(),
            provider: "siliconflow".to_string(),
            model: None,
            endpoint: None,
            max_tokens: None,
            timeout_secs: 25,
            max_attempts: 1,
            persona_name: persona.name,
            persona_names: persona.localized_names,
            years_of_experience: persona.years_of_experience,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    server: Option<ServerSettings>,
    provider: Option<ProviderSettings>,
    persona: Option<PersonaSettings>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerSettings {
    addr: Option<String>,
    route: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ProviderSettings {
    kind: Option<String>,
    model: Option<String>,
    endpoint: Option<String>,
    max_tokens: Option<u32>,
    timeout_secs: Option<u64>,
    max_attempts: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct PersonaSettings {
    name: Option<String>,
    years_of_experience: Option<u32>,
    names: Option<HashMap<String, String>>,
}

/// Loads the built-in defaults, then `settings.toml` and `settings.local.toml`
/// from the working directory, then `extra_path` if given. Later files win.
pub fn load_settings(extra_path: Option<&Path>) -> Result<Settings> {
    let mut settings = Settings::default();
    let defaults: SettingsFile = toml::from_str(DEFAULT_SETTINGS_TOML)
        .with_context(|| "failed to parse built-in settings")?;
    settings.merge(defaults);

    let mut ordered_paths = vec![
        PathBuf::from("settings.toml"),
        PathBuf::from("settings.local.toml"),
    ];

    if let Some(extra) = extra_path {
        if !extra.exists() {
            return Err(anyhow!("settings file not found: {}", extra.display()));
        }
        ordered_paths.push(extra.to_path_buf());
    }

    for path in ordered_paths {
        if path.exists() {
            settings.merge_file(&path)?;
        }
    }

    Ok(settings)
}

impl Settings {
    pub fn merge_file(&mut self, path: &Path) -> Result<()> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings: {}", path.display()))?;
        let parsed: SettingsFile = toml::from_str(&content)
            .with_context(|| format!("failed to parse settings: {}", path.display()))?;
        self.merge(parsed);
        Ok(())
    }

    /// Applies `BABYUP_PROVIDER`, `BABYUP_MODEL` and `BABYUP_ENDPOINT`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(provider) = lookup("BABYUP_PROVIDER") {
            self.provider = provider;
        }
        if let Some(model) = lookup("BABYUP_MODEL") {
            self.model = Some(model);
        }
        if let Some(endpoint) = lookup("BABYUP_ENDPOINT") {
            self.endpoint = Some(endpoint);
        }
    }

    pub fn persona(&self) -> Persona {
        Persona {
            name: self.persona_name.clone(),
            localized_names: self.persona_names.clone(),
            years_of_experience: self.years_of_experience,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            ..RetryPolicy::default()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn merge(&mut self, incoming: SettingsFile) {
        if let Some(server) = incoming.server {
            if let Some(addr) = non_empty(server.addr) {
                self.addr = addr;
            }
            if let Some(route) = non_empty(server.route) {
                self.route = if route.starts_with('/') {
                    route
                } else {
                    format!("/{}", route)
                };
            }
        }
        if let Some(provider) = incoming.provider {
            if let Some(kind) = non_empty(provider.kind) {
                self.provider = kind;
            }
            if let Some(model) = non_empty(provider.model) {
                self.model = Some(model);
            }
            if let Some(endpoint) = non_empty(provider.endpoint) {
                self.endpoint = Some(endpoint);
            }
            if let Some(max_tokens) = provider.max_tokens {
                self.max_tokens = (max_tokens > 0).then_some(max_tokens);
            }
            if let Some(secs) = provider.timeout_secs
                && secs > 0
            {
                self.timeout_secs = secs;
            }
            if let Some(attempts) = provider.max_attempts
                && attempts > 0
            {
                self.max_attempts = attempts;
            }
        }
        if let Some(persona) = incoming.persona {
            if let Some(name) = non_empty(persona.name) {
                self.persona_name = name;
            }
            if let Some(years) = persona.years_of_experience {
                self.years_of_experience = years;
            }
            if let Some(names) = persona.names {
                for (locale, name) in names {
                    self.persona_names.insert(locale.to_lowercase(), name);
                }
            }
        }
    }
}

pub fn get_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
