use anyhow::{Context, Result, anyhow};
use serde::Deserialize;

use crate::profile::Gender;

include!(concat!(env!("OUT_DIR"), "/embedded_locale_bundles.rs"));

const SECTION_COUNT: usize = 3;

/// Report languages. Anything that is not exactly `"en"` falls back to Chinese.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Locale {
    #[default]
    Zh,
    En,
}

impl Locale {
    pub const ALL: [Locale; 2] = [Locale::Zh, Locale::En];

    pub fn resolve(tag: Option<&str>) -> Self {
        match tag {
            Some("en") => Locale::En,
            _ => Locale::Zh,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Locale::Zh => "zh",
            Locale::En => "en",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LocaleBundle {
    pub locale: Locale,
    pub gender_male: String,
    pub gender_female: String,
    pub gender_other: String,
    pub age_format: String,
    pub not_available: String,
    pub fallback_message: String,
    pub sections: Vec<String>,
}

impl LocaleBundle {
    pub fn gender_phrase(&self, gender: Gender) -> &str {
        match gender {
            Gender::Male => &self.gender_male,
            Gender::Female => &self.gender_female,
            Gender::Other => &self.gender_other,
        }
    }

    pub fn format_age(&self, months: u32, days: u32) -> String {
        self.age_format
            .replace("{months}", &months.to_string())
            .replace("{days}", &days.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct LocaleBundles {
    zh: LocaleBundle,
    en: LocaleBundle,
}

impl LocaleBundles {
    pub fn load() -> Result<Self> {
        Ok(Self {
            zh: load_bundle(Locale::Zh)?,
            en: load_bundle(Locale::En)?,
        })
    }

    pub fn get(&self, locale: Locale) -> &LocaleBundle {
        match locale {
            Locale::Zh => &self.zh,
            Locale::En => &self.en,
        }
    }
}

fn load_bundle(locale: Locale) -> Result<LocaleBundle> {
    let code = locale.as_str();
    let raw = embedded_locale_bundle(code)
        .ok_or_else(|| anyhow!("locale bundle not embedded: {}", code))?;
    let parsed: LocaleBundleFile = toml::from_str(raw)
        .with_context(|| format!("failed to parse locale bundle: {}", code))?;

    if !parsed.age.format.contains("{months}") || !parsed.age.format.contains("{days}") {
        return Err(anyhow!(
            "age format for '{}' must contain {{months}} and {{days}}",
            code
        ));
    }
    if parsed.report.sections.len() != SECTION_COUNT {
        return Err(anyhow!(
            "locale bundle '{}' must define exactly {} report sections (got {})",
            code,
            SECTION_COUNT,
            parsed.report.sections.len()
        ));
    }
    if parsed
        .report
        .sections
        .iter()
        .any(|section| section.trim().is_empty())
    {
        return Err(anyhow!("locale bundle '{}' has an empty section heading", code));
    }

    Ok(LocaleBundle {
        locale,
        gender_male: parsed.gender.male,
        gender_female: parsed.gender.female,
        gender_other: parsed.gender.other,
        age_format: parsed.age.format,
        not_available: parsed.report.not_available,
        fallback_message: parsed.report.fallback,
        sections: parsed.report.sections,
    })
}

#[derive(Debug, Deserialize)]
struct LocaleBundleFile {
    gender: GenderSection,
    age: AgeSection,
    report: ReportSection,
}

#[derive(Debug, Deserialize)]
struct GenderSection {
    male: String,
    female: String,
    other: String,
}

#[derive(Debug, Deserialize)]
struct AgeSection {
    format: String,
}

#[derive(Debug, Deserialize)]
struct ReportSection {
    not_available: String,
    fallback: String,
    sections: Vec<String>,
}
