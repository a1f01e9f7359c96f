use std::collections::HashMap;
use tera::{Context as TeraContext, Tera};
use thiserror::Error;

use crate::locales::{Locale, LocaleBundle, LocaleBundles};
use crate::profile::{GrowthProfile, format_measurement};

const SYSTEM_TEMPLATE: &str = "system";
const USER_TEMPLATE: &str = "user";

const TEMPLATES: [(&str, &str); 4] = [
    ("en/system", include_str!("templates/en/system.tera")),
    ("en/user", include_str!("templates/en/user.tera")),
    ("zh/system", include_str!("templates/zh/system.tera")),
    ("zh/user", include_str!("templates/zh/user.tera")),
];

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to load prompt templates: {0}")]
    Load(#[source] tera::Error),
    #[error("failed to render prompt '{name}': {source}")]
    Template {
        name: String,
        #[source]
        source: tera::Error,
    },
    #[error("rendered user prompt is missing section '{0}'")]
    MissingSection(String),
}

/// The assistant's voice. One per deployment.
#[derive(Debug, Clone, PartialEq)]
pub struct Persona {
    pub name: String,
    pub localized_names: HashMap<String, String>,
    pub years_of_experience: u32,
}

impl Persona {
    pub fn display_name(&self, locale: Locale) -> &str {
        self.localized_names
            .get(locale.as_str())
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(&self.name)
    }
}

impl Default for Persona {
    fn default() -> Self {
        Self {
            name: "BabyUp Expert".to_string(),
            localized_names: HashMap::from([("zh".to_string(), "BabyUp 专家".to_string())]),
            years_of_experience: 15,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptPair {
    pub system_prompt: String,
    pub user_prompt: String,
}

/// Renders the system/user prompt pair for a profile.
///
/// Templates are compiled into the binary and parsed once. Rendering is a pure
/// function of its inputs, so the same profile, locale and persona always give
/// byte-identical prompts.
#[derive(Debug, Clone)]
pub struct PromptEngine {
    tera: Tera,
    bundles: LocaleBundles,
}

impl PromptEngine {
    pub fn new(bundles: LocaleBundles) -> Result<Self, RenderError> {
        let mut tera = Tera::default();
        tera.autoescape_on(Vec::new());
        tera.add_raw_templates(TEMPLATES.to_vec())
            .map_err(RenderError::Load)?;
        Ok(Self { tera, bundles })
    }

    pub fn bundle(&self, locale: Locale) -> &LocaleBundle {
        self.bundles.get(locale)
    }

    pub fn render(
        &self,
        profile: &GrowthProfile,
        locale: Locale,
        persona: &Persona,
    ) -> Result<PromptPair, RenderError> {
        let bundle = self.bundle(locale);

        let mut context = TeraContext::new();
        context.insert("persona_name", persona.display_name(locale));
        context.insert("years_of_experience", &persona.years_of_experience);
        context.insert("name", profile.name());
        context.insert("gender", profile.gender_phrase(bundle));
        context.insert("age_days", &profile.age_days());
        context.insert("age_phrase", &profile.age_phrase(bundle));
        context.insert("weight", &format_measurement(profile.weight_kg()));
        context.insert("height", &format_measurement(profile.height_cm()));
        context.insert("head", &head_clause(profile, bundle));
        context.insert("not_available", &bundle.not_available);

        let system_prompt = self.render_template(locale, SYSTEM_TEMPLATE, &context)?;
        let user_prompt = self.render_template(locale, USER_TEMPLATE, &context)?;
        ensure_sections(&user_prompt, bundle)?;

        Ok(PromptPair {
            system_prompt,
            user_prompt,
        })
    }

    fn render_template(
        &self,
        locale: Locale,
        kind: &str,
        context: &TeraContext,
    ) -> Result<String, RenderError> {
        let name = format!("{}/{}", locale.as_str(), kind);
        self.tera
            .render(&name, context)
            .map(|rendered| rendered.trim().to_string())
            .map_err(|source| RenderError::Template { name, source })
    }
}

// The head slot is always present; a missing value renders the locale's marker.
fn head_clause(profile: &GrowthProfile, bundle: &LocaleBundle) -> String {
    match profile.head_circumference_cm() {
        Some(head) => format!("{}cm", format_measurement(head)),
        None => bundle.not_available.clone(),
    }
}

fn ensure_sections(user_prompt: &str, bundle: &LocaleBundle) -> Result<(), RenderError> {
    match bundle
        .sections
        .iter()
        .find(|section| !user_prompt.contains(section.as_str()))
    {
        Some(missing) => Err(RenderError::MissingSection(missing.clone())),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::normalize;
    use serde_json::{Value, json};

    fn engine() -> PromptEngine {
        PromptEngine::new(LocaleBundles::load().unwrap()).unwrap()
    }

    fn profile(head: Value) -> GrowthProfile {
        normalize(&json!({
            "name": "Mia",
            "gender": "other",
            "days": 65,
            "weight": 5.6,
            "height": 58.5,
            "head": head
        }))
        .unwrap()
    }

    #[test]
    fn user_prompt_requests_all_sections_in_every_locale() {
        let engine = engine();
        let persona = Persona::default();
        for head in [json!(39.5), Value::Null] {
            let profile = profile(head);
            for locale in Locale::ALL {
                let prompt = engine.render(&profile, locale, &persona).unwrap();
                let mut last = 0;
                for section in &engine.bundle(locale).sections {
                    let position = prompt.user_prompt.find(section.as_str()).unwrap();
                    assert!(position >= last, "sections out of order in {:?}", locale);
                    last = position;
                }
            }
        }
    }

    #[test]
    fn missing_head_renders_not_available_marker() {
        let engine = engine();
        let persona = Persona::default();
        let profile = profile(Value::Null);

        let en = engine.render(&profile, Locale::En, &persona).unwrap();
        assert!(en.user_prompt.contains("Head Circumference: N/A."));

        let zh = engine.render(&profile, Locale::Zh, &persona).unwrap();
        assert!(zh.user_prompt.contains("头围：无。"));
    }

    #[test]
    fn present_head_renders_with_unit() {
        let engine = engine();
        let prompt = engine
            .render(&profile(json!(39.5)), Locale::En, &Persona::default())
            .unwrap();
        assert!(prompt.user_prompt.contains("Head Circumference: 39.5cm."));
    }

    #[test]
    fn user_prompt_interpolates_profile() {
        let engine = engine();
        let persona = Persona::default();
        let profile = profile(json!(39.5));

        let en = engine.render(&profile, Locale::En, &persona).unwrap();
        assert!(en.user_prompt.starts_with(
            "Baby Profile: Name: Mia, Gender: Not specified, Age: 65 days old (2 months 5 days)."
        ));
        assert!(en.user_prompt.contains("Weight: 5.6kg, Height: 58.5cm"));
        assert!(en.user_prompt.contains("\"Overall, Mia is growing...\""));
        assert!(en.user_prompt.contains("a 65-day-old baby"));

        let zh = engine.render(&profile, Locale::Zh, &persona).unwrap();
        assert!(
            zh.user_prompt
                .starts_with("宝宝档案：名字：Mia，性别：未说明，月龄：65天（2个月5天）。")
        );
        assert!(zh.user_prompt.contains("总体来看，Mia 的生长..."));
    }

    #[test]
    fn system_prompt_carries_persona_per_locale() {
        let engine = engine();
        let persona = Persona {
            name: "Dr. Sprout".to_string(),
            localized_names: HashMap::new(),
            years_of_experience: 22,
        };
        let profile = profile(Value::Null);

        let en = engine.render(&profile, Locale::En, &persona).unwrap();
        assert!(en.system_prompt.contains("named \"Dr. Sprout\" with 22 years"));
        assert!(en.system_prompt.contains("**Bold**"));

        let zh = engine.render(&profile, Locale::Zh, &persona).unwrap();
        assert!(zh.system_prompt.contains("名字叫“Dr. Sprout”，拥有 22 年"));

        let default = Persona::default();
        assert_eq!(default.display_name(Locale::Zh), "BabyUp 专家");
        assert_eq!(default.display_name(Locale::En), "BabyUp Expert");
    }

    #[test]
    fn names_are_not_html_escaped() {
        let engine = engine();
        let profile = normalize(&json!({
            "name": "Zoë & \"Bean\" <3",
            "gender": "male",
            "days": 10,
            "weight": 3.4,
            "height": 50
        }))
        .unwrap();
        let prompt = engine
            .render(&profile, Locale::En, &Persona::default())
            .unwrap();
        assert!(prompt.user_prompt.contains("Name: Zoë & \"Bean\" <3,"));
    }

    #[test]
    fn rendering_is_deterministic() {
        let engine = engine();
        let persona = Persona::default();
        let profile = profile(json!(40));
        for locale in Locale::ALL {
            let first = engine.render(&profile, locale, &persona).unwrap();
            let second = engine.render(&profile, locale, &persona).unwrap();
            assert_eq!(first, second);
        }
    }

    #[test]
    fn detects_missing_sections() {
        let bundles = LocaleBundles::load().unwrap();
        let bundle = bundles.get(Locale::En);
        let partial = "### 1. Growth Assessment\n### 2. What to Expect Next";
        match ensure_sections(partial, bundle) {
            Err(RenderError::MissingSection(section)) => {
                assert_eq!(section, "### 3. Expert Advice for this Month")
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
