use serde_json::{Map, Value};
use thiserror::Error;

use crate::locales::LocaleBundle;

pub const MAX_AGE_DAYS: u32 = 2190;
pub const MAX_WEIGHT_KG: f64 = 50.0;
pub const MAX_HEIGHT_CM: f64 = 150.0;
pub const MAX_HEAD_CM: f64 = 70.0;

const MAX_NAME_CHARS: usize = 64;
// Ages are reported in 30-day months, not calendar months.
const DAYS_PER_MONTH: u32 = 30;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("request body is not valid JSON: {0}")]
    MalformedJson(String),
    #[error("request body must be a JSON object")]
    NotAnObject,
    #[error("missing field '{0}'")]
    Missing(&'static str),
    #[error("field '{field}' must be {expected}")]
    Invalid {
        field: &'static str,
        expected: &'static str,
    },
    #[error("field '{field}' is out of range (got {value})")]
    OutOfRange { field: &'static str, value: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl Gender {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "male" => Some(Gender::Male),
            "female" => Some(Gender::Female),
            "other" => Some(Gender::Other),
            _ => None,
        }
    }
}

/// A validated set of measurements for one baby.
#[derive(Debug, Clone, PartialEq)]
pub struct GrowthProfile {
    name: String,
    gender: Gender,
    age_days: u32,
    weight_kg: f64,
    height_cm: f64,
    head_circumference_cm: Option<f64>,
}

impl GrowthProfile {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn gender(&self) -> Gender {
        self.gender
    }

    pub fn age_days(&self) -> u32 {
        self.age_days
    }

    pub fn weight_kg(&self) -> f64 {
        self.weight_kg
    }

    pub fn height_cm(&self) -> f64 {
        self.height_cm
    }

    pub fn head_circumference_cm(&self) -> Option<f64> {
        self.head_circumference_cm
    }

    pub fn age_months_days(&self) -> (u32, u32) {
        (
            self.age_days / DAYS_PER_MONTH,
            self.age_days % DAYS_PER_MONTH,
        )
    }

    pub fn age_phrase(&self, bundle: &LocaleBundle) -> String {
        let (months, days) = self.age_months_days();
        bundle.format_age(months, days)
    }

    pub fn gender_phrase<'a>(&self, bundle: &'a LocaleBundle) -> &'a str {
        bundle.gender_phrase(self.gender)
    }
}

/// Builds a profile from an untrusted request body.
///
/// Numeric fields accept JSON numbers or numeric strings. `head` may be
/// missing, `null`, or an empty string.
pub fn normalize(raw: &Value) -> Result<GrowthProfile, ValidationError> {
    let object = raw.as_object().ok_or(ValidationError::NotAnObject)?;

    let name = read_name(object)?;
    let gender = read_gender(object)?;
    let age_days = read_age_days(object)?;
    let weight_kg =
        read_measurement(object, "weight", MAX_WEIGHT_KG)?.ok_or(ValidationError::Missing("weight"))?;
    let height_cm =
        read_measurement(object, "height", MAX_HEIGHT_CM)?.ok_or(ValidationError::Missing("height"))?;
    let head_circumference_cm = read_measurement(object, "head", MAX_HEAD_CM)?;

    Ok(GrowthProfile {
        name,
        gender,
        age_days,
        weight_kg,
        height_cm,
        head_circumference_cm,
    })
}

/// Renders a measurement the way a person would type it (`5` rather than `5.0`).
pub fn format_measurement(value: f64) -> String {
    format!("{}", value)
}

fn read_name(object: &Map<String, Value>) -> Result<String, ValidationError> {
    let value = match object.get("name") {
        None | Some(Value::Null) => return Err(ValidationError::Missing("name")),
        Some(Value::String(value)) => value.trim(),
        Some(_) => {
            return Err(ValidationError::Invalid {
                field: "name",
                expected: "a string",
            });
        }
    };
    if value.is_empty() {
        return Err(ValidationError::Missing("name"));
    }
    if value.chars().count() > MAX_NAME_CHARS {
        return Err(ValidationError::Invalid {
            field: "name",
            expected: "at most 64 characters",
        });
    }
    Ok(value.to_string())
}

fn read_gender(object: &Map<String, Value>) -> Result<Gender, ValidationError> {
    match object.get("gender") {
        None | Some(Value::Null) => Err(ValidationError::Missing("gender")),
        Some(Value::String(value)) if value.trim().is_empty() => {
            Err(ValidationError::Missing("gender"))
        }
        Some(Value::String(value)) => Gender::parse(value).ok_or(ValidationError::Invalid {
            field: "gender",
            expected: "\"male\", \"female\" or \"other\"",
        }),
        Some(_) => Err(ValidationError::Invalid {
            field: "gender",
            expected: "\"male\", \"female\" or \"other\"",
        }),
    }
}

fn read_age_days(object: &Map<String, Value>) -> Result<u32, ValidationError> {
    let days = read_number(object, "days")?.ok_or(ValidationError::Missing("days"))?;
    if days.fract() != 0.0 {
        return Err(ValidationError::Invalid {
            field: "days",
            expected: "a whole number of days",
        });
    }
    if days < 0.0 || days > f64::from(MAX_AGE_DAYS) {
        return Err(ValidationError::OutOfRange {
            field: "days",
            value: days,
        });
    }
    Ok(days as u32)
}

fn read_measurement(
    object: &Map<String, Value>,
    field: &'static str,
    max: f64,
) -> Result<Option<f64>, ValidationError> {
    let Some(value) = read_number(object, field)? else {
        return Ok(None);
    };
    if value <= 0.0 || value > max {
        return Err(ValidationError::OutOfRange { field, value });
    }
    Ok(Some(value))
}

fn read_number(
    object: &Map<String, Value>,
    field: &'static str,
) -> Result<Option<f64>, ValidationError> {
    let invalid = ValidationError::Invalid {
        field,
        expected: "a number",
    };
    let value = match object.get(field) {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Number(number)) => number.as_f64().ok_or(invalid)?,
        Some(Value::String(text)) => {
            let text = text.trim();
            if text.is_empty() {
                return Ok(None);
            }
            text.parse::<f64>().map_err(|_| invalid)?
        }
        Some(_) => return Err(invalid),
    };
    if !value.is_finite() {
        return Err(ValidationError::Invalid {
            field,
            expected: "a finite number",
        });
    }
    Ok(Some(value))
}
