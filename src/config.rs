use crate::processing::AggregatorOptions;
use crate::utils::IdRiskError;
use std::collections::HashSet;
use std::env;
use std::path::PathBuf;

/// Worker settings read from the environment.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub rules_path: PathBuf,
    pub risky_ips: Vec<String>,
    pub log_level: String,
    pub missing_image_quality: f64,
    pub template_geom_default: f64,
}

impl Default for Settings {
    fn default() -> Self {
        let options = AggregatorOptions::default();
        Settings {
            rules_path: PathBuf::from("config/rules.json"),
            risky_ips: Vec::new(),
            log_level: "info".to_string(),
            missing_image_quality: options.missing_image_quality,
            template_geom_default: options.template_geom_default,
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, IdRiskError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build settings from any key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, IdRiskError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Settings::default();

        if let Some(path) = lookup("RULES_PATH").filter(|v| !v.is_empty()) {
            settings.rules_path = PathBuf::from(path);
        }
        if let Some(ips) = lookup("RISKY_IPS") {
            settings.risky_ips = ips
                .split(',')
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(level) = lookup("LOG_LEVEL").filter(|v| !v.is_empty()) {
            settings.log_level = level.to_ascii_lowercase();
        }
        if let Some(value) = lookup("MISSING_IMAGE_QUALITY") {
            settings.missing_image_quality = parse_unit("MISSING_IMAGE_QUALITY", &value)?;
        }
        if let Some(value) = lookup("TEMPLATE_GEOM_DEFAULT") {
            settings.template_geom_default = parse_unit("TEMPLATE_GEOM_DEFAULT", &value)?;
        }

        Ok(settings)
    }

    pub fn aggregator_options(&self) -> AggregatorOptions {
        AggregatorOptions {
            missing_image_quality: self.missing_image_quality,
            template_geom_default: self.template_geom_default,
        }
    }

    pub fn risky_ip_set(&self) -> HashSet<String> {
        self.risky_ips.iter().cloned().collect()
    }
}

fn parse_unit(key: &str, value: &str) -> Result<f64, IdRiskError> {
    let parsed = value
        .trim()
        .parse::<f64>()
        .map_err(|_| IdRiskError::ConfigError(format!("{} is not a number: {}", key, value)))?;
    if !(0.0..=1.0).contains(&parsed) {
        return Err(IdRiskError::ConfigError(format!(
            "{} must be within [0, 1], got {}",
            key, parsed
        )));
    }
    Ok(parsed)
}
