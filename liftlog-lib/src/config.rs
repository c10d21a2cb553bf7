//src/config.rs
use crate::model::Category;
use crate::stats::RecencyPolicy;
use comfy_table::Color;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};
use thiserror::Error;
use tracing::warn;

const CONFIG_FILE_NAME: &str = "config.toml";
pub(crate) const APP_DIR: &str = "liftlog";
const CONFIG_ENV_VAR: &str = "LIFTLOG_CONFIG_DIR";

#[derive(Error, Debug)]
pub enum Error {
    #[error("Could not determine configuration directory.")]
    CannotDetermineConfigDir,
    #[error("I/O error accessing config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config file (TOML): {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Failed to serialize config data (TOML): {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("Invalid color name: {0}")]
    InvalidColor(String),
    #[error("User id cannot be empty.")]
    EmptyUserId,
}

/// Display labels only; stored numbers are kept exactly as entered.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Units {
    #[default]
    Metric, // kg, km
    Imperial, // lbs, miles
}

impl Units {
    pub const fn weight_label(self) -> &'static str {
        match self {
            Self::Metric => "kg",
            Self::Imperial => "lbs",
        }
    }

    pub const fn distance_label(self) -> &'static str {
        match self {
            Self::Metric => "km",
            Self::Imperial => "mi",
        }
    }
}

/// What an edit does to the entry's timestamp.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum EditTimestampPolicy {
    #[default]
    Keep,
    Update,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter)]
pub enum StandardColor {
    Black,
    Red,
    Green,
    Yellow,
    Blue,
    Magenta,
    Cyan,
    White,
    DarkGrey,
    DarkRed,
    DarkGreen,
    DarkYellow,
    DarkBlue,
    DarkMagenta,
    DarkCyan,
    Grey,
}

impl From<StandardColor> for Color {
    fn from(value: StandardColor) -> Self {
        match value {
            StandardColor::Black => Self::Black,
            StandardColor::Red => Self::Red,
            StandardColor::Green => Self::Green,
            StandardColor::Yellow => Self::Yellow,
            StandardColor::Blue => Self::Blue,
            StandardColor::Magenta => Self::Magenta,
            StandardColor::Cyan => Self::Cyan,
            StandardColor::White => Self::White,
            StandardColor::DarkGrey => Self::DarkGrey,
            StandardColor::DarkRed => Self::DarkRed,
            StandardColor::DarkGreen => Self::DarkGreen,
            StandardColor::DarkYellow => Self::DarkYellow,
            StandardColor::DarkBlue => Self::DarkBlue,
            StandardColor::DarkMagenta => Self::DarkMagenta,
            StandardColor::DarkCyan => Self::DarkCyan,
            StandardColor::Grey => Self::Grey,
        }
    }
}

pub fn parse_color(color_str: &str) -> Result<StandardColor, Error> {
    StandardColor::iter()
        .find(|color| format!("{color:?}").eq_ignore_ascii_case(color_str))
        .ok_or_else(|| Error::InvalidColor(color_str.to_string()))
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Theme {
    pub header_color: String,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            header_color: "Green".to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Signed-in user. Entries logged without one are anonymous and produce no aggregates.
    pub user_id: Option<String>,
    pub units: Units,
    pub recency_policy: RecencyPolicy,
    pub edit_timestamp: EditTimestampPolicy,
    pub default_category: Category,
    pub theme: Theme,
}

/// Path to the config file, honouring `LIFTLOG_CONFIG_DIR`.
pub fn get_config_path() -> Result<PathBuf, Error> {
    let config_dir_path = if let Ok(path_str) = std::env::var(CONFIG_ENV_VAR) {
        let path = PathBuf::from(path_str);
        if !path.is_dir() {
            warn!(
                "{} points to '{}', which is not a directory. Trying to create it.",
                CONFIG_ENV_VAR,
                path.display()
            );
            fs::create_dir_all(&path)?;
        }
        path
    } else {
        dirs::config_dir()
            .ok_or(Error::CannotDetermineConfigDir)?
            .join(APP_DIR)
    };

    if !config_dir_path.exists() {
        fs::create_dir_all(&config_dir_path)?;
    }

    Ok(config_dir_path.join(CONFIG_FILE_NAME))
}

/// Loads the config, writing defaults when the file does not exist yet.
pub fn load(config_path: &Path) -> Result<Config, Error> {
    if config_path.exists() {
        let content = fs::read_to_string(config_path)?;
        Ok(toml::from_str(&content)?)
    } else {
        let config = Config::default();
        save(config_path, &config)?;
        Ok(config)
    }
}

pub fn save(config_path: &Path, config: &Config) -> Result<(), Error> {
    if let Some(parent_dir) = config_path.parent() {
        if !parent_dir.exists() {
            fs::create_dir_all(parent_dir)?;
        }
    }
    let content = toml::to_string_pretty(config)?;
    fs::write(config_path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let config: Config =
            toml::from_str("user_id = \"abc\"\nrecency_policy = \"latest\"").unwrap();
        assert_eq!(config.user_id.as_deref(), Some("abc"));
        assert_eq!(config.recency_policy, RecencyPolicy::Latest);
        assert_eq!(config.units, Units::Metric);
        assert_eq!(config.edit_timestamp, EditTimestampPolicy::Keep);
        assert_eq!(config.theme.header_color, "Green");
    }

    #[test]
    fn default_category_round_trips_by_display_name() {
        let config = Config {
            default_category: Category::LowerBody,
            ..Default::default()
        };
        let text = toml::to_string_pretty(&config).unwrap();
        assert!(text.contains("default_category = \"Lower Body\""));
        let back: Config = toml::from_str(&text).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn parse_color_is_case_insensitive() {
        assert_eq!(parse_color("darkblue").unwrap(), StandardColor::DarkBlue);
        assert!(parse_color("mauve").is_err());
    }
}
