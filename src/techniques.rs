/// MITRE ATT&CK technique records and the JSON corpus loader.
///
/// The corpus is a top-level JSON array of technique objects. Records are
/// lenient: list fields may be arrays, single strings or `null`, and
/// mitigations may be objects or bare names.
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::info;

use crate::config::ConfigError;

/// A single mitigation attached to a technique.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Mitigation {
    pub name: String,
    pub description: String,
}

impl<'de> Deserialize<'de> for Mitigation {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Name(String),
            Full {
                #[serde(default)]
                name: Option<String>,
                #[serde(default)]
                description: Option<String>,
            },
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::Name(name) => Mitigation {
                name,
                description: String::new(),
            },
            Repr::Full { name, description } => Mitigation {
                name: name.unwrap_or_default(),
                description: description.unwrap_or_default(),
            },
        })
    }
}

/// A technique record as found in the corpus.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Technique {
    #[serde(default, deserialize_with = "string_or_empty")]
    pub id: String,
    #[serde(default, deserialize_with = "string_or_empty")]
    pub name: String,
    #[serde(default, deserialize_with = "string_or_empty")]
    pub description: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, deserialize_with = "string_list")]
    pub tactics: Vec<String>,
    #[serde(default, deserialize_with = "string_list")]
    pub platforms: Vec<String>,
    #[serde(default, deserialize_with = "string_list")]
    pub datasources: Vec<String>,
    #[serde(default, deserialize_with = "string_list")]
    pub permissions_required: Vec<String>,
    #[serde(default)]
    pub detection: Option<String>,
    #[serde(
        default,
        alias = "mitigation_methods",
        deserialize_with = "mitigation_list"
    )]
    pub mitigations: Vec<Mitigation>,
}

const NOT_AVAILABLE: &str = "Not available";

impl Technique {
    pub fn display_id(&self) -> &str {
        if self.id.is_empty() { "Unknown" } else { &self.id }
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            "No name"
        } else {
            &self.name
        }
    }

    pub fn url_or_default(&self) -> &str {
        non_empty_or(self.url.as_deref(), NOT_AVAILABLE)
    }

    pub fn detection_or_default(&self) -> &str {
        non_empty_or(self.detection.as_deref(), NOT_AVAILABLE)
    }

    /// Comma-joined tactics.
    pub fn tactics_joined(&self) -> String {
        self.tactics.join(", ")
    }

    pub fn platforms_joined(&self) -> String {
        self.platforms.join(", ")
    }

    pub fn datasources_joined(&self) -> String {
        self.datasources.join(", ")
    }

    pub fn permissions_joined(&self) -> String {
        self.permissions_required.join(", ")
    }

    /// Text used when the description is empty, so the technique still gets
    /// a chunk of its own.
    pub fn fallback_text(&self) -> String {
        format!("{} {}", self.display_id(), self.display_name())
    }

    /// Prefix prepended to every chunk before embedding.
    pub fn embedding_prefix(&self) -> String {
        format!("{} {}: ", self.display_id(), self.display_name())
    }
}

fn non_empty_or<'a>(value: Option<&'a str>, default: &'a str) -> &'a str {
    match value {
        Some(v) if !v.trim().is_empty() => v,
        _ => default,
    }
}

fn string_or_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn string_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(s)) => vec![s],
        Some(OneOrMany::Many(v)) => v,
    })
}

fn mitigation_list<'de, D>(deserializer: D) -> Result<Vec<Mitigation>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<Mitigation>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Parse a corpus from a JSON string.
pub fn parse_techniques(json: &str) -> Result<Vec<Technique>> {
    let value: serde_json::Value = serde_json::from_str(json).context("malformed JSON")?;
    anyhow::ensure!(
        value.is_array(),
        "expected a top-level JSON array of technique records"
    );
    serde_json::from_value(value).context("invalid technique record")
}

/// Load all technique records from a JSON file.
pub fn load_techniques(path: &Path) -> Result<Vec<Technique>> {
    if !path.exists() {
        return Err(ConfigError::MissingInput(path.to_path_buf()).into());
    }

    let data = fs::read_to_string(path)
        .with_context(|| format!("failed to read techniques file: {}", path.display()))?;
    let techniques = parse_techniques(&data)
        .with_context(|| format!("failed to load techniques from {}", path.display()))?;

    info!("Loaded {} techniques from {}", techniques.len(), path.display());
    Ok(techniques)
}
