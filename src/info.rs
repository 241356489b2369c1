//! Capability description answered to `describe` requests

use serde::{Deserialize, Serialize};

use crate::model::ModelVariant;
use crate::protocol::{Event, Message};

const PROGRAM_NAME: &str = "GigaAM";
const PROGRAM_DESCRIPTION: &str = "Giga Acoustic Model";
const ATTRIBUTION_NAME: &str = "SberDevices";
const ATTRIBUTION_URL: &str = "https://github.com/salute-developers/GigaAM";
const MODEL_VERSION: &str = "1";
const MODEL_LANGUAGES: &[&str] = &["ru"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribution {
    pub name: String,
    pub url: String,
}

/// One speech recognition model offered by a program
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsrModel {
    pub name: String,
    pub attribution: Attribution,
    pub installed: bool,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub languages: Vec<String>,
}

/// A speech recognition program and the models it can run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsrProgram {
    pub name: String,
    pub attribution: Attribution,
    pub installed: bool,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub models: Vec<AsrModel>,
}

/// Full capability description
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Info {
    #[serde(default)]
    pub asr: Vec<AsrProgram>,
}

impl Info {
    pub fn to_event(&self) -> Result<Event, serde_json::Error> {
        Message::Info(self.clone()).into_event()
    }

    /// Names of the models flagged as installed
    pub fn installed_models(&self) -> impl Iterator<Item = &str> {
        self.asr
            .iter()
            .flat_map(|program| program.models.iter())
            .filter(|model| model.installed)
            .map(|model| model.name.as_str())
    }
}

fn attribution() -> Attribution {
    Attribution {
        name: ATTRIBUTION_NAME.to_string(),
        url: ATTRIBUTION_URL.to_string(),
    }
}

/// Build the description for a server launched with `selector`.
///
/// A model is flagged installed when `selector` is one of its aliases. The
/// selector is not validated here; an unknown selector yields no installed
/// model.
pub fn build_info(selector: &str) -> Info {
    let models = ModelVariant::ALL
        .iter()
        .map(|variant| AsrModel {
            name: variant.display_name().to_string(),
            attribution: attribution(),
            installed: variant.accepts(selector),
            description: Some(variant.description().to_string()),
            version: Some(MODEL_VERSION.to_string()),
            languages: MODEL_LANGUAGES.iter().map(|l| l.to_string()).collect(),
        })
        .collect();

    Info {
        asr: vec![AsrProgram {
            name: PROGRAM_NAME.to_string(),
            attribution: attribution(),
            installed: true,
            description: Some(PROGRAM_DESCRIPTION.to_string()),
            version: Some(env!("CARGO_PKG_VERSION").to_string()),
            models,
        }],
    }
}
