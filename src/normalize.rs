// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Value normalization keyed by the caller's declared data type.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Data type key for RFID tags.
pub const RFID_KEY: &str = "rfid";

/// Length of a normalized RFID tag.
pub const RFID_LENGTH: usize = 15;

/// Which end of the stripped reading holds the tag.
///
/// The RT100 V8 scanner puts the tag first; older stick readers append it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RfidWindow {
    #[default]
    First,
    Last,
}

/// Output data types the caller may ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Rfid,
}

impl DataType {
    /// Parse from a caller-supplied key.
    pub fn parse(key: &str) -> Option<Self> {
        match key.trim().to_lowercase().as_str() {
            RFID_KEY => Some(Self::Rfid),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rfid => RFID_KEY,
        }
    }
}

/// Non-fatal problem found while normalizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationWarning {
    /// No raw reading was provided.
    Missing,
    /// The stripped reading is shorter than a full tag.
    TooShort { length: usize },
}

/// Normalized value plus any warning raised on the way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
    pub value: Option<String>,
    pub warning: Option<ValidationWarning>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    #[error("unknown data type '{0}'")]
    UnknownDataType(String),
}

/// Immutable normalization policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct Normalizer {
    rfid_window: RfidWindow,
}

impl Normalizer {
    pub fn new(rfid_window: RfidWindow) -> Self {
        Self { rfid_window }
    }

    /// Normalize `raw` for the given data type key.
    ///
    /// Unknown keys are refused; the caller must treat the operation as
    /// cancelled.
    pub fn normalize(&self, key: &str, raw: Option<&str>) -> Result<Normalized, NormalizeError> {
        match DataType::parse(key) {
            Some(DataType::Rfid) => Ok(self.rfid(raw)),
            None => Err(NormalizeError::UnknownDataType(key.to_string())),
        }
    }

    fn rfid(&self, raw: Option<&str>) -> Normalized {
        let Some(raw) = raw else {
            warn!("Provided RFID string was null");
            return Normalized {
                value: None,
                warning: Some(ValidationWarning::Missing),
            };
        };

        let stripped: Vec<char> = raw.chars().filter(|c| !c.is_whitespace()).collect();
        if stripped.len() < RFID_LENGTH {
            warn!(
                "RFID string is {} characters without whitespace, expected at least {}; returning it unprocessed",
                stripped.len(),
                RFID_LENGTH
            );
            return Normalized {
                value: Some(raw.to_string()),
                warning: Some(ValidationWarning::TooShort {
                    length: stripped.len(),
                }),
            };
        }

        let window = match self.rfid_window {
            RfidWindow::First => &stripped[..RFID_LENGTH],
            RfidWindow::Last => &stripped[stripped.len() - RFID_LENGTH..],
        };

        Normalized {
            value: Some(window.iter().collect()),
            warning: None,
        }
    }
}
