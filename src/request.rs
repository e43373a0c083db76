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

//! Caller invocation contract.
//!
//! A form-filling caller names the sensor to use and the data type it expects
//! back. The normalized reading is returned under [`RESULT_KEY`].

use serde_json::json;
use std::fmt;
use tracing::{error, warn};

use crate::normalize::{NormalizeError, Normalizer};

/// Result key understood by the form-filling caller.
pub const RESULT_KEY: &str = "value";

/// Sensor selector for Bluetooth readers.
pub const SENSOR_BLUETOOTH: &str = "bluetooth";

/// Sensors this bridge can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sensor {
    Bluetooth,
}

impl Sensor {
    /// Parse from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            SENSOR_BLUETOOTH => Some(Self::Bluetooth),
            _ => None,
        }
    }
}

/// Parameters supplied by the caller. Either may be absent, in which case a
/// reading is still taken but nothing is returned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallerRequest {
    sensor: Option<String>,
    data_type: Option<String>,
}

impl CallerRequest {
    pub fn new(sensor: Option<&str>, data_type: Option<&str>) -> Self {
        let clean = |s: &str| Some(s.trim().to_lowercase()).filter(|s| !s.is_empty());
        Self {
            sensor: sensor.and_then(clean),
            data_type: data_type.and_then(clean),
        }
    }

    pub fn sensor(&self) -> Option<&str> {
        self.sensor.as_deref()
    }

    pub fn data_type(&self) -> Option<&str> {
        self.data_type.as_deref()
    }

    /// Whether a value will be routed back to the caller at all.
    pub fn returns_value(&self) -> bool {
        self.sensor.as_deref().and_then(Sensor::parse).is_some() && self.data_type.is_some()
    }

    /// Route a confirmed payload through the normalizer.
    pub fn resolve(&self, normalizer: &Normalizer, payload: Option<&str>) -> CallerResult {
        let (Some(sensor), Some(data_type)) = (self.sensor.as_deref(), self.data_type.as_deref())
        else {
            error!("Sensor or data type not provided by the caller, returning nothing");
            return CallerResult::Cancelled(CancelReason::MissingParameters);
        };

        if Sensor::parse(sensor).is_none() {
            error!("Unsupported sensor '{}'", sensor);
            return CallerResult::Cancelled(CancelReason::UnsupportedSensor(sensor.to_string()));
        }

        match normalizer.normalize(data_type, payload) {
            Ok(normalized) => match normalized.value {
                Some(value) => {
                    if let Some(warning) = normalized.warning {
                        warn!("Returning unprocessed reading ({:?})", warning);
                    }
                    CallerResult::Value(value)
                }
                None => CallerResult::Cancelled(CancelReason::NoReading),
            },
            Err(NormalizeError::UnknownDataType(key)) => {
                error!("Unable to determine the return data type '{}'", key);
                CallerResult::Cancelled(CancelReason::UnknownDataType(key))
            }
        }
    }
}

/// Why no value was returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelReason {
    MissingParameters,
    UnsupportedSensor(String),
    UnknownDataType(String),
    NoReading,
    TransportUnavailable,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingParameters => write!(f, "sensor or data type not provided"),
            Self::UnsupportedSensor(s) => write!(f, "unsupported sensor '{}'", s),
            Self::UnknownDataType(t) => write!(f, "unknown data type '{}'", t),
            Self::NoReading => write!(f, "no reading obtained"),
            Self::TransportUnavailable => write!(f, "bluetooth unavailable"),
        }
    }
}

/// What the caller receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallerResult {
    Value(String),
    Cancelled(CancelReason),
}

impl CallerResult {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Serialize for the caller. Cancellations carry no value key.
    pub fn to_json(&self) -> String {
        match self {
            Self::Value(value) => json!({ RESULT_KEY: value }).to_string(),
            Self::Cancelled(reason) => {
                json!({ "cancelled": true, "reason": reason.to_string() }).to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::RfidWindow;

    #[test]
    fn test_selectors_are_lowercased() {
        let request = CallerRequest::new(Some(" Bluetooth"), Some("RFID"));
        assert_eq!(request.sensor(), Some("bluetooth"));
        assert_eq!(request.data_type(), Some("rfid"));
        assert!(request.returns_value());
    }

    #[test]
    fn test_value_routed_through_normalizer() {
        let request = CallerRequest::new(Some("bluetooth"), Some("rfid"));
        let result = request.resolve(&Normalizer::new(RfidWindow::First), Some("12 345 678901234X"));
        assert_eq!(result, CallerResult::Value("12345678901234X".to_string()));
        assert_eq!(result.to_json(), r#"{"value":"12345678901234X"}"#);
    }

    #[test]
    fn test_short_reading_degrades_to_raw() {
        let request = CallerRequest::new(Some("bluetooth"), Some("rfid"));
        let result = request.resolve(&Normalizer::default(), Some("1234"));
        assert_eq!(result, CallerResult::Value("1234".to_string()));
    }

    #[test]
    fn test_missing_parameters_cancel() {
        let request = CallerRequest::new(None, Some("rfid"));
        assert!(!request.returns_value());
        let result = request.resolve(&Normalizer::default(), Some("123456789012345"));
        assert_eq!(result, CallerResult::Cancelled(CancelReason::MissingParameters));

        let request = CallerRequest::new(Some("bluetooth"), Some(""));
        assert!(!request.returns_value());
    }

    #[test]
    fn test_unknown_data_type_cancels() {
        let request = CallerRequest::new(Some("bluetooth"), Some("barcode"));
        let result = request.resolve(&Normalizer::default(), Some("123456789012345"));
        assert_eq!(
            result,
            CallerResult::Cancelled(CancelReason::UnknownDataType("barcode".to_string()))
        );
        assert!(!result.to_json().contains(RESULT_KEY));
    }

    #[test]
    fn test_unsupported_sensor_cancels() {
        let request = CallerRequest::new(Some("usb"), Some("rfid"));
        assert!(!request.returns_value());
        let result = request.resolve(&Normalizer::default(), Some("123456789012345"));
        assert!(result.is_cancelled());
    }

    #[test]
    fn test_null_payload_cancels() {
        let request = CallerRequest::new(Some("bluetooth"), Some("rfid"));
        let result = request.resolve(&Normalizer::default(), None);
        assert_eq!(result, CallerResult::Cancelled(CancelReason::NoReading));
    }
}
