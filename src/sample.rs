use std::{collections::BTreeMap, fmt::Display};

use itertools::Itertools;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// The marker a device line must start with to be treated as a sample.
pub const DEFAULT_MARKER: &str = "HR:";

/// One parsed sensor reading.
///
/// A set of named integer measurements from a single device line.
/// Keys are always lowercase.
/// Serializes as a flat JSON object, e.g. `{"hr":72,"spo2":98}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Sample(BTreeMap<String, i64>);

impl Sample {
    /// The value of a measurement, if present.
    pub fn get(&self, key: &str) -> Option<i64> {
        self.0.get(key).copied()
    }

    /// How many measurements the sample holds.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if the sample holds no measurements.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over the measurements in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.0.iter().map(|(key, value)| (key.as_str(), *value))
    }

    /// Serialize to the JSON object pushed to clients.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    fn insert(&mut self, key: String, value: i64) {
        self.0.insert(key, value);
    }
}

impl<K: AsRef<str>> FromIterator<(K, i64)> for Sample {
    fn from_iter<T: IntoIterator<Item = (K, i64)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(key, value)| (key.as_ref().to_lowercase(), value))
                .collect(),
        )
    }
}

impl<'de> Deserialize<'de> for Sample {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        BTreeMap::<String, i64>::deserialize(deserializer).map(Sample::from_iter)
    }
}

impl Display for Sample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let fields = self
            .0
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .join(", ");

        write!(f, "{{{fields}}}")
    }
}

/// A line started with the marker but did not follow the sample format.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum MalformedSample {
    /// A field had no `key:value` separator.
    #[error("The field `{0}` has no `:` separator")]
    MissingSeparator(String),

    /// A field had an empty key.
    #[error("The field `{0}` has an empty key")]
    EmptyKey(String),

    /// A value was not a base-10 integer.
    #[error("The value of field `{field}` is not an integer: {problem}")]
    NotAnInteger {
        /// The problematic field.
        field: String,

        /// Why the value could not be parsed.
        problem: String,
    },
}

/// Turns raw device lines into [`Sample`]s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineParser {
    marker: String,
}

impl Default for LineParser {
    fn default() -> Self {
        Self::new(DEFAULT_MARKER)
    }
}

impl LineParser {
    /// A parser accepting lines which start with the given marker.
    pub fn new(marker: &str) -> Self {
        Self {
            marker: marker.into(),
        }
    }

    /// The marker this parser looks for.
    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// Parse a line.
    ///
    /// Lines not starting with the marker are not samples and give `Ok(None)`.
    /// Devices print all kinds of diagnostics, so this is not an error.
    ///
    /// Lines starting with the marker must be a comma separated list of `key:value`
    /// fields, with integer values.
    pub fn parse(&self, line: &str) -> Result<Option<Sample>, MalformedSample> {
        let Some(fields) = line.strip_prefix(self.marker.as_str()) else {
            return Ok(None);
        };

        let mut sample = Sample::default();

        for field in fields.split(',') {
            let (key, value) = field
                .split_once(':')
                .ok_or_else(|| MalformedSample::MissingSeparator(field.into()))?;

            let key = key.trim();
            if key.is_empty() {
                return Err(MalformedSample::EmptyKey(field.into()));
            }

            let value =
                value
                    .trim()
                    .parse::<i64>()
                    .map_err(|e| MalformedSample::NotAnInteger {
                        field: field.into(),
                        problem: e.to_string(),
                    })?;

            sample.insert(key.to_lowercase(), value);
        }

        Ok(Some(sample))
    }
}

/// Parse a line using the [`DEFAULT_MARKER`].
pub fn parse_line(line: &str) -> Result<Option<Sample>, MalformedSample> {
    LineParser::default().parse(line)
}
