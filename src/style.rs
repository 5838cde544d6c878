//! Serde model of the parts of a style document the runner reads.
//!
//! Render-test fixtures are regular map style documents whose `metadata.test`
//! object carries the expectations of the test (viewport size, pixel ratio,
//! whether the fixture is ignored). Everything else in the document is passed
//! through to the snapshotter untouched, so unknown fields are ignored here.

use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

/// The subset of a style document used for test setup.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StyleDefinition {
    pub metadata: Option<Metadata>,
    pub layers: Vec<Layer>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Metadata {
    pub test: Option<TestMetadata>,
}

/// Expectations stored under `metadata.test`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TestMetadata {
    #[serde(deserialize_with = "lenient_int")]
    pub width: Option<i64>,
    #[serde(deserialize_with = "lenient_int")]
    pub height: Option<i64>,
    #[serde(rename = "pixelRatio", deserialize_with = "lenient_float")]
    pub pixel_ratio: Option<f64>,
    #[serde(deserialize_with = "lenient_string")]
    pub description: Option<String>,
    #[serde(deserialize_with = "lenient_bool")]
    pub ignored: Option<bool>,
}

/// A style layer. Only `background` layers are ever interpreted locally.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Layer {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub paint: Map<String, Value>,
    pub layout: Map<String, Value>,
}

impl StyleDefinition {
    /// Parse a style document.
    pub fn parse(style_json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(style_json)
    }

    /// `metadata.test` if both levels are present.
    pub fn test_metadata(&self) -> Option<&TestMetadata> {
        self.metadata.as_ref().and_then(|m| m.test.as_ref())
    }

    pub fn is_ignored(&self) -> bool {
        self.test_metadata()
            .and_then(|t| t.ignored)
            .unwrap_or(false)
    }
}

impl Layer {
    pub fn is_visible(&self) -> bool {
        self.layout.get("visibility").and_then(Value::as_str) != Some("none")
    }
}

// Metadata is hand-written by fixture authors; a malformed field is treated as
// absent rather than failing the whole fixture.

fn lenient_int<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| {
        v.as_i64().or_else(|| {
            v.as_f64()
                .filter(|f| f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64)
                .map(|f| f as i64)
        })
    }))
}

fn lenient_float<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| v.as_f64()))
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| v.as_str().map(str::to_owned)))
}

fn lenient_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| v.as_bool()))
}
