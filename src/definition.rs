//! Render-test definitions: a test identity plus its parsed style document.

use std::fmt;

use crate::snapshot::SnapshotOptions;
use crate::style::StyleDefinition;
use crate::{Error, Result};

/// Width used when a fixture does not specify one.
pub const DEFAULT_WIDTH: u32 = 512;
/// Height used when a fixture does not specify one.
pub const DEFAULT_HEIGHT: u32 = 512;
pub const DEFAULT_PIXEL_RATIO: f64 = 1.0;

/// Identity of a render test, e.g. `background-color/colorSpace-hcl`.
///
/// Ordered by category then name so result maps iterate deterministically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TestId {
    pub category: String,
    pub name: String,
}

impl TestId {
    pub fn new(category: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for TestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.category, self.name)
    }
}

/// A single fixture ready to be rendered.
#[derive(Debug, Clone)]
pub struct RenderTestDefinition {
    id: TestId,
    style_json: Option<String>,
    style: StyleDefinition,
    load_error: Option<String>,
}

impl RenderTestDefinition {
    /// Build a definition, parsing `style_json` when present.
    ///
    /// A fixture without a style document still yields a definition (with
    /// default dimensions) so the runner can report it.
    pub fn new(
        category: impl Into<String>,
        name: impl Into<String>,
        style_json: Option<String>,
    ) -> Result<Self> {
        let id = TestId::new(category, name);
        let style = match style_json.as_deref() {
            Some(json) => StyleDefinition::parse(json).map_err(|source| Error::Style {
                test: id.to_string(),
                source,
            })?,
            None => StyleDefinition::default(),
        };
        Ok(Self {
            id,
            style_json,
            style,
            load_error: None,
        })
    }

    /// A fixture whose style document could not be loaded or parsed.
    pub fn unreadable(
        category: impl Into<String>,
        name: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id: TestId::new(category, name),
            style_json: None,
            style: StyleDefinition::default(),
            load_error: Some(reason.into()),
        }
    }

    pub fn id(&self) -> &TestId {
        &self.id
    }

    pub fn category(&self) -> &str {
        &self.id.category
    }

    pub fn name(&self) -> &str {
        &self.id.name
    }

    pub fn style_json(&self) -> Option<&str> {
        self.style_json.as_deref()
    }

    pub fn style(&self) -> &StyleDefinition {
        &self.style
    }

    pub fn has_style(&self) -> bool {
        self.style_json.is_some()
    }

    /// Why the style document is missing, if it is.
    pub fn load_error(&self) -> Option<&str> {
        self.load_error.as_deref()
    }

    /// `metadata.test.width` when positive, otherwise [`DEFAULT_WIDTH`].
    pub fn width(&self) -> u32 {
        positive_dimension(self.style.test_metadata().and_then(|t| t.width)).unwrap_or(DEFAULT_WIDTH)
    }

    /// `metadata.test.height` when positive, otherwise [`DEFAULT_HEIGHT`].
    pub fn height(&self) -> u32 {
        positive_dimension(self.style.test_metadata().and_then(|t| t.height))
            .unwrap_or(DEFAULT_HEIGHT)
    }

    pub fn pixel_ratio(&self) -> f64 {
        self.style
            .test_metadata()
            .and_then(|t| t.pixel_ratio)
            .filter(|r| r.is_finite() && *r > 0.0)
            .unwrap_or(DEFAULT_PIXEL_RATIO)
    }

    /// Snapshot options for this fixture. The logo is never drawn in tests.
    pub fn to_options(&self) -> SnapshotOptions {
        SnapshotOptions {
            width: self.width(),
            height: self.height(),
            pixel_ratio: self.pixel_ratio(),
            style_json: self.style_json.clone().unwrap_or_default(),
            show_logo: false,
        }
    }
}

fn positive_dimension(value: Option<i64>) -> Option<u32> {
    value
        .filter(|v| *v > 0)
        .map(|v| u32::try_from(v).unwrap_or(u32::MAX))
}

impl fmt::Display for RenderTestDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RenderTestDefinition{{category='{}', name='{}'}}",
            self.id.category, self.id.name
        )
    }
}
