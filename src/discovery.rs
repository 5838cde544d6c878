//! Fixture discovery.
//!
//! Fixtures live in a two-level tree:
//!
//! ```text
//! <base>/<category>/<test>/style.json
//! ```
//!
//! Both levels are visited in lexicographic order so that runs are
//! reproducible regardless of the platform's directory ordering.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::definition::RenderTestDefinition;
use crate::{Error, Result};

/// File name of the style document inside a test directory.
pub const STYLE_FILE: &str = "style.json";

/// Which fixtures to pick up.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DiscoveryOptions {
    /// Only keep tests whose `category/name` contains this substring
    pub filter: Option<String>,
    /// Stop after this many definitions
    pub limit: Option<usize>,
    /// Keep fixtures whose metadata marks them as ignored
    pub include_ignored: bool,
}

impl DiscoveryOptions {
    fn matches(&self, category: &str, name: &str) -> bool {
        match &self.filter {
            Some(f) => format!("{}/{}", category, name).contains(f.as_str()),
            None => true,
        }
    }

    fn is_full(&self, count: usize) -> bool {
        self.limit.is_some_and(|limit| count >= limit)
    }
}

/// Enumerate every fixture under `base`.
pub fn discover(base: &Path, options: &DiscoveryOptions) -> Result<Vec<RenderTestDefinition>> {
    if !base.is_dir() {
        return Err(Error::Discovery(format!(
            "{} is not a directory",
            base.display()
        )));
    }

    let mut definitions = Vec::new();
    'categories: for category in sorted_subdirs(base)? {
        for test in sorted_subdirs(&base.join(&category))? {
            if options.is_full(definitions.len()) {
                break 'categories;
            }
            if !options.matches(&category, &test) {
                continue;
            }
            let definition = load_definition(base, &category, &test);
            if definition.style().is_ignored() && !options.include_ignored {
                log::debug!("ignoring {}", definition.id());
                continue;
            }
            definitions.push(definition);
        }
    }

    for definition in &definitions {
        log::debug!("discovered {}", definition);
    }
    Ok(definitions)
}

/// Load one fixture. Read and parse failures are logged and produce an
/// unreadable definition instead of aborting discovery.
pub fn load_definition(base: &Path, category: &str, test: &str) -> RenderTestDefinition {
    let path = style_path(base, category, test);
    let style_json = match fs::read_to_string(&path) {
        Ok(json) => json,
        Err(e) => {
            log::error!("cannot read {}: {}", path.display(), e);
            return RenderTestDefinition::unreadable(
                category,
                test,
                format!("cannot read {}: {}", STYLE_FILE, e),
            );
        }
    };
    match RenderTestDefinition::new(category, test, Some(style_json)) {
        Ok(definition) => definition,
        Err(e) => {
            log::error!("{}", e);
            RenderTestDefinition::unreadable(category, test, e.to_string())
        }
    }
}

pub fn style_path(base: &Path, category: &str, test: &str) -> PathBuf {
    base.join(category).join(test).join(STYLE_FILE)
}

fn sorted_subdirs(dir: &Path) -> Result<Vec<String>> {
    let entries = fs::read_dir(dir)
        .map_err(|e| Error::Discovery(format!("cannot list {}: {}", dir.display(), e)))?;
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        match entry.file_name().into_string() {
            Ok(name) => names.push(name),
            Err(raw) => log::warn!("skipping non UTF-8 fixture directory {:?}", raw),
        }
    }
    names.sort();
    Ok(names)
}
