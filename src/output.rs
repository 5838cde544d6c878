//! Writes rendered bitmaps to `<root>/<category>/<test>/actual.png`.

use std::fs;
use std::io::Cursor;
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

use image::{ImageFormat, RgbaImage};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::definition::TestId;
use crate::{Error, Result};

/// File name of a rendered result inside its test directory.
pub const ACTUAL_FILE: &str = "actual.png";
/// File name of the run manifest at the output root.
pub const MANIFEST_FILE: &str = "results.json";

/// Location and digest of one written result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WrittenResult {
    pub path: PathBuf,
    pub sha256: String,
}

/// Owns an output root and lays results out beneath it.
#[derive(Debug, Clone)]
pub struct ResultWriter {
    root: PathBuf,
}

impl ResultWriter {
    /// Prepare `root` for a fresh run: results of a previous run are deleted.
    ///
    /// Refuses roots that [`check_output_root`] rejects.
    pub fn prepare(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        check_output_root(&root)?;
        if root.exists() {
            log::debug!("removing previous results at {}", root.display());
            let removed = if root.is_dir() {
                fs::remove_dir_all(&root)
            } else {
                fs::remove_file(&root)
            };
            removed.map_err(|e| Error::output(&root, format!("can't delete old results: {}", e)))?;
        }
        fs::create_dir_all(&root)
            .map_err(|e| Error::output(&root, format!("can't create root directory: {}", e)))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory that holds the result of `id`.
    pub fn test_dir(&self, id: &TestId) -> PathBuf {
        self.root.join(&id.category).join(&id.name)
    }

    /// Encode `image` as PNG and write it for `id`.
    pub fn write(&self, id: &TestId, image: &RgbaImage) -> Result<WrittenResult> {
        let dir = self.test_dir(id);
        fs::create_dir_all(&dir)
            .map_err(|e| Error::output(&dir, format!("can't create directory for {}: {}", id, e)))?;

        let png = encode_png(image)?;
        let path = dir.join(ACTUAL_FILE);
        fs::write(&path, &png).map_err(|e| Error::output(&path, e))?;

        Ok(WrittenResult {
            path,
            sha256: hex::encode(Sha256::digest(&png)),
        })
    }

    /// Serialize `manifest` as pretty JSON at `<root>/results.json`.
    pub fn write_manifest<T: Serialize>(&self, manifest: &T) -> Result<PathBuf> {
        let path = self.root.join(MANIFEST_FILE);
        let json = serde_json::to_vec_pretty(manifest)?;
        fs::write(&path, json).map_err(|e| Error::output(&path, e))?;
        Ok(path)
    }
}

/// Reject output roots whose removal would take unrelated data with it: a
/// filesystem root, or the working directory and its ancestors (`.`, `..`).
pub fn check_output_root(root: &Path) -> Result<PathBuf> {
    let resolved = resolve_path(root)?;
    if resolved.parent().is_none() {
        return Err(Error::output(root, "refusing to use a filesystem root as output"));
    }
    let cwd = resolve_path(Path::new("."))?;
    if cwd.starts_with(&resolved) {
        return Err(Error::output(root, "refusing to use the working directory or its parent as output"));
    }
    Ok(resolved)
}

/// Absolute, symlink-free form of `path`, which need not exist yet.
///
/// `.` and `..` are applied first, then the nearest existing ancestor is
/// canonicalized and the missing components are appended to it.
pub fn resolve_path(path: &Path) -> Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                // `..` steps out of the symlink target, not the link.
                if let Ok(real) = normalized.canonicalize() {
                    normalized = real;
                }
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }

    let mut missing: Vec<OsString> = Vec::new();
    let mut existing = normalized.as_path();
    loop {
        if let Ok(mut real) = existing.canonicalize() {
            real.extend(missing.iter().rev());
            return Ok(real);
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name.to_os_string());
                existing = parent;
            }
            _ => return Ok(normalized),
        }
    }
}

/// PNG bytes for `image`.
pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;
    use tempfile::TempDir;

    #[test]
    fn prepare_clears_previous_results() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("results");
        fs::create_dir_all(root.join("old/test")).unwrap();
        fs::write(root.join("old/test/actual.png"), b"stale").unwrap();

        let writer = ResultWriter::prepare(&root).unwrap();
        assert!(writer.root().is_dir());
        assert!(!root.join("old").exists());
    }

    #[test]
    fn working_directory_and_roots_are_refused() {
        assert!(matches!(check_output_root(Path::new(".")), Err(Error::Output { .. })));
        assert!(matches!(check_output_root(Path::new("..")), Err(Error::Output { .. })));
        assert!(matches!(check_output_root(Path::new("src/..")), Err(Error::Output { .. })));
        let root = resolve_path(Path::new(".")).unwrap().ancestors().last().unwrap().to_path_buf();
        assert!(matches!(check_output_root(&root), Err(Error::Output { .. })));
    }

    #[test]
    fn resolve_path_handles_missing_and_parent_components() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().canonicalize().unwrap();
        fs::create_dir_all(tmp.path().join("out")).unwrap();

        assert_eq!(resolve_path(&tmp.path().join("out/..")).unwrap(), base);
        assert_eq!(
            resolve_path(&tmp.path().join("missing/deeper")).unwrap(),
            base.join("missing/deeper")
        );
        assert_eq!(
            resolve_path(&tmp.path().join("missing/../out/./x")).unwrap(),
            base.join("out/x")
        );
        assert_eq!(check_output_root(&tmp.path().join("out")).unwrap(), base.join("out"));
    }

    #[test]
    fn writes_png_under_category_and_name() {
        let tmp = TempDir::new().unwrap();
        let writer = ResultWriter::prepare(tmp.path().join("out")).unwrap();
        let image = RgbaImage::from_pixel(4, 3, Rgba([10, 20, 30, 255]));

        let id = TestId::new("background-color", "literal");
        let written = writer.write(&id, &image).unwrap();
        assert_eq!(written.path, tmp.path().join("out/background-color/literal/actual.png"));
        assert_eq!(written.sha256.len(), 64);

        let decoded = image::open(&written.path).unwrap().into_rgba8();
        assert_eq!(decoded, image);
    }

    #[test]
    fn second_test_in_category_reuses_directory() {
        let tmp = TempDir::new().unwrap();
        let writer = ResultWriter::prepare(tmp.path().join("out")).unwrap();
        let image = RgbaImage::new(1, 1);
        writer.write(&TestId::new("cat", "a"), &image).unwrap();
        writer.write(&TestId::new("cat", "b"), &image).unwrap();
        let mut names: Vec<_> = fs::read_dir(tmp.path().join("out/cat"))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        names.sort();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn identical_images_share_a_digest() {
        let image = RgbaImage::from_pixel(2, 2, Rgba([1, 2, 3, 4]));
        let a = hex::encode(Sha256::digest(encode_png(&image).unwrap()));
        let b = hex::encode(Sha256::digest(encode_png(&image.clone()).unwrap()));
        assert_eq!(a, b);
    }

    #[test]
    fn manifest_is_written_at_root() {
        let tmp = TempDir::new().unwrap();
        let writer = ResultWriter::prepare(tmp.path().join("out")).unwrap();
        let path = writer
            .write_manifest(&serde_json::json!({ "tests": [] }))
            .unwrap();
        assert_eq!(path, tmp.path().join("out").join(MANIFEST_FILE));
        let v: serde_json::Value = serde_json::from_slice(&fs::read(path).unwrap()).unwrap();
        assert!(v["tests"].as_array().unwrap().is_empty());
    }
}
