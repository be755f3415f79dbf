//! Installing plugin packages from uploaded archives.
//!
//! An upload is extracted into a temporary staging directory, rejecting any
//! entry whose path would escape it. The staged tree must contain exactly
//! one plugin root, which is copied into the plugins directory under its own
//! name. Loading the installed plugin is the caller's job.

use std::io::{Read, Seek};
use std::path::{Component, Path, PathBuf};

use tracing::info;

use super::error::PluginError;
use super::manifest::{PluginManifest, is_plugin_root};

/// Staged trees deeper than this are not searched for plugin roots.
const MAX_SEARCH_DEPTH: usize = 8;

/// Install the plugin contained in the archive `file_name` with bytes
/// `data` into `plugins_dir`.
///
/// Returns the installed plugin's name.
pub fn install_archive(
    plugins_dir: &Path,
    file_name: &str,
    data: &[u8],
) -> Result<String, PluginError> {
    if !is_supported_archive(file_name) {
        return Err(PluginError::UnsupportedArchive {
            file_name: file_name.to_string(),
        });
    }

    let temp = tempfile::tempdir()?;
    let staging = temp.path().join("staging");
    std::fs::create_dir_all(&staging)?;

    extract_zip(std::io::Cursor::new(data), &staging)?;

    let plugin_root = find_single_plugin_root(&staging)?;
    let manifest = PluginManifest::load(&plugin_root)?;
    let name = manifest.name;

    let dest = plugins_dir.join(&name);
    if dest.exists() {
        return Err(PluginError::AlreadyExists { plugin: name });
    }

    std::fs::create_dir_all(plugins_dir)?;
    copy_dir_recursive(&plugin_root, &dest)?;

    info!(plugin = %name, dest = %dest.display(), "installed plugin package");
    Ok(name)
}

/// Only zip archives are accepted.
pub fn is_supported_archive(file_name: &str) -> bool {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("zip"))
}

/// Extract a zip archive into `out_dir`.
///
/// Every entry is checked before anything is written: absolute paths and
/// `..` components are rejected, so a crafted archive cannot place files
/// outside `out_dir`.
pub fn extract_zip<R: Read + Seek>(reader: R, out_dir: &Path) -> Result<(), PluginError> {
    let mut archive = zip::ZipArchive::new(reader).map_err(|e| PluginError::InvalidArchive {
        details: e.to_string(),
    })?;

    let mut entries = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let entry = archive
            .by_index(index)
            .map_err(|e| PluginError::InvalidArchive {
                details: e.to_string(),
            })?;
        let relative = safe_entry_path(entry.name())?;
        entries.push((index, relative, entry.is_dir()));
    }

    for (index, relative, is_dir) in entries {
        let out_path = out_dir.join(&relative);
        if !out_path.starts_with(out_dir) {
            return Err(PluginError::UnsafeArchivePath {
                entry: relative.display().to_string(),
            });
        }

        if is_dir {
            std::fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut entry = archive
            .by_index(index)
            .map_err(|e| PluginError::InvalidArchive {
                details: e.to_string(),
            })?;
        let mut out = std::fs::File::create(&out_path)?;
        std::io::copy(&mut entry, &mut out)?;
    }

    Ok(())
}

/// Validate an archive entry name and return it as a relative path.
fn safe_entry_path(name: &str) -> Result<PathBuf, PluginError> {
    let unsafe_path = || PluginError::UnsafeArchivePath {
        entry: name.to_string(),
    };

    // Archives built on Windows may use backslashes as separators.
    let normalized = name.replace('\\', "/");
    let path = Path::new(&normalized);

    let mut relative = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(unsafe_path());
            }
        }
    }

    if relative.as_os_str().is_empty() {
        return Err(unsafe_path());
    }
    Ok(relative)
}

/// Find the one directory under `staging` that is a plugin root.
fn find_single_plugin_root(staging: &Path) -> Result<PathBuf, PluginError> {
    let mut roots: Vec<PathBuf> = walkdir::WalkDir::new(staging)
        .follow_links(false)
        .max_depth(MAX_SEARCH_DEPTH)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir() && e.path() != staging)
        .map(|e| e.into_path())
        .filter(|dir| is_plugin_root(dir))
        .collect();

    match roots.len() {
        1 => Ok(roots.remove(0)),
        found => Err(PluginError::PluginRootCount { found }),
    }
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<(), PluginError> {
    std::fs::create_dir_all(dst)?;
    for entry in walkdir::WalkDir::new(src)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if path == src {
            continue;
        }
        let Ok(rel) = path.strip_prefix(src) else {
            continue;
        };
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(path, &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn build_zip(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        for (name, content) in entries {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn only_zip_is_supported() {
        assert!(is_supported_archive("alpha.zip"));
        assert!(is_supported_archive("ALPHA.ZIP"));
        assert!(!is_supported_archive("alpha.tar.gz"));
        assert!(!is_supported_archive("alpha"));
    }

    #[test]
    fn entry_paths_are_validated() {
        assert_eq!(
            safe_entry_path("alpha/migrations/0001_init.sql").unwrap(),
            PathBuf::from("alpha/migrations/0001_init.sql")
        );
        assert_eq!(
            safe_entry_path("./alpha/alpha.info.toml").unwrap(),
            PathBuf::from("alpha/alpha.info.toml")
        );
        assert!(safe_entry_path("../../etc/passthrough").is_err());
        assert!(safe_entry_path("alpha/../../escape").is_err());
        assert!(safe_entry_path("/etc/passwd").is_err());
        assert!(safe_entry_path("..\\..\\evil").is_err());
        assert!(safe_entry_path("").is_err());
    }

    #[test]
    fn traversal_entry_rejects_whole_archive_before_writing() {
        let data = build_zip(&[
            ("alpha/alpha.info.toml", r#"name = "alpha""#),
            ("../../etc/passthrough", "owned"),
        ]);
        let root = tempfile::tempdir().unwrap();
        let staging = root.path().join("staging");
        std::fs::create_dir_all(&staging).unwrap();

        let err = extract_zip(std::io::Cursor::new(data), &staging).unwrap_err();
        assert!(matches!(err, PluginError::UnsafeArchivePath { .. }));
        // Nothing was extracted, not even the safe entry.
        assert_eq!(std::fs::read_dir(&staging).unwrap().count(), 0);
        assert!(!root.path().join("etc").exists());
    }

    #[test]
    fn install_copies_single_plugin_root() {
        let data = build_zip(&[
            ("bundle/alpha/alpha.info.toml", r#"name = "alpha""#),
            ("bundle/alpha/migrations/0001_init.sql", "SELECT 1;"),
            ("bundle/README.txt", "docs"),
        ]);
        let plugins = tempfile::tempdir().unwrap();

        let name = install_archive(plugins.path(), "alpha.zip", &data).unwrap();
        assert_eq!(name, "alpha");
        assert!(plugins.path().join("alpha/alpha.info.toml").is_file());
        assert!(plugins.path().join("alpha/migrations/0001_init.sql").is_file());
        assert!(!plugins.path().join("README.txt").exists());
    }

    #[test]
    fn install_rejects_existing_destination() {
        let data = build_zip(&[("alpha/alpha.info.toml", r#"name = "alpha""#)]);
        let plugins = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(plugins.path().join("alpha")).unwrap();

        let err = install_archive(plugins.path(), "alpha.zip", &data).unwrap_err();
        assert!(matches!(err, PluginError::AlreadyExists { plugin } if plugin == "alpha"));
    }

    #[test]
    fn install_requires_exactly_one_plugin_root() {
        let plugins = tempfile::tempdir().unwrap();

        let none = build_zip(&[("docs/readme.txt", "nothing here")]);
        let err = install_archive(plugins.path(), "none.zip", &none).unwrap_err();
        assert!(matches!(err, PluginError::PluginRootCount { found: 0 }));

        let two = build_zip(&[
            ("alpha/alpha.info.toml", r#"name = "alpha""#),
            ("beta/beta.info.toml", r#"name = "beta""#),
        ]);
        let err = install_archive(plugins.path(), "two.zip", &two).unwrap_err();
        assert!(matches!(err, PluginError::PluginRootCount { found: 2 }));
        assert_eq!(std::fs::read_dir(plugins.path()).unwrap().count(), 0);
    }

    #[test]
    fn install_rejects_unsupported_format() {
        let plugins = tempfile::tempdir().unwrap();
        let err = install_archive(plugins.path(), "alpha.tar", b"not a zip").unwrap_err();
        assert!(matches!(err, PluginError::UnsupportedArchive { .. }));
    }

    #[test]
    fn garbage_bytes_are_an_invalid_archive() {
        let plugins = tempfile::tempdir().unwrap();
        let err = install_archive(plugins.path(), "alpha.zip", b"not a zip").unwrap_err();
        assert!(matches!(err, PluginError::InvalidArchive { .. }));
    }
}
