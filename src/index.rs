use log::{debug, info, warn};
use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Source image extensions the index manages: opaque raster, lossy raster,
/// and pre-compressed containers.
const MANAGED_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "dds"];

/// One indexed source asset: where it lives and how big the original is.
#[derive(Debug, Clone)]
pub struct AssetEntry {
    pub path: PathBuf,
    pub original_size: u64,
}

pub type AssetMap = FxHashMap<String, AssetEntry>;

/// Normalizes a texture name the way index keys are built: forward slashes,
/// ASCII lowercase, any recognized image extension stripped. Scene-provided
/// names go through this before lookup, so a surface referencing `Wall.PNG`
/// finds the key `wall`. Dots that are not a managed extension (version
/// suffixes, decimal names) are left alone.
pub fn normalize_name(name: &str) -> String {
    let mut s = name.replace('\\', "/").to_ascii_lowercase();
    if let Some(dot) = s.rfind('.')
        && MANAGED_EXTENSIONS.contains(&&s[dot + 1..])
    {
        s.truncate(dot);
    }
    s
}

/// Derives the logical key for a source file: path relative to the asset
/// root, extension stripped, separators canonicalized, case-insensitive.
/// Shares [`normalize_name`] so a key and a lookup of the same name can
/// never disagree.
pub fn texture_key(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    normalize_name(&rel.to_string_lossy())
}

#[inline(always)]
fn has_ascii_case_insensitive_substr(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty()
        && haystack
            .windows(needle.len())
            .any(|window| window.eq_ignore_ascii_case(needle))
}

fn is_managed_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| {
            MANAGED_EXTENSIONS
                .iter()
                .any(|m| ext.eq_ignore_ascii_case(m))
        })
}

/// Cooperative, resumable scan of the asset root.
///
/// Each [`step`](Self::step) call processes a bounded number of directory
/// entries so the host's frame loop stays responsive with thousands of
/// assets. The table under construction is private until
/// [`finish`](Self::finish): callers always observe either the previous
/// mapping or the complete new one, never a partial scan.
pub struct ScanTask {
    root: PathBuf,
    blacklist: Vec<String>,
    dirs: Vec<PathBuf>,
    files: Vec<PathBuf>,
    building: AssetMap,
    skipped: usize,
    started: Instant,
}

impl ScanTask {
    pub fn new(root: &Path, blacklist: &[String]) -> Self {
        Self {
            root: root.to_path_buf(),
            blacklist: blacklist.to_vec(),
            dirs: vec![root.to_path_buf()],
            files: Vec::new(),
            building: AssetMap::default(),
            skipped: 0,
            started: Instant::now(),
        }
    }

    /// Processes up to `budget` directory entries. Returns true once the walk
    /// is exhausted and [`finish`](Self::finish) may be called.
    pub fn step(&mut self, budget: usize) -> bool {
        let mut remaining = budget.max(1);
        while remaining > 0 {
            if let Some(file) = self.files.pop() {
                self.process_file(file);
                remaining -= 1;
            } else if let Some(dir) = self.dirs.pop() {
                self.expand_dir(&dir);
                remaining -= 1;
            } else {
                return true;
            }
        }
        self.dirs.is_empty() && self.files.is_empty()
    }

    /// Consumes the task, logging a scan summary and yielding the complete
    /// key table as one atomic replacement.
    pub fn finish(self) -> AssetMap {
        info!(
            "Asset scan of '{}' finished: {} managed, {} skipped, in {:.2}s.",
            self.root.display(),
            self.building.len(),
            self.skipped,
            self.started.elapsed().as_secs_f64()
        );
        self.building
    }

    fn expand_dir(&mut self, dir: &Path) {
        let entries = match std::fs::read_dir(dir) {
            Ok(e) => e,
            Err(e) => {
                warn!("Could not read directory '{}': {e}. Skipping.", dir.display());
                return;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                self.dirs.push(path);
            } else {
                self.files.push(path);
            }
        }
    }

    fn process_file(&mut self, path: PathBuf) {
        if !is_managed_extension(&path) {
            return;
        }

        if let Some(name) = path.file_name().and_then(|n| n.to_str())
            && self
                .blacklist
                .iter()
                .any(|b| has_ascii_case_insensitive_substr(name.as_bytes(), b.as_bytes()))
        {
            debug!("Blacklisted asset skipped: '{}'", path.display());
            self.skipped += 1;
            return;
        }

        let original_size = match std::fs::metadata(&path) {
            Ok(m) => m.len(),
            Err(e) => {
                warn!("Could not stat '{}': {e}. Skipping.", path.display());
                self.skipped += 1;
                return;
            }
        };

        let key = texture_key(&self.root, &path);
        match self.building.get_mut(&key) {
            // Normalization collisions (extension variants, case-only
            // differences) keep the lexicographically smallest source path.
            Some(existing) => {
                if path < existing.path {
                    debug!(
                        "Key '{key}' collision: '{}' replaces '{}'.",
                        path.display(),
                        existing.path.display()
                    );
                    *existing = AssetEntry {
                        path,
                        original_size,
                    };
                } else {
                    debug!(
                        "Key '{key}' collision: keeping '{}' over '{}'.",
                        existing.path.display(),
                        path.display()
                    );
                }
            }
            None => {
                self.building.insert(
                    key,
                    AssetEntry {
                        path,
                        original_size,
                    },
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ScanTask, normalize_name, texture_key};
    use std::fs;
    use std::path::Path;

    fn touch(path: &Path, len: usize) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, vec![0u8; len]).unwrap();
    }

    fn run_to_completion(mut task: ScanTask) -> super::AssetMap {
        while !task.step(4) {}
        task.finish()
    }

    #[test]
    fn keys_are_relative_lowercase_and_extension_free() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(&root.join("Terrain/Rock_Cliff.PNG"), 64);

        let map = run_to_completion(ScanTask::new(root, &[]));
        let entry = map.get("terrain/rock_cliff").expect("key should be indexed");
        assert_eq!(entry.original_size, 64);
        assert_eq!(entry.path, root.join("Terrain/Rock_Cliff.PNG"));
    }

    #[test]
    fn unmanaged_extensions_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("notes.txt"), 10);
        touch(&dir.path().join("mesh.obj"), 10);
        touch(&dir.path().join("tex.jpeg"), 10);

        let map = run_to_completion(ScanTask::new(dir.path(), &[]));
        assert_eq!(map.len(), 1);
        assert!(map.contains_key("tex"));
    }

    #[test]
    fn blacklist_matches_bare_filename_case_insensitively() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("gui/UI_MainIcon.png"), 10);
        touch(&dir.path().join("gui/background.png"), 10);

        let blacklist = vec!["ui_".to_string()];
        let map = run_to_completion(ScanTask::new(dir.path(), &blacklist));
        assert!(!map.contains_key("gui/ui_mainicon"));
        assert!(map.contains_key("gui/background"));
    }

    #[test]
    fn key_collisions_keep_smallest_source_path() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("rock.png"), 10);
        touch(&dir.path().join("rock.jpg"), 20);

        let map = run_to_completion(ScanTask::new(dir.path(), &[]));
        let entry = map.get("rock").expect("collided key should survive once");
        assert_eq!(entry.path, dir.path().join("rock.jpg"));
        assert_eq!(entry.original_size, 20);
    }

    #[test]
    fn scan_yields_between_bounded_steps() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..12 {
            touch(&dir.path().join(format!("sub{i}/tex{i}.png")), 8);
        }

        let mut task = ScanTask::new(dir.path(), &[]);
        let mut steps = 0usize;
        while !task.step(1) {
            steps += 1;
            assert!(steps < 1000, "scan task must terminate");
        }
        assert!(steps > 1, "single-entry budget should need several steps");
        assert_eq!(task.finish().len(), 12);
    }

    #[test]
    fn name_normalization_matches_key_derivation() {
        assert_eq!(normalize_name("Terrain\\Rock"), "terrain/rock");
        let root = Path::new("/assets");
        assert_eq!(
            texture_key(root, Path::new("/assets/A/B.png")),
            normalize_name("a/b")
        );
    }

    #[test]
    fn normalization_strips_only_recognized_extensions() {
        assert_eq!(normalize_name("Wall.PNG"), "wall");
        assert_eq!(normalize_name("fx/glow.dds"), "fx/glow");
        // Dots that are not an image extension stay part of the key.
        assert_eq!(normalize_name("rock.v2"), "rock.v2");
        assert_eq!(normalize_name("ver1.5/wall.jpeg"), "ver1.5/wall");
        // Extension-free names pass through, so both spellings collide on
        // the same key as the index builds.
        let root = Path::new("/assets");
        assert_eq!(
            texture_key(root, Path::new("/assets/Wall.png")),
            normalize_name("wall")
        );
    }
}
