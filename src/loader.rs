use crate::TexError;
use crate::codec::{self, CompressVariant, MAX_TEXTURE_EDGE, Texture, TextureFormat};
use crate::config::Config;
use crate::hash::path_digest;
use crate::index::{self, AssetMap, ScanTask};
use crate::pool::TexturePool;
use log::{debug, info, warn};
use rustc_hash::{FxHashMap, FxHashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

/// Cache artifacts are DDS containers; the extension keeps them inspectable
/// with common texture tools.
pub const CACHE_EXTENSION: &str = "dds";

/// Directory entries processed per scan tick.
const SCAN_STEP_BUDGET: usize = 64;
/// Textures loaded per pre-cache tick. Compression dominates, so this is
/// much smaller than the scan budget.
const PRECACHE_STEP_BUDGET: usize = 4;

/// The host's view of its live object graph, injected rather than subscribed
/// to: the host calls [`TextureLoader::on_graph_changed`] with this whenever
/// a scene loads, an object is built or modified, or the active object
/// switches.
pub trait SceneSource {
    /// Texture names referenced by the currently-live rendering surfaces.
    /// Names may carry a recognized image extension (`wall.png`) or not
    /// (`wall`); both resolve to the same key.
    fn referenced_textures(&self) -> Vec<String>;
}

/// Read-only status snapshot for host overlays.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoaderStats {
    pub managed: usize,
    pub resident: usize,
    pub pooled: usize,
    /// Actual in-memory footprint of resident pixel payloads.
    pub resident_bytes: u64,
    /// Sum of original source file sizes of resident keys.
    pub original_bytes: u64,
    /// Estimated savings in MB. Signed and unclamped: small or already-compact
    /// sources can make this negative.
    pub memory_saved_mb: f64,
}

enum ActiveTask {
    Idle,
    Scan(ScanTask),
    Precache {
        keys: Vec<String>,
        next: usize,
        loaded: usize,
        started: Instant,
    },
}

/// The on-demand loader: owns the asset index, the resident-texture table,
/// the required set and the reuse pool.
///
/// Everything runs on one logical thread, interleaved with the host's frame
/// loop: long operations (index scans, bulk pre-caching) are cooperative
/// tasks pumped by [`tick`](Self::tick), and a single `get` completes within
/// one scheduling quantum, so no `get` can observe a half-loaded key.
pub struct TextureLoader {
    asset_root: PathBuf,
    cache_dir: PathBuf,
    config: Config,
    assets: AssetMap,
    resident: FxHashMap<String, Arc<Texture>>,
    required: FxHashSet<String>,
    pool: TexturePool,
    pooling: bool,
    downscaling: bool,
    last_gc: Instant,
    task: ActiveTask,
}

impl TextureLoader {
    /// Creates the loader, ensures the cache directory exists, and starts the
    /// initial cooperative index scan. The host drives the scan (and all
    /// later background work) through [`tick`](Self::tick).
    pub fn new(asset_root: &Path, cache_dir: &Path, config: Config) -> Self {
        if let Err(e) = std::fs::create_dir_all(cache_dir) {
            warn!(
                "Could not create cache directory '{}': {e}. Artifact writes will fail.",
                cache_dir.display()
            );
        }
        info!(
            "Texture loader starting: assets under '{}', cache under '{}'.",
            asset_root.display(),
            cache_dir.display()
        );
        let task = ActiveTask::Scan(ScanTask::new(asset_root, &config.blacklist));
        Self {
            asset_root: asset_root.to_path_buf(),
            cache_dir: cache_dir.to_path_buf(),
            config,
            assets: AssetMap::default(),
            resident: FxHashMap::default(),
            required: FxHashSet::default(),
            pool: TexturePool::default(),
            pooling: false,
            downscaling: false,
            last_gc: Instant::now(),
            task,
        }
    }

    /// Returns the texture for `name`, loading and caching it on first use.
    ///
    /// Unmanaged names yield `None`. A resident key returns the existing
    /// handle with no I/O. Otherwise the on-disk artifact is tried first
    /// (corrupt artifacts are deleted and recompressed from source), then the
    /// source file is decoded, optionally downscaled, compressed and written
    /// back to the cache. Failures are logged and leave the key unloaded;
    /// the next `get` retries from scratch.
    pub fn get(&mut self, name: &str) -> Option<Arc<Texture>> {
        let key = index::normalize_name(name);
        if let Some(tex) = self.resident.get(&key) {
            return Some(Arc::clone(tex));
        }
        let entry = self.assets.get(&key)?.clone();

        match self.load_entry(&key, &entry.path) {
            Ok(tex) => {
                let handle = Arc::new(tex);
                self.resident.insert(key, Arc::clone(&handle));
                Some(handle)
            }
            Err(e) => {
                warn!(
                    "Failed to load texture '{key}' from '{}': {e}. Skipping.",
                    entry.path.display()
                );
                None
            }
        }
    }

    fn load_entry(&mut self, key: &str, source: &Path) -> Result<Texture, TexError> {
        let artifact = self.artifact_path_for_source(source);
        if artifact.is_file() {
            match std::fs::read(&artifact)
                .map_err(TexError::from)
                .and_then(|bytes| {
                    // Shop the pool before the payload copy so reloads from
                    // disk consume pooled buffers just like fresh compression.
                    let (w, h, format) = codec::container_header(&bytes)?;
                    let scratch = self.pool.acquire(w, h, format).map(|t| t.data);
                    codec::decode_container(&bytes, scratch)
                })
            {
                Ok(tex) => {
                    debug!("Cache hit for '{key}'.");
                    return Ok(tex);
                }
                Err(e) => {
                    warn!("Cache artifact for '{key}' unusable ({e}); recompressing from source.");
                    if let Err(e) = std::fs::remove_file(&artifact) {
                        warn!(
                            "Could not delete stale artifact '{}': {e}",
                            artifact.display()
                        );
                    }
                }
            }
        }

        let bytes = std::fs::read(source).map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                TexError::SourceMissing(source.to_path_buf())
            } else {
                TexError::Io(e)
            }
        })?;
        let mut img = codec::decode(&bytes)?;
        if self.downscaling {
            img = codec::downscale_to_limit(img, MAX_TEXTURE_EDGE);
        }

        let is_normal_map = self
            .config
            .normal_map_suffixes
            .iter()
            .any(|suffix| key.ends_with(suffix.as_str()));
        let variant = if is_normal_map || codec::has_alpha(&img) {
            CompressVariant::AlphaOrNormal
        } else {
            CompressVariant::Opaque
        };
        if is_normal_map {
            codec::repack_normal(&mut img);
        }

        let out_format = codec::output_format(img.width(), img.height(), variant);
        let scratch = self
            .pool
            .acquire(img.width(), img.height(), out_format)
            .map(|t| t.data);
        let tex = codec::compress(&img, variant, scratch);

        // Tiny textures stay uncompressed and are cheaper to re-decode than
        // to round-trip through the container, so only block formats hit disk.
        if tex.format != TextureFormat::Rgba8 {
            match codec::encode_container(&tex) {
                Ok(container) => {
                    if let Err(e) = std::fs::write(&artifact, &container) {
                        warn!(
                            "Failed to write cache artifact '{}': {e}. Texture stays resident.",
                            artifact.display()
                        );
                    }
                }
                Err(e) => warn!("Could not containerize '{key}': {e}"),
            }
        }
        Ok(tex)
    }

    /// Rebuilds the required set from the injected scene and forces every
    /// indexed, referenced key resident. Names missing from the index pass
    /// through untouched. Call on every live-graph change.
    pub fn on_graph_changed(&mut self, scene: &dyn SceneSource) {
        self.required.clear();
        for name in scene.referenced_textures() {
            let key = index::normalize_name(&name);
            if self.assets.contains_key(&key) {
                self.required.insert(key.clone());
                self.get(&key);
            }
        }
        debug!("Required set rebuilt: {} keys.", self.required.len());
    }

    /// Evicts every resident key outside the required set. With pooling
    /// enabled, sole-owner buffers move into the pool instead of dropping.
    /// The periodic variant is suppressed while a pre-cache pass is filling
    /// the resident table.
    pub fn run_garbage_collection(&mut self, manual: bool) {
        if !manual && self.is_precaching() {
            debug!("Periodic GC skipped: pre-cache pass in flight.");
            return;
        }

        let candidates: Vec<String> = self
            .resident
            .keys()
            .filter(|k| !self.required.contains(*k))
            .cloned()
            .collect();
        let evicted = candidates.len();

        for key in candidates {
            if let Some(handle) = self.resident.remove(&key) {
                if self.pooling {
                    match Arc::try_unwrap(handle) {
                        Ok(tex) => self.pool.release(tex),
                        Err(_) => {
                            debug!("Handle for '{key}' still held by the host; not pooled.");
                        }
                    }
                }
            }
        }

        if evicted > 0 {
            info!(
                "GC ({}) evicted {evicted} textures; {} resident, {} pooled.",
                if manual { "manual" } else { "periodic" },
                self.resident.len(),
                self.pool.len()
            );
        }
        self.last_gc = Instant::now();
    }

    /// Pumps cooperative work for one frame: advances an in-flight scan or
    /// pre-cache pass by a bounded chunk and fires the periodic GC when its
    /// interval elapses. Returns true while background work remains.
    pub fn tick(&mut self, scene: &dyn SceneSource) -> bool {
        match std::mem::replace(&mut self.task, ActiveTask::Idle) {
            ActiveTask::Idle => {}
            ActiveTask::Scan(mut scan) => {
                if scan.step(SCAN_STEP_BUDGET) {
                    self.install_index(scan.finish(), scene);
                } else {
                    self.task = ActiveTask::Scan(scan);
                }
            }
            ActiveTask::Precache {
                keys,
                mut next,
                mut loaded,
                started,
            } => {
                let stop = (next + PRECACHE_STEP_BUDGET).min(keys.len());
                while next < stop {
                    if self.get(&keys[next]).is_some() {
                        loaded += 1;
                    }
                    next += 1;
                }
                if next >= keys.len() {
                    info!(
                        "Pre-cache pass finished: {loaded}/{} loaded in {:.2}s.",
                        keys.len(),
                        started.elapsed().as_secs_f64()
                    );
                    // Restart the GC clock, otherwise the elapsed-interval
                    // check below would evict the warm set on this same tick.
                    self.last_gc = Instant::now();
                } else {
                    self.task = ActiveTask::Precache {
                        keys,
                        next,
                        loaded,
                        started,
                    };
                }
            }
        }

        if matches!(self.task, ActiveTask::Idle)
            && self.last_gc.elapsed() >= self.config.gc_interval
        {
            self.run_garbage_collection(false);
        }

        !matches!(self.task, ActiveTask::Idle)
    }

    /// Atomic swap point for a finished scan: the old table stays visible up
    /// to here, then resident state is discarded wholesale and the required
    /// set recomputed against the new index.
    fn install_index(&mut self, map: AssetMap, scene: &dyn SceneSource) {
        if !self.resident.is_empty() {
            let all: Vec<String> = self.resident.keys().cloned().collect();
            for key in all {
                if let Some(handle) = self.resident.remove(&key)
                    && self.pooling
                    && let Ok(tex) = Arc::try_unwrap(handle)
                {
                    self.pool.release(tex);
                }
            }
        }
        self.required.clear();
        self.assets = map;
        self.on_graph_changed(scene);
    }

    /// Starts a fresh index scan; this is the only way the universe of
    /// manageable keys grows or shrinks at runtime. Replaces any in-flight
    /// cooperative task.
    pub fn rescan(&mut self) {
        info!("Rescanning asset index under '{}'.", self.asset_root.display());
        self.task = ActiveTask::Scan(ScanTask::new(&self.asset_root, &self.config.blacklist));
    }

    /// Queues a cooperative load of every managed key. While the pass runs,
    /// the periodic GC stays quiet, and its interval restarts on completion,
    /// so freshly-populated textures stay warm for at least one full GC
    /// interval after the pass.
    pub fn precache_all(&mut self) {
        if !matches!(self.task, ActiveTask::Idle) {
            warn!("Pre-cache request ignored: another cooperative task is running.");
            return;
        }
        let keys: Vec<String> = self.assets.keys().cloned().collect();
        info!("Pre-caching {} managed textures.", keys.len());
        self.task = ActiveTask::Precache {
            keys,
            next: 0,
            loaded: 0,
            started: Instant::now(),
        };
    }

    /// Deletes and recreates the on-disk cache wholesale. Residents are
    /// untouched; already-loaded textures are not re-read from disk.
    pub fn clear_cache(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.cache_dir)
            && e.kind() != ErrorKind::NotFound
        {
            warn!(
                "Could not remove cache directory '{}': {e}",
                self.cache_dir.display()
            );
        }
        if let Err(e) = std::fs::create_dir_all(&self.cache_dir) {
            warn!(
                "Could not recreate cache directory '{}': {e}",
                self.cache_dir.display()
            );
        } else {
            info!("Cache directory '{}' cleared.", self.cache_dir.display());
        }
    }

    /// Re-reads settings from `path`. The GC interval and variant selection
    /// apply immediately; a changed blacklist takes effect at the next
    /// [`rescan`](Self::rescan).
    pub fn reload_config<P: AsRef<Path>>(&mut self, path: P) {
        self.config = Config::load(path);
        info!("Loader settings reloaded.");
    }

    pub fn set_downscaling(&mut self, enabled: bool) {
        self.downscaling = enabled;
        info!(
            "Texture downscaling {}.",
            if enabled { "enabled" } else { "disabled" }
        );
    }

    /// Toggles the evicted-buffer pool. Disabling drops everything pooled.
    pub fn set_pooling(&mut self, enabled: bool) {
        self.pooling = enabled;
        if !enabled {
            self.pool.clear();
        }
        info!(
            "Texture pooling {}.",
            if enabled { "enabled" } else { "disabled" }
        );
    }

    pub fn is_precaching(&self) -> bool {
        matches!(self.task, ActiveTask::Precache { .. })
    }

    pub fn is_scanning(&self) -> bool {
        matches!(self.task, ActiveTask::Scan(_))
    }

    /// Where `name`'s cache artifact lives, if the key is managed.
    pub fn artifact_path(&self, name: &str) -> Option<PathBuf> {
        let key = index::normalize_name(name);
        let entry = self.assets.get(&key)?;
        Some(self.artifact_path_for_source(&entry.path))
    }

    fn artifact_path_for_source(&self, source: &Path) -> PathBuf {
        let digest = path_digest(&index::normalize_name(&source.to_string_lossy()));
        self.cache_dir.join(format!("{digest}.{CACHE_EXTENSION}"))
    }

    /// Status snapshot: counts plus the signed memory-saved estimate
    /// (original source bytes of resident keys minus actual resident bytes).
    pub fn stats(&self) -> LoaderStats {
        let resident_bytes: u64 = self.resident.values().map(|t| t.byte_len() as u64).sum();
        let original_bytes: u64 = self
            .resident
            .keys()
            .filter_map(|k| self.assets.get(k))
            .map(|e| e.original_size)
            .sum();
        LoaderStats {
            managed: self.assets.len(),
            resident: self.resident.len(),
            pooled: self.pool.len(),
            resident_bytes,
            original_bytes,
            memory_saved_mb: (original_bytes as f64 - resident_bytes as f64) / (1024.0 * 1024.0),
        }
    }

    /// Drives [`tick`](Self::tick) until no cooperative work remains. For
    /// hosts without a frame loop, and for tests.
    pub fn pump_until_idle(&mut self, scene: &dyn SceneSource) {
        while self.tick(scene) {}
    }
}
