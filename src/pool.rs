use crate::codec::{Texture, TextureFormat};
use log::debug;
use rustc_hash::FxHashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PoolKey {
    width: u32,
    height: u32,
    format: TextureFormat,
}

/// Free list of evicted texture buffers, reusable by exact shape match.
///
/// Garbage collection is the only producer and the compression path the only
/// consumer; both run on the single cooperative thread, so no synchronization
/// is needed. Shapes that never recur simply sit here until [`clear`].
///
/// [`clear`]: TexturePool::clear
#[derive(Debug, Default)]
pub struct TexturePool {
    free: FxHashMap<PoolKey, Vec<Texture>>,
    count: usize,
}

impl TexturePool {
    /// Takes a pooled buffer matching (width, height, format) exactly.
    pub fn acquire(&mut self, width: u32, height: u32, format: TextureFormat) -> Option<Texture> {
        let key = PoolKey {
            width,
            height,
            format,
        };
        let tex = self.free.get_mut(&key)?.pop()?;
        self.count -= 1;
        debug!("Pool hit for {width}x{height} {format:?}.");
        Some(tex)
    }

    /// Parks an evicted texture for later reuse.
    pub fn release(&mut self, tex: Texture) {
        let key = PoolKey {
            width: tex.width,
            height: tex.height,
            format: tex.format,
        };
        self.free.entry(key).or_default().push(tex);
        self.count += 1;
    }

    pub fn clear(&mut self) {
        self.free.clear();
        self.count = 0;
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

#[cfg(test)]
mod tests {
    use super::TexturePool;
    use crate::codec::{Texture, TextureFormat};

    fn tex(width: u32, height: u32, format: TextureFormat) -> Texture {
        Texture {
            width,
            height,
            format,
            data: vec![0u8; format.payload_len(width, height)],
        }
    }

    #[test]
    fn acquire_requires_exact_shape_match() {
        let mut pool = TexturePool::default();
        pool.release(tex(256, 256, TextureFormat::Bc1));

        assert!(pool.acquire(256, 256, TextureFormat::Bc3).is_none());
        assert!(pool.acquire(256, 128, TextureFormat::Bc1).is_none());
        assert!(pool.acquire(256, 256, TextureFormat::Bc1).is_some());
        assert!(pool.is_empty());
    }

    #[test]
    fn clear_drops_everything() {
        let mut pool = TexturePool::default();
        pool.release(tex(64, 64, TextureFormat::Rgba8));
        pool.release(tex(64, 64, TextureFormat::Rgba8));
        assert_eq!(pool.len(), 2);
        pool.clear();
        assert!(pool.acquire(64, 64, TextureFormat::Rgba8).is_none());
    }
}
