use twox_hash::XxHash3_128;

/// Digest of a source path string, used to name that path's cache artifact.
///
/// Pure and deterministic: the same normalized path always maps to the same
/// 32-character lowercase hex string. This namespaces the cache directory;
/// it is not a security boundary.
pub fn path_digest(normalized_path: &str) -> String {
    let h = XxHash3_128::oneshot(normalized_path.as_bytes());
    format!("{h:032x}")
}

#[cfg(test)]
mod tests {
    use super::path_digest;

    #[test]
    fn digest_is_deterministic_and_fixed_width() {
        let a = path_digest("textures/rock_cliff");
        let b = path_digest("textures/rock_cliff");
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
        assert!(a.bytes().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(a, a.to_ascii_lowercase());
    }

    #[test]
    fn distinct_paths_get_distinct_digests() {
        assert_ne!(path_digest("textures/rock"), path_digest("textures/rook"));
        assert_ne!(path_digest("a/b"), path_digest("a/b/"));
    }
}
