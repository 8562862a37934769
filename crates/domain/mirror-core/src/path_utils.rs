use camino::{Utf8Component, Utf8Path, Utf8PathBuf};

pub struct MirrorPath;

impl MirrorPath {
    /// Standardize directory separators to forward slashes.
    /// This is the key format used by `TreeSnapshot`.
    pub fn normalize(path: &str) -> String {
        path.replace('\\', "/")
    }

    /// Relative key of `path` under `root`, or `None` when it lies outside.
    /// The root itself maps to the empty string.
    pub fn relative(root: &Utf8Path, path: &Utf8Path) -> Option<String> {
        path.strip_prefix(root)
            .ok()
            .map(|rel| Self::normalize(rel.as_str()))
    }

    /// Map a path under `from_root` onto the same relative location under `to_root`.
    pub fn rebase(path: &Utf8Path, from_root: &Utf8Path, to_root: &Utf8Path) -> Option<Utf8PathBuf> {
        let rel = path.strip_prefix(from_root).ok()?;
        if !Self::verify_safe(rel.as_str()) {
            return None;
        }
        Some(to_root.join(rel))
    }

    /// Relative paths must not escape their root.
    pub fn verify_safe(rel_path: &str) -> bool {
        let p = Utf8Path::new(rel_path);
        !p.is_absolute()
            && !p
                .components()
                .any(|c| matches!(c, Utf8Component::ParentDir | Utf8Component::Prefix(_)))
    }

    /// Number of components, used to order directory removal deepest-first.
    pub fn depth(path: &Utf8Path) -> usize {
        path.components().count()
    }

    /// True when `inner` is `outer` or nested below it.
    pub fn is_within(outer: &Utf8Path, inner: &Utf8Path) -> bool {
        inner.starts_with(outer)
    }
}

#[cfg(test)]
mod tests {
    use super::MirrorPath;
    use camino::Utf8Path;

    #[test]
    fn rebase_maps_between_roots() {
        let out = MirrorPath::rebase(
            Utf8Path::new("/src/a/b.txt"),
            Utf8Path::new("/src"),
            Utf8Path::new("/dst"),
        );
        assert_eq!(out.as_deref(), Some(Utf8Path::new("/dst/a/b.txt")));
    }

    #[test]
    fn rebase_rejects_foreign_paths() {
        assert!(MirrorPath::rebase(
            Utf8Path::new("/other/file"),
            Utf8Path::new("/src"),
            Utf8Path::new("/dst"),
        )
        .is_none());
    }

    #[test]
    fn traversal_is_unsafe() {
        assert!(!MirrorPath::verify_safe("../etc/passwd"));
        assert!(!MirrorPath::verify_safe("/abs"));
        assert!(MirrorPath::verify_safe("nested/file.txt"));
    }

    #[test]
    fn relative_of_root_is_empty() {
        let root = Utf8Path::new("/src");
        assert_eq!(MirrorPath::relative(root, root).as_deref(), Some(""));
        assert_eq!(
            MirrorPath::relative(root, Utf8Path::new("/src/x/y")).as_deref(),
            Some("x/y")
        );
    }

    #[test]
    fn nesting_check() {
        assert!(MirrorPath::is_within(
            Utf8Path::new("/src"),
            Utf8Path::new("/src/backup")
        ));
        assert!(!MirrorPath::is_within(
            Utf8Path::new("/src"),
            Utf8Path::new("/srcx")
        ));
    }
}
