use camino::Utf8PathBuf;
use mirror_core::diff::diff;
use mirror_core::{AlwaysCopy, FileEntry, MetadataDiff, TreeSnapshot};

// --- Helper Functions to build snapshots easily ---

fn make_tree(root: &str, files: &[(&str, u64, i64)], dirs: &[&str]) -> TreeSnapshot {
    let mut tree = TreeSnapshot::empty(root);
    for (path, size, mtime_ms) in files {
        tree.files.insert(
            path.to_string(),
            FileEntry {
                size: *size,
                mtime_ms: *mtime_ms,
            },
        );
    }
    for d in dirs {
        tree.dirs.insert(d.to_string());
    }
    tree
}

// --- Tests ---

#[test]
fn test_copy_into_empty_destination() {
    let source = make_tree("/src", &[("a.txt", 5, 1_000)], &[]);
    let dest = make_tree("/dst", &[], &[]);

    let plan = diff(&source, &dest, &MetadataDiff::default());

    assert_eq!(plan.to_copy, vec![Utf8PathBuf::from("/src/a.txt")]);
    assert!(plan.to_delete.is_empty());
    assert_eq!(plan.total_operations(), 1);
}

#[test]
fn test_stale_destination_file_is_deleted() {
    let source = make_tree("/src", &[], &[]);
    let dest = make_tree("/dst", &[("stale.bin", 3, 0)], &[]);

    let plan = diff(&source, &dest, &MetadataDiff::default());

    assert!(plan.to_copy.is_empty());
    assert_eq!(plan.to_delete, vec![Utf8PathBuf::from("/dst/stale.bin")]);
}

#[test]
fn test_identical_trees_produce_empty_plan() {
    let files = [("a.txt", 5, 1_000), ("sub/b.txt", 7, 2_000)];
    let source = make_tree("/src", &files, &["sub"]);
    let dest = make_tree("/dst", &files, &["sub"]);

    let plan = diff(&source, &dest, &MetadataDiff::default());

    assert!(plan.is_empty(), "Nothing to do: {plan:?}");
}

#[test]
fn test_always_copy_rewrites_identical_files() {
    let files = [("a.txt", 5, 1_000)];
    let source = make_tree("/src", &files, &[]);
    let dest = make_tree("/dst", &files, &[]);

    let plan = diff(&source, &dest, &AlwaysCopy);

    assert_eq!(plan.to_copy.len(), 1);
    assert!(plan.to_delete.is_empty());
}

#[test]
fn test_directory_bookkeeping() {
    let source = make_tree("/src", &[], &["empty", "keep"]);
    let dest = make_tree("/dst", &[("old/x.txt", 1, 0)], &["keep", "old"]);

    let plan = diff(&source, &dest, &MetadataDiff::default());

    assert_eq!(plan.dirs_to_create, vec![Utf8PathBuf::from("/dst/empty")]);
    assert_eq!(plan.stale_dirs, vec![Utf8PathBuf::from("/dst/old")]);
    assert_eq!(plan.to_delete, vec![Utf8PathBuf::from("/dst/old/x.txt")]);
}

#[test]
fn test_mixed_changes_keep_relative_order() {
    let source = make_tree(
        "/src",
        &[("b.txt", 2, 0), ("a.txt", 1, 0), ("c.txt", 9, 50_000)],
        &[],
    );
    let dest = make_tree("/dst", &[("c.txt", 9, 0), ("z.txt", 1, 0)], &[]);

    let plan = diff(&source, &dest, &MetadataDiff::default());

    assert_eq!(
        plan.to_copy,
        vec![
            Utf8PathBuf::from("/src/a.txt"),
            Utf8PathBuf::from("/src/b.txt"),
            Utf8PathBuf::from("/src/c.txt"),
        ]
    );
    assert_eq!(plan.to_delete, vec![Utf8PathBuf::from("/dst/z.txt")]);
    assert_eq!(
        plan.dest_for(&plan.to_copy[0]),
        Some(Utf8PathBuf::from("/dst/a.txt"))
    );
}
