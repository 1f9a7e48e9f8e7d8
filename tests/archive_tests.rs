//! Integration tests for archive normalization.
//!
//! These tests verify that:
//! - A lone root folder is renamed and its tree kept intact
//! - Loose root entries are wrapped into the project folder
//! - Tarballs become zips without the pax marker
//! - Entries and symlinks escaping the extraction root are rejected
//! - Unix modes and symlinks survive re-zipping
//! - Temp directories disappear with the normalizer

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::fs;
use std::io::{Cursor, Read};

use projupdate::archive::{ArchiveError, ArchiveNormalizer, PAX_GLOBAL_HEADER};
use projupdate::host::ArchiveFormat;
use projupdate::test_utils::{tar_gz_bytes, zip_bytes, zip_entry_names};
use tempfile::TempDir;

fn read_entry(zip: &[u8], name: &str) -> String {
    let mut archive = zip::ZipArchive::new(Cursor::new(zip)).unwrap();
    let mut file = archive.by_name(name).unwrap();
    let mut out = String::new();
    file.read_to_string(&mut out).unwrap();
    out
}

// ============================================================================
// Root folder handling
// ============================================================================

#[test]
fn test_single_root_is_renamed() {
    let temp = TempDir::new().unwrap();
    let mut normalizer = ArchiveNormalizer::new(temp.path());
    let input = zip_bytes(&[
        ("proj-abc123/", b""),
        ("proj-abc123/main.php", b"main"),
        ("proj-abc123/assets/", b""),
        ("proj-abc123/assets/app.js", b"js"),
    ])
    .unwrap();

    let out = normalizer
        .normalize(&input, ArchiveFormat::Zip, "my-plugin")
        .unwrap();

    assert_eq!(
        zip_entry_names(&out).unwrap(),
        vec![
            "my-plugin/",
            "my-plugin/assets/",
            "my-plugin/assets/app.js",
            "my-plugin/main.php",
        ]
    );
    assert_eq!(read_entry(&out, "my-plugin/assets/app.js"), "js");
}

#[test]
fn test_loose_entries_are_wrapped() {
    let temp = TempDir::new().unwrap();
    let mut normalizer = ArchiveNormalizer::new(temp.path());
    let input = zip_bytes(&[("main.php", b"main"), ("readme.md", b"# hi")]).unwrap();

    let out = normalizer
        .normalize(&input, ArchiveFormat::Zip, "foo")
        .unwrap();

    assert_eq!(
        zip_entry_names(&out).unwrap(),
        vec!["foo/", "foo/main.php", "foo/readme.md"]
    );
}

#[test]
fn test_single_root_file_is_wrapped() {
    let temp = TempDir::new().unwrap();
    let mut normalizer = ArchiveNormalizer::new(temp.path());
    let input = zip_bytes(&[("only.php", b"x")]).unwrap();

    let out = normalizer
        .normalize(&input, ArchiveFormat::Zip, "foo")
        .unwrap();

    assert_eq!(zip_entry_names(&out).unwrap(), vec!["foo/", "foo/only.php"]);
}

#[test]
fn test_pax_marker_is_ignored_when_renaming() {
    let temp = TempDir::new().unwrap();
    let mut normalizer = ArchiveNormalizer::new(temp.path());
    let input = tar_gz_bytes(
        &[("proj-abc123/", b""), ("proj-abc123/main.php", b"main")],
        Some("abc123"),
    )
    .unwrap();

    let out = normalizer
        .normalize(&input, ArchiveFormat::TarGz, "proj")
        .unwrap();

    assert_eq!(
        zip_entry_names(&out).unwrap(),
        vec!["proj/", "proj/main.php"]
    );
}

#[test]
fn test_rootless_tarball_is_wrapped_without_marker() {
    let temp = TempDir::new().unwrap();
    let mut normalizer = ArchiveNormalizer::new(temp.path());
    let input = tar_gz_bytes(&[("a.php", b"a"), ("lib/", b""), ("lib/b.php", b"b")], Some("c1"))
        .unwrap();

    let out = normalizer
        .normalize(&input, ArchiveFormat::TarGz, "foo")
        .unwrap();

    let names = zip_entry_names(&out).unwrap();
    assert_eq!(names, vec!["foo/", "foo/a.php", "foo/lib/", "foo/lib/b.php"]);
    assert!(!names.iter().any(|n| n.contains(PAX_GLOBAL_HEADER)));
}

#[test]
fn test_invalid_folder_name_is_rejected() {
    let temp = TempDir::new().unwrap();
    let mut normalizer = ArchiveNormalizer::new(temp.path());
    let input = zip_bytes(&[("a.php", b"a")]).unwrap();

    let err = normalizer
        .normalize(&input, ArchiveFormat::Zip, "../escape")
        .unwrap_err();

    assert!(matches!(err, ArchiveError::InvalidFolderName(_)));
    assert_eq!(normalizer.temp_dir_count(), 0);
}

// ============================================================================
// Format conversion
// ============================================================================

#[test]
fn test_tarball_converted_to_zip() {
    let temp = TempDir::new().unwrap();
    let mut normalizer = ArchiveNormalizer::new(temp.path());
    let input = tar_gz_bytes(
        &[("repo-1/", b""), ("repo-1/style.css", b"/* Theme */")],
        Some("1"),
    )
    .unwrap();

    let out = normalizer
        .convert_to_zip(&input, ArchiveFormat::TarGz)
        .unwrap();

    assert_eq!(
        zip_entry_names(&out).unwrap(),
        vec!["repo-1/", "repo-1/style.css"]
    );
    assert_eq!(read_entry(&out, "repo-1/style.css"), "/* Theme */");
}

#[test]
fn test_corrupt_zip_is_an_error() {
    let temp = TempDir::new().unwrap();
    let mut normalizer = ArchiveNormalizer::new(temp.path());

    let err = normalizer
        .normalize(b"not a zip", ArchiveFormat::Zip, "foo")
        .unwrap_err();

    assert!(matches!(err, ArchiveError::Zip(_)));
}

#[test]
fn test_escaping_entry_is_rejected() {
    let temp = TempDir::new().unwrap();
    let mut normalizer = ArchiveNormalizer::new(temp.path());
    let input = zip_bytes(&[("../evil.php", b"x")]).unwrap();

    let err = normalizer
        .normalize(&input, ArchiveFormat::Zip, "foo")
        .unwrap_err();

    assert!(matches!(err, ArchiveError::UnsafePath(_)));
    assert!(!temp.path().parent().unwrap().join("evil.php").exists());
}

// ============================================================================
// Modes and symlinks
// ============================================================================

#[cfg(unix)]
fn zip_with_link(link_target: &str) -> Vec<u8> {
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    writer.add_directory("proj-1/", options).unwrap();
    writer
        .start_file("proj-1/build.sh", options.unix_permissions(0o755))
        .unwrap();
    writer.write_all(b"#!/bin/sh").unwrap();
    writer
        .add_symlink("proj-1/build", link_target, options)
        .unwrap();
    writer.finish().unwrap().into_inner()
}

#[cfg(unix)]
#[test]
fn test_modes_and_links_survive_renaming() {
    let temp = TempDir::new().unwrap();
    let mut normalizer = ArchiveNormalizer::new(temp.path());

    let out = normalizer
        .normalize(&zip_with_link("build.sh"), ArchiveFormat::Zip, "foo")
        .unwrap();

    let mut archive = zip::ZipArchive::new(Cursor::new(out)).unwrap();
    let script = archive.by_name("foo/build.sh").unwrap();
    assert_eq!(script.unix_mode().unwrap() & 0o777, 0o755);
    drop(script);

    let mut link = archive.by_name("foo/build").unwrap();
    assert_eq!(link.unix_mode().unwrap() & 0o170_000, 0o120_000);
    let mut target = String::new();
    link.read_to_string(&mut target).unwrap();
    assert_eq!(target, "build.sh");
}

#[cfg(unix)]
#[test]
fn test_escaping_link_is_rejected() {
    let temp = TempDir::new().unwrap();
    let mut normalizer = ArchiveNormalizer::new(temp.path());

    let err = normalizer
        .normalize(&zip_with_link("../../outside"), ArchiveFormat::Zip, "foo")
        .unwrap_err();

    assert!(matches!(err, ArchiveError::UnsafePath(_)));
}

// ============================================================================
// Temp directory lifetime
// ============================================================================

#[test]
fn test_temp_dirs_removed_on_drop() {
    let temp = TempDir::new().unwrap();
    let temp_root = temp.path().join("temp");
    let input = zip_bytes(&[("a.php", b"a")]).unwrap();

    {
        let mut normalizer = ArchiveNormalizer::new(&temp_root);
        normalizer
            .normalize(&input, ArchiveFormat::Zip, "foo")
            .unwrap();
        assert_eq!(normalizer.temp_dir_count(), 2);
        assert_eq!(fs::read_dir(&temp_root).unwrap().count(), 2);
    }

    assert_eq!(fs::read_dir(&temp_root).unwrap().count(), 0);
}
