//! Recursive copy engine tests over an in-memory filesystem

use provision_core::copy::{calculate_total_size, copy_filesystem, CopyOptions};
use provision_core::DiskError;
use provision_testkit::MemoryFs;

fn sample_tree() -> MemoryFs {
    let mut fs = MemoryFs::new();
    fs.add_dir("/src");
    fs.add_file("/src/a.txt", &[b'a'; 100]);
    fs.add_dir("/src/bin");
    fs.add_file("/src/bin/tool", &(0..200_000u32).map(|i| i as u8).collect::<Vec<_>>());
    fs.add_dir("/src/etc");
    fs.add_file("/src/etc/conf", b"key=value\n");
    fs.add_dir("/src/dev");
    fs.add_device("/src/dev/null");
    fs.add_dir("/src/empty");
    fs
}

#[test]
fn test_total_size() {
    let mut fs = sample_tree();
    let options = CopyOptions::default();

    assert_eq!(calculate_total_size(&mut fs, "/src", None, &options).unwrap(), 200_110);
    assert_eq!(calculate_total_size(&mut fs, "/src/a.txt", None, &options).unwrap(), 100);
    assert_eq!(calculate_total_size(&mut fs, "/src/empty", None, &options).unwrap(), 0);
    assert_eq!(
        calculate_total_size(&mut fs, "/missing", None, &options),
        Err(DiskError::NotFound)
    );
}

#[test]
fn test_copy_tree_progress_totals() {
    let mut fs = sample_tree();
    let mut calls: Vec<(u64, u64, String)> = Vec::new();
    let record: &mut dyn FnMut(u64, u64, &str) =
        &mut |copied, total, path| calls.push((copied, total, path.to_string()));

    let progress = copy_filesystem(&mut fs, "/src", "/dst", &CopyOptions::default(), Some(record))
        .expect("copy should succeed");

    assert_eq!(progress.total_bytes, 200_110);
    assert_eq!(progress.copied_bytes, progress.total_bytes);
    assert_eq!(progress.percent(), 100);

    // One callback per 64 KiB chunk: 1 + 4 + 1
    assert_eq!(calls.len(), 6);
    assert!(calls.windows(2).all(|w| w[0].0 < w[1].0));
    assert!(calls.iter().all(|c| c.1 == 200_110));
    assert_eq!(calls.last().unwrap().0, 200_110);
    assert_eq!(calls[1].2, "/src/bin/tool");

    assert_eq!(fs.file("/dst/a.txt"), fs.file("/src/a.txt"));
    assert_eq!(fs.file("/dst/bin/tool"), fs.file("/src/bin/tool"));
    assert_eq!(fs.file("/dst/etc/conf").unwrap(), b"key=value\n");
    assert!(fs.is_dir("/dst/empty"));
    assert!(fs.is_dir("/dst/dev"));
    assert!(!fs.nodes.contains_key("/dst/dev/null"));
    assert_eq!(fs.open_files, 0);
}

#[test]
fn test_small_chunks() {
    let mut fs = sample_tree();
    let options = CopyOptions {
        chunk_size: 7,
        ..CopyOptions::default()
    };
    let progress = copy_filesystem(&mut fs, "/src", "/dst/", &options, None).unwrap();

    assert_eq!(progress.copied_bytes, 200_110);
    assert_eq!(fs.file("/dst/bin/tool"), fs.file("/src/bin/tool"));
}

#[test]
fn test_read_failure_stops_siblings() {
    let mut fs = MemoryFs::new();
    fs.add_dir("/src");
    fs.add_dir("/src/a");
    fs.add_file("/src/a/x", b"first");
    fs.add_file("/src/b.bin", &[0u8; 1000]);
    fs.add_dir("/src/c");
    fs.add_file("/src/d.txt", b"never");
    fs.fail_read_of = Some("/src/b.bin".to_string());

    let result = copy_filesystem(&mut fs, "/src", "/dst", &CopyOptions::default(), None);

    assert_eq!(result, Err(DiskError::IoError));
    assert_eq!(fs.created_dirs, vec!["/dst".to_string(), "/dst/a".to_string()]);
    assert!(!fs.is_dir("/dst/c"));
    assert!(fs.file("/dst/d.txt").is_none());
    // The failed file is left behind, truncated
    assert_eq!(fs.file("/dst/b.bin").unwrap(), b"");
    assert_eq!(fs.open_files, 0);
}

#[test]
fn test_short_write_is_an_error() {
    let mut fs = sample_tree();
    fs.short_write = Some(10);

    let result = copy_filesystem(&mut fs, "/src", "/dst", &CopyOptions::default(), None);
    assert_eq!(result, Err(DiskError::IoError));
    assert_eq!(fs.open_files, 0);
}

#[test]
fn test_listing_overflow_rejected_before_copy() {
    let mut fs = MemoryFs::new();
    fs.add_dir("/src");
    for i in 0..300 {
        fs.add_file(&format!("/src/f{:03}", i), b"x");
    }

    let result = copy_filesystem(&mut fs, "/src", "/dst", &CopyOptions::default(), None);
    assert_eq!(result, Err(DiskError::BufferFull));
    assert!(fs.created_dirs.is_empty());

    // '.' and '..' count against the bound too
    let options = CopyOptions {
        max_dir_entries: 302,
        ..CopyOptions::default()
    };
    let progress = copy_filesystem(&mut fs, "/src", "/dst", &options, None).unwrap();
    assert_eq!(progress.copied_bytes, 300);
}

#[test]
fn test_target_inside_source_is_skipped() {
    let mut fs = MemoryFs::new();
    fs.add_dir("/etc");
    fs.add_file("/etc/hostname", b"vib-os\n");
    fs.add_dir("/mnt");
    fs.add_dir("/mnt/target");
    fs.add_file("/mnt/target/stale", b"old");

    let progress =
        copy_filesystem(&mut fs, "/", "/mnt/target", &CopyOptions::default(), None).unwrap();

    assert_eq!(progress.total_bytes, 7);
    assert_eq!(progress.copied_bytes, 7);
    assert_eq!(fs.file("/mnt/target/etc/hostname").unwrap(), b"vib-os\n");
    assert!(fs.is_dir("/mnt/target/mnt"));
    assert!(!fs.nodes.contains_key("/mnt/target/mnt/target"));
}

#[test]
fn test_rejects_bad_roots() {
    let mut fs = sample_tree();
    let options = CopyOptions::default();
    assert_eq!(
        copy_filesystem(&mut fs, "", "/dst", &options, None),
        Err(DiskError::InvalidArgument)
    );
    assert_eq!(
        copy_filesystem(&mut fs, "/src/a.txt", "/dst", &options, None),
        Err(DiskError::InvalidArgument)
    );
    assert_eq!(
        copy_filesystem(&mut fs, "/nope", "/dst", &options, None),
        Err(DiskError::NotFound)
    );
}
