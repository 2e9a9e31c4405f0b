// Batch rewriting across sweep directories through the worker pool

mod utils;

use gcp_trace::batch::{BatchRunner, DirectoryJob};
use gcp_trace::config::SweepConfig;
use gcp_trace::indicator::LockFamily;
use gcp_trace::rewriter::FormatSelection;
use gcp_trace::RewriteOptions;
use std::fs;
use tempfile::TempDir;
use utils::{read_trace, result_dir, write_trace};

#[test]
fn test_failing_file_does_not_abort_siblings() {
    let tmp = TempDir::new().unwrap();
    let dir = result_dir(tmp.path(), "run", "10 20 heap\n");
    write_trace(&dir.join("a.gz"), &["@ t 1 0x15", "@ t 1 0x30"]);
    // two of four indicators: fatal for this file only
    write_trace(&dir.join("b.gz"), &["9^ 0x1", "9^ 0x2"]);
    write_trace(&dir.join("nested/c.gz"), &["@ t 1 0x11"]);
    let broken_before = fs::read(dir.join("b.gz")).unwrap();

    let job = DirectoryJob::in_place(dir.clone(), LockFamily::NonMcs);
    let report = BatchRunner::new(2, RewriteOptions::default()).run(&[job]);

    assert_eq!(report.files.len(), 3);
    assert_eq!(report.succeeded().count(), 2);
    let failed: Vec<_> = report.failed().collect();
    assert_eq!(failed.len(), 1);
    assert!(failed[0].input.ends_with("b.gz"));
    assert!(!report.is_success());

    assert_eq!(read_trace(&dir.join("a.gz")), vec!["@ t 1 0x15"]);
    assert_eq!(read_trace(&dir.join("nested/c.gz")), vec!["@ t 1 0x11"]);
    assert_eq!(fs::read(dir.join("b.gz")).unwrap(), broken_before);
}

#[test]
fn test_in_place_treats_sync_events_as_plain_records() {
    let tmp = TempDir::new().unwrap();
    let dir = result_dir(tmp.path(), "kvs_w_pthread_mutex_1_8", "10 20 heap\n");
    write_trace(&dir.join("t0.gz"), &["! 7", "X1", "@ t 1 0x15"]);

    let job = DirectoryJob::in_place(dir.clone(), LockFamily::NonMcs);
    let report = BatchRunner::new(1, RewriteOptions::default()).run(&[job]);

    assert!(report.is_success(), "{:?}", report);
    assert_eq!(read_trace(&dir.join("t0.gz")), vec!["@ t 1 0x15"]);
}

#[test]
fn test_explicit_format_overrides_job_format() {
    let tmp = TempDir::new().unwrap();
    let dir = result_dir(tmp.path(), "run", "10 20 heap\n");
    write_trace(&dir.join("t0.gz"), &["X1", "@ t 1 0x15"]);

    let options = RewriteOptions {
        format: FormatSelection::Legacy,
        ..Default::default()
    };
    let job = DirectoryJob::in_place(dir.clone(), LockFamily::NonMcs);
    let report = BatchRunner::new(1, options).run(&[job]);

    assert!(report.is_success());
    assert_eq!(read_trace(&dir.join("t0.gz")), vec!["X1", "@ t 1 0x15"]);
}

#[cfg(unix)]
#[test]
fn test_unreadable_subdirectory_fails_directory() {
    use std::os::unix::fs::PermissionsExt;

    let tmp = TempDir::new().unwrap();
    let dir = result_dir(tmp.path(), "run", "10 20 heap\n");
    write_trace(&dir.join("t0.gz"), &["@ t 1 0x15"]);
    write_trace(&dir.join("locked/t1.gz"), &["@ t 1 0x15"]);
    let locked = dir.join("locked");
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
    if fs::read_dir(&locked).is_ok() {
        // privileged users read through mode bits
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        return;
    }

    let job = DirectoryJob::in_place(dir.clone(), LockFamily::NonMcs);
    let report = BatchRunner::new(1, RewriteOptions::default()).run(&[job]);
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

    assert!(!report.is_success());
    assert_eq!(report.directories.len(), 1);
    assert_eq!(report.directories[0].dir, dir);
    assert!(report.files.is_empty());
}

#[test]
fn test_missing_metadata_skips_only_that_directory() {
    let tmp = TempDir::new().unwrap();
    let good = result_dir(tmp.path(), "good", "10 20 heap\n");
    write_trace(&good.join("t.gz"), &["@ t 1 0x15"]);
    let bad = tmp.path().join("bad");
    write_trace(&bad.join("t.gz"), &["@ t 1 0x15"]);

    let jobs = [
        DirectoryJob::in_place(bad.clone(), LockFamily::NonMcs),
        DirectoryJob::in_place(good.clone(), LockFamily::NonMcs),
    ];
    let report = BatchRunner::new(4, RewriteOptions::default()).run(&jobs);

    assert_eq!(report.directories.len(), 1);
    assert_eq!(report.directories[0].dir, bad);
    assert_eq!(report.succeeded().count(), 1);
    assert_eq!(report.failed().count(), 0);
}

#[test]
fn test_job_family_selects_codes() {
    let tmp = TempDir::new().unwrap();
    let trace = ["9^ 0x1", "9^ 0x2", "9^ 0x3", "9^ 0x4"];
    let mcs = result_dir(tmp.path(), "kvs_w_mcs_1_8", "10 20 heap\n");
    let mutex = result_dir(tmp.path(), "kvs_w_pthread_mutex_1_8", "10 20 heap\n");
    write_trace(&mcs.join("t.gz"), &trace);
    write_trace(&mutex.join("t.gz"), &trace);

    let jobs = [
        DirectoryJob::in_place(mcs.clone(), LockFamily::Mcs),
        DirectoryJob::in_place(mutex.clone(), LockFamily::NonMcs),
    ];
    let report = BatchRunner::new(2, RewriteOptions::default()).run(&jobs);
    assert!(report.is_success());

    assert_eq!(read_trace(&mcs.join("t.gz")), vec!["! 1", "! 1", "! 3", "! 3"]);
    assert_eq!(read_trace(&mutex.join("t.gz")), vec!["! 0", "! 1", "! 2", "! 3"]);
}

#[test]
fn test_family_override_wins() {
    let tmp = TempDir::new().unwrap();
    let dir = result_dir(tmp.path(), "kvs_w_mcs_1_8", "10 20 heap\n");
    write_trace(&dir.join("t.gz"), &["9^ 0x1", "9^ 0x2", "9^ 0x3", "9^ 0x4"]);

    let job = DirectoryJob::in_place(dir.clone(), LockFamily::Mcs);
    let report = BatchRunner::new(1, RewriteOptions::default())
        .with_family_override(Some(LockFamily::NonMcs))
        .run(&[job]);
    assert!(report.is_success());
    assert_eq!(read_trace(&dir.join("t.gz")), vec!["! 0", "! 1", "! 2", "! 3"]);
}

#[test]
fn test_generate_sweep_builds_gcp_directories() {
    let tmp = TempDir::new().unwrap();
    let toml = format!(
        r#"
        root = "{}"
        workers = 2
        nodes = [2, 1]
        threads_per_node = [1]
        source_lock_type = "pthread_rwlock_prefer_w"

        [workloads]
        bench = ["0.5"]
        "#,
        tmp.path().display()
    );
    let config = SweepConfig::from_toml_str(&toml).unwrap();

    for nodes in [2, 1] {
        let name = format!("bench_0.5_pthread_rwlock_prefer_w_{}_1", nodes);
        let dir = result_dir(tmp.path(), &name, "3 4 locks\n1000 1100 test_mem\n");
        write_trace(
            &dir.join("log/t0.gz"),
            &["! 300", "@ t 1 0x1000", "! 311", "@ t 1 0x1010", "@ t 1 0x50"],
        );
        fs::write(dir.join("log/run.out"), "throughput 42\n").unwrap();
    }

    let report = BatchRunner::new(config.workers, RewriteOptions::default())
        .run(&config.generate_jobs().unwrap());
    assert!(report.is_success(), "{:?}", report);
    assert_eq!(report.files.len(), 2);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        // generated traces are not left owner-only
        let mode = |p: &str| fs::metadata(tmp.path().join(p)).unwrap().permissions().mode();
        assert_eq!(
            mode("bench_0.5_gcp_1_1/log/t0.gz"),
            mode("bench_0.5_pthread_rwlock_prefer_w_1_1/log/t0.gz")
        );
    }

    for nodes in [2, 1] {
        let gcp = tmp.path().join(format!("bench_0.5_gcp_{}_1", nodes));
        assert_eq!(read_trace(&gcp.join("log/t0.gz")), vec!["! 321", "! 9999"]);
        assert_eq!(
            fs::read_to_string(gcp.join("log/run.out")).unwrap(),
            "throughput 42\n"
        );
        // source traces untouched
        let source = tmp
            .path()
            .join(format!("bench_0.5_pthread_rwlock_prefer_w_{}_1", nodes));
        assert_eq!(read_trace(&source.join("log/t0.gz")).len(), 5);
    }
}
