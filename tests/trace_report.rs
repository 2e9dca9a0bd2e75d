//! Trace persistence round trips through the filesystem.

use interweave::{Config, MonitorId, TracePersistence, explore};
use std::fs;

#[test]
fn always_persistence_writes_one_file_per_trial() {
    let dir = tempfile::tempdir().expect("tempdir");
    let m = MonitorId::named("traced");
    let result = explore(
        Config::new()
            .with_seed(0xace)
            .with_max_trials(3)
            .with_trace_persistence(TracePersistence::Always, dir.path().to_path_buf()),
        move |h| {
            h.lock(m);
            h.yield_now();
            h.unlock(m);
        },
    )
    .expect("session");
    assert!(result.is_pass(), "{:?}", result.failure);
    assert!(result.trials >= 1);

    for trial in 0..result.trials {
        let path = dir.path().join(format!("trial-{trial:04}.tsv"));
        let text = fs::read_to_string(&path).expect("trace file");
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("trial\tstep\tthread\tmarker\tlocation\tsignature")
        );
        // The first step is always the root thread's admission yield.
        let first = lines.next().expect("at least one step");
        let columns: Vec<&str> = first.split('\t').collect();
        assert_eq!(columns.len(), 6);
        assert_eq!(columns[0], trial.to_string());
        assert_eq!(columns[2], "T0");
        assert_eq!(columns[3], "normal");
        assert_eq!(columns[4], "<spawn>:0 thread-begin#0");
        assert!(u64::from_str_radix(columns[5], 16).is_ok(), "{first}");
        // Later steps carry the application yield points.
        assert!(text.contains("trace_report.rs"), "{text}");
        assert!(text.contains("monitor-enter"), "{text}");
    }
}

#[test]
fn on_failure_persistence_only_writes_the_failing_trial() {
    let dir = tempfile::tempdir().expect("tempdir");
    let m = MonitorId::named("orphan");
    let result = explore(
        Config::new()
            .with_seed(0xbad)
            .with_max_trials(5)
            .with_trace_persistence(TracePersistence::OnFailure, dir.path().to_path_buf()),
        move |h| {
            h.lock(m);
            h.wait(m);
            h.unlock(m);
        },
    )
    .expect("session");
    let failing = result.failing_trial.expect("deadlocks immediately");

    let entries: Vec<_> = fs::read_dir(dir.path())
        .expect("read dir")
        .map(|e| e.expect("entry").file_name())
        .collect();
    assert_eq!(entries.len(), 1);
    assert_eq!(
        entries[0].to_string_lossy(),
        format!("trial-{failing:04}.tsv")
    );
    let text = fs::read_to_string(dir.path().join(&entries[0])).expect("trace");
    assert!(text.contains("deadlock"), "{text}");
}

#[test]
fn passing_trials_write_nothing_on_failure_mode() {
    let dir = tempfile::tempdir().expect("tempdir");
    let result = explore(
        Config::new()
            .with_seed(0x900d)
            .with_max_trials(3)
            .with_trace_persistence(TracePersistence::OnFailure, dir.path().to_path_buf()),
        move |h| {
            h.yield_now();
        },
    )
    .expect("session");
    assert!(result.is_pass(), "{:?}", result.failure);
    assert_eq!(fs::read_dir(dir.path()).expect("read dir").count(), 0);
}
