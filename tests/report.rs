mod common;

use common::{function, options, setup_project, snapshot_for, write_snapshot, write_source};
use covmerge::cli;
use covmerge::config::ReportOptions;

fn project() -> tempfile::TempDir {
    let dir = setup_project();
    let path = write_source(dir.path(), "src/a.js", "a();\nb();\n\nc();\n");
    let snapshot = snapshot_for(&path, vec![function("", &[(0, 16, 1), (5, 9, 0)])]);
    write_snapshot(dir.path(), "1.json", &snapshot);
    dir
}

#[test]
fn text_report_goes_to_stdout() {
    let dir = project();
    let output = cli::cmd_report(options(dir.path())).unwrap();
    assert!(output.outcome.is_none());
    assert!(output.passed());
    assert!(output.stdout.contains("All files"));
    assert!(output.stdout.contains(" src/a.js "));
    assert!(output.stdout.contains("66.667"));
}

#[test]
fn json_reporters_write_files() {
    let dir = project();
    let output = cli::cmd_report(ReportOptions {
        reporter: vec!["json-summary".to_string(), "json".to_string()],
        ..options(dir.path())
    })
    .unwrap();
    assert!(output.stdout.is_empty());

    let summary: serde_json::Value = serde_json::from_slice(
        &std::fs::read(dir.path().join("coverage/coverage-summary.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(summary["total"]["lines"]["total"], 3);
    assert_eq!(summary["total"]["lines"]["covered"], 2);
    assert_eq!(summary["total"]["branches"]["total"], 1);
    assert!(dir.path().join("coverage/coverage-final.json").is_file());
}

#[test]
fn report_can_check_thresholds() {
    let dir = project();
    let output = cli::cmd_report(ReportOptions {
        check_coverage: true,
        ..options(dir.path())
    })
    .unwrap();
    assert!(!output.passed());
    assert!(output.stderr().contains("lines (66.667%)"));
}

#[test]
fn unknown_reporter_is_rejected() {
    let dir = project();
    let err = cli::cmd_report(ReportOptions {
        reporter: vec!["html".to_string()],
        ..options(dir.path())
    })
    .unwrap_err();
    assert!(err.to_string().contains("html"));
}
