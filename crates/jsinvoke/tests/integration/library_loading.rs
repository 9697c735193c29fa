use jsinvoke::library::{Library, LibrarySource, LoadError};
use jsinvoke::types::SandboxLimits;
use jsinvoke::{ExecutionOutcome, ExecutionRequest, Runner};
use serde_json::json;

use super::{fixture_path, fixture_text, test_config};

#[test]
fn test_directory_library_order_and_filter() {
    let library = Library::load(
        &LibrarySource::Directory(fixture_path("library")),
        &SandboxLimits::default(),
    )
    .expect("Failed to load library");

    let names: Vec<_> = library.entries().iter().map(|entry| entry.name()).collect();
    assert_eq!(names, ["01_math.js", "nested/02_report.js"]);
    assert!(library.get("README.md").is_none());

    for entry in library.entries() {
        assert!(!entry.code_cache().is_empty(), "{} has no code cache", entry.name());
    }
}

#[test]
fn test_broken_library_aborts_load() {
    let result = Library::load(
        &LibrarySource::Directory(fixture_path("broken_library")),
        &SandboxLimits::default(),
    );
    match result {
        Err(LoadError::Compile { name, .. }) => assert_eq!(name, "bad.js"),
        other => panic!("expected compile error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_scripts_see_directory_helpers() {
    let mut config = test_config(2, 2);
    config.library_dir = Some(fixture_path("library"));
    let runner = Runner::start(config).await.expect("Failed to start runner");

    let request = ExecutionRequest::new(fixture_text("scripts/report.js"))
        .with_data(fixture_text("scripts/report_data.json"));
    let outcome = runner.execute(request).await.unwrap();

    assert_eq!(
        outcome,
        ExecutionOutcome::Object(json!({"count": 3, "squares": [9, 0, 100], "max": 10}))
    );
    runner.stop().await;
}

#[tokio::test]
async fn test_helpers_survive_rehydration() {
    let mut config = test_config(1, 1);
    config.library_dir = Some(fixture_path("library"));
    let runner = Runner::start(config).await.expect("Failed to start runner");

    // Overwriting a helper only affects the current request
    let first = runner
        .execute(ExecutionRequest::new("square = () => -1; square(3)"))
        .await
        .unwrap();
    assert_eq!(first, ExecutionOutcome::Value(json!(-1)));

    for _ in 0..3 {
        let outcome = runner
            .execute(ExecutionRequest::new("square(3)"))
            .await
            .unwrap();
        assert_eq!(outcome, ExecutionOutcome::Value(json!(9)));
    }
}

#[tokio::test]
async fn test_plain_declarations_are_global() {
    let mut config = test_config(1, 1);
    config.library_dir = Some(fixture_path("global_library"));
    let runner = Runner::start(config).await.expect("Failed to start runner");

    let kinds = runner
        .execute(ExecutionRequest::new("[typeof double, typeof VERSION].join()"))
        .await
        .unwrap();
    assert_eq!(kinds, ExecutionOutcome::Value(json!("function,string")));

    // Still there after the isolate is rehydrated
    let doubled = runner
        .execute(ExecutionRequest::new("double(21)"))
        .await
        .unwrap();
    assert_eq!(doubled, ExecutionOutcome::Value(json!(42)));
    runner.stop().await;
}
