use std::sync::Arc;
use std::time::Duration;

use jsinvoke::{
    EMPTY_RESULT_MESSAGE, ExecuteError, ExecutionOutcome, ExecutionRequest, InvokeRequest,
    ResponseBody, Runner,
};
use serde_json::json;

use super::test_config;

async fn runner() -> Runner {
    Runner::start(test_config(2, 2))
        .await
        .expect("Failed to start runner")
}

/// Wait until every isolate is back in the pool and no slot is held
async fn settle(runner: &Runner) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let stats = runner.stats();
            if stats.in_flight == 0 && stats.pool.idle == stats.pool.capacity {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("runner did not settle");
}

#[tokio::test]
async fn test_object_data_is_structured() {
    let runner = runner().await;
    let request = ExecutionRequest::new("data.a").with_data(json!({"a": 1}));
    let outcome = runner.execute(request).await.unwrap();
    assert_eq!(outcome, ExecutionOutcome::Value(json!(1)));
}

#[tokio::test]
async fn test_text_data_is_parsed_when_json() {
    let runner = runner().await;
    let request = ExecutionRequest::new("Number(data)+1").with_data("5");
    let outcome = runner.execute(request).await.unwrap();
    assert_eq!(outcome, ExecutionOutcome::Value(json!(6)));
}

#[tokio::test]
async fn test_wire_request_data() {
    let runner = runner().await;
    let request: InvokeRequest =
        serde_json::from_str(r#"{"script": "data.items.length", "data": {"items": [1, 2]}}"#)
            .unwrap();
    let outcome = runner.execute(request.into()).await.unwrap();
    assert_eq!(outcome, ExecutionOutcome::Value(json!(2)));
}

#[tokio::test]
async fn test_scalar_result_body() {
    let runner = runner().await;
    let outcome = runner.execute(ExecutionRequest::new("1+1")).await.unwrap();
    let body = serde_json::to_value(outcome.into_body()).unwrap();
    assert_eq!(body, json!({"result": 2}));
}

#[tokio::test]
async fn test_undefined_is_empty_result() {
    let runner = runner().await;
    let outcome = runner
        .execute(ExecutionRequest::new("undefined"))
        .await
        .unwrap();
    assert_eq!(outcome, ExecutionOutcome::EmptyResult);

    match outcome.into_body() {
        ResponseBody::Error(body) => assert_eq!(body.error, EMPTY_RESULT_MESSAGE),
        other => panic!("expected error body, got {other:?}"),
    }
}

#[tokio::test]
async fn test_thrown_error_is_reported() {
    let runner = runner().await;
    let outcome = runner
        .execute(ExecutionRequest::new("throw new Error('boom')"))
        .await
        .unwrap();

    let body = serde_json::to_value(outcome.into_body()).unwrap();
    assert_eq!(body["error"], "boom");
    assert!(body["source"].is_string());
    assert!(body["stackTrace"].is_string());
}

#[tokio::test]
async fn test_no_state_leaks_between_requests() {
    let runner = Runner::start(test_config(1, 1)).await.unwrap();

    runner
        .execute(ExecutionRequest::new("var secret = 42; globalThis.other = 1; secret"))
        .await
        .unwrap();
    settle(&runner).await;

    let outcome = runner
        .execute(ExecutionRequest::new(
            "[typeof secret, typeof other, typeof data]",
        ))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        ExecutionOutcome::Object(json!(["undefined", "undefined", "undefined"]))
    );
}

#[tokio::test]
async fn test_resources_released_on_every_outcome() {
    let runner = runner().await;

    for script in ["1", "undefined", "throw new Error('x')", "({})"] {
        runner.execute(ExecutionRequest::new(script)).await.unwrap();
        settle(&runner).await;

        let stats = runner.stats();
        assert_eq!(stats.in_flight, 0, "slot held after {script}");
        assert_eq!(stats.pool.on_loan, 0, "isolate held after {script}");
        assert_eq!(stats.pool.disposed, 0);
    }
}

#[tokio::test]
async fn test_validation_never_reaches_sandbox() {
    let runner = runner().await;
    let result = runner.execute(ExecutionRequest::new("")).await;
    assert!(matches!(result, Err(ExecuteError::Validation(_))));
    assert_eq!(runner.stats().pool.peak_on_loan, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests() {
    let runner = Arc::new(Runner::start(test_config(3, 4)).await.unwrap());

    let tasks: Vec<_> = (0..20)
        .map(|i| {
            let runner = Arc::clone(&runner);
            tokio::spawn(async move {
                let request = ExecutionRequest::new("data.n * 2").with_data(json!({ "n": i }));
                runner.execute(request).await.unwrap()
            })
        })
        .collect();

    for (i, task) in tasks.into_iter().enumerate() {
        assert_eq!(task.await.unwrap(), ExecutionOutcome::Value(json!(i * 2)));
    }

    settle(&runner).await;
    let stats = runner.stats();
    assert!(stats.pool.peak_on_loan <= 3);
    assert_eq!(stats.in_flight, 0);
}

#[tokio::test]
async fn test_runaway_allocation_is_contained() {
    let mut config = test_config(1, 1);
    config.limits.memory_limit = Some(8 * 1024);
    let runner = Runner::start(config).await.unwrap();

    let outcome = runner
        .execute(ExecutionRequest::new(
            "const parts = []; while (true) { parts.push('x'.repeat(1 << 16)); }",
        ))
        .await
        .unwrap();
    assert!(!outcome.is_success());

    settle(&runner).await;
    let outcome = runner.execute(ExecutionRequest::new("2 + 2")).await.unwrap();
    assert_eq!(outcome, ExecutionOutcome::Value(json!(4)));
}

#[tokio::test]
async fn test_internal_error_releases_slot_and_renews_isolate() {
    let mut config = test_config(1, 1);
    config.limits.memory_limit = Some(8 * 1024);
    let runner = Runner::start(config).await.unwrap();

    // Binding a string larger than the heap fails before the script runs
    let oversized = "x".repeat(16 << 20);
    let outcome = runner
        .execute(ExecutionRequest::new("data.length").with_data(oversized))
        .await
        .unwrap();
    assert!(
        matches!(outcome, ExecutionOutcome::InternalError { .. }),
        "unexpected outcome {outcome:?}"
    );

    settle(&runner).await;
    let stats = runner.stats();
    assert_eq!(stats.in_flight, 0);
    assert_eq!(stats.pool.on_loan, 0);
    assert_eq!(stats.pool.disposed, 0);

    // The only slot and the only isolate are usable again
    let outcome = runner
        .execute(ExecutionRequest::new("sum([1, 2])"))
        .await
        .unwrap();
    assert_eq!(outcome, ExecutionOutcome::Value(json!(3)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_saturated_runner_queues_extra_request() {
    let runner = Arc::new(Runner::start(test_config(2, 2)).await.unwrap());
    let busy = "const end = Date.now() + 300; while (Date.now() < end) {} 'done'";

    let running: Vec<_> = (0..2)
        .map(|_| {
            let runner = Arc::clone(&runner);
            tokio::spawn(async move { runner.execute(ExecutionRequest::new(busy)).await })
        })
        .collect();

    tokio::time::timeout(Duration::from_secs(5), async {
        while runner.stats().pool.on_loan < 2 {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("busy scripts never started");
    assert_eq!(runner.stats().in_flight, 2);

    let extra = {
        let runner = Arc::clone(&runner);
        tokio::spawn(async move { runner.execute(ExecutionRequest::new("'extra'")).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!extra.is_finished(), "extra request ran while saturated");
    assert!(runner.stats().pool.on_loan <= 2);

    for task in running {
        let outcome = task.await.unwrap().unwrap();
        assert_eq!(outcome, ExecutionOutcome::Value(json!("done")));
    }
    let outcome = tokio::time::timeout(Duration::from_secs(5), extra)
        .await
        .expect("extra request never ran")
        .unwrap()
        .unwrap();
    assert_eq!(outcome, ExecutionOutcome::Value(json!("extra")));

    settle(&runner).await;
    assert_eq!(runner.stats().pool.peak_on_loan, 2);
}
