use std::time::Duration;

use jsinvoke::isolate::{IsolateError, IsolatePool};
use jsinvoke::library::{Library, LibrarySource};
use jsinvoke::types::SandboxLimits;
use jsinvoke::{ExecuteError, ExecutionRequest, Runner};

use super::test_config;

fn embedded_pool(size: usize) -> IsolatePool {
    let limits = SandboxLimits::default();
    let library = Library::load(&LibrarySource::Embedded, &limits).unwrap();
    IsolatePool::new(size, library, &limits).unwrap()
}

#[tokio::test]
async fn test_rehydration_is_idempotent() {
    let pool = embedded_pool(1);
    let probe = "[typeof sum, typeof capitalize, typeof leftover, sum([1, 2])].join()";

    let mut seen = Vec::new();
    for _ in 0..3 {
        let isolate = pool.borrow().await.unwrap();
        let result = isolate
            .context()
            .with(|ctx| {
                let result = ctx.eval::<String, _>(probe);
                ctx.eval::<(), _>("var leftover = true;").unwrap();
                result
            })
            .unwrap();
        seen.push(result);
        pool.release(isolate);
    }

    assert_eq!(seen[0], "function,function,undefined,3");
    assert!(seen.iter().all(|result| *result == seen[0]));
}

#[tokio::test]
async fn test_exhausted_pool_blocks() {
    let pool = embedded_pool(1);
    let held = pool.borrow().await.unwrap();

    let blocked = tokio::time::timeout(Duration::from_millis(50), pool.borrow()).await;
    assert!(blocked.is_err());

    drop(held);
    let isolate = tokio::time::timeout(Duration::from_secs(5), pool.borrow())
        .await
        .expect("borrow should succeed after release")
        .unwrap();
    assert_eq!(isolate.id(), 0);
}

#[tokio::test]
async fn test_drain_fails_queued_borrowers() {
    let pool = embedded_pool(2);
    let a = pool.borrow().await.unwrap();
    let b = pool.borrow().await.unwrap();

    let queued = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.borrow().await.map(|_| ()) })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let drain = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.drain().await })
    };

    let queued = tokio::time::timeout(Duration::from_secs(5), queued)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(queued, Err(IsolateError::ShuttingDown)));

    drop(a);
    drop(b);
    tokio::time::timeout(Duration::from_secs(5), drain)
        .await
        .expect("drain never completed")
        .unwrap();
    assert_eq!(pool.stats().disposed, 2);
}

#[tokio::test]
async fn test_stop_waits_for_running_script() {
    let runner = Runner::start(test_config(1, 1)).await.unwrap();

    let running = {
        let runner = runner.clone();
        tokio::spawn(async move {
            runner
                .execute(ExecutionRequest::new(
                    "let n = 0; for (let i = 0; i < 2e6; i++) { n += i; } n > 0",
                ))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(5)).await;

    tokio::time::timeout(Duration::from_secs(10), runner.stop())
        .await
        .expect("stop never completed");

    // Either it finished before the stop or it was refused
    match running.await.unwrap() {
        Ok(outcome) => assert!(outcome.is_success()),
        Err(error) => assert!(matches!(error, ExecuteError::ShuttingDown)),
    }

    let stats = runner.stats();
    assert_eq!(stats.pool.disposed, 1);
    assert_eq!(stats.pool.on_loan, 0);
    assert!(matches!(
        runner.execute(ExecutionRequest::new("1")).await,
        Err(ExecuteError::ShuttingDown)
    ));
}
