//! Registry behaviour as seen by a poller while conversions run.

use std::sync::Arc;

use canlog::{Stage, TaskRegistry, TaskToken};

#[test]
fn test_capacity_plus_one_evicts_oldest() {
    let registry = TaskRegistry::new(20);
    let tokens: Vec<TaskToken> = (0..21).map(|_| TaskToken::generate()).collect();
    for token in &tokens {
        registry.create(token.clone());
    }

    assert_eq!(registry.len(), 20);
    assert!(registry.get(&tokens[0]).is_none());
    assert!(tokens[1..].iter().all(|t| registry.get(t).is_some()));
}

#[test]
fn test_evicted_worker_updates_are_ignored() {
    let registry = TaskRegistry::new(1);
    let first = TaskToken::new("first");
    let second = TaskToken::new("second");
    registry.create(first.clone());
    registry.create(second.clone());

    assert!(!registry.update(&first, Stage::Decoded));
    assert!(!registry.fail(&first, "late failure"));
    assert_eq!(registry.get(&second).map(|s| s.progress), Some(0));
}

#[test]
fn test_snapshots_are_whole_records() {
    let registry = Arc::new(TaskRegistry::new(2));
    let token = TaskToken::new("t");
    registry.create(token.clone());

    std::thread::scope(|scope| {
        let writer = Arc::clone(&registry);
        let writer_token = token.clone();
        scope.spawn(move || {
            for stage in [Stage::Deserialized, Stage::Decoded, Stage::Normalized] {
                writer.update(&writer_token, stage);
            }
            writer.fail(&writer_token, "boom");
        });

        for _ in 0..500 {
            let state = registry.get(&token).expect("task present");
            match state.stage {
                Stage::Failed => {
                    assert_eq!(state.error.as_deref(), Some("boom"));
                    assert_eq!(state.progress, 60);
                }
                stage => {
                    assert!(state.error.is_none());
                    assert_eq!(Some(state.progress), stage.checkpoint());
                }
            }
        }
    });

    let state = registry.get(&token).expect("task present");
    assert!(state.is_failed());
    assert_eq!(state.progress, 60);
}
