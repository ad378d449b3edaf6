mod common;

use std::cell::Cell;

use common::{frame, small_config, synthetic_buffer, SIDE};
use lanepilot::config::TrainParams;
use lanepilot::networks::ActorMode;
use lanepilot::trainer::{TrainingLoop, TrainingLoopConfig};
use lanepilot::{DdpgAgent, DdpgBuilder, Observations};
use ndarray::{array, stack, Axis};

#[test]
fn test_train_five_iterations_on_64x64_frames() {
    let mut agent = DdpgBuilder::new(&[3, 64, 64])
        .action_dim(2)
        .max_action(1.0)
        .actor_variant_name("visual-policy")
        .build()
        .unwrap();
    let mut buffer = synthetic_buffer(80, 64, 64, 42);

    let stats = agent.train(&mut buffer, 5, &TrainParams::default()).unwrap();
    assert_eq!(stats.len(), 5);
    for (i, s) in stats.iter().enumerate() {
        assert_eq!(s.iteration, i);
        assert!(s.critic_loss.is_finite());
        assert!(s.critic_loss >= 0.0);
    }
    assert_eq!(agent.train_steps(), 5);

    let state = frame(64, 64, 7);
    let action = agent
        .predict(state.view().into_dyn(), 0.03, -0.05, ActorMode::Perception)
        .unwrap();
    assert_eq!(action.len(), 2);
    assert!(action[0] >= 0.5 && action[0] <= 1.5);
}

#[test]
fn test_act_batch_matches_predict() {
    let agent = DdpgAgent::new(small_config()).unwrap();
    let frames = [frame(SIDE, SIDE, 1), frame(SIDE, SIDE, 2)];
    let views: Vec<_> = frames.iter().map(|f| f.view()).collect();
    let states = Observations::Image(stack(Axis(0), &views).unwrap());
    let dist = array![0.02, -0.04];
    let angle = array![0.1, 0.0];

    let batch = agent
        .act_batch(&states, dist.view(), angle.view(), ActorMode::Perception)
        .unwrap();
    assert_eq!(batch.dim(), (2, 2));
    for i in 0..2 {
        let single = agent
            .predict(frames[i].view().into_dyn(), dist[i], angle[i], ActorMode::Perception)
            .unwrap();
        for j in 0..2 {
            assert!((batch[[i, j]] - single[j]).abs() < 1e-5);
        }
    }

    assert!(agent
        .act_batch(&states, array![0.0].view(), angle.view(), ActorMode::Perception)
        .is_err());
}

#[test]
fn test_training_loop_checkpoints_and_reports() {
    let dir = tempfile::tempdir().unwrap();
    let mut agent = DdpgAgent::new(small_config()).unwrap();
    let mut buffer = synthetic_buffer(24, SIDE, SIDE, 11);

    let trainer = TrainingLoop::new(TrainingLoopConfig {
        rounds: 3,
        iterations_per_round: 2,
        train: TrainParams {
            batch_size: 8,
            ..TrainParams::default()
        },
        checkpoint_every: 2,
        checkpoint_dir: dir.path().to_path_buf(),
        checkpoint_name: "loop".to_string(),
    })
    .unwrap();

    let hook_calls = Cell::new(0);
    let summary = trainer
        .run_with(&mut agent, &mut buffer, |round, _| {
            hook_calls.set(hook_calls.get() + 1);
            assert!(round.mean_critic_loss.is_finite());
            Ok(())
        })
        .unwrap();

    assert_eq!(hook_calls.get(), 3);
    assert_eq!(summary.total_iterations, 6);
    let checkpointed: Vec<bool> = summary.rounds.iter().map(|r| r.checkpointed).collect();
    assert_eq!(checkpointed, vec![false, true, false]);
    assert!(dir.path().join("loop_actor").exists());
    assert!(dir.path().join("loop_critic").exists());
    assert_eq!(agent.train_steps(), 6);
}
