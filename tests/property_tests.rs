mod common;

use common::{frame, small_config, SIDE};
use lanepilot::control::HeadingController;
use lanepilot::networks::ActorMode;
use lanepilot::policy::{self, MIN_THROTTLE};
use lanepilot::DdpgAgent;
use ndarray::Array2;
use proptest::prelude::*;

proptest! {
    #[test]
    fn test_throttle_stays_in_band(raw in -1.0e3f32..1.0e3, max_action in 0.1f32..5.0) {
        let t = policy::throttle(raw, max_action);
        prop_assert!(t >= MIN_THROTTLE);
        prop_assert!(t <= MIN_THROTTLE + max_action);
    }

    #[test]
    fn test_raw_steering_is_bounded(throttle_raw in -50.0f32..50.0, steering_raw in -50.0f32..50.0) {
        let raw = Array2::from_shape_vec((1, 2), vec![throttle_raw, steering_raw]).unwrap();
        let action = policy::squash(raw.view(), 1.0);
        prop_assert!(action[[0, 1]].abs() <= 1.0);
    }

    #[test]
    fn test_controller_is_odd_and_clamped(
        dist in -1.0f32..1.0,
        angle in -3.2f32..3.2,
        throttle in 0.0f32..2.0,
    ) {
        let controller = HeadingController::default();
        let c = controller.compute(dist, angle, throttle);
        prop_assert!(c.abs() <= controller.max_correction);
        prop_assert!((controller.compute(-dist, -angle, throttle) + c).abs() < 1e-6);
        prop_assert_eq!(controller.compute(0.0, 0.0, throttle), 0.0);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    #[test]
    fn test_visual_policy_throttle_bounds(
        seed in 0usize..1000,
        dist in -0.5f32..0.5,
        angle in -1.0f32..1.0,
    ) {
        let agent = DdpgAgent::new(small_config()).unwrap();
        let state = frame(SIDE, SIDE, seed);
        let action = agent.predict(state.view().into_dyn(), dist, angle, ActorMode::Perception).unwrap();
        prop_assert!(action[0] >= 0.5 && action[0] <= 1.5);
        let steering_correction = agent.controller.compute(dist, angle, action[0]);
        prop_assert!((action[1] - steering_correction).abs() <= 1.0 + 1e-6);
    }
}
