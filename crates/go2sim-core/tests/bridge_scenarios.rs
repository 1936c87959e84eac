//! End-to-end scenarios: backends, control loop and bridge node together

use std::thread;
use std::time::{Duration, Instant};

use approx::assert_relative_eq;
use go2sim_core::comm::{bounded_channel, Topic, TopicConfig};
use go2sim_core::robot::{JointMap, JointTargets, LowCmd};
use go2sim_core::sim::{
    connect_mock_backend, ContactDynamics, DynamicsBackend, EngineBackend, MockDynamics,
    MockEngine, PhysicsBackend, SimConfig, BASE_NV, FLOOR_GEOMETRY,
};
use go2sim_core::{
    pd_feedforward_torque, BackendKind, BridgeNode, ControlLoop, Error, LoopState, LowCmdMsg,
    LowState, MotorCmd, TimingMode, NUM_JOINTS,
};

fn state_topic() -> Topic<LowState> {
    Topic::with_config(TopicConfig::new("/lowstate").buffer_size(8192))
}

fn hold_msg(q: [f64; NUM_JOINTS], kp: f32, kd: f32) -> LowCmdMsg {
    LowCmdMsg {
        tick: 0,
        stamp: None,
        motor_cmd: q.iter().map(|&q| MotorCmd::position(q as f32, kp, kd)).collect(),
    }
}

#[test]
fn missing_joint_aborts_startup_on_both_backends() {
    let config = SimConfig::default();

    let engine = EngineBackend::connect(
        MockEngine::go2().without_joint("RL_calf_joint"),
        &config.robot,
    )
    .unwrap();
    match ControlLoop::new(engine, config.clone(), state_topic()) {
        Err(Error::JointResolution(name)) => assert_eq!(name, "RL_calf_joint"),
        Err(e) => panic!("unexpected error: {}", e),
        Ok(_) => panic!("control loop built without RL_calf_joint"),
    }

    let dynamics = DynamicsBackend::connect(
        MockDynamics::go2().without_joint("RL_calf_joint"),
        &config.robot,
    )
    .unwrap();
    let err = ControlLoop::new(dynamics, config, state_topic())
        .err()
        .expect("joint resolution must fail");
    assert!(err.is_startup_failure());
    assert!(err.to_string().contains("RL_calf_joint"));
}

#[test]
fn unreadable_description_is_a_startup_failure() {
    let config = SimConfig::default();
    let err = EngineBackend::connect(MockEngine::go2().fail_to_load("no such file"), &config.robot)
        .err()
        .expect("load must fail");
    assert!(matches!(err, Error::Init(_)));
    assert!(err.is_fatal());

    let err = DynamicsBackend::connect(
        MockDynamics::go2().fail_to_load("no such file"),
        &config.robot,
    )
    .err()
    .expect("load must fail");
    assert!(err.is_startup_failure());
}

#[test]
fn timer_mode_without_commands_steps_steadily() {
    for kind in [BackendKind::Engine, BackendKind::Dynamics] {
        let config = SimConfig::default().with_backend(kind);
        let backend = connect_mock_backend(&config).unwrap();
        let lowstate = state_topic();
        let states = lowstate.subscribe();
        let lowcmd = Topic::<LowCmdMsg>::new("/lowcmd");

        let control = ControlLoop::new(backend, config.clone(), lowstate).unwrap();
        let handle = BridgeNode::new(control, lowcmd.subscribe()).spawn().unwrap();
        thread::sleep(Duration::from_millis(200));
        assert!(handle.is_running(), "{} stopped early", kind);
        let timer = handle.timer_stats().unwrap();
        handle.join().unwrap();

        let published = states.drain();
        assert!(published.len() >= 20, "{}: only {} states", kind, published.len());
        assert!(timer.iterations > 0);
        assert!(published.windows(2).all(|w| w[1].tick == w[0].tick + 1));

        // Neutral command: zero torque, joints at rest stay put
        let initial = config.robot.initial_joint_positions.map(|q| q as f32);
        for state in &published {
            assert_eq!(state.joint_positions(), initial, "{} tick {}", kind, state.tick);
            assert!(state.motor_state.iter().all(|m| m.mode == 1 && m.dq == 0.0));
            assert!(state.imu_state.quaternion.iter().all(|c| c.is_finite()));
        }
        assert_eq!(published[0].imu_state.quaternion, [1.0, 0.0, 0.0, 0.0]);
    }
}

#[test]
fn timer_bridge_tracks_commands_from_the_bus() {
    let config = SimConfig::default();
    let lowstate = state_topic();
    let states = lowstate.subscribe();
    let lowcmd = Topic::<LowCmdMsg>::new("/lowcmd");
    let control =
        ControlLoop::new(connect_mock_backend(&config).unwrap(), config.clone(), lowstate).unwrap();
    let handle = BridgeNode::new(control, lowcmd.subscribe()).spawn().unwrap();

    let q0 = config.robot.initial_joint_positions;
    let mut first = q0;
    first[1] += 0.1;
    let mut second = q0;
    second[1] -= 0.1;
    second[4] += 0.05;

    let mut published: Vec<LowState> = Vec::new();
    let mut collect_ticks = |count: usize| {
        let deadline = Instant::now() + Duration::from_secs(10);
        let target = published.len() + count;
        while published.len() < target && Instant::now() < deadline {
            if let Some(state) = states.recv_timeout(Duration::from_millis(50)).unwrap() {
                published.push(state);
            }
        }
        published.last().map(|s| s.joint_positions())
    };

    collect_ticks(10);
    assert!(lowcmd.publish(hold_msg(first, 40.0, 1.0)).is_complete());
    collect_ticks(100);
    assert!(lowcmd.publish(hold_msg(second, 40.0, 1.0)).is_complete());
    let q = collect_ticks(600).unwrap();

    assert!(handle.is_running());
    let stats = handle.control().stats();
    handle.join().unwrap();

    assert!(published.len() >= 710, "only {} states", published.len());
    assert_eq!(published[0].tick, 1);
    assert!(published.windows(2).all(|w| w[1].tick == w[0].tick + 1));
    assert_eq!(stats.commands_received, 2);
    assert_eq!(stats.commands_rejected, 0);

    // Moved toward the first target before the second one arrived
    assert!(published.iter().any(|s| s.joint_positions()[1] as f64 > q0[1] + 0.02));
    assert_relative_eq!(q[1] as f64, second[1], epsilon = 1e-2);
    assert_relative_eq!(q[4] as f64, second[4], epsilon = 1e-2);
    assert_relative_eq!(q[0] as f64, second[0], epsilon = 1e-2);
}

#[test]
fn command_mode_paces_by_timestamps() {
    let config = SimConfig::default()
        .with_backend(BackendKind::Dynamics)
        .with_timing(TimingMode::Command)
        .with_max_pacing_delay(0.05);
    let lowstate = state_topic();
    let states = lowstate.subscribe();
    let control =
        ControlLoop::new(connect_mock_backend(&config).unwrap(), config.clone(), lowstate).unwrap();
    control.start().unwrap();

    let q0 = config.robot.initial_joint_positions;

    // First command: nothing to pace against
    let t = Instant::now();
    let first = control.apply_cmd(&hold_msg(q0, 20.0, 0.5).with_stamp(100.0)).unwrap();
    assert_eq!(first.map(|s| s.tick), Some(1));
    assert!(t.elapsed() < Duration::from_millis(40));

    // 30 ms later on the sender's clock
    let t = Instant::now();
    control.apply_cmd(&hold_msg(q0, 20.0, 0.5).with_stamp(100.03)).unwrap();
    assert!(t.elapsed() >= Duration::from_millis(28));

    // Stamp goes backwards: no suspension
    let t = Instant::now();
    control.apply_cmd(&hold_msg(q0, 20.0, 0.5).with_stamp(99.0)).unwrap();
    assert!(t.elapsed() < Duration::from_millis(40));

    // Huge gap is capped
    let t = Instant::now();
    control.apply_cmd(&hold_msg(q0, 20.0, 0.5).with_stamp(5000.0)).unwrap();
    let paced = t.elapsed();
    assert!(paced >= Duration::from_millis(48) && paced < Duration::from_millis(500));

    assert_eq!(control.step_count(), 4);
    let ticks: Vec<u64> = states.drain().iter().map(|s| s.tick).collect();
    assert_eq!(ticks, [1, 2, 3, 4]);
    control.stop();
    assert_eq!(control.state(), LoopState::Stopped);
}

#[test]
fn divergence_stops_the_loop() {
    let config = SimConfig::default();
    let backend =
        EngineBackend::connect(MockEngine::go2().diverge_at_step(3), &config.robot).unwrap();
    let control = ControlLoop::new(backend, config, state_topic()).unwrap();
    control.start().unwrap();

    control.tick().unwrap();
    control.tick().unwrap();
    assert!(matches!(control.tick(), Err(Error::SimulationDiverged(_))));
    assert_eq!(control.state(), LoopState::Stopped);
    assert_eq!(control.step_count(), 2);

    // No more commands or steps once stopped
    assert!(matches!(
        control.apply_cmd(&hold_msg([0.0; NUM_JOINTS], 0.0, 0.0)),
        Err(Error::InvalidState(_))
    ));
    assert!(control.tick().is_err());
    assert!(!control.with_backend(|b| b.engine().is_connected()));
}

#[test]
fn command_mode_divergence_surfaces_through_bridge() {
    let config = SimConfig::default()
        .with_backend(BackendKind::Dynamics)
        .with_timing(TimingMode::Command);
    let backend =
        DynamicsBackend::connect(MockDynamics::go2().diverge_at_step(2), &config.robot).unwrap();
    let lowcmd = Topic::<LowCmdMsg>::new("/lowcmd");
    let control = ControlLoop::new(backend, config, state_topic()).unwrap();
    let handle = BridgeNode::new(control, lowcmd.subscribe()).spawn().unwrap();

    for _ in 0..3 {
        lowcmd.publish(hold_msg([0.0; NUM_JOINTS], 0.0, 0.0));
    }
    let deadline = Instant::now() + Duration::from_secs(2);
    while handle.is_running() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert!(!handle.is_running());
    assert_eq!(handle.control().step_count(), 1);
    assert!(matches!(handle.join(), Err(Error::SimulationDiverged(_))));
}

#[test]
fn both_backends_apply_identical_torque() {
    let config = SimConfig::default();

    let mut engine = EngineBackend::connect(MockEngine::go2(), &config.robot).unwrap();
    let engine_joints = JointMap::build(&engine).unwrap();
    engine.initialize(&config, &engine_joints).unwrap();

    let mut dynamics = DynamicsBackend::connect(MockDynamics::go2(), &config.robot).unwrap();
    let dynamics_joints = JointMap::build(&dynamics).unwrap();
    dynamics.initialize(&config, &dynamics_joints).unwrap();

    // Same canonical joint, different backend handles
    assert_ne!(engine_joints.handle(0), dynamics_joints.handle(0));

    let targets = JointTargets {
        tau_ff: std::array::from_fn(|i| 0.3 * i as f64 - 1.0),
        q_des: std::array::from_fn(|i| 0.1 * (i as f64).cos()),
        v_des: std::array::from_fn(|i| 0.05 * i as f64),
        kp: std::array::from_fn(|i| 15.0 + i as f64),
        kd: std::array::from_fn(|i| 0.4 + 0.1 * i as f64),
    };
    engine.execute_step(&targets).unwrap();
    dynamics.execute_step(&targets).unwrap();

    let expected = pd_feedforward_torque(
        &targets,
        &config.robot.initial_joint_positions,
        &[0.0; NUM_JOINTS],
    );
    let generalized = dynamics.dynamics().generalized_forces();
    for i in 0..NUM_JOINTS {
        let from_engine = engine.engine().applied_torque(engine_joints.handle(i));
        let from_dynamics = generalized[BASE_NV + dynamics_joints.handle(i).0];
        assert_eq!(from_engine.to_bits(), from_dynamics.to_bits(), "joint {}", i);
        assert_eq!(from_engine.to_bits(), expected[i].to_bits(), "joint {}", i);
    }
}

#[test]
fn zero_gain_step_leaves_joints_in_place() {
    for kind in [BackendKind::Engine, BackendKind::Dynamics] {
        let config = SimConfig::default().with_backend(kind);
        let mut backend = connect_mock_backend(&config).unwrap();
        let joints = JointMap::build(&backend).unwrap();
        backend.initialize(&config, &joints).unwrap();

        let before = backend.get_state().unwrap();
        backend.execute_step(&LowCmd::neutral().targets()).unwrap();
        let after = backend.get_state().unwrap();

        for i in 0..NUM_JOINTS {
            assert_relative_eq!(
                after.joints()[i].position,
                before.joints()[i].position,
                epsilon = 1e-9
            );
        }
        assert_relative_eq!(backend.sim_time(), config.physics.timestep);
    }
}

#[test]
fn hold_command_tracks_target() {
    let config = SimConfig::default();
    let control =
        ControlLoop::new(connect_mock_backend(&config).unwrap(), config.clone(), state_topic())
            .unwrap();
    control.start().unwrap();

    let mut target = config.robot.initial_joint_positions;
    target[1] += 0.1;
    control.apply_cmd(&hold_msg(target, 40.0, 1.0)).unwrap();

    let mut last = None;
    for _ in 0..1500 {
        last = Some(control.tick().unwrap());
    }
    let q = last.unwrap().joint_positions();
    assert_relative_eq!(q[1] as f64, target[1], epsilon = 1e-3);
    assert_relative_eq!(q[0] as f64, target[0], epsilon = 1e-3);
}

#[test]
fn last_write_wins_through_the_backend() {
    let config = SimConfig::default();
    let backend = EngineBackend::connect(MockEngine::go2(), &config.robot).unwrap();
    let control = ControlLoop::new(backend, config.clone(), state_topic()).unwrap();
    control.start().unwrap();

    let c1 = hold_msg([0.5; NUM_JOINTS], 10.0, 0.1);
    let c2 = hold_msg([-0.5; NUM_JOINTS], 25.0, 0.7);
    control.apply_cmd(&c1).unwrap();
    control.apply_cmd(&c2).unwrap();
    control.tick().unwrap();

    let expected = pd_feedforward_torque(
        &c2.validate().unwrap().targets(),
        &config.robot.initial_joint_positions,
        &[0.0; NUM_JOINTS],
    );
    let joints = control.joint_map().clone();
    control.with_backend(|b| {
        for i in 0..NUM_JOINTS {
            assert_eq!(b.engine().applied_torque(joints.handle(i)), expected[i]);
        }
    });
    assert_eq!(control.stats().commands_superseded, 1);
}

#[test]
fn dynamics_backend_keeps_only_floor_pairs() {
    let config = SimConfig::default().with_backend(BackendKind::Dynamics);
    let mut backend = DynamicsBackend::connect(MockDynamics::go2(), &config.robot).unwrap();
    let joints = JointMap::build(&backend).unwrap();
    backend.initialize(&config, &joints).unwrap();

    let sim = backend.dynamics();
    let names = sim.geometry_names();
    let pairs = sim.collision_pairs();
    assert!(names.iter().any(|n| n == FLOOR_GEOMETRY));
    assert!(!pairs.is_empty());
    assert!(pairs.iter().all(|p| p.touches(&names, FLOOR_GEOMETRY)));
}

#[test]
fn publish_failure_never_blocks_stepping() {
    let config = SimConfig::default();
    let (tx, rx) = bounded_channel::<LowState>(2);
    let control =
        ControlLoop::new(connect_mock_backend(&config).unwrap(), config, tx).unwrap();
    control.start().unwrap();

    for _ in 0..10 {
        control.tick().unwrap();
    }
    let stats = control.stats();
    assert_eq!(stats.steps, 10);
    assert_eq!(stats.published, 2);
    assert_eq!(stats.publish_failures, 8);
    assert_eq!(control.state(), LoopState::Running);

    // Delivery resumes as soon as the bus drains
    assert_eq!(rx.drain().len(), 2);
    assert_eq!(control.tick().unwrap().tick, 11);
    assert_eq!(rx.recv().unwrap().tick, 11);
}

#[test]
fn config_file_drives_the_loop() {
    let config = SimConfig::from_toml_str(
        r#"
        backend = "dynamics"
        timing = "command"

        [physics]
        timestep = 0.001

        [physics.contact]
        material = "rubber"
        compliance = 5e-5

        [pacing]
        max_delay = 0.01
        "#,
    )
    .unwrap();
    let lowstate = state_topic();
    let states = lowstate.subscribe();
    let control =
        ControlLoop::new(connect_mock_backend(&config).unwrap(), config.clone(), lowstate).unwrap();
    control.start().unwrap();

    control
        .apply_cmd(&hold_msg(config.robot.initial_joint_positions, 20.0, 0.5))
        .unwrap();
    assert_eq!(states.recv().unwrap().tick, 1);
    assert_relative_eq!(control.sim_time(), 0.001);
}
