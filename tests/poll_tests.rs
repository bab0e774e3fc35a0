use std::time::Duration;

use so101_servo_tools::{
    command_and_poll,
    poll::{issue, move_relative, velocity_test, VelocityVerdict},
    GoalCommand, MotorId, PollConfig, Register, ServoBus, ServoModel, SimTransport,
};

fn fast() -> PollConfig {
    PollConfig {
        interval: Duration::from_millis(1),
        timeout: Duration::from_millis(500),
        ..PollConfig::default()
    }
}

fn torqued(sim: &SimTransport, id: u8) -> ServoBus<SimTransport> {
    let mut bus = ServoBus::new(sim.clone(), ServoModel::Sts3215);
    bus.enable_torque(MotorId(id)).unwrap();
    bus
}

#[test]
fn reaches_target_and_records_samples() {
    let sim = SimTransport::so101();
    let mut bus = torqued(&sim, 1);

    let outcome = command_and_poll(&mut bus, MotorId(1), &GoalCommand::position(2448), &fast()).unwrap();

    assert!(outcome.reached);
    assert!(outcome.moved);
    assert_eq!(outcome.start, 2048);
    assert_eq!(outcome.final_position, 2448);
    assert_eq!(outcome.delta(), 400);
    assert_eq!(outcome.samples.first().map(|s| s.position), Some(2248));
    assert!(outcome.samples.iter().all(|s| s.status == 0 && s.current.is_some()));
}

#[test]
fn stalled_motor_times_out_without_moving() {
    let sim = SimTransport::so101();
    sim.set_stalled(2, true);
    let mut bus = torqued(&sim, 2);
    let cfg = PollConfig { interval: Duration::from_millis(5), timeout: Duration::from_millis(30), ..fast() };

    let outcome = command_and_poll(&mut bus, MotorId(2), &GoalCommand::position(2348), &cfg).unwrap();

    assert!(!outcome.reached);
    assert!(!outcome.moved);
    assert_eq!(outcome.final_position, 2048);
    assert!(!outcome.samples.is_empty());
    assert!(outcome.elapsed >= cfg.timeout);
}

#[test]
fn optional_registers_are_written_before_the_goal() {
    let sim = SimTransport::so101();
    let mut bus = ServoBus::new(sim.clone(), ServoModel::Sts3215);
    sim.clear_write_log();

    let cmd = GoalCommand::position(1000).with_velocity(200).with_acceleration(50);
    issue(&mut bus, MotorId(3), &cmd).unwrap();

    let addresses: Vec<u8> = sim.write_log().into_iter().map(|(_, addr, _)| addr).collect();
    let spec = |r| ServoModel::Sts3215.spec(r).unwrap().address;
    assert_eq!(
        addresses,
        vec![spec(Register::Acceleration), spec(Register::GoalVelocity), spec(Register::GoalPosition)]
    );
}

#[test]
fn relative_move_is_clamped_to_encoder_range() {
    let sim = SimTransport::so101();
    sim.set_register(4, Register::PresentPosition, 4000);
    sim.set_register(4, Register::GoalPosition, 4000);
    let mut bus = torqued(&sim, 4);

    let outcome = move_relative(&mut bus, MotorId(4), 300, None, None, &fast()).unwrap();
    assert_eq!(outcome.target, 4095);
    assert!(outcome.reached);
}

#[test]
fn velocity_test_detects_motor_that_needs_goal_velocity() {
    let sim = SimTransport::so101();
    sim.set_needs_velocity(6, true);
    let mut bus = ServoBus::new(sim.clone(), ServoModel::Sts3215);

    let report = velocity_test(&mut bus, MotorId(6), &fast()).unwrap();

    assert!(!report.without_velocity.moved);
    assert_eq!(report.with_velocity.len(), 1);
    assert_eq!(report.with_velocity[0].0, 200);
    assert!(report.with_velocity[0].1.moved);
    assert_eq!(report.verdict, VelocityVerdict::NeedsVelocity(200));
    assert_eq!(sim.register(6, Register::Lock), Some(1));
}

#[test]
fn velocity_test_on_healthy_motor() {
    let sim = SimTransport::so101();
    let mut bus = ServoBus::new(sim, ServoModel::Sts3215);

    let report = velocity_test(&mut bus, MotorId(6), &fast()).unwrap();
    assert!(report.without_velocity.moved);
    assert_eq!(report.verdict, VelocityVerdict::MovesWithoutVelocity);
}

#[test]
fn velocity_test_on_stalled_motor_tries_both_velocities() {
    let sim = SimTransport::so101();
    sim.set_stalled(5, true);
    let mut bus = ServoBus::new(sim, ServoModel::Sts3215);
    let cfg = PollConfig { timeout: Duration::from_millis(20), ..fast() };

    let report = velocity_test(&mut bus, MotorId(5), &cfg).unwrap();
    let tried: Vec<i32> = report.with_velocity.iter().map(|(v, _)| *v).collect();
    assert_eq!(tried, vec![200, 1000]);
    assert_eq!(report.verdict, VelocityVerdict::NoMovement);
}
