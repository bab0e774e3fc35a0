use so101_servo_tools::{MotorError, MotorId, Register, ServoBus, ServoModel, SimTransport};

fn bus(sim: &SimTransport) -> ServoBus<SimTransport> {
    ServoBus::new(sim.clone(), ServoModel::Sts3215)
}

#[test]
fn eeprom_write_refused_while_torque_enabled() {
    let sim = SimTransport::so101();
    let mut bus = bus(&sim);
    bus.enable_torque(MotorId(1)).unwrap();

    let err = bus.write(Register::MaxTorqueLimit, MotorId(1), 800).unwrap_err();
    assert_eq!(err, MotorError::TorqueEnabled { id: 1, register: Register::MaxTorqueLimit });
    assert_eq!(sim.register(1, Register::MaxTorqueLimit), Some(1000));
}

#[test]
fn eeprom_write_refused_while_locked() {
    let sim = SimTransport::so101();
    sim.set_register(2, Register::Lock, 1);
    let mut bus = bus(&sim);

    let err = bus.write(Register::OperatingMode, MotorId(2), 0).unwrap_err();
    assert!(matches!(err, MotorError::EepromLocked { id: 2, .. }));
}

#[test]
fn unguarded_eeprom_write_is_dropped_by_the_servo() {
    let sim = SimTransport::so101();
    sim.set_register(3, Register::TorqueEnable, 1);
    let mut bus = bus(&sim).with_eeprom_guard(false);

    bus.write(Register::MinimumStartupForce, MotorId(3), 0).unwrap();
    assert_eq!(bus.read(Register::MinimumStartupForce, MotorId(3)).unwrap(), 16);
}

#[test]
fn with_torque_disabled_persists_eeprom_and_restores_torque() {
    let sim = SimTransport::so101();
    let mut bus = bus(&sim);
    bus.enable_torque(MotorId(1)).unwrap();

    bus.with_torque_disabled(MotorId(1), |bus| bus.write(Register::ProtectionCurrent, MotorId(1), 250))
        .unwrap();

    assert_eq!(sim.register(1, Register::ProtectionCurrent), Some(250));
    assert_eq!(sim.register(1, Register::TorqueEnable), Some(1));
    assert_eq!(sim.register(1, Register::Lock), Some(1));
}

#[test]
fn with_torque_disabled_restores_torque_after_failure() {
    let sim = SimTransport::so101();
    let mut bus = bus(&sim);

    let err = bus
        .with_torque_disabled(MotorId(1), |bus| bus.write(Register::PresentPosition, MotorId(1), 0))
        .unwrap_err();

    assert_eq!(err, MotorError::ReadOnly(Register::PresentPosition));
    assert_eq!(sim.register(1, Register::TorqueEnable), Some(1));
}

#[test]
fn out_of_range_value_is_rejected_before_sending() {
    let sim = SimTransport::so101();
    let mut bus = bus(&sim);
    sim.clear_write_log();

    let err = bus.write(Register::TorqueEnable, MotorId(1), 300).unwrap_err();
    assert!(matches!(err, MotorError::ValueOutOfRange { register: Register::TorqueEnable, .. }));
    assert!(sim.write_log().is_empty());
}

#[test]
fn signed_velocity_roundtrips_through_the_servo() {
    let sim = SimTransport::so101();
    let mut bus = bus(&sim);

    bus.write(Register::GoalVelocity, MotorId(5), -200).unwrap();
    assert_eq!(bus.read(Register::GoalVelocity, MotorId(5)).unwrap(), -200);
}

#[test]
fn scan_identifies_models_of_a_mixed_bus() {
    let sim = SimTransport::new()
        .with_servo(1, ServoModel::Sts3215)
        .with_servo(7, ServoModel::Scs0009);
    let mut bus = bus(&sim);

    let found = bus.scan(1..=10).unwrap();
    assert_eq!(found, vec![(MotorId(1), 777), (MotorId(7), 1284)]);
    assert_eq!(bus.model(MotorId(7)), ServoModel::Scs0009);
    assert_eq!(bus.model(MotorId(3)), ServoModel::Sts3215);
}

#[test]
fn scs_lock_lives_at_its_own_address() {
    let sim = SimTransport::new().with_servo(1, ServoModel::Scs0009);
    let mut bus = ServoBus::new(sim.clone(), ServoModel::Scs0009);

    bus.enable_torque(MotorId(1)).unwrap();
    assert_eq!(sim.register(1, Register::Lock), Some(1));
    assert!(!bus.supports(Register::PresentCurrent, MotorId(1)));
    assert!(matches!(
        bus.read(Register::PresentCurrent, MotorId(1)),
        Err(MotorError::UnknownRegister { .. })
    ));
}

#[test]
fn sync_write_rejects_eeprom_registers() {
    let sim = SimTransport::so101();
    let mut bus = bus(&sim);

    let err = bus
        .sync_write(Register::MaxTorqueLimit, &[(MotorId(1), 500), (MotorId(2), 500)])
        .unwrap_err();
    assert_eq!(err, MotorError::NotSyncWritable(Register::MaxTorqueLimit));
    assert!(err.to_string().contains("EEPROM"));

    let err = bus
        .sync_write(Register::PresentPosition, &[(MotorId(1), 0), (MotorId(2), 0)])
        .unwrap_err();
    assert_eq!(err, MotorError::ReadOnly(Register::PresentPosition));
}

#[test]
fn probe_reports_what_the_motor_is_doing() {
    let sim = SimTransport::so101();
    let mut bus = bus(&sim);
    bus.enable_torque(MotorId(6)).unwrap();
    bus.write(Register::GoalPosition, MotorId(6), 2500).unwrap();

    let probe = bus.probe(MotorId(6)).unwrap();
    assert_eq!(probe.goal_position, 2500);
    assert_eq!(probe.present_position, 2248);
    assert_eq!(probe.lock, 1);
    assert!(probe.moving);
    assert_eq!(
        probe.to_string(),
        "GoalPos=2500 | PresentPos=2248 | GoalVel=0 | Lock=1 | Status=0x00 | Moving=1"
    );
}

#[test]
fn missing_motor_times_out() {
    let sim = SimTransport::so101();
    let mut bus = bus(&sim);

    assert!(!bus.ping(MotorId(9)).unwrap());
    assert_eq!(bus.model_number(MotorId(9)).unwrap_err(), MotorError::NoResponse(9));
    assert_eq!(bus.read(Register::Lock, MotorId(9)).unwrap_err(), MotorError::Timeout { id: 9 });
}
