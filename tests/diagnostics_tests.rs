use so101_servo_tools::{
    diagnose,
    diagnostics::{describe_status, Issue},
    repair, DiagnosticReport, DiagnosticSnapshot, MotorId, Register, RepairPlan, ServoBus,
    ServoModel, Severity, SimTransport,
};

fn bus(sim: &SimTransport) -> ServoBus<SimTransport> {
    ServoBus::new(sim.clone(), ServoModel::Sts3215)
}

fn issues(report: &DiagnosticReport) -> Vec<Issue> {
    report.findings.iter().map(|f| f.issue.clone()).collect()
}

#[test]
fn factory_motor_flags_disabled_torque_first() {
    let sim = SimTransport::so101();
    let report = DiagnosticReport::run(&mut bus(&sim), MotorId(1));

    assert_eq!(report.findings[0].issue, Issue::TorqueDisabled);
    assert_eq!(report.worst(), Some(Severity::Error));
    assert!(report.has(|i| *i == Issue::ZeroGoalVelocity));
    assert!(report.has(|i| *i == Issue::ZeroAcceleration));
    assert!(!report.has(|i| matches!(i, Issue::Unreadable(_))));
}

#[test]
fn running_motor_only_warns_about_lock() {
    let sim = SimTransport::so101();
    let mut bus = bus(&sim);
    bus.enable_torque(MotorId(2)).unwrap();
    bus.write(Register::GoalVelocity, MotorId(2), 500).unwrap();
    bus.write(Register::Acceleration, MotorId(2), 50).unwrap();

    let report = DiagnosticReport::run(&mut bus, MotorId(2));
    assert_eq!(issues(&report), vec![Issue::LockEngaged]);
    assert_eq!(report.worst(), Some(Severity::Warning));

    sim.set_register(2, Register::Lock, 0);
    assert!(DiagnosticReport::run(&mut bus, MotorId(2)).findings.is_empty());
}

#[test]
fn zero_torque_limit_is_an_error() {
    let sim = SimTransport::so101();
    sim.set_register(3, Register::TorqueEnable, 1);
    sim.set_register(3, Register::TorqueLimit, 0);

    let report = DiagnosticReport::run(&mut bus(&sim), MotorId(3));
    assert!(report.has(|i| *i == Issue::ZeroTorqueLimit(Register::TorqueLimit)));
}

#[test]
fn status_bits_and_power_faults() {
    let sim = SimTransport::so101();
    sim.set_register(4, Register::Status, 0x24);
    sim.set_register(4, Register::MinVoltageLimit, 100);
    sim.set_register(4, Register::PresentVoltage, 95);
    sim.set_register(4, Register::PresentTemperature, 75);
    sim.set_register(4, Register::OperatingMode, 1);

    let report = DiagnosticReport::run(&mut bus(&sim), MotorId(4));
    assert!(report.has(|i| *i == Issue::StatusErrors(0x24)));
    assert!(report.has(|i| *i == Issue::Undervoltage { millivolts: 9500, limit_mv: 10000 }));
    assert!(report.has(|i| *i == Issue::Overheating { celsius: 75, limit: 70 }));
    assert!(report.has(|i| *i == Issue::WrongOperatingMode(1)));
    assert_eq!(describe_status(0x24), vec!["temperature error", "overload error"]);

    let text = report.to_string();
    assert!(text.contains("UNDERVOLTAGE: 9.5V below 10.0V"));
    assert!(text.contains("Voltage: 9.5V"));
}

#[test]
fn voltage_falls_back_to_twelve_volt_window() {
    let sim = SimTransport::so101();
    sim.set_register(5, Register::MinVoltageLimit, 0);
    sim.set_register(5, Register::MaxVoltageLimit, 0);
    sim.set_register(5, Register::PresentVoltage, 130);

    let report = DiagnosticReport::run(&mut bus(&sim), MotorId(5));
    assert!(report.has(|i| *i == Issue::Overvoltage { millivolts: 13000, limit_mv: 12600 }));
}

#[test]
fn collapsed_limits_and_high_startup_force() {
    let sim = SimTransport::so101();
    sim.set_register(6, Register::MinPositionLimit, 2048);
    sim.set_register(6, Register::MaxPositionLimit, 2048);
    sim.set_register(6, Register::MinimumStartupForce, 150);

    let report = DiagnosticReport::run(&mut bus(&sim), MotorId(6));
    assert!(report.has(|i| *i == Issue::CollapsedPositionLimits { min: 2048, max: 2048 }));
    assert!(report.has(|i| *i == Issue::HighStartupForce(150)));
}

#[test]
fn unreadable_registers_are_reported_not_fatal() {
    let sim = SimTransport::so101();
    sim.remove_servo(1);

    let snapshot = DiagnosticSnapshot::capture(&mut bus(&sim), MotorId(1));
    assert!(snapshot.values.values().all(|v| v.is_err()));
    let findings = diagnose(&snapshot);
    assert!(!findings.is_empty());
    assert!(findings.iter().all(|f| matches!(f.issue, Issue::Unreadable(_))));
    assert!(snapshot.to_string().contains("Lock"));
}

#[test]
fn scs_snapshot_skips_registers_the_model_lacks() {
    let sim = SimTransport::new().with_servo(1, ServoModel::Scs0009);
    let mut bus = ServoBus::new(sim, ServoModel::Scs0009);

    let snapshot = DiagnosticSnapshot::capture(&mut bus, MotorId(1));
    assert!(!snapshot.values.contains_key(&Register::OperatingMode));
    assert!(!snapshot.values.contains_key(&Register::PresentCurrent));
    assert_eq!(snapshot.get(Register::PresentPosition), Some(512));
}

#[test]
fn repair_restores_defaults_and_torque() {
    let sim = SimTransport::so101();
    for (reg, value) in [
        (Register::MaxTorqueLimit, 0),
        (Register::TorqueLimit, 0),
        (Register::OperatingMode, 1),
        (Register::MinimumStartupForce, 200),
        (Register::MaxPositionLimit, 100),
        (Register::TorqueEnable, 1),
        (Register::Lock, 1),
    ] {
        sim.set_register(1, reg, value);
    }
    let mut bus = bus(&sim);

    let written = repair(&mut bus, MotorId(1), &RepairPlan::default()).unwrap();

    assert_eq!(written.len(), 8);
    assert_eq!(sim.register(1, Register::MaxTorqueLimit), Some(1000));
    assert_eq!(sim.register(1, Register::TorqueLimit), Some(1000));
    assert_eq!(sim.register(1, Register::OperatingMode), Some(0));
    assert_eq!(sim.register(1, Register::MinimumStartupForce), Some(0));
    assert_eq!(sim.register(1, Register::MaxPositionLimit), Some(4095));
    assert_eq!(sim.register(1, Register::Acceleration), Some(50));
    assert_eq!(sim.register(1, Register::TorqueEnable), Some(1));
    assert_eq!(sim.register(1, Register::Lock), Some(1));
}

#[test]
fn repair_skips_registers_scs_does_not_have() {
    let sim = SimTransport::new().with_servo(2, ServoModel::Scs0009);
    let mut bus = ServoBus::new(sim.clone(), ServoModel::Scs0009);

    let written = repair(&mut bus, MotorId(2), &RepairPlan::default()).unwrap();
    let registers: Vec<Register> = written.iter().map(|(r, _)| *r).collect();

    assert!(!registers.contains(&Register::OperatingMode));
    assert!(!registers.contains(&Register::TorqueLimit));
    assert!(registers.contains(&Register::MaxPositionLimit));
    assert_eq!(sim.register(2, Register::MaxPositionLimit), Some(1023));
}
