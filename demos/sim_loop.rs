use std::{thread, time::Duration};

use so101_servo_tools::{
    control_loop::start_control_loop, ControlLoopConfig, MotorCommand, MotorId, ServoBus,
    ServoModel, SimTransport,
};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let ids = vec![MotorId(1), MotorId(2)];
    let bus = ServoBus::new(SimTransport::so101(), ServoModel::Sts3215);
    let handle = start_control_loop(bus, ids.clone(), ControlLoopConfig::default())?;
    handle.push(MotorCommand::SetTorque { ids: ids.clone(), enabled: true })?;
    handle.push(MotorCommand::SetGoalPositions { ids, positions: vec![2448, 1648] })?;
    thread::sleep(Duration::from_millis(50));
    handle.push(MotorCommand::Probe { id: MotorId(1) })?;
    thread::sleep(Duration::from_millis(20));
    let snap = handle.last_snapshot()?;
    println!("snapshot at {}: {:?}", snap.timestamp_s, snap.positions);
    handle.close();
    Ok(())
}
