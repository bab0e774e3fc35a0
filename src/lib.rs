pub mod arm;
pub mod bus;
pub mod config;
pub mod control_loop;
pub mod control_table;
pub mod conversion;
pub mod cycle;
pub mod diagnostics;
pub mod error;
pub mod model;
pub mod poll;
pub mod sim;
pub mod teleop;
pub mod transport;
pub mod transport_feetech;
pub mod web;

pub use arm::{so101_motors, Arm, ArmMotor};
pub use bus::{MotorProbe, ServoBus};
pub use config::ToolConfig;
pub use control_loop::{start_control_loop, ControlLoopConfig, ControlLoopHandle, MotorCommand, MotorSnapshot};
pub use control_table::{OperatingMode, Register};
pub use conversion::{CalibrationTable, MotorCalibration, NormMode};
pub use diagnostics::{diagnose, repair, DiagnosticReport, DiagnosticSnapshot, Finding, RepairPlan, Severity};
pub use error::MotorError;
pub use model::{MotorId, ServoModel};
pub use poll::{command_and_poll, GoalCommand, PollConfig, PollOutcome};
pub use sim::SimTransport;
pub use transport::MotorTransport;
pub use transport_feetech::FeetechTransport;
