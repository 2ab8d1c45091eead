// Swerve drivetrain runtime: kinematics, module control, odometry and the
// fixed-rate loop that ties them to zenoh.

pub mod config;
pub mod drive;
pub mod drivetrain;
pub mod messages;
pub mod runtime;
pub mod safety;
pub mod sim;
