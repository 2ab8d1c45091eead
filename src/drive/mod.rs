// Swerve drive control for a 4-module base
//
// Provides:
// - Planar geometry types (poses, chassis speeds, module states)
// - Swerve kinematics (body velocity <-> module targets)
// - Per-module closed-loop control with azimuth optimization
// - Pose estimation from module odometry and a heading sensor

pub mod geometry;
pub mod kinematics;
pub mod module;
pub mod odometry;

pub use geometry::{ChassisSpeeds, ModuleState, Pose2d, wrap_angle};
pub use kinematics::{SwerveKinematics, desaturate};
pub use module::{ModuleController, ModuleFault, ModuleOutput, optimize};
pub use odometry::PoseEstimator;
