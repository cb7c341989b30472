mod control_points;
mod mls;

pub use control_points::{ControlPointSession, PickRole};
pub use mls::{
    deform, deform_with_strategy, DeformError, DeformParams, MlsAffineField, Point, PointPair,
    SingularPolicy,
};
