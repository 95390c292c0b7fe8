pub mod extrinsics;
pub mod intrinsics;
pub mod omni;
pub mod spline;

pub use extrinsics::*;
pub use intrinsics::*;
pub use omni::*;
pub use spline::*;
