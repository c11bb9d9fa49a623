//! Geometry utilities: SE3 transforms, SO3 helpers, PnP solving.

pub mod pnp;
pub mod se3;
pub mod so3;

pub use pnp::{PnPResult, PnpError, PnpRansacConfig, solve_pnp_ransac};
pub use se3::SE3;
