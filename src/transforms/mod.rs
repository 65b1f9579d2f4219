//! Built-in snapshot transforms.
//!
//! Each transform extracts a typed input from the snapshot, rejecting it when
//! a required field is missing or mistyped, and returns a typed result that
//! echoes the correlation key first.

mod color_image;
mod depth_image;
mod feelings;
mod pose;

pub use color_image::{color_image, ColorImageResult, ColorImageSnapshot};
pub use depth_image::{depth_image, reshape_rows, DepthImageResult, DepthImageSnapshot};
pub use feelings::{feelings, FeelingsResult, FeelingsSnapshot};
pub use pose::{pose, PoseResult, PoseSnapshot};
