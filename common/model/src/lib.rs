//! Models shared by every Kiln component.

pub mod distro;
pub mod package;
pub mod status;
