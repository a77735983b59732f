/// Platform-specific functionality — Windows drive enumeration.

pub mod drives;

pub use drives::{enumerate_drives, DriveInfo, DriveType};
