//! Status/error taxonomy shared by every other module.

mod status;

pub use status::{Result, Status, StatusCode};
