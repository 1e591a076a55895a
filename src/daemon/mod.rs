// Daemon selection
//
// Flag set from user input and the tagged mode a factory settles on.

pub mod mode;

pub use mode::{DaemonMode, DaemonType};
