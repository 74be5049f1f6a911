pub mod command_timeout;
pub mod units;

pub use command_timeout::run_command_with_timeout;
pub use units::{bytes_to_mb, millicelsius_to_celsius};
