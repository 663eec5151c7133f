mod duration;
mod settings;

pub use duration::{format_duration, format_timeout, parse_duration, parse_timeout};
pub use settings::{Command, Config, LogLevel, Settings};
