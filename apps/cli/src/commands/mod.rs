//! 命令定义和实现

pub mod config;
pub mod ports;
pub mod stream;

pub use config::ConfigCommand;
pub use ports::PortsCommand;
pub use stream::StreamArgs;
