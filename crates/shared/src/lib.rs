//! 共享库
//!
//! 策略引擎及其宿主共用的配置加载与日志初始化。

pub mod config;
pub mod observability;
