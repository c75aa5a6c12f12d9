//! 内核日志
//!
//! `log` 门面的实现，输出到宿主的标准错误。最大级别来自 Kernel.toml 的
//! `[debug] log_level`，可以用 `init_with_level` 覆盖。

use log::{Level, LevelFilter, Metadata, Record};

use crate::config::LOG_LEVEL;

struct KernelLogger;

static LOGGER: KernelLogger = KernelLogger;

impl log::Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let level = match record.level() {
                Level::Error => "ERROR",
                Level::Warn => "WARN",
                Level::Info => "INFO",
                Level::Debug => "DEBUG",
                Level::Trace => "TRACE",
            };
            std::eprintln!("[{:<5}] {}: {}", level, record.target(), record.args());
        }
    }

    fn flush(&self) {}
}

/// 解析日志级别字符串，无法识别时返回 `Warn`
pub fn parse_level(level: &str) -> LevelFilter {
    level.parse().unwrap_or(LevelFilter::Warn)
}

/// 以配置的级别安装日志器
pub fn init() {
    let level = option_env!("NACHOS_LOG_LEVEL").unwrap_or(LOG_LEVEL);
    init_with_level(parse_level(level));
}

/// 以指定级别安装日志器
///
/// 重复调用只更新级别。
pub fn init_with_level(level: LevelFilter) {
    // 已安装时 set_logger 返回错误，此时只需调整级别
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(level);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_known_and_unknown_levels() {
        assert_eq!(parse_level("trace"), LevelFilter::Trace);
        assert_eq!(parse_level("INFO"), LevelFilter::Info);
        assert_eq!(parse_level("off"), LevelFilter::Off);
        assert_eq!(parse_level("loud"), LevelFilter::Warn);
    }
}
