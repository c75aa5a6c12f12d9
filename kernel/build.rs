//! Nachos 内核构建脚本
//!
//! 这个脚本在编译前运行，负责：
//! 1. 解析 Kernel.toml 配置文件
//! 2. 生成 src/config.rs 中的编译期常量
//! 3. 通过 rustc-env 导出日志级别

use std::env;
use std::fs;
use std::path::PathBuf;

/// 读取 `[section] key` 形式的整数配置，缺省时使用 `default`
fn int_value(config: &toml::Value, section: &str, key: &str, default: i64) -> i64 {
    config
        .get(section)
        .and_then(|s| s.get(key))
        .and_then(|v| v.as_integer())
        .unwrap_or(default)
}

/// 读取 `[section] key` 形式的字符串配置
fn str_value<'a>(config: &'a toml::Value, section: &str, key: &str, default: &'a str) -> &'a str {
    config
        .get(section)
        .and_then(|s| s.get(key))
        .and_then(|v| v.as_str())
        .unwrap_or(default)
}

fn main() {
    println!("cargo:rerun-if-changed=../Kernel.toml");

    let config: toml::Value = match fs::read_to_string("../Kernel.toml") {
        Ok(content) => toml::from_str(&content).expect("Kernel.toml 解析失败"),
        Err(_) => {
            println!("cargo:warning=Kernel.toml not found, using built-in defaults");
            toml::Value::Table(toml::map::Map::new())
        }
    };

    let log_level = str_value(&config, "debug", "log_level", "warn");
    println!("cargo:rustc-env=NACHOS_LOG_LEVEL={}", log_level);

    generate_config_code(&config);
}

fn generate_config_code(config: &toml::Value) {
    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR 未设置"));

    let page_size = int_value(config, "memory", "page_size", 128);
    assert!(
        page_size > 0 && page_size % 4 == 0,
        "memory.page_size 必须是 4 的正整数倍"
    );

    let config_source = format!(
        r#"//! Nachos 内核配置（自动生成）
//!
//! 此文件由 build.rs 根据 Kernel.toml 自动生成，请勿手动修改

// ============================================================
// 基本信息
// ============================================================

/// 内核名称
pub const KERNEL_NAME: &str = "{}";

/// 内核版本
pub const KERNEL_VERSION: &str = "{}";

// ============================================================
// 内存配置
// ============================================================

/// 页大小（字节）
pub const PAGE_SIZE: usize = {};

/// 物理页帧数量
pub const NUM_PHYS_PAGES: usize = {};

/// 用户栈大小（字节）
pub const USER_STACK_SIZE: usize = {};

/// 栈顶预留字节数
pub const STACK_MARGIN: usize = {};

// ============================================================
// 进程配置
// ============================================================

/// 最大进程数（PID 位图大小）
pub const MAX_PROCESSES: usize = {};

/// 每个进程最多打开的文件数
pub const MAX_OPEN_FILES: usize = {};

/// 被 Kill 的进程的退出状态
pub const KILLED_EXIT_STATUS: i32 = {};

/// 用户文件名最大长度
pub const MAX_FILENAME_LEN: usize = {};

// ============================================================
// 调试配置
// ============================================================

/// 默认日志级别
pub const LOG_LEVEL: &str = "{}";
"#,
        str_value(config, "general", "name", "nachos-kernel"),
        str_value(config, "general", "version", "0.1.0"),
        page_size,
        int_value(config, "memory", "num_phys_pages", 32),
        int_value(config, "memory", "user_stack_size", 1024),
        int_value(config, "memory", "stack_margin", 16),
        int_value(config, "process", "max_processes", 128),
        int_value(config, "process", "max_open_files", 20),
        int_value(config, "process", "killed_exit_status", 137),
        int_value(config, "process", "max_filename_len", 255),
        str_value(config, "debug", "log_level", "warn"),
    );

    let config_file = manifest_dir.join("src").join("config.rs");

    // 只有内容变化时才写入，避免每次编译都更新文件时间戳
    let existing_content = fs::read_to_string(&config_file).unwrap_or_default();
    if existing_content != config_source {
        fs::write(&config_file, &config_source).expect("写入配置文件失败");
    }
}
