/// 代理工具函数模块
///
/// 网络接口探测、日志初始化以及 Via branch 生成

use std::net::IpAddr;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// RFC 3261 规定的 branch magic cookie
pub const BRANCH_MAGIC_COOKIE: &str = "z9hG4bK";

/// 获取第一个非回环的网络接口 IP 地址
///
/// 遍历系统所有网络接口，返回第一个非回环的 IPv4 地址，
/// 代理用它作为 Via 中宣告的主机地址
///
/// # 示例
/// ```rust,no_run
/// use sip_proxy::utils::get_first_non_loopback_interface;
///
/// let local_ip = get_first_non_loopback_interface().unwrap();
/// println!("本地IP: {}", local_ip);
/// ```
pub fn get_first_non_loopback_interface() -> Result<IpAddr, Box<dyn std::error::Error>> {
    for interface in get_if_addrs::get_if_addrs()? {
        if interface.is_loopback() {
            continue;
        }
        if let get_if_addrs::IfAddr::V4(ref addr) = interface.addr {
            return Ok(IpAddr::V4(addr.ip));
        }
    }
    Err("未找到 IPv4 接口".into())
}

/// 初始化 tracing 日志
///
/// `RUST_LOG` 存在时优先使用，否则使用传入的级别
pub fn initialize_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    // 重复初始化（例如测试中）时忽略错误
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

/// 生成基于 UUID 的 Via branch 参数
///
/// ```rust
/// let branch = sip_proxy::utils::make_branch();
/// assert!(branch.starts_with("z9hG4bK"));
/// ```
pub fn make_branch() -> String {
    format!("{}{}", BRANCH_MAGIC_COOKIE, Uuid::new_v4().simple())
}

/// 生成 To tag
pub fn make_tag() -> String {
    Uuid::new_v4().simple().to_string()[..16].to_string()
}
