/// Via 栈操作
///
/// 同时支持多个 `Via` 头和逗号合并的单个 `Via` 头，栈顶是第一个条目
use std::net::{IpAddr, SocketAddr};

use rsip::prelude::*;
use rsip::{Header, Headers, Param};

use crate::error::{ProxyError, ProxyResult};
use crate::sip_uri::DEFAULT_SIP_PORT;

fn split_entries(value: &str) -> impl Iterator<Item = String> + '_ {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
}

/// 按顺序列出所有 Via 条目（栈顶在前）
pub fn via_entries(headers: &Headers) -> Vec<String> {
    headers
        .iter()
        .filter_map(|header| match header {
            Header::Via(via) => Some(via.value()),
            _ => None,
        })
        .flat_map(split_entries)
        .collect()
}

/// Via 条目数量
pub fn via_count(headers: &Headers) -> usize {
    via_entries(headers).len()
}

/// 栈顶 Via 条目
pub fn top_via(headers: &Headers) -> Option<String> {
    via_entries(headers).into_iter().next()
}

/// 在栈顶压入一个 Via 条目
pub fn push_via(headers: &mut Headers, entry: String) {
    let mut rebuilt: Vec<Header> = vec![Header::Via(entry.into())];
    rebuilt.extend(headers.iter().cloned());
    *headers = rebuilt.into();
}

/// 对栈顶 Via 条目做变换，其余头保持原顺序
fn rewrite_top<F>(headers: &mut Headers, mut rewrite: F) -> Option<String>
where
    F: FnMut(&mut Vec<String>) -> Option<String>,
{
    let mut result = None;
    let mut done = false;
    let mut rebuilt: Vec<Header> = Vec::new();

    for header in headers.iter() {
        match header {
            Header::Via(via) if !done => {
                let mut entries: Vec<String> = split_entries(via.value()).collect();
                if entries.is_empty() {
                    continue;
                }
                result = rewrite(&mut entries);
                done = true;
                if !entries.is_empty() {
                    rebuilt.push(Header::Via(entries.join(", ").into()));
                }
            }
            other => rebuilt.push(other.clone()),
        }
    }

    *headers = rebuilt.into();
    result
}

/// 移除栈顶 Via 条目，返回被移除的条目
pub fn remove_top_via(headers: &mut Headers) -> Option<String> {
    rewrite_top(headers, |entries| Some(entries.remove(0)))
}

/// 在栈顶 Via 上标记 `received` 与 `rport`
///
/// 旧的 `received` / `rport` 参数会被替换
pub fn stamp_received(headers: &mut Headers, source: SocketAddr) -> ProxyResult<()> {
    let stamped = rewrite_top(headers, |entries| {
        entries[0] = stamp_entry(&entries[0], source);
        Some(entries[0].clone())
    });
    match stamped {
        Some(_) => Ok(()),
        None => Err(ProxyError::malformed("no Via header to stamp")),
    }
}

fn stamp_entry(entry: &str, source: SocketAddr) -> String {
    let mut segments = entry.split(';').map(str::trim);
    let mut stamped = segments.next().unwrap_or_default().to_string();
    for segment in segments {
        let name = segment.split('=').next().unwrap_or_default().trim();
        if name.eq_ignore_ascii_case("received") || name.eq_ignore_ascii_case("rport") {
            continue;
        }
        if !segment.is_empty() {
            stamped.push(';');
            stamped.push_str(segment);
        }
    }
    stamped.push_str(&format!(";received={};rport={}", source.ip(), source.port()));
    stamped
}

/// 由单个 Via 条目推导下一跳地址
///
/// `received` 覆盖 sent-by 主机，`rport` 覆盖 sent-by 端口，缺省端口 5060
pub fn next_hop_from_entry(entry: &str) -> ProxyResult<SocketAddr> {
    let via = rsip::headers::Via::new(entry).typed()?;

    let mut host = via.uri.host_with_port.host.clone();
    let mut port = via
        .uri
        .host_with_port
        .port
        .map(|p| *p.value())
        .unwrap_or(DEFAULT_SIP_PORT);

    if let Some(received) = via
        .received()
        .map_err(|e| ProxyError::malformed(format!("invalid received parameter: {}", e)))?
    {
        host = rsip::host_with_port::Host::IpAddr(received);
    }

    for param in &via.params {
        if let Param::Other(name, Some(value)) = param {
            if name.value().eq_ignore_ascii_case("rport") {
                if let Ok(parsed) = value.value().parse::<u16>() {
                    port = parsed;
                }
            }
        }
    }

    let ip = match host {
        rsip::host_with_port::Host::IpAddr(addr) => addr,
        rsip::host_with_port::Host::Domain(domain) => {
            let name = domain.to_string();
            name.parse::<IpAddr>().map_err(|_| {
                ProxyError::ResolutionFailure(format!("Via sent-by is not an address: {}", name))
            })?
        }
    };

    Ok(SocketAddr::new(ip, port))
}

/// 由栈顶 Via 推导下一跳地址
pub fn next_hop(headers: &Headers) -> ProxyResult<SocketAddr> {
    let top = top_via(headers).ok_or(ProxyError::InsufficientRouting { found: 0 })?;
    next_hop_from_entry(&top)
}
