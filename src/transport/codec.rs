/// SIP over TCP 分帧
///
/// 以空行结束头部，再按 Content-Length 读取消息体。
/// 解码只负责切帧，解析交给上层，解析失败的帧不影响后续帧
use bytes::{Bytes, BytesMut};
use rsip::SipMessage;
use tokio_util::codec::{Decoder, Encoder};

/// 单帧最大字节数
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

const HEADER_END: &[u8] = b"\r\n\r\n";

#[derive(Debug, Clone, Copy, Default)]
pub struct SipFrameCodec;

impl SipFrameCodec {
    pub fn new() -> Self {
        Self
    }
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(HEADER_END.len()).position(|w| w == HEADER_END)
}

fn parse_content_length(headers: &[u8]) -> Option<usize> {
    let text = std::str::from_utf8(headers).ok()?;
    for line in text.lines() {
        if let Some((name, value)) = line.split_once(':') {
            let name = name.trim();
            if name.eq_ignore_ascii_case("content-length") || name.eq_ignore_ascii_case("l") {
                return value.trim().parse().ok();
            }
        }
    }
    None
}

fn too_large(size: usize) -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        format!("SIP frame of {} bytes exceeds {} bytes", size, MAX_FRAME_SIZE),
    )
}

impl Decoder for SipFrameCodec {
    type Item = Bytes;
    type Error = std::io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // CRLF keep-alive
        let leading = buf
            .iter()
            .take_while(|b| **b == b'\r' || **b == b'\n')
            .count();
        if leading > 0 {
            let _ = buf.split_to(leading);
        }

        let head_end = match find_header_end(buf.as_ref()) {
            Some(pos) => pos,
            None => {
                if buf.len() > MAX_FRAME_SIZE {
                    return Err(too_large(buf.len()));
                }
                return Ok(None);
            }
        };

        let content_length = parse_content_length(&buf[..head_end]).unwrap_or(0);
        let needed = head_end + HEADER_END.len() + content_length;
        if needed > MAX_FRAME_SIZE {
            return Err(too_large(needed));
        }
        if buf.len() < needed {
            buf.reserve(needed - buf.len());
            return Ok(None);
        }

        Ok(Some(buf.split_to(needed).freeze()))
    }
}

impl Encoder<SipMessage> for SipFrameCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: SipMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(item.to_string().as_bytes());
        Ok(())
    }
}
