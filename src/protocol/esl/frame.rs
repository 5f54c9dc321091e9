use std::collections::HashMap;

use nom::{
    bytes::complete::{tag, take_till1},
    character::complete::space0,
    sequence::tuple,
    IResult,
};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("connection closed mid-frame")]
    Eof,
    #[error("malformed header line: {0}")]
    BadHeader(String),
    #[error("invalid content-length: {0}")]
    BadContentLength(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// 制御イベントのテキストフレーム。ヘッダ名は小文字で正規化して保持する。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFrame {
    headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl EventFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn header_count(&self) -> usize {
        self.headers.len()
    }
}

fn parse_header_line(input: &str) -> IResult<&str, (&str, &str)> {
    let (rest, (name, _, _)) = tuple((take_till1(|c| c == ':'), tag(":"), space0))(input)?;
    Ok(("", (name, rest)))
}

/// CRLF区切りのヘッダ行を空行まで読み、content-length があれば
/// その分だけボディを読む。途中でのEOFはそのリンクの致命エラー。
pub async fn read_event_frame<R>(stream: &mut R) -> Result<EventFrame, FrameError>
where
    R: AsyncBufRead + Unpin,
{
    let mut frame = EventFrame::new();
    let mut first_line = true;
    loop {
        let mut line = String::new();
        let n = stream.read_line(&mut line).await?;
        if n == 0 {
            return Err(FrameError::Eof);
        }
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            if first_line {
                // フレーム間の余分な空行は読み飛ばす
                continue;
            }
            break;
        }
        first_line = false;
        let (_, (name, value)) = parse_header_line(trimmed)
            .map_err(|_| FrameError::BadHeader(trimmed.to_string()))?;
        frame.insert(name.trim(), value.trim().to_string());
    }

    if let Some(len_text) = frame.get("content-length") {
        let len: usize = len_text
            .parse()
            .map_err(|_| FrameError::BadContentLength(len_text.to_string()))?;
        let mut body = vec![0u8; len];
        stream
            .read_exact(&mut body)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::UnexpectedEof => FrameError::Eof,
                _ => FrameError::Io(e),
            })?;
        frame.body = body;
    }

    Ok(frame)
}

/// フレームをワイヤ形式で書き出す。content-length はボディから自動付与。
pub async fn write_event_frame<W>(stream: &mut W, frame: &EventFrame) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let mut out = String::new();
    for (name, value) in &frame.headers {
        if name == "content-length" {
            continue;
        }
        out.push_str(name);
        out.push_str(": ");
        out.push_str(value);
        out.push_str("\r\n");
    }
    if !frame.body.is_empty() {
        out.push_str(&format!("content-length: {}\r\n", frame.body.len()));
    }
    out.push_str("\r\n");
    stream.write_all(out.as_bytes()).await?;
    if !frame.body.is_empty() {
        stream.write_all(&frame.body).await?;
    }
    stream.flush().await?;
    Ok(())
}
