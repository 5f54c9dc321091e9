use std::time::{Duration, SystemTime};

use serde_json::json;

use crate::shared::entities::{CallId, ClientId};
use crate::shared::error::ConsoleError;

use super::PortFuture;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Bot,
}

impl Role {
    fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Bot => "bot",
        }
    }
}

#[derive(Debug, Clone)]
pub struct UtteranceRecord {
    pub call_id: CallId,
    pub role: Role,
    pub text: String,
    pub state: String,
    pub timestamp: SystemTime,
}

/// 会話ログ・呼ライフサイクルの送信先。失敗しても呼を止めない（spawn_log 経由で投げる）。
pub trait ConsolePort: Send + Sync {
    fn log_utterance(&self, record: UtteranceRecord) -> PortFuture<Result<(), ConsoleError>>;
    fn start_call(
        &self,
        call_id: CallId,
        client_id: ClientId,
        caller_number: Option<String>,
    ) -> PortFuture<Result<(), ConsoleError>>;
    fn complete_call(&self, call_id: CallId) -> PortFuture<Result<(), ConsoleError>>;
    fn mark_transfer(&self, call_id: CallId) -> PortFuture<Result<(), ConsoleError>>;
}

/// fire-and-forget 用ヘルパ。送信失敗はwarnログのみ。
pub fn spawn_log(label: &'static str, fut: PortFuture<Result<(), ConsoleError>>) {
    tokio::spawn(async move {
        if let Err(err) = fut.await {
            log::warn!("[console] {} failed: {}", label, err);
        }
    });
}

pub struct HttpConsolePort {
    base_url: String,
    timeout: Duration,
}

impl HttpConsolePort {
    pub fn new(base_url: String, timeout: Duration) -> Self {
        Self { base_url, timeout }
    }

    fn post(&self, path: &str, payload: serde_json::Value) -> PortFuture<Result<(), ConsoleError>> {
        let url = format!("{}{}", self.base_url, path);
        let timeout = self.timeout;
        Box::pin(async move {
            let client = reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| ConsoleError::PostFailed(e.to_string()))?;
            client
                .post(url)
                .json(&payload)
                .send()
                .await
                .map_err(|e| ConsoleError::PostFailed(e.to_string()))?;
            Ok(())
        })
    }
}

impl ConsolePort for HttpConsolePort {
    fn log_utterance(&self, record: UtteranceRecord) -> PortFuture<Result<(), ConsoleError>> {
        self.post(
            "/utterances",
            json!({
                "callId": record.call_id.as_str(),
                "role": record.role.as_str(),
                "text": record.text,
                "state": record.state,
                "timestamp": humantime::format_rfc3339(record.timestamp).to_string(),
            }),
        )
    }

    fn start_call(
        &self,
        call_id: CallId,
        client_id: ClientId,
        caller_number: Option<String>,
    ) -> PortFuture<Result<(), ConsoleError>> {
        self.post(
            "/calls/start",
            json!({
                "callId": call_id.as_str(),
                "clientId": client_id.as_str(),
                "callerNumber": caller_number,
                "timestamp": humantime::format_rfc3339(SystemTime::now()).to_string(),
            }),
        )
    }

    fn complete_call(&self, call_id: CallId) -> PortFuture<Result<(), ConsoleError>> {
        self.post(
            "/calls/complete",
            json!({
                "callId": call_id.as_str(),
                "timestamp": humantime::format_rfc3339(SystemTime::now()).to_string(),
            }),
        )
    }

    fn mark_transfer(&self, call_id: CallId) -> PortFuture<Result<(), ConsoleError>> {
        self.post(
            "/calls/transfer",
            json!({
                "callId": call_id.as_str(),
                "timestamp": humantime::format_rfc3339(SystemTime::now()).to_string(),
            }),
        )
    }
}

pub struct NoopConsole;

impl ConsolePort for NoopConsole {
    fn log_utterance(&self, _record: UtteranceRecord) -> PortFuture<Result<(), ConsoleError>> {
        Box::pin(async { Ok(()) })
    }

    fn start_call(
        &self,
        _call_id: CallId,
        _client_id: ClientId,
        _caller_number: Option<String>,
    ) -> PortFuture<Result<(), ConsoleError>> {
        Box::pin(async { Ok(()) })
    }

    fn complete_call(&self, _call_id: CallId) -> PortFuture<Result<(), ConsoleError>> {
        Box::pin(async { Ok(()) })
    }

    fn mark_transfer(&self, _call_id: CallId) -> PortFuture<Result<(), ConsoleError>> {
        Box::pin(async { Ok(()) })
    }
}
