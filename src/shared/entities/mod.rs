use std::fmt;

use thiserror::Error;

/// 論理呼識別子（制御イベントの call_id に対応）
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallId(String);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CallIdError {
    #[error("CallId is empty")]
    Empty,
}

impl CallId {
    pub fn new(value: impl Into<String>) -> Result<Self, CallIdError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(CallIdError::Empty);
        }
        Ok(Self(value))
    }

    /// 制御イベントが call_id を運ばない場合に生成する
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// テナント識別子（対話設定の選択キー）
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientId(String);

impl ClientId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 交換機側チャネルID。park/bridge で差し替わるため CallId とは別に持つ。
pub type SwitchUuid = String;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_id_rejects_empty() {
        assert_eq!(CallId::new(""), Err(CallIdError::Empty));
        assert_eq!(CallId::new("   "), Err(CallIdError::Empty));
    }

    #[test]
    fn call_id_generate_is_unique() {
        assert_ne!(CallId::generate(), CallId::generate());
    }
}
