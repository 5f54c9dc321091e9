use anyhow::Result;
use std::sync::OnceLock;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct Config {
    pub media_bind_ip: String,
    pub media_port: u16,
    pub switch_event_addr: String,
    pub app_event_addr: String,
    pub esl_event_addr: Option<String>,
    pub synth_url: Option<String>,
    pub console_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let media_bind_ip =
            std::env::var("MEDIA_BIND_IP").unwrap_or_else(|_| "0.0.0.0".to_string());
        let media_port = std::env::var("MEDIA_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(16000);
        let switch_event_addr = std::env::var("SWITCH_EVENT_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:18021".to_string());
        let app_event_addr =
            std::env::var("APP_EVENT_ADDR").unwrap_or_else(|_| "127.0.0.1:18022".to_string());
        let esl_event_addr = std::env::var("ESL_EVENT_ADDR").ok();
        let synth_url = std::env::var("SYNTH_URL").ok();
        let console_url = std::env::var("CONSOLE_URL").ok();

        Ok(Self {
            media_bind_ip,
            media_port,
            switch_event_addr,
            app_event_addr,
            esl_event_addr,
            synth_url,
            console_url,
        })
    }
}

#[derive(Clone, Debug)]
pub struct Timeouts {
    pub synth_http: Duration,
    pub console_http: Duration,
    pub control_tcp_idle: Duration,
    pub asr_join: Duration,
}

impl Timeouts {
    fn from_env() -> Self {
        // Defaults: TTS 20s, console 5s, control TCP idle 30s, ASR worker join 2s.
        Self {
            synth_http: env_duration_ms("SYNTH_HTTP_TIMEOUT_MS", 20_000),
            console_http: env_duration_ms("CONSOLE_HTTP_TIMEOUT_MS", 5_000),
            control_tcp_idle: env_duration_ms("CONTROL_TCP_IDLE_TIMEOUT_MS", 30_000),
            asr_join: env_duration_ms("ASR_JOIN_TIMEOUT_MS", 2_000),
        }
    }
}

static TIMEOUTS: OnceLock<Timeouts> = OnceLock::new();

pub fn timeouts() -> &'static Timeouts {
    TIMEOUTS.get_or_init(Timeouts::from_env)
}

/// VAD・プリロール関連の調整値。しきい値は環境変数で上書き可能。
#[derive(Clone, Debug)]
pub struct VadConfig {
    pub rms_threshold: f32,
    pub barge_in_rms_threshold: f32,
    pub preroll: Duration,
    pub backchannel_silence: Duration,
}

impl VadConfig {
    fn from_env() -> Self {
        Self {
            rms_threshold: env_f32("VAD_RMS_THRESHOLD", 0.02),
            barge_in_rms_threshold: env_f32("VAD_BARGE_IN_RMS_THRESHOLD", 0.05),
            preroll: env_duration_ms("VAD_PREROLL_MS", 1_000),
            backchannel_silence: env_duration_ms("VAD_BACKCHANNEL_SILENCE_MS", 2_000),
        }
    }
}

static VAD_CONFIG: OnceLock<VadConfig> = OnceLock::new();

pub fn vad_config() -> &'static VadConfig {
    VAD_CONFIG.get_or_init(VadConfig::from_env)
}

#[derive(Clone, Debug)]
pub struct AsrConfig {
    pub language: String,
    pub sample_rate: u32,
    pub max_recovery_attempts: u32,
    pub prestream_buffer_max: usize,
    pub capture_enabled: bool,
    pub capture_dir: String,
}

impl AsrConfig {
    fn from_env() -> Self {
        Self {
            language: std::env::var("ASR_LANGUAGE").unwrap_or_else(|_| "ja-JP".to_string()),
            sample_rate: 16_000,
            max_recovery_attempts: env_u32("ASR_MAX_RECOVERY_ATTEMPTS", 5),
            // 16kHz mono i16 で約0.3秒
            prestream_buffer_max: env_usize("ASR_PRESTREAM_BUFFER_BYTES", 9_600),
            capture_enabled: env_bool("ASR_CAPTURE_ENABLED", false),
            capture_dir: std::env::var("ASR_CAPTURE_DIR").unwrap_or_else(|_| "/tmp".to_string()),
        }
    }
}

static ASR_CONFIG: OnceLock<AsrConfig> = OnceLock::new();

pub fn asr_config() -> &'static AsrConfig {
    ASR_CONFIG.get_or_init(AsrConfig::from_env)
}

#[derive(Clone, Debug)]
pub struct DialogueConfig {
    pub no_input_timeout: Duration,
    pub max_no_input_reminders: u32,
    pub auto_hangup_after: Duration,
}

impl DialogueConfig {
    fn from_env() -> Self {
        Self {
            no_input_timeout: Duration::from_secs(env_u64("NO_INPUT_TIMEOUT_SEC", 10)),
            max_no_input_reminders: env_u32("NO_INPUT_MAX_REMINDERS", 2),
            auto_hangup_after: Duration::from_secs(env_u64("AUTO_HANGUP_SEC", 60)),
        }
    }
}

static DIALOGUE_CONFIG: OnceLock<DialogueConfig> = OnceLock::new();

pub fn dialogue_config() -> &'static DialogueConfig {
    DIALOGUE_CONFIG.get_or_init(DialogueConfig::from_env)
}

#[derive(Clone, Debug)]
pub enum LogMode {
    Stdout,
    File,
}

#[derive(Clone, Debug)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub mode: LogMode,
    pub format: LogFormat,
    pub dir: Option<String>,
    pub file_name: String,
}

impl LoggingConfig {
    fn from_env() -> Self {
        let dir_env = std::env::var("LOG_DIR").ok();
        let mode_env = std::env::var("LOG_MODE").ok();
        let format_env = std::env::var("LOG_FORMAT").ok();

        let format = match format_env.as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };

        let mode = match mode_env.as_deref() {
            Some("file") => LogMode::File,
            Some("stdout") => LogMode::Stdout,
            _ => {
                if dir_env.is_some() {
                    LogMode::File
                } else {
                    LogMode::Stdout
                }
            }
        };

        let dir = match mode {
            LogMode::File => Some(dir_env.unwrap_or_else(|| "logs".to_string())),
            LogMode::Stdout => None,
        };

        let file_name = std::env::var("LOG_FILE_NAME").unwrap_or_else(|_| "gateway.log".to_string());

        Self {
            mode,
            format,
            dir,
            file_name,
        }
    }
}

static LOGGING: OnceLock<LoggingConfig> = OnceLock::new();

pub fn logging_config() -> &'static LoggingConfig {
    LOGGING.get_or_init(LoggingConfig::from_env)
}

fn env_duration_ms(key: &str, default_ms: u64) -> Duration {
    let ms = std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default_ms);
    Duration::from_millis(ms)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}
