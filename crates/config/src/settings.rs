//! 运行设置（`-S`，默认 `~/.shepherdrc`）
//!
//! 与传输语义无关的进程级设置：状态库地址、日志、分发节奏。

use std::path::Path;

use serde::{Deserialize, Serialize};

use shepherd_errors::{ShepherdError, ShepherdResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub state: StateSettings,
    #[serde(default)]
    pub log: LogSettings,
    #[serde(default)]
    pub dispatch: DispatchSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            state: StateSettings::default(),
            log: LogSettings::default(),
            dispatch: DispatchSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSettings {
    /// `postgres://...` 或 `sqlite:<path>`
    pub url: String,
}

impl Default for StateSettings {
    fn default() -> Self {
        Self {
            url: "sqlite:shepherd-state.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// "pretty" 或 "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchSettings {
    /// 每轮认领的任务数上限
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,
    /// todo 为空但仍有任务在途时的轮询间隔
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
}

fn default_batch_size() -> i64 {
    10
}

fn default_poll_interval() -> u64 {
    5
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            poll_interval_seconds: default_poll_interval(),
        }
    }
}

impl Settings {
    /// 从文件加载；文件不存在时退回默认值
    pub fn load(path: &Path) -> ShepherdResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).map_err(|e| {
            ShepherdError::config_error(format!("读取设置文件 {} 失败: {e}", path.display()))
        })?;
        let settings: Settings = serde_yaml::from_str(&text).map_err(|e| {
            ShepherdError::config_error(format!("解析设置文件 {} 失败: {e}", path.display()))
        })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> ShepherdResult<()> {
        if self.state.url.is_empty() {
            return Err(ShepherdError::config_error("state.url 不能为空"));
        }
        if self.dispatch.batch_size < 1 {
            return Err(ShepherdError::config_error(
                "dispatch.batch_size 必须 >= 1",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_when_missing() {
        let settings = Settings::load(Path::new("/no/such/.shepherdrc")).unwrap();
        assert_eq!(settings.state.url, "sqlite:shepherd-state.db");
        assert_eq!(settings.dispatch.batch_size, 10);
        assert_eq!(settings.log.format, "pretty");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shepherdrc");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(
            f,
            "state:\n  url: postgres://shepherd@db/shepherd\ndispatch:\n  batch_size: 50"
        )
        .unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.state.url, "postgres://shepherd@db/shepherd");
        assert_eq!(settings.dispatch.batch_size, 50);
        assert_eq!(settings.dispatch.poll_interval_seconds, 5);
    }

    #[test]
    fn test_invalid_batch_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shepherdrc");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "dispatch:\n  batch_size: 0").unwrap();

        assert!(Settings::load(&path).is_err());
    }
}
