use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

use crate::formatter::ProtocolVariant;

fn default_served_model() -> String {
    "genstream".to_string()
}
fn default_code_language() -> Option<String> {
    Some("lua".to_string())
}
fn default_true() -> bool {
    true
}
fn default_log_filter() -> String {
    "info".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PromptCfg {
    /// Prompt template containing `{input}`; built-in instruction template when absent.
    #[serde(default)]
    pub template: Option<String>,
    /// Fenced code block language to extract from the last message (None = no extraction).
    #[serde(default = "default_code_language")]
    pub code_language: Option<String>,
    /// Strip leading whitespace from the extracted input.
    #[serde(default = "default_true")]
    pub strip_left: bool,
    /// NFC / BOM / CRLF / trim normalization before extraction.
    #[serde(default)]
    pub normalize: bool,
}

impl Default for PromptCfg {
    fn default() -> Self {
        Self {
            template: None,
            code_language: default_code_language(),
            strip_left: true,
            normalize: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct LoggingCfg {
    /// `tracing-subscriber` env-filter directive; `RUST_LOG` wins when set.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingCfg {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct EngineCfg {
    /// Delay between scripted snapshots, in milliseconds.
    #[serde(default)]
    pub step_delay_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Config {
    /// Model name reported in responses and metric tags.
    #[serde(default = "default_served_model")]
    pub served_model: String,
    #[serde(default)]
    pub protocol: ProtocolVariant,
    #[serde(default)]
    pub prompt: PromptCfg,
    #[serde(default)]
    pub logging: LoggingCfg,
    #[serde(default)]
    pub engine: EngineCfg,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            served_model: default_served_model(),
            protocol: ProtocolVariant::Default,
            prompt: PromptCfg::default(),
            logging: LoggingCfg::default(),
            engine: EngineCfg::default(),
        }
    }
}

impl Config {
    /// Load a Config from a file path (JSON or TOML by extension). If the
    /// extension is missing or unrecognized, try JSON first, then TOML.
    pub fn from_path<P: AsRef<Path>>(path: P) -> crate::error::CoreResult<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(crate::error::GenStreamError::from)?;
        let s = std::str::from_utf8(&bytes)
            .map_err(|e| crate::error::GenStreamError::Other(e.into()))?;
        let cfg: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str::<Self>(s)
                .map_err(|e| crate::error::GenStreamError::Other(e.into()))?,
            Some("toml") => toml::from_str::<Self>(s)
                .map_err(|e| crate::error::GenStreamError::Other(e.into()))?,
            _ => serde_json::from_str::<Self>(s)
                .map_err(|e| crate::error::GenStreamError::Other(e.into()))
                .or_else(|_| {
                    toml::from_str::<Self>(s)
                        .map_err(|e| crate::error::GenStreamError::Other(e.into()))
                })?,
        };
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn load_from_json() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("genstream.json");
        let json = r#"{
          "served_model": "game-agent",
          "protocol": "custom",
          "prompt": {"template": "Q: {input}", "code_language": null, "strip_left": false},
          "logging": {"filter": "genstream_core=debug"},
          "engine": {"step_delay_ms": 20}
        }"#;
        fs::write(&file, json).unwrap();
        let cfg = Config::from_path(&file).unwrap();
        assert_eq!(cfg.served_model, "game-agent");
        assert_eq!(cfg.protocol, ProtocolVariant::Custom);
        assert_eq!(cfg.prompt.template.as_deref(), Some("Q: {input}"));
        assert_eq!(cfg.prompt.code_language, None);
        assert!(!cfg.prompt.strip_left);
        assert!(!cfg.prompt.normalize);
        assert_eq!(cfg.logging.filter, "genstream_core=debug");
        assert_eq!(cfg.engine.step_delay_ms, 20);
    }

    #[test]
    fn missing_file_returns_io_error() {
        let missing = std::path::PathBuf::from("/definitely/not/here/genstream-missing.json");
        let err = Config::from_path(&missing).unwrap_err();
        // Should map to our typed Io error
        match err {
            crate::error::GenStreamError::Io(_) => {}
            other => panic!("expected Io error, got: {:?}", other),
        }
    }

    #[test]
    fn bad_utf8_returns_other_error() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("bad.bin");
        let bytes = vec![0xff, 0xfe, 0xfd, 0x00, 0x80];
        fs::write(&file, bytes).unwrap();
        let err = Config::from_path(&file).unwrap_err();
        match err {
            crate::error::GenStreamError::Other(_) => {}
            other => panic!("expected Other(utf8) error, got: {:?}", other),
        }
    }

    #[test]
    fn bad_json_returns_other_error() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("bad.json");
        let json = r#"{ "protocol": "nope" "#;
        fs::write(&file, json).unwrap();
        let err = Config::from_path(&file).unwrap_err();
        match err {
            crate::error::GenStreamError::Other(_) => {}
            other => panic!("expected Other(json parse) error, got: {:?}", other),
        }
    }

    #[test]
    fn load_from_toml_with_defaults() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("genstream.toml");
        let toml = r#"
served_model = "lua-coder"

[prompt]
normalize = true
"#;
        fs::write(&file, toml).unwrap();
        let cfg = Config::from_path(&file).unwrap();
        assert_eq!(cfg.served_model, "lua-coder");
        assert_eq!(cfg.protocol, ProtocolVariant::Default);
        assert_eq!(cfg.prompt.code_language.as_deref(), Some("lua"));
        assert!(cfg.prompt.strip_left);
        assert!(cfg.prompt.normalize);
        assert_eq!(cfg.logging, LoggingCfg::default());
        assert_eq!(cfg.engine.step_delay_ms, 0);
    }

    #[test]
    fn unknown_extension_falls_back_to_json_then_toml() {
        let dir = tempdir().unwrap();
        let json_path = dir.path().join("genstream.conf");
        fs::write(&json_path, r#"{"protocol":"custom"}"#).unwrap();
        let cfg_json_first = Config::from_path(&json_path).unwrap();
        assert_eq!(cfg_json_first.protocol, ProtocolVariant::Custom);
        assert_eq!(cfg_json_first.served_model, "genstream");

        let toml_path = dir.path().join("genstream2.conf");
        fs::write(&toml_path, "protocol = \"custom\"\n[engine]\nstep_delay_ms = 5\n").unwrap();
        let cfg_toml_fallback = Config::from_path(&toml_path).unwrap();
        assert_eq!(cfg_toml_fallback.protocol, ProtocolVariant::Custom);
        assert_eq!(cfg_toml_fallback.engine.step_delay_ms, 5);
    }
}
