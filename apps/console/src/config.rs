use std::{collections::HashMap, fs};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub server_url: String,
    pub page_limit: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8080".into(),
            page_limit: 20,
        }
    }
}

/// Defaults, then `console.toml` in the working directory, then environment
/// variables. Later layers win.
pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("console.toml") {
        apply_file_config(&mut settings, &raw);
    }

    if let Ok(v) = std::env::var("SERVER_URL") {
        settings.server_url = v;
    }
    if let Ok(v) = std::env::var("CONSOLE__SERVER_URL") {
        settings.server_url = v;
    }
    if let Ok(v) = std::env::var("CONSOLE__PAGE_LIMIT") {
        if let Ok(parsed) = v.parse::<u32>() {
            settings.page_limit = parsed;
        }
    }

    settings
}

fn apply_file_config(settings: &mut Settings, raw: &str) {
    let Ok(file_cfg) = toml::from_str::<HashMap<String, toml::Value>>(raw) else {
        return;
    };
    if let Some(v) = file_cfg.get("server_url").and_then(toml::Value::as_str) {
        settings.server_url = v.to_string();
    }
    if let Some(parsed) = file_cfg.get("page_limit").and_then(page_limit_value) {
        settings.page_limit = parsed;
    }
}

// `page_limit = 50` and `page_limit = "50"` are both accepted.
fn page_limit_value(value: &toml::Value) -> Option<u32> {
    match value {
        toml::Value::Integer(n) => u32::try_from(*n).ok(),
        toml::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}
