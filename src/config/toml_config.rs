use crate::config::PayoutConfig;
use crate::utils::error::{PayoutError, Result};
use regex::{Captures, Regex};
use std::path::Path;

impl PayoutConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(PayoutError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed = substitute_vars(content, |name| std::env::var(name).ok())?;

        toml::from_str(&processed).map_err(|e| PayoutError::ConfigError {
            message: format!("TOML parsing error: {}", e),
        })
    }
}

/// 替換環境變數 (例如 ${PAYPAL_CLIENT_SECRET})，未定義的變數視為錯誤
pub(crate) fn substitute_vars<F>(content: &str, lookup: F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").map_err(|e| PayoutError::ConfigError {
        message: format!("placeholder pattern failed to compile: {}", e),
    })?;

    let mut missing: Vec<String> = Vec::new();
    let result = re.replace_all(content, |caps: &Captures| match lookup(&caps[1]) {
        Some(value) => value,
        None => {
            missing.push(caps[1].to_string());
            String::new()
        }
    });

    if let Some(field) = missing.into_iter().next() {
        return Err(PayoutError::MissingConfigError { field });
    }

    Ok(result.into_owned())
}
