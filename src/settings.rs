//! Settings written by the local setup UI

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Persisted choices from device setup
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalSettings {
    /// Application to launch at boot and enforce in kiosk mode
    pub target_package: Option<String>,
    pub onboarding_seen: bool,
}

impl LocalSettings {
    /// Read settings; a missing file yields defaults
    pub async fn load(path: &Path) -> Result<Self> {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No settings at {}; using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
        };

        let settings: Self =
            serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
        Ok(settings.normalized())
    }

    fn normalized(mut self) -> Self {
        self.target_package = self
            .target_package
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_file_defaults() {
        let settings = LocalSettings::load(Path::new("/nonexistent/kiosk/settings.json"))
            .await
            .unwrap();
        assert_eq!(settings, LocalSettings::default());
    }

    #[tokio::test]
    async fn test_load_and_normalize() {
        let path = std::env::temp_dir().join(format!("kiosk-settings-{}.json", std::process::id()));
        tokio::fs::write(&path, r#"{"target_package":"  ","onboarding_seen":true}"#)
            .await
            .unwrap();

        let settings = LocalSettings::load(&path).await.unwrap();
        assert!(settings.onboarding_seen);
        assert!(settings.target_package.is_none());

        tokio::fs::write(&path, r#"{"target_package":"kiosk-ui"}"#).await.unwrap();
        let settings = LocalSettings::load(&path).await.unwrap();
        assert_eq!(settings.target_package.as_deref(), Some("kiosk-ui"));

        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[test]
    fn test_rejects_malformed_json() {
        assert!(serde_json::from_str::<LocalSettings>("{").is_err());
    }
}
