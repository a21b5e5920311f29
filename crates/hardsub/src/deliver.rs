//! Outbound delivery of finished files: remote copy over scp and a Pushover
//! notification. Both are best effort; callers log failures and move on.

use crate::process::{ProcessError, ProcessRunner};
use hardsub_config::{PushoverConfig, ScpConfig};
use serde::Serialize;
use std::path::Path;
use std::process::Command;
use thiserror::Error;
use tracing::{debug, info};

/// Pushover message endpoint.
pub const PUSHOVER_ENDPOINT: &str = "https://api.pushover.net/1/messages.json";

#[derive(Debug, Error)]
pub enum DeliverError {
    #[error("scp failed: {0}")]
    Scp(#[from] ProcessError),

    #[error("notification request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("notification rejected with status {0}")]
    Rejected(reqwest::StatusCode),
}

/// `scp -B -P <port> [-i <key>] <file> [<user>@]<host>:<target_dir>/<name>`
///
/// Returns `None` when remote copy is not configured.
pub fn build_scp_command(file: &Path, cfg: &ScpConfig) -> Option<Command> {
    if !cfg.is_enabled() {
        return None;
    }
    let host = cfg.host.as_deref()?;
    let target_dir = cfg.target_dir.as_deref()?;
    let name = file.file_name()?.to_string_lossy();

    let remote_host = match cfg.user.as_deref().filter(|u| !u.is_empty()) {
        Some(user) => format!("{}@{}", user, host),
        None => host.to_string(),
    };
    let remote_path = format!("{}/{}", target_dir.trim_end_matches('/'), name);

    let mut cmd = Command::new("scp");
    cmd.arg("-B");
    cmd.arg("-P").arg(cfg.port.to_string());
    if let Some(key) = &cfg.key_path {
        cmd.arg("-i").arg(key);
    }
    cmd.arg(file);
    cmd.arg(format!("{}:{}", remote_host, remote_path));
    Some(cmd)
}

/// Copy `file` to the configured remote. A no-op when not configured.
pub fn copy_to_remote(runner: &dyn ProcessRunner, file: &Path, cfg: &ScpConfig) -> Result<(), DeliverError> {
    let Some(mut cmd) = build_scp_command(file, cfg) else {
        return Ok(());
    };
    info!(file = %file.display(), "copying to remote");
    runner.capture(&mut cmd)?;
    Ok(())
}

#[derive(Debug, Serialize, PartialEq)]
struct PushoverMessage<'a> {
    token: &'a str,
    user: &'a str,
    title: &'a str,
    message: &'a str,
}

/// Sends Pushover notifications when both credentials are configured.
#[derive(Debug, Clone)]
pub struct Notifier {
    client: reqwest::Client,
    config: PushoverConfig,
    endpoint: String,
}

impl Notifier {
    pub fn new(config: PushoverConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            endpoint: PUSHOVER_ENDPOINT.to_string(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.config.is_enabled()
    }

    pub async fn notify(&self, title: &str, message: &str) -> Result<(), DeliverError> {
        let (Some(token), Some(user)) = (self.config.token.as_deref(), self.config.user_key.as_deref()) else {
            return Ok(());
        };
        if !self.is_enabled() {
            return Ok(());
        }

        let body = PushoverMessage {
            token,
            user,
            title,
            message,
        };
        let response = self.client.post(&self.endpoint).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(DeliverError::Rejected(response.status()));
        }
        debug!(title, "notification sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRunner;
    use std::path::PathBuf;

    fn scp_config() -> ScpConfig {
        ScpConfig {
            host: Some("media.local".to_string()),
            user: Some("gert".to_string()),
            port: 2222,
            key_path: Some(PathBuf::from("/home/u/.ssh/id_ed25519")),
            target_dir: Some("/srv/video/".to_string()),
        }
    }

    fn args(cmd: &Command) -> Vec<String> {
        cmd.get_args()
            .filter_map(|a| a.to_str().map(String::from))
            .collect()
    }

    #[test]
    fn test_scp_command_shape() {
        let cmd = build_scp_command(Path::new("/out/ep.mp4"), &scp_config()).unwrap();
        assert_eq!(cmd.get_program(), "scp");
        assert_eq!(
            args(&cmd),
            vec![
                "-B",
                "-P",
                "2222",
                "-i",
                "/home/u/.ssh/id_ed25519",
                "/out/ep.mp4",
                "gert@media.local:/srv/video/ep.mp4",
            ]
        );
    }

    #[test]
    fn test_scp_disabled_without_host() {
        let cfg = ScpConfig {
            host: None,
            ..scp_config()
        };
        assert!(build_scp_command(Path::new("/out/ep.mp4"), &cfg).is_none());
        let runner = FakeRunner::new();
        copy_to_remote(&runner, Path::new("/out/ep.mp4"), &cfg).unwrap();
        assert!(runner.commands().is_empty());
    }

    #[test]
    fn test_scp_failure_is_reported() {
        let runner = FakeRunner::new().fail_when("scp");
        let result = copy_to_remote(&runner, Path::new("/out/ep.mp4"), &scp_config());
        assert!(matches!(result, Err(DeliverError::Scp(_))));
    }

    #[test]
    fn test_pushover_payload() {
        let body = PushoverMessage {
            token: "tok",
            user: "usr",
            title: "hardsub",
            message: "converted ep.mp4",
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["token"], "tok");
        assert_eq!(json["user"], "usr");
        assert_eq!(json["message"], "converted ep.mp4");
    }

    #[tokio::test]
    async fn test_notify_disabled_is_noop() {
        let notifier = Notifier::new(PushoverConfig::default()).with_endpoint("http://127.0.0.1:9/");
        assert!(!notifier.is_enabled());
        notifier.notify("t", "m").await.unwrap();
    }

    #[tokio::test]
    async fn test_notify_unreachable_endpoint_errors() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let notifier = Notifier::new(PushoverConfig {
            token: Some("tok".to_string()),
            user_key: Some("usr".to_string()),
        })
        .with_endpoint(format!("http://127.0.0.1:{}/1/messages.json", port));

        let result = notifier.notify("t", "m").await;
        assert!(matches!(result, Err(DeliverError::Http(_))));
    }
}
