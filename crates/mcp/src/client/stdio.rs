//! stdio helpers for rmcp-backed provider sessions.

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::debug;

use crate::{config::McpServer, types::ProviderError};

/// Build a configured `tokio::process::Command` for stdio transport.
pub(crate) fn build_stdio_command(provider_id: &str, server: &McpServer) -> Result<Command, ProviderError> {
    let command = server
        .command
        .as_deref()
        .filter(|command| !command.trim().is_empty())
        .ok_or_else(|| ProviderError::connection(provider_id, "missing command for stdio transport"))?;

    let mut cmd = Command::new(command);
    cmd.args(&server.args);
    for (key, value) in &server.env {
        cmd.env(key, value);
    }
    if let Some(cwd) = &server.cwd {
        cmd.current_dir(cwd);
    }
    cmd.kill_on_drop(true);
    Ok(cmd)
}

/// Spawn a background task that forwards stderr lines to tracing.
pub(crate) fn spawn_stderr_logger(provider_id: String, stderr: tokio::process::ChildStderr) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(provider = %provider_id, "{line}");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_requires_a_program() {
        let mut server = McpServer::stdio("npx", vec!["-y".into(), "server".into()]);
        assert!(build_stdio_command("fs", &server).is_ok());

        server.command = Some("   ".into());
        let err = build_stdio_command("fs", &server).unwrap_err();
        assert!(matches!(err, ProviderError::Connection { .. }));
    }
}
