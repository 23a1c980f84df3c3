use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::debug;

/// Outcome of one command run: `Err` carries a human-readable failure reason.
pub type RunResult = Result<(), String>;

/// Bytes of stderr kept for the debug log; the rest is read and discarded.
const STDERR_LIMIT: u64 = 64 * 1024;

/// Runs a job's command line to completion.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &str) -> RunResult;
}

/// Runs commands through the platform shell (`sh -c` / `cmd /C`).
///
/// Stdout is discarded and stderr is only kept up to [`STDERR_LIMIT`]; the
/// exit status alone decides the outcome. On Unix the command gets its own
/// process group, so a terminal Ctrl-C aimed at the worker does not reach it.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellRunner;

impl ShellRunner {
    fn command(line: &str) -> Command {
        #[cfg(windows)]
        let mut cmd = {
            let mut cmd = Command::new("cmd");
            cmd.arg("/C").arg(line);
            cmd
        };
        #[cfg(not(windows))]
        let mut cmd = {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(line);
            cmd
        };
        #[cfg(unix)]
        cmd.process_group(0);

        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        cmd
    }
}

/// Read at most `limit` bytes, then drain the stream so the child never blocks on a full pipe.
async fn read_capped<R>(stream: R, limit: u64) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut head = Vec::new();
    let mut limited = stream.take(limit);
    limited.read_to_end(&mut head).await?;
    tokio::io::copy(&mut limited.into_inner(), &mut tokio::io::sink()).await?;
    Ok(head)
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, command: &str) -> RunResult {
        let mut child = Self::command(command)
            .spawn()
            .map_err(|e| format!("failed to spawn command: {}", e))?;

        let stderr = match child.stderr.take() {
            Some(stream) => match read_capped(stream, STDERR_LIMIT).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    debug!("Failed to read command stderr: {}", e);
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        let status = child
            .wait()
            .await
            .map_err(|e| format!("failed to wait for command: {}", e))?;

        if status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&stderr);
        if !stderr.trim().is_empty() {
            debug!("Command stderr: {}", stderr.trim());
        }

        match status.code() {
            Some(code) => Err(format!("command exited with code {}", code)),
            None => Err("command terminated by signal".to_string()),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_successful_command() {
        assert!(ShellRunner.run("true").await.is_ok());
        assert!(ShellRunner.run("echo hello").await.is_ok());
    }

    #[tokio::test]
    async fn test_failing_command_reports_exit_code() {
        let err = ShellRunner.run("exit 3").await.unwrap_err();
        assert!(err.contains("code 3"));
    }

    #[tokio::test]
    async fn test_unknown_program_fails() {
        assert!(ShellRunner
            .run("definitely-not-a-real-program-jobq")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_large_output_is_not_kept() {
        assert!(ShellRunner
            .run("head -c 20000000 /dev/zero")
            .await
            .is_ok());

        // Stderr past the cap is drained, so the command still runs to its exit.
        let err = ShellRunner
            .run("head -c 1000000 /dev/zero >&2; exit 4")
            .await
            .unwrap_err();
        assert!(err.contains("code 4"));
    }

    #[tokio::test]
    async fn test_read_capped_truncates_and_drains() {
        let data = vec![b'x'; 10_000];
        let head = read_capped(&data[..], 100).await.unwrap();
        assert_eq!(head.len(), 100);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_command_leads_its_own_process_group() {
        // Field 5 of /proc/<pid>/stat is the process group id.
        let check = r#"[ "$(cut -d' ' -f5 /proc/$$/stat)" = "$$" ]"#;
        assert!(ShellRunner.run(check).await.is_ok());
    }
}
