//! Scriptable fake vault client binary.
//!
//! [`FakeCliBuilder`] writes a shell script into a temporary directory that
//! answers each subcommand with canned output and exit code, and appends one
//! line per invocation to a call log. Secret-bearing variables are logged as
//! `set` or empty, never by value.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// Canned answer to one subcommand.
#[derive(Debug, Clone, Default)]
pub struct Response {
    /// Written to stdout
    pub stdout: String,
    /// Written to stderr
    pub stderr: String,
    /// Process exit code
    pub exit_code: i32,
    /// Seconds to sleep before answering
    pub delay_secs: u32,
}

impl Response {
    /// Exit 0 with `stdout`.
    #[must_use]
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            ..Self::default()
        }
    }

    /// Exit `code` with `stderr`.
    #[must_use]
    pub fn fail(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stderr: stderr.into(),
            exit_code: code,
            ..Self::default()
        }
    }

    /// Add stderr output.
    #[must_use]
    pub fn with_stderr(mut self, stderr: impl Into<String>) -> Self {
        self.stderr = stderr.into();
        self
    }

    /// Sleep before answering.
    #[must_use]
    pub const fn delayed(mut self, secs: u32) -> Self {
        self.delay_secs = secs;
        self
    }
}

#[derive(Debug, Clone, Default)]
struct Script {
    first: Option<(u32, Response)>,
    then: Response,
}

/// Builder for a [`FakeCli`].
#[derive(Debug, Default)]
pub struct FakeCliBuilder {
    commands: BTreeMap<String, Script>,
}

impl FakeCliBuilder {
    /// Answer `command` with `response` every time.
    #[must_use]
    pub fn on(mut self, command: &str, response: Response) -> Self {
        self.commands.entry(command.to_string()).or_default().then = response;
        self
    }

    /// Answer the first `times` invocations of `command` with `response`.
    #[must_use]
    pub fn on_first(mut self, command: &str, times: u32, response: Response) -> Self {
        self.commands.entry(command.to_string()).or_default().first = Some((times, response));
        self
    }

    /// Write the script.
    ///
    /// # Errors
    ///
    /// Returns an error if the temporary directory or files cannot be written.
    pub fn install(self) -> io::Result<FakeCli> {
        let dir = TempDir::new()?;
        let root = dir.path();

        let mut script = String::from(
            "#!/bin/sh\n\
             dir=\"$(dirname \"$0\")\"\n\
             echo \"$* | BW_CLIENTID=${BW_CLIENTID-} BW_CLIENTSECRET=${BW_CLIENTSECRET:+set} \
             BW_PASSWORD=${BW_PASSWORD:+set} BW_SESSION=${BW_SESSION:+set} \
             BITWARDENCLI_APPDATA_DIR=${BITWARDENCLI_APPDATA_DIR-}\" >> \"$dir/calls.log\"\n\
             case \"$1\" in\n",
        );

        for (command, entry) in &self.commands {
            let _ = writeln!(script, "  {command})");
            let _ = writeln!(
                script,
                "    n=$(cat \"$dir/{command}.count\" 2>/dev/null || echo 0); n=$((n + 1)); echo \"$n\" > \"$dir/{command}.count\""
            );
            if let Some((times, response)) = &entry.first {
                let name = format!("{command}.first");
                write_response(root, &name, response)?;
                let _ = writeln!(script, "    if [ \"$n\" -le {times} ]; then");
                let _ = writeln!(script, "{}", answer(&name, response));
                let _ = writeln!(script, "    fi");
            }
            write_response(root, command, &entry.then)?;
            let _ = writeln!(script, "{}", answer(command, &entry.then));
            let _ = writeln!(script, "    ;;");
        }
        script.push_str("esac\nexit 0\n");

        let path = root.join("bw");
        fs::write(&path, script)?;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;

        Ok(FakeCli { dir, path })
    }
}

fn write_response(root: &Path, name: &str, response: &Response) -> io::Result<()> {
    fs::write(root.join(format!("{name}.out")), &response.stdout)?;
    fs::write(root.join(format!("{name}.err")), &response.stderr)
}

fn answer(name: &str, response: &Response) -> String {
    let mut lines = String::new();
    if response.delay_secs > 0 {
        let _ = writeln!(lines, "    sleep {}", response.delay_secs);
    }
    let _ = write!(
        lines,
        "    cat \"$dir/{name}.out\"; cat \"$dir/{name}.err\" >&2; exit {}",
        response.exit_code
    );
    lines
}

/// An installed fake vault client. The directory is removed on drop.
#[derive(Debug)]
pub struct FakeCli {
    dir: TempDir,
    path: PathBuf,
}

impl FakeCli {
    /// Start building a fake client.
    #[must_use]
    pub fn builder() -> FakeCliBuilder {
        FakeCliBuilder::default()
    }

    /// Path of the executable script.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Scratch directory usable as the client's data directory.
    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.dir.path().join("data")
    }

    /// One line per invocation: arguments, then a `|` and the logged
    /// environment.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        fs::read_to_string(self.dir.path().join("calls.log"))
            .map(|log| log.lines().map(String::from).collect())
            .unwrap_or_default()
    }

    /// Number of invocations whose first argument is `command`.
    #[must_use]
    pub fn count(&self, command: &str) -> usize {
        self.calls()
            .iter()
            .filter(|line| line.split_whitespace().next() == Some(command))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    #[test]
    fn test_fake_cli_answers_and_logs() {
        let cli = FakeCli::builder()
            .on("status", Response::ok("{\"status\":\"locked\"}"))
            .on_first("unlock", 1, Response::fail(1, "Invalid master password."))
            .on("unlock", Response::ok("token"))
            .install()
            .unwrap();

        let out = Command::new(cli.path()).arg("status").output().unwrap();
        assert!(out.status.success());
        assert_eq!(String::from_utf8_lossy(&out.stdout), "{\"status\":\"locked\"}");

        let first = Command::new(cli.path()).arg("unlock").output().unwrap();
        assert_eq!(first.status.code(), Some(1));
        assert_eq!(String::from_utf8_lossy(&first.stderr), "Invalid master password.");

        let second = Command::new(cli.path()).arg("unlock").output().unwrap();
        assert!(second.status.success());
        assert_eq!(String::from_utf8_lossy(&second.stdout), "token");

        assert_eq!(cli.count("unlock"), 2);
        assert_eq!(cli.calls().len(), 3);
    }

    #[test]
    fn test_unknown_command_succeeds_silently() {
        let cli = FakeCli::builder().install().unwrap();
        let out = Command::new(cli.path()).arg("lock").output().unwrap();
        assert!(out.status.success());
        assert!(out.stdout.is_empty());
    }
}
