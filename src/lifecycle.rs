//! Extractor-mode process lifecycle.
//!
//! 1. Install termination signal handling
//! 2. Prepare the extraction directory and unpack the payload
//! 3. Run the startup program with our own arguments and stdio
//! 4. Take whichever exit code is decided first: the program's, or the
//!    forced one after a signal and its grace period
//! 5. Remove a temporary extraction directory
//!
//! The child is neither signalled nor reaped when the grace period wins; the
//! process simply exits while it may still be running.

use std::ffi::OsString;
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use log::debug;
use tokio::process::Command;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::oneshot;

use crate::archive::{ExtractionDir, Key};
use crate::config::{Config, ENV_DIR};

/// Exit code once the grace period after a termination signal has elapsed.
pub const SIGNAL_EXIT_CODE: i32 = 2;

/// Exit code when the startup program cannot run or leaves no code.
pub const FAILURE_EXIT_CODE: i32 = 1;

/// Single-slot exit code channel. The first `settle` wins; later calls are
/// ignored.
#[derive(Clone)]
pub struct ExitSlot {
    sender: Arc<Mutex<Option<oneshot::Sender<i32>>>>,
}

impl ExitSlot {
    pub fn new() -> (Self, oneshot::Receiver<i32>) {
        let (tx, rx) = oneshot::channel();
        let slot = Self {
            sender: Arc::new(Mutex::new(Some(tx))),
        };
        (slot, rx)
    }

    /// Deliver `code` unless another code was delivered first.
    ///
    /// Returns whether this call decided the outcome.
    pub fn settle(&self, code: i32) -> bool {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match sender {
            Some(tx) => {
                let _ = tx.send(code);
                true
            }
            None => false,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

/// Run an archive: extract `payload`, launch the startup program with `args`,
/// and return the exit code the process should terminate with.
///
/// # Arguments
///
/// * `config` - Settings read from the environment
/// * `key` - Identity of the running archive, compared against the marker file
/// * `payload` - The compressed entry stream following the key
/// * `args` - Arguments forwarded to the startup program
///
/// # Returns
///
/// The child's exit code, `0` in extract-only mode, `1` when the child could
/// not run or left no code, or `2` once a termination signal and its grace
/// period have passed.
///
/// # Errors
///
/// Signal setup and extraction failures are returned. A failing startup
/// program is not an error; its outcome becomes the exit code.
pub async fn run<R>(config: &Config, key: Key, payload: R, args: Vec<OsString>) -> Result<i32>
where
    R: Read + Send + 'static,
{
    // Signals are watched from the start so extraction is covered too
    let (slot, exit_code) = ExitSlot::new();
    watch_signals(config.grace, slot.clone())?;

    // Extraction is blocking file IO; keep it off the runtime threads
    let target = config.extract_dir.clone();
    let dir = tokio::task::spawn_blocking(move || -> Result<ExtractionDir> {
        let dir = ExtractionDir::prepare(target.as_deref(), key)?;
        let report = dir.extract(payload)?;
        debug!(
            "extraction dir {} ({:?}): {} entries, skipped: {}",
            dir.path().display(),
            dir.state(),
            report.entries,
            report.skipped
        );
        Ok(dir)
    })
    .await
    .context("extraction task failed")??;

    // Race the startup program against the signal watcher
    {
        let slot = slot.clone();
        let config = config.clone();
        let path = dir.path().to_path_buf();
        tokio::spawn(async move {
            if slot.is_settled() {
                return;
            }
            let code = run_startup(&config, &path, args).await;
            slot.settle(code);
        });
    }

    let code = exit_code.await.unwrap_or(FAILURE_EXIT_CODE);
    dir.cleanup();
    Ok(code)
}

/// Wait for SIGINT, SIGQUIT, SIGABRT or SIGTERM, then for `grace`, then
/// settle the signal exit code.
fn watch_signals(grace: Duration, slot: ExitSlot) -> Result<()> {
    let mut interrupt = signal(SignalKind::interrupt()).context("installing SIGINT handler")?;
    let mut quit = signal(SignalKind::quit()).context("installing SIGQUIT handler")?;
    let mut abort =
        signal(SignalKind::from_raw(libc::SIGABRT)).context("installing SIGABRT handler")?;
    let mut terminate = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;

    tokio::spawn(async move {
        tokio::select! {
            _ = interrupt.recv() => {}
            _ = quit.recv() => {}
            _ = abort.recv() => {}
            _ = terminate.recv() => {}
        }
        debug!("got signal, waiting for grace timeout before exiting");
        if !grace.is_zero() {
            tokio::time::sleep(grace).await;
        }
        slot.settle(SIGNAL_EXIT_CODE);
    });
    Ok(())
}

/// Launch the startup program found in `dir` and wait for its exit code.
pub async fn run_startup(config: &Config, dir: &Path, args: Vec<OsString>) -> i32 {
    if config.extract_only {
        debug!("extract only mode, skipping startup");
        return 0;
    }
    debug!("using startup script {}", config.startup);

    let status = Command::new(startup_path(dir, &config.startup))
        .args(args)
        .env(ENV_DIR, dir)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .await;

    match status {
        Ok(status) if status.success() => 0,
        Ok(status) => {
            debug!("startup script ended with error: {status}");
            status.code().unwrap_or(FAILURE_EXIT_CODE)
        }
        Err(err) => {
            debug!("startup script failed to start: {err}");
            FAILURE_EXIT_CODE
        }
    }
}

/// Resolve the startup program inside `dir`. Root and `.` components are
/// dropped, so an absolute name still points below the extraction directory.
fn startup_path(dir: &Path, name: &str) -> PathBuf {
    let relative: PathBuf = Path::new(name)
        .components()
        .filter(|c| matches!(c, Component::Normal(_) | Component::ParentDir))
        .collect();
    dir.join(relative)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::os::unix::fs::symlink;

    use super::*;
    use crate::archive::{EntryWriter, KEY_FILE_NAME, KEY_LEN};

    fn shell_in(dir: &Path) -> Config {
        symlink("/bin/sh", dir.join("sh")).unwrap();
        Config {
            startup: "sh".to_string(),
            ..Config::default()
        }
    }

    fn args(list: &[&str]) -> Vec<OsString> {
        list.iter().map(OsString::from).collect()
    }

    #[test]
    fn first_settle_wins() {
        let (slot, mut rx) = ExitSlot::new();
        assert!(!slot.is_settled());
        assert!(slot.settle(2));
        assert!(!slot.clone().settle(0));
        assert!(slot.is_settled());
        assert_eq!(rx.try_recv().unwrap(), 2);
    }

    #[tokio::test]
    async fn extract_only_skips_startup() {
        let config = Config {
            extract_only: true,
            startup: "does-not-exist".to_string(),
            ..Config::default()
        };
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(run_startup(&config, dir.path(), vec![]).await, 0);
    }

    #[tokio::test]
    async fn missing_program_is_generic_failure() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        assert_eq!(
            run_startup(&config, dir.path(), vec![]).await,
            FAILURE_EXIT_CODE
        );
    }

    #[tokio::test]
    async fn exit_code_and_arguments_are_forwarded() {
        let dir = tempfile::tempdir().unwrap();
        let config = shell_in(dir.path());
        let code = run_startup(&config, dir.path(), args(&["-c", "exit $1", "sh", "42"])).await;
        assert_eq!(code, 42);
    }

    #[tokio::test]
    async fn extraction_dir_is_exported() {
        let dir = tempfile::tempdir().unwrap();
        let config = shell_in(dir.path());
        let script = format!(
            "[ \"$SELFEXTRACT_DIR\" = '{}' ] && exit 7; exit 8",
            dir.path().display()
        );
        let code = run_startup(&config, dir.path(), args(&["-c", &script])).await;
        assert_eq!(code, 7);
    }

    #[test]
    fn absolute_startup_name_stays_inside_dir() {
        let dir = Path::new("/tmp/extract");
        assert_eq!(startup_path(dir, "/bin/true"), Path::new("/tmp/extract/bin/true"));
        assert_eq!(startup_path(dir, "run"), Path::new("/tmp/extract/run"));
        assert_eq!(startup_path(dir, "./bin/run"), Path::new("/tmp/extract/bin/run"));
    }

    #[tokio::test]
    async fn absolute_startup_name_is_not_run_from_outside() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            startup: "/bin/true".to_string(),
            ..Config::default()
        };
        assert_eq!(
            run_startup(&config, dir.path(), vec![]).await,
            FAILURE_EXIT_CODE
        );
    }

    #[tokio::test]
    async fn absolute_startup_name_runs_program_in_dir() {
        let dir = tempfile::tempdir().unwrap();
        symlink("/bin/sh", dir.path().join("sh")).unwrap();
        let config = Config {
            startup: "/sh".to_string(),
            ..Config::default()
        };
        let code = run_startup(&config, dir.path(), args(&["-c", "exit 9"])).await;
        assert_eq!(code, 9);
    }

    #[tokio::test]
    async fn killed_program_is_generic_failure() {
        let dir = tempfile::tempdir().unwrap();
        let config = shell_in(dir.path());
        let code = run_startup(&config, dir.path(), args(&["-c", "kill -9 $$"])).await;
        assert_eq!(code, FAILURE_EXIT_CODE);
    }

    fn payload_with_shell() -> Vec<u8> {
        let mut writer = EntryWriter::new(Vec::new());
        writer
            .append_file(Path::new("data"), 0o644, 0, 4, &b"data"[..])
            .unwrap();
        writer
            .append_symlink(Path::new("sh"), 0o777, 0, Path::new("/bin/sh"))
            .unwrap();
        writer.finish().unwrap()
    }

    #[tokio::test]
    async fn run_extracts_and_forwards_exit_code_then_removes_temp_dir() {
        let scratch = tempfile::tempdir().unwrap();
        let record = scratch.path().join("where");
        let config = Config {
            startup: "sh".to_string(),
            ..Config::default()
        };
        let script = format!(
            "echo \"$SELFEXTRACT_DIR\" > '{}'; cat \"$SELFEXTRACT_DIR/data\" >/dev/null && exit 5",
            record.display()
        );

        let code = run(
            &config,
            Key::from_bytes([1; KEY_LEN]),
            std::io::Cursor::new(payload_with_shell()),
            args(&["-c", &script]),
        )
        .await
        .unwrap();

        assert_eq!(code, 5);
        let used = fs::read_to_string(&record).unwrap();
        assert!(!Path::new(used.trim()).exists());
    }

    #[tokio::test]
    async fn run_extract_only_writes_marker_and_keeps_dir() {
        let target = tempfile::tempdir().unwrap();
        let key = Key::from_bytes([3; KEY_LEN]);
        let config = Config {
            extract_dir: Some(target.path().to_path_buf()),
            extract_only: true,
            ..Config::default()
        };

        let code = run(&config, key, std::io::Cursor::new(payload_with_shell()), vec![])
            .await
            .unwrap();

        assert_eq!(code, 0);
        assert_eq!(
            fs::read_to_string(target.path().join(KEY_FILE_NAME)).unwrap(),
            key.to_hex()
        );
        assert_eq!(fs::read(target.path().join("data")).unwrap(), b"data");
    }

    #[tokio::test]
    async fn run_fails_on_corrupt_payload() {
        let target = tempfile::tempdir().unwrap();
        let config = Config {
            extract_dir: Some(target.path().to_path_buf()),
            ..Config::default()
        };

        let result = run(
            &config,
            Key::from_bytes([4; KEY_LEN]),
            std::io::Cursor::new(vec![0x42u8; 256]),
            vec![],
        )
        .await;

        assert!(result.is_err());
        assert!(!target.path().join(KEY_FILE_NAME).exists());
    }
}
