use std::ffi::OsStr;
use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, warn};

/// How a child process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Exited,
    TimedOut,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code, `-1` when killed or ended by a signal
    pub returncode: i32,
    pub termination: Termination,
}

/// Run `program args...` in `cwd`, capturing output.
///
/// The child runs in its own process group. When `limit` elapses or
/// `cancelled` flips to true the whole group is killed, and the call returns
/// only after the child has been reaped. Only a failure to spawn is returned
/// as an error.
pub async fn run_process<I, S>(
    program: &Path,
    args: I,
    cwd: &Path,
    limit: Duration,
    mut cancelled: watch::Receiver<bool>,
) -> io::Result<ProcessOutput>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut command = Command::new(program);
    command
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);

    let mut child = command.spawn()?;
    let pid = child.id();
    debug!(program = %program.display(), cwd = %cwd.display(), ?pid, "Spawned process");

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let finished = tokio::select! {
        res = timeout(limit, collect(&mut child, stdout, stderr)) => res.map_err(|_| Termination::TimedOut),
        Ok(_) = cancelled.wait_for(|c| *c) => Err(Termination::Cancelled),
    };

    // Whatever the script left running in its group goes too.
    kill_group(&mut child, pid);

    match finished {
        Ok(Ok((status, stdout, stderr))) => Ok(ProcessOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            returncode: status.code().unwrap_or(-1),
            termination: Termination::Exited,
        }),
        Ok(Err(e)) => {
            reap(&mut child).await;
            Err(e)
        }
        Err(termination) => {
            if termination == Termination::TimedOut {
                warn!(program = %program.display(), "Process exceeded {:?}, killed", limit);
            }
            reap(&mut child).await;
            Ok(killed(termination))
        }
    }
}

/// Wait for the child and drain both pipes until every writer has closed them.
async fn collect<O, E>(child: &mut Child, stdout: Option<O>, stderr: Option<E>) -> io::Result<(ExitStatus, Vec<u8>, Vec<u8>)>
where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
{
    tokio::try_join!(child.wait(), read_all(stdout), read_all(stderr))
}

async fn read_all<R: AsyncRead + Unpin>(pipe: Option<R>) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

#[cfg(unix)]
fn kill_group(child: &mut Child, pid: Option<u32>) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    if let Some(pgid) = pid.and_then(|p| i32::try_from(p).ok()) {
        match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => warn!("Failed to kill process group {}: {}", pgid, e),
        }
    }
    let _ = child.start_kill();
}

#[cfg(not(unix))]
fn kill_group(child: &mut Child, _pid: Option<u32>) {
    let _ = child.start_kill();
}

async fn reap(child: &mut Child) {
    if let Err(e) = child.wait().await {
        warn!("Failed to reap killed process: {}", e);
    }
}

fn killed(termination: Termination) -> ProcessOutput {
    ProcessOutput {
        stdout: String::new(),
        stderr: String::new(),
        returncode: -1,
        termination,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Instant;

    // A dropped sender never counts as cancellation.
    fn not_cancelled() -> watch::Receiver<bool> {
        watch::channel(false).1
    }

    #[tokio::test]
    async fn captures_output_and_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let out = run_process(
            Path::new("sh"),
            ["-c", "echo out; echo err >&2; exit 3"],
            dir.path(),
            Duration::from_secs(5),
            not_cancelled(),
        )
        .await
        .unwrap();
        assert_eq!(out.stdout, "out\n");
        assert_eq!(out.stderr, "err\n");
        assert_eq!(out.returncode, 3);
        assert_eq!(out.termination, Termination::Exited);
    }

    #[tokio::test]
    async fn kills_on_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let started = Instant::now();
        let out = run_process(
            Path::new("sh"),
            ["-c", "exec sleep 10"],
            dir.path(),
            Duration::from_millis(200),
            not_cancelled(),
        )
        .await
        .unwrap();
        assert_eq!(out.termination, Termination::TimedOut);
        assert_eq!(out.returncode, -1);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn timeout_stops_processes_the_script_started() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker");
        let out = run_process(
            Path::new("sh"),
            ["-c", "(sleep 1; touch marker) ; sleep 30"],
            dir.path(),
            Duration::from_millis(300),
            not_cancelled(),
        )
        .await
        .unwrap();
        assert_eq!(out.termination, Termination::TimedOut);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!marker.exists(), "a background process outlived the timeout");
    }

    #[tokio::test]
    async fn background_children_do_not_outlive_a_normal_exit() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker");
        let out = run_process(
            Path::new("sh"),
            ["-c", "(sleep 1; touch marker) >/dev/null 2>&1 & echo started"],
            dir.path(),
            Duration::from_secs(5),
            not_cancelled(),
        )
        .await
        .unwrap();
        assert_eq!(out.termination, Termination::Exited);
        assert_eq!(out.stdout, "started\n");

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn stops_when_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn({
            let cwd = dir.path().to_path_buf();
            async move {
                run_process(Path::new("sh"), ["-c", "exec sleep 10"], &cwd, Duration::from_secs(30), rx).await
            }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send_replace(true);
        let out = handle.await.unwrap().unwrap();
        assert_eq!(out.termination, Termination::Cancelled);
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let res = run_process(
            Path::new("/definitely/not/here"),
            Vec::<String>::new(),
            dir.path(),
            Duration::from_secs(1),
            not_cancelled(),
        )
        .await;
        assert!(res.is_err());
    }
}
