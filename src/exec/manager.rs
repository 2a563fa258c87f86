use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::models::ExecError;
use crate::utils::scope_guard::ScopeGuard;
use super::environment::{is_plain_file_name, ExecEnvironment};
use super::runner::{run_process, ProcessOutput, Termination};

const MAX_SESSION_ID_LEN: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Running,
}

#[derive(Debug, Clone)]
pub struct ExecSettings {
    pub enabled: bool,
    pub interpreter: String,
    pub use_venv: bool,
    pub timeout: Duration,
    pub install_timeout: Duration,
    pub max_sessions: usize,
}

impl From<&Config> for ExecSettings {
    fn from(config: &Config) -> Self {
        Self {
            enabled: config.enable_python_execution,
            interpreter: config.exec_interpreter.clone(),
            use_venv: config.exec_use_venv,
            timeout: config.exec_timeout(),
            install_timeout: config.exec_install_timeout(),
            max_sessions: config.exec_max_sessions,
        }
    }
}

/// One run request
#[derive(Debug, Clone)]
pub struct RunSpec {
    pub session_id: String,
    pub owner: String,
    pub code: String,
    pub file_name: String,
    /// Folder whose files are copied next to the script
    pub source_dir: Option<PathBuf>,
}

/// Result of executing user code. Crashes, non-zero exits and timeouts all
/// end up here rather than as an `ExecError`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub stdout: String,
    pub stderr: String,
    pub returncode: i32,
    pub success: bool,
    pub timed_out: bool,
}

#[derive(Debug)]
struct SessionEntry {
    owner: String,
    status: SessionStatus,
    last_activity: DateTime<Utc>,
    generation: u64,
    env: Option<Arc<ExecEnvironment>>,
}

/// Ephemeral interpreter sessions keyed by a client-chosen id.
///
/// A session moves Idle -> Running for the length of one run and back to Idle
/// afterwards; a second request while Running is refused with `SessionBusy`.
/// Its environment persists between runs until cleanup or idle expiry.
#[derive(Debug)]
pub struct ExecSessionManager {
    settings: ExecSettings,
    sessions: Mutex<HashMap<String, SessionEntry>>,
    next_generation: AtomicU64,
}

impl ExecSessionManager {
    pub fn new(settings: ExecSettings) -> Self {
        Self {
            settings,
            sessions: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
        }
    }

    pub fn settings(&self) -> &ExecSettings {
        &self.settings
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, SessionEntry>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn run(&self, req: RunSpec) -> Result<RunOutcome, ExecError> {
        self.check_enabled()?;
        validate_session_id(&req.session_id)?;
        if !is_plain_file_name(&req.file_name) {
            return Err(ExecError::InvalidRequest(format!("invalid file name '{}'", req.file_name)));
        }

        let (generation, existing) = self.acquire(&req.session_id, &req.owner)?;
        let _running = ScopeGuard::new(|| self.release(&req.session_id, generation));
        let env = self.environment(&req.session_id, generation, existing).await?;

        if let Some(source) = &req.source_dir {
            env.seed_from(source, &req.file_name).await;
        }
        let script = env.write_script(&req.file_name, &req.code).await?;
        let interpreter = env.interpreter(&self.settings.interpreter);

        info!(session = %req.session_id, owner = %req.owner, file = %req.file_name, "Running script");
        let output = run_process(&interpreter, [&script], env.path(), self.settings.timeout, env.cancelled())
            .await
            .map_err(|e| {
                error!("Failed to start {}: {}", interpreter.display(), e);
                ExecError::EnvironmentFailure(format!("cannot start {}: {e}", interpreter.display()))
            })?;

        Ok(outcome(output, self.settings.timeout, "Script execution"))
    }

    /// Install a package into the session's virtualenv.
    pub async fn install_package(&self, session_id: &str, owner: &str, package: &str) -> Result<RunOutcome, ExecError> {
        self.check_enabled()?;
        validate_session_id(session_id)?;
        if !self.settings.use_venv {
            return Err(ExecError::InvalidRequest("package installation requires per-session virtualenvs".to_string()));
        }
        validate_package_name(package)?;

        let (generation, existing) = self.acquire(session_id, owner)?;
        let _running = ScopeGuard::new(|| self.release(session_id, generation));
        let env = self.environment(session_id, generation, existing).await?;
        let pip = env
            .pip()
            .ok_or_else(|| ExecError::EnvironmentFailure("session has no virtualenv".to_string()))?;

        info!(session = %session_id, owner = %owner, package = %package, "Installing package");
        let output = run_process(&pip, ["install", package], env.path(), self.settings.install_timeout, env.cancelled())
            .await
            .map_err(|e| ExecError::EnvironmentFailure(format!("cannot start pip: {e}")))?;

        Ok(outcome(output, self.settings.install_timeout, "Package installation"))
    }

    /// Tear a session down. Unknown sessions are a successful no-op.
    pub fn cleanup(&self, session_id: &str, owner: &str) -> Result<bool, ExecError> {
        let removed = {
            let mut sessions = self.sessions();
            match sessions.get(session_id) {
                None => return Ok(false),
                Some(entry) if entry.owner != owner => {
                    return Err(ExecError::Forbidden(session_id.to_string()));
                }
                Some(_) => sessions.remove(session_id),
            }
        };

        if let Some(entry) = removed {
            teardown(session_id, entry);
        }
        Ok(true)
    }

    /// Remove Idle sessions untouched for at least `max_idle`.
    pub fn reap_idle(&self, max_idle: Duration) -> usize {
        let max_idle = chrono::Duration::from_std(max_idle).unwrap_or_else(|_| chrono::Duration::days(36_500));
        let now = Utc::now();
        let expired: Vec<(String, SessionEntry)> = {
            let mut sessions = self.sessions();
            let ids: Vec<String> = sessions
                .iter()
                .filter(|(_, e)| e.status == SessionStatus::Idle && now - e.last_activity >= max_idle)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| sessions.remove(&id).map(|e| (id, e)))
                .collect()
        };

        let count = expired.len();
        for (id, entry) in expired {
            info!("Reaping idle session {}", id);
            teardown(&id, entry);
        }
        count
    }

    pub fn cleanup_all(&self) -> usize {
        let all: Vec<(String, SessionEntry)> = self.sessions().drain().collect();
        let count = all.len();
        for (id, entry) in all {
            teardown(&id, entry);
        }
        count
    }

    pub fn status(&self, session_id: &str) -> Option<SessionStatus> {
        self.sessions().get(session_id).map(|e| e.status)
    }

    pub fn session_dir(&self, session_id: &str) -> Option<PathBuf> {
        self.sessions()
            .get(session_id)
            .and_then(|e| e.env.as_ref())
            .map(|env| env.path().to_path_buf())
    }

    pub fn session_count(&self) -> usize {
        self.sessions().len()
    }

    pub fn running_count(&self) -> usize {
        self.sessions().values().filter(|e| e.status == SessionStatus::Running).count()
    }

    fn check_enabled(&self) -> Result<(), ExecError> {
        if self.settings.enabled {
            Ok(())
        } else {
            Err(ExecError::Disabled)
        }
    }

    /// The session's environment, provisioning it on first use. A failed
    /// provision forgets the session again.
    async fn environment(
        &self,
        session_id: &str,
        generation: u64,
        existing: Option<Arc<ExecEnvironment>>,
    ) -> Result<Arc<ExecEnvironment>, ExecError> {
        if let Some(env) = existing {
            return Ok(env);
        }

        let env = match ExecEnvironment::provision(session_id, &self.settings.interpreter, self.settings.use_venv).await {
            Ok(env) => Arc::new(env),
            Err(e) => {
                error!("Failed to provision session {}: {}", session_id, e);
                self.discard(session_id, generation);
                return Err(e);
            }
        };

        let mut sessions = self.sessions();
        match sessions.get_mut(session_id) {
            Some(entry) if entry.generation == generation => {
                entry.env = Some(env.clone());
            }
            _ => {
                // Cleaned up while provisioning.
                env.cancel();
            }
        }
        Ok(env)
    }

    fn acquire(&self, session_id: &str, owner: &str) -> Result<(u64, Option<Arc<ExecEnvironment>>), ExecError> {
        let mut sessions = self.sessions();
        if let Some(entry) = sessions.get_mut(session_id) {
            if entry.owner != owner {
                return Err(ExecError::Forbidden(session_id.to_string()));
            }
            if entry.status == SessionStatus::Running {
                warn!("Rejected request for busy session {}", session_id);
                return Err(ExecError::SessionBusy(session_id.to_string()));
            }
            entry.status = SessionStatus::Running;
            entry.last_activity = Utc::now();
            return Ok((entry.generation, entry.env.clone()));
        }

        if sessions.len() >= self.settings.max_sessions {
            return Err(ExecError::CapacityExceeded(format!(
                "session limit of {} reached",
                self.settings.max_sessions
            )));
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        sessions.insert(session_id.to_string(), SessionEntry {
            owner: owner.to_string(),
            status: SessionStatus::Running,
            last_activity: Utc::now(),
            generation,
            env: None,
        });
        info!("Created execution session {} for {}", session_id, owner);
        Ok((generation, None))
    }

    fn release(&self, session_id: &str, generation: u64) {
        if let Some(entry) = self.sessions().get_mut(session_id) {
            if entry.generation == generation {
                entry.status = SessionStatus::Idle;
                entry.last_activity = Utc::now();
            }
        }
    }

    fn discard(&self, session_id: &str, generation: u64) {
        let mut sessions = self.sessions();
        if sessions.get(session_id).is_some_and(|e| e.generation == generation) {
            sessions.remove(session_id);
        }
    }
}

/// Map how the process ended onto the reply; `what` names the step in the timeout message.
fn outcome(output: ProcessOutput, limit: Duration, what: &str) -> RunOutcome {
    match output.termination {
        Termination::Exited => RunOutcome {
            success: output.returncode == 0,
            stdout: output.stdout,
            stderr: output.stderr,
            returncode: output.returncode,
            timed_out: false,
        },
        Termination::TimedOut => RunOutcome {
            stdout: output.stdout,
            stderr: format!("Error: {} timed out ({} seconds)", what, limit.as_secs()),
            returncode: -1,
            success: false,
            timed_out: true,
        },
        Termination::Cancelled => RunOutcome {
            stdout: output.stdout,
            stderr: "Error: session was cleaned up during execution".to_string(),
            returncode: -1,
            success: false,
            timed_out: false,
        },
    }
}

fn teardown(session_id: &str, entry: SessionEntry) {
    if let Some(env) = entry.env {
        env.cancel();
        info!("Tearing down session {} ({})", session_id, env.path().display());
    }
}

fn validate_session_id(session_id: &str) -> Result<(), ExecError> {
    let valid = !session_id.is_empty()
        && session_id.len() <= MAX_SESSION_ID_LEN
        && session_id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(ExecError::InvalidRequest(format!("invalid session id '{session_id}'")))
    }
}

fn validate_package_name(package: &str) -> Result<(), ExecError> {
    let valid = !package.is_empty()
        && !package.starts_with('-')
        && package.len() <= 200
        && package
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_.[],=<>!~".contains(c));
    if valid {
        Ok(())
    } else {
        Err(ExecError::InvalidRequest(format!("invalid package name '{package}'")))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Instant;

    fn manager(timeout: Duration) -> Arc<ExecSessionManager> {
        Arc::new(ExecSessionManager::new(ExecSettings {
            enabled: true,
            interpreter: "sh".to_string(),
            use_venv: false,
            timeout,
            install_timeout: timeout,
            max_sessions: 4,
        }))
    }

    fn job(session_id: &str, owner: &str, code: &str) -> RunSpec {
        RunSpec {
            session_id: session_id.to_string(),
            owner: owner.to_string(),
            code: code.to_string(),
            file_name: "script.sh".to_string(),
            source_dir: None,
        }
    }

    async fn wait_until_running(manager: &ExecSessionManager, id: &str) {
        for _ in 0..200 {
            if manager.status(id) == Some(SessionStatus::Running) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("session {id} never started running");
    }

    #[tokio::test]
    async fn run_captures_output_and_returns_to_idle() {
        let m = manager(Duration::from_secs(10));
        let out = m.run(job("s1", "alice", "echo 1")).await.unwrap();
        assert_eq!(out, RunOutcome {
            stdout: "1\n".into(),
            stderr: String::new(),
            returncode: 0,
            success: true,
            timed_out: false,
        });
        assert_eq!(m.status("s1"), Some(SessionStatus::Idle));
    }

    #[tokio::test]
    async fn non_zero_exit_is_a_result_not_an_error() {
        let m = manager(Duration::from_secs(10));
        let out = m.run(job("s1", "alice", "echo oops >&2; exit 3")).await.unwrap();
        assert_eq!(out.returncode, 3);
        assert!(!out.success);
        assert_eq!(out.stderr, "oops\n");
    }

    #[tokio::test]
    async fn state_persists_between_runs_until_cleanup() {
        let m = manager(Duration::from_secs(10));
        m.run(job("s1", "alice", "echo hi > marker")).await.unwrap();
        let out = m.run(job("s1", "alice", "cat marker")).await.unwrap();
        assert_eq!(out.stdout, "hi\n");

        let dir = m.session_dir("s1").unwrap();
        assert!(m.cleanup("s1", "alice").unwrap());
        assert!(!dir.exists());

        let out = m
            .run(job("s1", "alice", "test -f marker && echo present || echo absent"))
            .await
            .unwrap();
        assert_eq!(out.stdout, "absent\n");
        assert_ne!(m.session_dir("s1").unwrap(), dir);
    }

    #[tokio::test]
    async fn cleanup_is_idempotent() {
        let m = manager(Duration::from_secs(10));
        assert!(!m.cleanup("never", "alice").unwrap());
        m.run(job("s1", "alice", "true")).await.unwrap();
        assert!(m.cleanup("s1", "alice").unwrap());
        assert!(!m.cleanup("s1", "alice").unwrap());
        assert_eq!(m.session_count(), 0);
    }

    #[tokio::test]
    async fn concurrent_run_is_rejected_as_busy() {
        let m = manager(Duration::from_secs(10));
        let first = tokio::spawn({
            let m = m.clone();
            async move { m.run(job("s1", "alice", "sleep 1; echo done")).await }
        });
        wait_until_running(&m, "s1").await;

        assert_eq!(
            m.run(job("s1", "alice", "echo second")).await,
            Err(ExecError::SessionBusy("s1".into()))
        );
        assert_eq!(m.running_count(), 1);

        let out = first.await.unwrap().unwrap();
        assert_eq!(out.stdout, "done\n");
        assert_eq!(m.status("s1"), Some(SessionStatus::Idle));
    }

    #[tokio::test]
    async fn runaway_code_times_out_and_session_stays_usable() {
        let m = manager(Duration::from_millis(300));
        let started = Instant::now();
        let out = m.run(job("s1", "alice", "exec sleep 30")).await.unwrap();
        assert!(out.timed_out);
        assert_eq!(out.returncode, -1);
        assert!(!out.success);
        assert!(out.stderr.contains("timed out"));
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(m.status("s1"), Some(SessionStatus::Idle));

        let out = m.run(job("s1", "alice", "echo again")).await.unwrap();
        assert_eq!(out.stdout, "again\n");
    }

    #[tokio::test]
    async fn timeout_leaves_nothing_running_in_the_session() {
        let m = manager(Duration::from_millis(300));
        let out = m.run(job("s1", "alice", "(sleep 1; touch marker) ; sleep 30")).await.unwrap();
        assert!(out.timed_out);
        assert_eq!(m.status("s1"), Some(SessionStatus::Idle));

        let dir = m.session_dir("s1").unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!dir.join("marker").exists());
    }

    #[test]
    fn timeout_message_names_the_step_and_its_limit() {
        let timed_out = || ProcessOutput {
            stdout: String::new(),
            stderr: String::new(),
            returncode: -1,
            termination: Termination::TimedOut,
        };
        let run = outcome(timed_out(), Duration::from_secs(30), "Script execution");
        assert_eq!(run.stderr, "Error: Script execution timed out (30 seconds)");
        let install = outcome(timed_out(), Duration::from_secs(60), "Package installation");
        assert_eq!(install.stderr, "Error: Package installation timed out (60 seconds)");
        assert!(install.timed_out && !install.success);
    }

    #[tokio::test]
    async fn cleanup_during_run_kills_the_process() {
        let m = manager(Duration::from_secs(30));
        let running = tokio::spawn({
            let m = m.clone();
            async move { m.run(job("s1", "alice", "exec sleep 30")).await }
        });
        wait_until_running(&m, "s1").await;
        // Provisioning happens after the status flips; give it a moment.
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(m.cleanup("s1", "alice").unwrap());
        let out = tokio::time::timeout(Duration::from_secs(10), running).await.unwrap().unwrap().unwrap();
        assert_eq!(out.returncode, -1);
        assert!(out.stderr.contains("cleaned up"));
        assert_eq!(m.status("s1"), None);
    }

    #[tokio::test]
    async fn sessions_belong_to_their_owner() {
        let m = manager(Duration::from_secs(10));
        m.run(job("s1", "alice", "true")).await.unwrap();
        assert_eq!(m.run(job("s1", "bob", "true")).await, Err(ExecError::Forbidden("s1".into())));
        assert_eq!(m.cleanup("s1", "bob"), Err(ExecError::Forbidden("s1".into())));
        assert_eq!(m.session_count(), 1);
    }

    #[tokio::test]
    async fn spawn_failure_is_an_environment_error() {
        let m = Arc::new(ExecSessionManager::new(ExecSettings {
            interpreter: "/definitely/not/an/interpreter".to_string(),
            ..manager(Duration::from_secs(1)).settings().clone()
        }));
        let res = m.run(job("s1", "alice", "echo 1")).await;
        assert!(matches!(res, Err(ExecError::EnvironmentFailure(_))));
        assert_eq!(m.status("s1"), Some(SessionStatus::Idle));
    }

    #[tokio::test]
    async fn rejects_bad_requests() {
        let m = manager(Duration::from_secs(1));
        assert!(matches!(m.run(job("", "alice", "")).await, Err(ExecError::InvalidRequest(_))));
        assert!(matches!(m.run(job("../x", "alice", "")).await, Err(ExecError::InvalidRequest(_))));
        let mut bad_name = job("s1", "alice", "");
        bad_name.file_name = "../escape.sh".into();
        assert!(matches!(m.run(bad_name).await, Err(ExecError::InvalidRequest(_))));
        assert!(matches!(
            m.install_package("s1", "alice", "requests").await,
            Err(ExecError::InvalidRequest(_))
        ));
        assert_eq!(m.session_count(), 0);
    }

    #[tokio::test]
    async fn session_limit_is_enforced() {
        let m = manager(Duration::from_secs(10));
        for i in 0..4 {
            m.run(job(&format!("s{i}"), "alice", "true")).await.unwrap();
        }
        assert!(matches!(
            m.run(job("s4", "alice", "true")).await,
            Err(ExecError::CapacityExceeded(_))
        ));
        // Existing sessions keep working.
        assert!(m.run(job("s0", "alice", "true")).await.is_ok());
    }

    #[tokio::test]
    async fn reaping_removes_only_idle_sessions() {
        let m = manager(Duration::from_secs(30));
        m.run(job("idle", "alice", "true")).await.unwrap();
        let busy = tokio::spawn({
            let m = m.clone();
            async move { m.run(job("busy", "alice", "sleep 1")).await }
        });
        wait_until_running(&m, "busy").await;

        assert_eq!(m.reap_idle(Duration::ZERO), 1);
        assert_eq!(m.status("idle"), None);
        assert_eq!(m.status("busy"), Some(SessionStatus::Running));
        assert_eq!(m.reap_idle(Duration::from_secs(3600)), 0);

        busy.await.unwrap().unwrap();
        assert_eq!(m.cleanup_all(), 1);
    }

    #[tokio::test]
    async fn disabled_manager_refuses_runs() {
        let m = ExecSessionManager::new(ExecSettings {
            enabled: false,
            ..manager(Duration::from_secs(1)).settings().clone()
        });
        assert_eq!(m.run(job("s1", "alice", "true")).await, Err(ExecError::Disabled));
    }

    #[tokio::test]
    async fn python_scenario_when_available() {
        if std::process::Command::new("python3").arg("--version").output().is_err() {
            return;
        }
        let m = ExecSessionManager::new(ExecSettings {
            interpreter: "python3".to_string(),
            ..manager(Duration::from_secs(30)).settings().clone()
        });
        let mut run = job("s1", "alice", "print(1)");
        run.file_name = "script.py".into();
        let out = m.run(run).await.unwrap();
        assert_eq!(out.stdout, "1\n");
        assert_eq!(out.returncode, 0);
        assert!(out.success);
    }
}
