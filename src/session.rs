use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context;
use tokio::process::{Child, Command};

use crate::types::CrawlerError;
use crate::worklist::Worklist;

/// How a browser process ended. The supervisor restarts regardless, the
/// reason is only kept for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    Normal,
    NonZero(i32),
    /// killed by a signal, no exit code available
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Starting,
    Running,
    Exited(ExitReason),
}

/// Everything needed to launch one browser session against the callback
/// server.
#[derive(Debug, Clone)]
pub struct SessionLaunch {
    pub binary: PathBuf,
    pub profile_dir: PathBuf,
    pub callback_port: u16,
}

/// One running browser process. Dropping the session kills the process, a
/// crawl that is abandoned mid-run must not leave a browser behind.
pub struct BrowserSession {
    child: Child,
}

impl BrowserSession {
    pub fn start(launch: &SessionLaunch) -> anyhow::Result<Self> {
        let child = Command::new(&launch.binary)
            .arg("-profile")
            .arg(&launch.profile_dir)
            .arg("-no-remote")
            .arg("--crawler-port")
            .arg(launch.callback_port.to_string())
            .env("MOZ_CRASHREPORTER_DISABLE", "1")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .context(format!("could not launch browser {:?}", launch.binary))?;

        Ok(BrowserSession { child })
    }

    /// Blocks until the browser exits on its own. There is deliberately no
    /// timeout here, a session that still makes progress may legitimately
    /// run for hours.
    pub async fn wait(&mut self) -> anyhow::Result<ExitReason> {
        let status = self
            .child
            .wait()
            .await
            .context("could not wait on browser process")?;

        let reason = match status.code() {
            Some(0) => ExitReason::Normal,
            Some(code) => ExitReason::NonZero(code),
            None => ExitReason::Unknown,
        };
        Ok(reason)
    }
}

/// Start, wait, restart. The browser ends a session whenever its tab pool
/// drains or it crashes; as long as URLs remain the supervisor brings a
/// fresh session up against the same profile and port.
pub struct Supervisor {
    launch: SessionLaunch,
    state: SessionState,
}

impl Supervisor {
    pub fn new(launch: SessionLaunch) -> Self {
        Supervisor {
            launch,
            state: SessionState::Idle,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub async fn run(
        &mut self,
        worklist: &Worklist,
        should_terminate: &AtomicBool,
    ) -> anyhow::Result<()> {
        while !worklist.is_empty().await {
            if should_terminate.load(Ordering::Relaxed) {
                return Err(CrawlerError::EarlyTermination.into());
            }

            self.state = SessionState::Starting;
            let mut session = BrowserSession::start(&self.launch)?;
            self.state = SessionState::Running;
            info!(
                "browser session started, {} urls remaining",
                worklist.len().await
            );

            let reason = session.wait().await?;
            self.state = SessionState::Exited(reason);
            debug!("browser session ended: {:?}", reason);
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::AtomicBool;

    use super::*;

    macro_rules! aw {
        ($e:expr) => {
            tokio_test::block_on($e)
        };
    }

    fn launch_for(binary: &str) -> SessionLaunch {
        SessionLaunch {
            binary: PathBuf::from(binary),
            profile_dir: PathBuf::from("/tmp"),
            callback_port: 4000,
        }
    }

    #[test]
    fn clean_exit_is_normal() {
        aw!(async {
            // `true` ignores the browser flags and exits 0
            let mut session = BrowserSession::start(&launch_for("true")).unwrap();
            assert_eq!(session.wait().await.unwrap(), ExitReason::Normal);
        });
    }

    #[test]
    fn failing_exit_carries_the_code() {
        aw!(async {
            let mut session = BrowserSession::start(&launch_for("false")).unwrap();
            assert_eq!(session.wait().await.unwrap(), ExitReason::NonZero(1));
        });
    }

    #[test]
    fn missing_binary_fails_to_start() {
        aw!(async {
            assert!(BrowserSession::start(&launch_for("/nonexistent/browser")).is_err());
        });
    }

    #[test]
    fn empty_worklist_never_launches() {
        let worklist = Worklist::new(vec![]);
        let flag = AtomicBool::new(false);
        // a launch from this binary would fail, so success proves no launch
        let mut sup = Supervisor::new(launch_for("/nonexistent/browser"));

        assert!(aw!(sup.run(&worklist, &flag)).is_ok());
        assert_eq!(sup.state(), SessionState::Idle);
    }

    #[test]
    fn terminate_flag_stops_before_launching() {
        let worklist = Worklist::new(vec!["http://example.com/".into()]);
        let flag = AtomicBool::new(true);
        let mut sup = Supervisor::new(launch_for("/nonexistent/browser"));

        let err = aw!(sup.run(&worklist, &flag)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CrawlerError>(),
            Some(CrawlerError::EarlyTermination)
        ));
    }
}
