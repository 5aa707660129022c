//! External player process control.

use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[cfg(unix)]
use nix::sys::signal::{self, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

use crate::error::SpeakError;
use crate::pipeline::{PipelineState, PlayerHandle};

/// How long a terminated player gets to exit before it is killed outright.
const TERMINATE_GRACE: Duration = Duration::from_secs(2);

/// Player program plus argument template.
///
/// `{speed}` and `{file}` inside any argument are replaced per call.
#[derive(Debug, Clone)]
pub struct PlayerCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl PlayerCommand {
    /// `mplayer` with its tempo-preserving speed filter.
    pub fn mplayer(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: ["-af", "scaletempo", "-speed", "{speed}", "{file}"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    fn build(&self, path: &Path, speed: f32) -> Command {
        let speed = speed.to_string();
        let file = path.to_string_lossy();
        let mut cmd = Command::new(&self.program);
        cmd.args(
            self.args
                .iter()
                .map(|a| a.replace("{speed}", &speed).replace("{file}", &file)),
        );
        cmd
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    /// The player ran to the end of the file.
    Finished,
    /// The player was terminated by `stop()`, or never started because a
    /// stop was already pending.
    Stopped,
}

/// Runs one player process at a time and lets another task cut it short.
#[derive(Clone)]
pub struct PlaybackController {
    command: PlayerCommand,
    state: PipelineState,
}

impl PlaybackController {
    pub fn new(command: PlayerCommand, state: PipelineState) -> Self {
        Self { command, state }
    }

    /// Play `path` at `speed`, returning once the player exits or is terminated.
    pub async fn play(&self, path: &Path, speed: f32) -> Result<PlaybackOutcome, SpeakError> {
        if self.state.stop_requested() {
            return Ok(PlaybackOutcome::Stopped);
        }

        let mut child = self
            .command
            .build(path, speed)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SpeakError::PlayerSpawn {
                program: self.command.program.clone(),
                source,
            })?;

        let kill = CancellationToken::new();
        let handle = PlayerHandle {
            pid: child.id(),
            kill: kill.clone(),
        };
        if !self.state.register_player(handle) {
            // stop() landed between the check above and the spawn
            terminate(&mut child).await.map_err(SpeakError::PlayerWait)?;
            return Ok(PlaybackOutcome::Stopped);
        }
        debug!("Playing {} (pid {:?})", path.display(), child.id());

        let exited = tokio::select! {
            status = child.wait() => Some(status),
            () = kill.cancelled() => None,
        };
        let result = match exited {
            Some(status) => status,
            None => terminate(&mut child).await,
        };
        self.state.clear_player();

        let status = result.map_err(SpeakError::PlayerWait)?;
        if kill.is_cancelled() {
            info!("Playback of {} stopped", path.display());
            return Ok(PlaybackOutcome::Stopped);
        }
        if !status.success() {
            return Err(SpeakError::PlayerExit(status));
        }
        Ok(PlaybackOutcome::Finished)
    }

    /// Stop the pipeline and terminate the running player, if any.
    pub fn stop(&self) {
        match self.state.request_stop() {
            Some(handle) => {
                info!("Stop requested, terminating player (pid {:?})", handle.pid);
                handle.kill.cancel();
            }
            None => info!("Stop requested"),
        }
    }
}

/// SIGTERM the player, escalating to SIGKILL if it ignores the signal.
#[cfg(unix)]
async fn terminate(child: &mut Child) -> io::Result<ExitStatus> {
    let Some(pid) = child.id() else {
        // already reaped
        return child.wait().await;
    };

    if let Err(e) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        if e == nix::errno::Errno::ESRCH {
            warn!("Player (pid {}) already exited", pid);
            return child.wait().await;
        }
        return Err(io::Error::other(e));
    }

    match tokio::time::timeout(TERMINATE_GRACE, child.wait()).await {
        Ok(result) => result,
        Err(_) => {
            warn!("Player (pid {}) ignored SIGTERM, killing", pid);
            child.kill().await?;
            child.wait().await
        }
    }
}

#[cfg(not(unix))]
async fn terminate(child: &mut Child) -> io::Result<ExitStatus> {
    if let Err(e) = child.kill().await {
        warn!("Failed to kill player: {}", e);
    }
    child.wait().await
}
