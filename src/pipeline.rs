//! Pipelined fetch-and-play loop.
//!
//! While segment `i` plays, segment `i + 1` is already being downloaded, so
//! synthesis latency hides behind playback. At most one fetch and one
//! playback are in flight at any time, and segments play in index order.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::audio::{PlaybackController, PlaybackOutcome, PlayerCommand};
use crate::error::SpeakError;
use crate::text::{self, TextSegment};
use crate::tts::{FetchedAudio, SegmentFetcher, Synthesizer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Running,
    Stopped,
    Done,
}

/// The running player, as seen by `stop()`.
#[derive(Debug, Clone)]
pub struct PlayerHandle {
    pub pid: Option<u32>,
    pub kill: CancellationToken,
}

#[derive(Debug, Default)]
struct StateInner {
    stop_requested: bool,
    /// Cancelled together with `stop_requested`, so waits can be cut short.
    stop: CancellationToken,
    active_player: Option<PlayerHandle>,
    phase: Phase,
}

/// Cross-task pipeline state: the stop flag and the active player.
///
/// Cloning shares the same state. The lock is only held to read or swap a
/// field, never across an await.
#[derive(Debug, Clone, Default)]
pub struct PipelineState {
    inner: Arc<Mutex<StateInner>>,
}

impl PipelineState {
    fn lock(&self) -> MutexGuard<'_, StateInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn stop_requested(&self) -> bool {
        self.lock().stop_requested
    }

    /// Token cancelled by the next `request_stop`.
    pub fn stop_token(&self) -> CancellationToken {
        self.lock().stop.clone()
    }

    pub fn phase(&self) -> Phase {
        self.lock().phase
    }

    #[cfg(test)]
    pub fn has_active_player(&self) -> bool {
        self.lock().active_player.is_some()
    }

    /// Set the stop flag and hand back the player that should be signalled.
    pub(crate) fn request_stop(&self) -> Option<PlayerHandle> {
        let mut inner = self.lock();
        inner.stop_requested = true;
        inner.stop.cancel();
        inner.active_player.clone()
    }

    /// Record `handle` as the active player. Refuses once a stop is pending.
    pub(crate) fn register_player(&self, handle: PlayerHandle) -> bool {
        let mut inner = self.lock();
        if inner.stop_requested {
            return false;
        }
        inner.active_player = Some(handle);
        true
    }

    pub(crate) fn clear_player(&self) {
        self.lock().active_player = None;
    }

    fn set_phase(&self, phase: Phase) {
        self.lock().phase = phase;
    }

    fn reset(&self) {
        let mut inner = self.lock();
        inner.stop_requested = false;
        inner.stop = CancellationToken::new();
        inner.active_player = None;
    }
}

#[derive(Debug, Clone)]
pub struct SpeakConfig {
    /// Segment limit in characters.
    pub max_length: usize,
    /// Staging directory for downloaded audio.
    pub work_dir: PathBuf,
    pub player: PlayerCommand,
}

/// What a `speak` run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeakReport {
    pub phase: Phase,
    pub segments: usize,
    pub played: usize,
    pub skipped: usize,
}

type FetchTask = JoinHandle<Result<Option<FetchedAudio>, SpeakError>>;

pub struct Speaker {
    fetcher: Arc<SegmentFetcher>,
    player: PlaybackController,
    state: PipelineState,
    max_length: usize,
    work_dir: PathBuf,
}

impl Speaker {
    pub fn new(config: SpeakConfig, synthesizer: Arc<dyn Synthesizer>) -> Self {
        let state = PipelineState::default();
        Self {
            fetcher: Arc::new(SegmentFetcher::new(synthesizer, config.work_dir.clone())),
            player: PlaybackController::new(config.player, state.clone()),
            state,
            max_length: config.max_length,
            work_dir: config.work_dir,
        }
    }

    /// Controller handle for stopping the pipeline from another task.
    pub fn controller(&self) -> PlaybackController {
        self.player.clone()
    }

    pub fn state(&self) -> PipelineState {
        self.state.clone()
    }

    /// Speak `text`, returning when every segment has played or after `stop()`.
    pub async fn speak(&self, text: &str, language: &str, speed: f32) -> SpeakReport {
        let segments = text::segment(text, self.max_length);
        let total = segments.len();
        info!("Speaking {} segments in '{}' at speed {}", total, language, speed);

        self.state.set_phase(Phase::Running);
        if let Err(e) = tokio::fs::create_dir_all(&self.work_dir).await {
            warn!(
                "Failed to create staging dir {}: {}",
                self.work_dir.display(),
                e
            );
        }

        let mut report = SpeakReport {
            phase: Phase::Done,
            segments: total,
            played: 0,
            skipped: 0,
        };
        let mut segments = segments.into_iter();
        let mut pending: Option<FetchedAudio> = None;

        for index in 0..=total {
            if self.state.stop_requested() {
                report.phase = Phase::Stopped;
                break;
            }

            let fetch = segments.next().map(|segment| self.spawn_fetch(segment, language));

            if let Some(audio) = pending.take() {
                match self.player.play(&audio.local_path, speed).await {
                    Ok(PlaybackOutcome::Finished) => report.played += 1,
                    Ok(PlaybackOutcome::Stopped) => {}
                    Err(e) => warn!("Segment {} did not play: {}", audio.segment_index, e),
                }
                remove_file(&audio.local_path).await;
            }

            let Some(mut fetch) = fetch else {
                break;
            };

            let stop = self.state.stop_token();
            let fetched = tokio::select! {
                biased;
                () = stop.cancelled() => None,
                result = &mut fetch => Some(result),
            };
            let Some(fetched) = fetched else {
                self.discard_fetch(fetch, index).await;
                report.phase = Phase::Stopped;
                break;
            };

            match fetched {
                Ok(Ok(Some(audio))) => pending = Some(audio),
                Ok(Ok(None)) => report.skipped += 1,
                Ok(Err(e)) => {
                    warn!("Skipping segment {}: {}", index, e);
                    report.skipped += 1;
                }
                Err(e) => {
                    warn!("Fetch task for segment {} failed: {}", index, e);
                    report.skipped += 1;
                }
            }
        }

        if let Some(audio) = pending.take() {
            remove_file(&audio.local_path).await;
        }
        self.sweep_staging(total).await;
        if let Err(e) = tokio::fs::remove_dir(&self.work_dir).await {
            debug!(
                "Staging dir {} not removed: {}",
                self.work_dir.display(),
                e
            );
        }

        self.state.reset();
        self.state.set_phase(report.phase);
        info!(
            "Pipeline {:?}: played {}/{} segments, skipped {}",
            report.phase, report.played, report.segments, report.skipped
        );
        report
    }

    /// Drop an in-flight fetch after a stop, along with anything it wrote.
    async fn discard_fetch(&self, fetch: FetchTask, index: usize) {
        fetch.abort();
        if fetch.await.is_err() {
            debug!("Fetch for segment {} cancelled", index);
        }
        remove_file(&self.fetcher.path_for(index)).await;
    }

    /// Remove staged files left behind by aborted fetches.
    async fn sweep_staging(&self, total: usize) {
        for index in 0..total {
            let path = self.fetcher.path_for(index);
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                remove_file(&path).await;
            }
        }
    }

    fn spawn_fetch(&self, segment: TextSegment, language: &str) -> FetchTask {
        let fetcher = self.fetcher.clone();
        let language = language.to_string();
        tokio::spawn(async move { fetcher.fetch(&segment, &language).await })
    }
}

async fn remove_file(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        debug!("Failed to remove {}: {}", path.display(), e);
    }
}
