use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{
    ACCEPT, CACHE_CONTROL, CONNECTION, UPGRADE_INSECURE_REQUESTS, USER_AGENT,
};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::SpeakError;
use crate::text::TextSegment;

pub const DEFAULT_ENDPOINT: &str = "http://translate.google.com/translate_tts";

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
                                  (KHTML, like Gecko) Chrome/53.0.2785.143 Safari/537.36";

const BROWSER_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8";

/// Remote speech synthesis: one segment in, encoded audio bytes out.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, segment: &TextSegment, language: &str) -> anyhow::Result<Vec<u8>>;
}

#[derive(Debug, Serialize)]
struct SynthesisQuery<'a> {
    ie: &'a str,
    client: &'a str,
    total: usize,
    idx: usize,
    tl: &'a str,
    textlen: usize,
    q: &'a str,
}

/// Google Translate's public TTS endpoint. Returns MP3.
pub struct GoogleTranslateTts {
    client: reqwest::Client,
    endpoint: String,
}

impl GoogleTranslateTts {
    pub fn new(endpoint: &str, timeout: Option<Duration>) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
            endpoint: endpoint.to_string(),
        })
    }

    fn request(&self, segment: &TextSegment, language: &str) -> reqwest::RequestBuilder {
        let query = SynthesisQuery {
            ie: "UTF-8",
            client: "tw-ob",
            total: segment.total,
            idx: segment.index,
            tl: language,
            textlen: segment.text.chars().count(),
            q: &segment.text,
        };
        self.client
            .get(&self.endpoint)
            .query(&query)
            .header(USER_AGENT, BROWSER_USER_AGENT)
            .header(ACCEPT, BROWSER_ACCEPT)
            .header(CACHE_CONTROL, "max-age=0")
            .header(CONNECTION, "close")
            .header(UPGRADE_INSECURE_REQUESTS, "1")
    }
}

#[async_trait]
impl Synthesizer for GoogleTranslateTts {
    async fn synthesize(&self, segment: &TextSegment, language: &str) -> anyhow::Result<Vec<u8>> {
        let bytes = self
            .request(segment, language)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        Ok(bytes.to_vec())
    }
}

/// Audio for one segment, staged on disk until it has been played.
#[derive(Debug)]
pub struct FetchedAudio {
    pub segment_index: usize,
    pub local_path: PathBuf,
}

/// Downloads segment audio into the pipeline's staging directory.
pub struct SegmentFetcher {
    synthesizer: Arc<dyn Synthesizer>,
    dir: PathBuf,
}

impl SegmentFetcher {
    pub fn new(synthesizer: Arc<dyn Synthesizer>, dir: PathBuf) -> Self {
        Self { synthesizer, dir }
    }

    /// Staging path for a segment. Unique per index so a fetch never clobbers
    /// the file that is still playing.
    pub fn path_for(&self, index: usize) -> PathBuf {
        staging_path(&self.dir, index)
    }

    /// Returns `Ok(None)` without touching the network when the segment is blank.
    pub async fn fetch(
        &self,
        segment: &TextSegment,
        language: &str,
    ) -> Result<Option<FetchedAudio>, SpeakError> {
        if segment.text.trim().is_empty() {
            debug!("Segment {} is blank, nothing to fetch", segment.index);
            return Ok(None);
        }

        info!(
            "Requesting audio for segment {}/{}: {:?}",
            segment.index + 1,
            segment.total,
            segment.text
        );
        let audio = self
            .synthesizer
            .synthesize(segment, language)
            .await
            .map_err(|source| SpeakError::Transport {
                index: segment.index,
                source,
            })?;
        if audio.is_empty() {
            return Err(SpeakError::Transport {
                index: segment.index,
                source: anyhow::anyhow!("empty audio response"),
            });
        }

        let path = self.path_for(segment.index);
        tokio::fs::write(&path, &audio)
            .await
            .map_err(|source| SpeakError::FileSystem {
                path: path.clone(),
                source,
            })?;
        debug!("Wrote {} bytes to {}", audio.len(), path.display());

        Ok(Some(FetchedAudio {
            segment_index: segment.index,
            local_path: path,
        }))
    }
}

fn staging_path(dir: &Path, index: usize) -> PathBuf {
    dir.join(format!("segment_{:03}.mp3", index))
}
