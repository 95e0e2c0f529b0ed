//! Audio format conversion through an external `ffmpeg` process.
//!
//! Recognition engines want 16 kHz linear PCM; the carrier speaks 8 kHz
//! μ-law. Conversion in both directions goes through this bridge.

use crate::config::MediaConfig;
use crate::error::VoiceError;
use crate::AudioStream;
use bytes::Bytes;
use futures_util::StreamExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

/// Sample rate expected by the recognition backends.
pub const RECOGNITION_SAMPLE_RATE: u32 = 16_000;

/// Read size for the transcoder's stdout.
const TRANSCODE_READ_BYTES: usize = 4096;

#[derive(Debug, Clone)]
pub struct FormatBridge {
    binary: PathBuf,
    timeout: Duration,
}

impl FormatBridge {
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    pub fn from_config(config: &MediaConfig) -> Self {
        Self::new(
            &config.ffmpeg_binary,
            Duration::from_secs(config.conversion_timeout_secs),
        )
    }

    /// Converts a raw μ-law 8 kHz file into a 16 kHz mono s16le WAV file.
    pub async fn mulaw_file_to_wav(&self, input: &Path, output: &Path) -> Result<(), VoiceError> {
        let mut command = Command::new(&self.binary);
        command
            .args(["-hide_banner", "-loglevel", "error", "-y"])
            .args(["-f", "mulaw", "-ar", "8000", "-ac", "1", "-i"])
            .arg(input)
            .arg("-ar")
            .arg(RECOGNITION_SAMPLE_RATE.to_string())
            .args(["-ac", "1"])
            .args(["-c:a", "pcm_s16le", "-f", "wav"])
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command.spawn().map_err(|e| {
            VoiceError::Bridge(format!("Failed to spawn {:?}: {}", self.binary, e))
        })?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| VoiceError::Timeout("format conversion", self.timeout.as_secs()))?
            .map_err(|e| VoiceError::Bridge(format!("Failed to wait for converter: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VoiceError::Bridge(format!(
                "converter exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        Ok(())
    }

    /// Re-encodes a stream of mono s16le PCM at `input_rate` into μ-law 8 kHz.
    ///
    /// Bytes are piped through the converter's stdin and stdout as they
    /// arrive, so playback can start before the input stream ends. Dropping
    /// the returned stream kills the converter.
    pub fn transcode_stream(
        &self,
        mut pcm: AudioStream,
        input_rate: u32,
    ) -> Result<AudioStream, VoiceError> {
        let mut command = Command::new(&self.binary);
        command
            .args(["-hide_banner", "-loglevel", "error"])
            .args(["-f", "s16le", "-ar"])
            .arg(input_rate.to_string())
            .args(["-ac", "1"])
            .args(["-i", "pipe:0"])
            .args(["-f", "mulaw", "-ar", "8000", "-ac", "1", "pipe:1"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| {
            VoiceError::Bridge(format!("Failed to spawn {:?}: {}", self.binary, e))
        })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| VoiceError::Bridge("Failed to open stdin".to_string()))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| VoiceError::Bridge("Failed to open stdout".to_string()))?;

        let (tx, rx) = mpsc::channel::<Result<Bytes, VoiceError>>(32);

        // Feed input on its own task so a full stdout pipe cannot deadlock us.
        let input_tx = tx.clone();
        tokio::spawn(async move {
            loop {
                let chunk = tokio::select! {
                    () = input_tx.closed() => return,
                    chunk = pcm.next() => chunk,
                };
                let Some(chunk) = chunk else { break };
                match chunk {
                    Ok(bytes) => {
                        if let Err(e) = stdin.write_all(&bytes).await {
                            debug!("transcoder stdin closed early: {}", e);
                            return;
                        }
                    }
                    Err(e) => {
                        let _ = input_tx.send(Err(e)).await;
                        return;
                    }
                }
            }
            drop(stdin);
        });

        tokio::spawn(async move {
            let mut buf = vec![0u8; TRANSCODE_READ_BYTES];
            loop {
                // A stalled input must not keep the converter alive once the
                // consumer is gone; dropping `child` kills it.
                let read = tokio::select! {
                    () = tx.closed() => {
                        debug!("transcoder output dropped; killing converter");
                        return;
                    }
                    read = stdout.read(&mut buf) => read,
                };
                match read {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.send(Ok(Bytes::copy_from_slice(&buf[..n]))).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        let _ = tx
                            .send(Err(VoiceError::Bridge(format!(
                                "Failed to read converter output: {}",
                                e
                            ))))
                            .await;
                        return;
                    }
                }
            }

            match child.wait().await {
                Ok(status) if status.success() => {}
                Ok(status) => {
                    warn!(%status, "streaming converter exited with failure");
                    let _ = tx
                        .send(Err(VoiceError::Bridge(format!(
                            "converter exited with {}",
                            status
                        ))))
                        .await;
                }
                Err(e) => warn!("failed to reap streaming converter: {}", e),
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}
