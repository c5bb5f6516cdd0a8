//! Read Aloud - reads text and markdown files aloud, or exports them as audio.
//!
//! Playing goes through the playback engine's reading queue, so audio starts
//! before synthesis of a long document has finished. Exporting one input runs
//! the chunked generation pipeline in the foreground; several inputs are
//! queued as background tasks.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::LocalTime;
use uuid::Uuid;

use read_aloud::audio::DeviceHost;
use read_aloud::config::{AppConfig, Backend};
use read_aloud::generation::{GenerationPipeline, TaskQueue, TaskStatus};
use read_aloud::playback::{PlaybackEngine, PlaybackNotice, QueueItem};
use read_aloud::storage::TempFileStorage;
use read_aloud::synth::SynthesisBackend;
use read_aloud::synth::http::HttpBackend;
use read_aloud::synth::kokoro::KokoroBackend;

/// How often background export tasks are polled.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Collect the things to read, in order.
fn load_items(config: &AppConfig) -> Result<Vec<QueueItem>> {
    let mut items = Vec::with_capacity(config.inputs.len() + 1);
    for path in &config.inputs {
        let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
        let title = path.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_else(|| "input".to_string());
        items.push(QueueItem::new(title, text));
    }
    if let Some(text) = &config.text {
        items.push(QueueItem::new("text", text.clone()));
    }
    Ok(items)
}

fn build_backend(config: &AppConfig) -> Result<Arc<dyn SynthesisBackend>> {
    let backend: Arc<dyn SynthesisBackend> = match config.backend {
        Backend::Kokoro => Arc::new(KokoroBackend::new(&config.kokoro_config()).context("Failed to load Kokoro model")?),
        Backend::Http => Arc::new(HttpBackend::new(&config.http_config())?),
    };
    info!("🗣️ Using {} backend", backend.name());
    Ok(backend)
}

/// Play every item through the engine queue until it finishes or is interrupted.
async fn play(config: &AppConfig, backend: Arc<dyn SynthesisBackend>, items: Vec<QueueItem>) -> Result<()> {
    let host = Arc::new(DeviceHost::new().context("Failed to open audio output")?);
    let storage = Arc::new(match &config.temp_dir {
        Some(dir) => TempFileStorage::new(dir),
        None => TempFileStorage::default(),
    });

    let titles: Vec<String> = items.iter().map(|item| item.title.clone()).collect();
    let (engine, mut notices) = PlaybackEngine::spawn(config.engine_config(), backend, host, storage);
    engine.set_loop(config.loop_queue)?;
    for item in items {
        engine.add_to_queue(item)?;
    }
    if let Some(after) = config.sleep_timer() {
        engine.set_sleep_timer(after)?;
    }
    engine.play_queue()?;

    let mut current = 0;
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Received shutdown signal (Ctrl+C)");
                engine.stop()?;
                break;
            }
            notice = notices.recv() => {
                let Some(notice) = notice else { break };
                match notice {
                    PlaybackNotice::Started { mode, .. } => {
                        current = engine.queue_snapshot().current_index.unwrap_or(current);
                        let title = titles.get(current).map(String::as_str).unwrap_or("?");
                        info!("📖 Reading \"{}\" ({}/{}, {:?})", title, current + 1, titles.len(), mode);
                    }
                    PlaybackNotice::Ended { .. } => {
                        if !config.loop_queue && current + 1 >= titles.len() {
                            info!("👋 Finished reading");
                            break;
                        }
                    }
                    PlaybackNotice::Error { message, .. } => {
                        error!("❌ {}", message);
                        // A failed item ends queue playback; carry on with the next one.
                        let next = current + 1;
                        if next < titles.len() {
                            engine.play_queue_from(next)?;
                        } else if config.loop_queue && titles.len() > 1 {
                            engine.play_queue_from(0)?;
                        } else {
                            break;
                        }
                    }
                    PlaybackNotice::Stopped { .. } => break,
                    PlaybackNotice::SleepTimerExpired => {
                        info!("😴 Sleep timer expired, stopping");
                        break;
                    }
                }
            }
        }
    }

    engine.shutdown()?;
    // Let the engine release the output and remove temp files.
    tokio::time::sleep(Duration::from_millis(200)).await;
    Ok(())
}

/// Cancel `cancel` on Ctrl+C.
fn cancel_on_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal (Ctrl+C)");
            cancel.cancel();
        }
    });
}

/// Where the audio for `title` goes when exporting into a directory.
fn export_path(dir: &Path, index: usize, title: &str, extension: &str) -> PathBuf {
    let stem: String = title.chars().map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' }).collect();
    dir.join(format!("{:02}-{}.{}", index + 1, stem, extension))
}

/// Export one item in the foreground, reporting progress as it goes.
async fn export_single(config: &AppConfig, backend: Arc<dyn SynthesisBackend>, item: &QueueItem, target: &Path) -> Result<()> {
    let voice = config.voice_settings();
    let path = if target.is_dir() { export_path(target, 0, &item.title, voice.format.extension()) } else { target.to_path_buf() };

    let pipeline = GenerationPipeline::new(backend, config.pipeline_config());
    let mut progress = pipeline.subscribe();
    let reporter = tokio::spawn(async move {
        let mut reported = 0;
        while progress.changed().await.is_ok() {
            let overall = progress.borrow_and_update().overall_progress;
            if overall >= reported + 10 {
                reported = overall - overall % 10;
                info!("⏳ {}%", overall);
            }
        }
    });

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());
    let result = pipeline.run(&item.text, &voice, &cancel).await;
    reporter.abort();
    let audio = result?;

    if audio.failed_chunks > 0 {
        warn!("{} of {} chunks failed and were skipped", audio.failed_chunks, audio.chunks);
    }
    std::fs::write(&path, &audio.bytes).with_context(|| format!("Failed to write {}", path.display()))?;
    info!("💾 Wrote {} ({} bytes)", path.display(), audio.bytes.len());
    Ok(())
}

/// Export several items through the background task queue.
async fn export_all(config: &AppConfig, backend: Arc<dyn SynthesisBackend>, items: Vec<QueueItem>, dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    let voice = config.voice_settings();
    let queue_config = config.queue_config();
    let queue = TaskQueue::new(backend, queue_config.clone());
    let janitor = queue.spawn_janitor(queue_config.janitor_interval, queue_config.retention);

    let mut pending: Vec<(usize, String, Uuid)> = items
        .into_iter()
        .enumerate()
        .map(|(index, item)| (index, item.title.clone(), queue.create_task(item.text, voice.clone()).id))
        .collect();

    let mut failures = 0;
    let mut interval = tokio::time::interval(POLL_INTERVAL);
    while !pending.is_empty() {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Received shutdown signal (Ctrl+C)");
                for (_, _, id) in &pending {
                    queue.cancel_task(*id);
                }
                break;
            }
            _ = interval.tick() => {}
        }

        let mut still_pending = Vec::with_capacity(pending.len());
        for (index, title, id) in pending {
            let Some(task) = queue.get_task(id) else { continue };
            match task.status {
                TaskStatus::Completed => {
                    let Some(bytes) = queue.take_result(id) else { continue };
                    let path = export_path(dir, index, &title, voice.format.extension());
                    std::fs::write(&path, &bytes).with_context(|| format!("Failed to write {}", path.display()))?;
                    info!("💾 Wrote {} ({} bytes)", path.display(), bytes.len());
                }
                TaskStatus::Failed => {
                    failures += 1;
                    error!("❌ \"{}\" failed: {}", title, task.error.unwrap_or_default());
                }
                TaskStatus::Pending | TaskStatus::Processing => {
                    debug!("\"{}\": {:?} {}%", title, task.status, task.progress);
                    still_pending.push((index, title, id));
                }
            }
        }
        pending = still_pending;
    }

    queue.shutdown().await;
    if let Err(e) = janitor.await {
        debug!("Janitor task ended abnormally: {}", e);
    }
    if failures > 0 {
        anyhow::bail!("{} export(s) failed", failures);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let config = AppConfig::from_args();

    // Respect RUST_LOG env var, fallback to verbose flag, default to info
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| if config.verbose { EnvFilter::try_new("debug") } else { EnvFilter::try_new("info") })
        .context("Invalid log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_timer(LocalTime::new(time::macros::format_description!("[hour]:[minute]:[second]")))
        .init();

    info!("📖 Read Aloud v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = config.validate() {
        error!("❌ Configuration error: {}", e);
        std::process::exit(1);
    }
    config.log_config();

    let items = load_items(&config)?;
    let backend = build_backend(&config)?;

    match config.export.as_deref() {
        Some(target) if items.len() == 1 => export_single(&config, backend, &items[0], target).await,
        Some(dir) => export_all(&config, backend, items, dir).await,
        None => play(&config, backend, items).await,
    }
}
