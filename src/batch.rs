use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rayon::prelude::*;

use crate::detect::DetectorConfig;
use crate::region::Region;
use crate::runner::{run_video, RunConfig};

const VIDEO_EXTENSIONS: [&str; 3] = ["mp4", "avi", "mov"];

/// Batch orchestration settings. Videos share no state, so groups are
/// embarrassingly parallel; the worker count bounds the pool independently
/// of the group size.
pub struct BatchConfig {
    pub videos_dir: PathBuf,
    pub output_dir: PathBuf,
    pub workers: usize,
    pub group_size: usize,
    pub region: Option<Region>,
    pub detector: DetectorConfig,
}

/// Sort key mimicking numbered capture files: `12.mp4` sorts by 12,
/// non-numeric names sort after all numbered ones.
pub fn numeric_key(name: &str) -> (u64, String) {
    let digits: String = name.chars().take_while(|c| c.is_ascii_digit()).collect();
    match digits.parse::<u64>() {
        Ok(n) => (n, name.to_owned()),
        Err(_) => (u64::MAX, name.to_owned()),
    }
}

/// Lists video files in a directory, sorted by numeric filename prefix.
pub fn list_videos(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut videos: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("failed to read video directory {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|ext| {
                        VIDEO_EXTENSIONS
                            .iter()
                            .any(|known| ext.eq_ignore_ascii_case(known))
                    })
        })
        .collect();
    videos.sort_by_key(|path| {
        numeric_key(
            path.file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default(),
        )
    });
    Ok(videos)
}

/// Processes every video in fixed-size groups over a bounded worker pool.
/// Each video is fully isolated: a failure is logged, written to the batch
/// log, and never aborts its siblings. Returns the number of failed videos.
pub fn run_batch(config: &BatchConfig) -> Result<u64> {
    let videos = list_videos(&config.videos_dir)?;
    if videos.is_empty() {
        anyhow::bail!("no video files found in {}", config.videos_dir.display());
    }

    fs::create_dir_all(&config.output_dir)?;
    let log_path = config.output_dir.join(format!(
        "batch_log_{}.txt",
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    ));
    let mut batch_log = BufWriter::new(
        File::create(&log_path)
            .with_context(|| format!("failed to create {}", log_path.display()))?,
    );

    let groups: Vec<&[PathBuf]> = videos.chunks(config.group_size.max(1)).collect();
    tracing::info!(
        "found {} videos, running {} groups of up to {} with {} workers",
        videos.len(),
        groups.len(),
        config.group_size.max(1),
        config.workers
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.workers.max(1))
        .build()
        .context("failed to build worker pool")?;

    let mut failures: u64 = 0;
    for (index, group) in groups.iter().enumerate() {
        tracing::info!("starting group {}/{}", index + 1, groups.len());
        writeln!(batch_log, "[{}] group {}/{}", timestamp(), index + 1, groups.len())?;

        let outcomes: Vec<(String, Result<(), String>)> = pool.install(|| {
            group
                .par_iter()
                .map(|video| {
                    let name = video
                        .file_name()
                        .and_then(|n| n.to_str())
                        .unwrap_or("<unnamed>")
                        .to_owned();
                    let run = RunConfig {
                        video: video.clone(),
                        output_dir: config.output_dir.clone(),
                        display: false,
                        region: config.region,
                        detector: config.detector,
                    };
                    (name, run_video(&run).map(|_| ()).map_err(|err| format!("{err:#}")))
                })
                .collect()
        });

        for (name, outcome) in outcomes {
            match outcome {
                Ok(()) => {
                    tracing::info!("success: {name}");
                    writeln!(batch_log, "[{}] Success: {name}", timestamp())?;
                }
                Err(message) => {
                    failures += 1;
                    tracing::error!("failed: {name}: {message}");
                    writeln!(batch_log, "[{}] Failed: {name} with error: {message}", timestamp())?;
                }
            }
        }
    }

    writeln!(batch_log, "[{}] all groups processed, {failures} failure(s)", timestamp())?;
    batch_log.flush()?;
    tracing::info!("batch complete, log written to {}", log_path.display());
    Ok(failures)
}

fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_prefixes_sort_numerically_and_names_sort_last() {
        let mut names = vec!["10.mp4", "2.mp4", "tank.mp4", "1.mp4"];
        names.sort_by_key(|name| numeric_key(name));
        assert_eq!(names, vec!["1.mp4", "2.mp4", "10.mp4", "tank.mp4"]);
    }

    #[test]
    fn listing_filters_extensions_and_orders_by_number() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["12.mp4", "3.MP4", "7.avi", "notes.txt", "b.mov"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }

        let videos = list_videos(dir.path()).unwrap();
        let names: Vec<&str> = videos
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, vec!["3.MP4", "7.avi", "12.mp4", "b.mov"]);
    }

    #[test]
    fn groups_are_fixed_size_with_a_short_tail() {
        let videos: Vec<PathBuf> = (0..23).map(|i| PathBuf::from(format!("{i}.mp4"))).collect();
        let groups: Vec<&[PathBuf]> = videos.chunks(10).collect();
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].len(), 10);
        assert_eq!(groups[2].len(), 3);
    }
}
