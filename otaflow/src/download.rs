/*
 * SPDX-FileCopyrightText: 2026 otaflow contributors
 * SPDX-License-Identifier: GPL-3.0-only
 */

use std::{
    collections::VecDeque,
    fs::{self, File},
    io::{self, BufWriter, Read, Write},
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, Ordering},
    time::{Duration, Instant},
};

use anyhow::{Context, Result, bail};
use tracing::{debug, info, warn};

use crate::{selection::BuildSelection, store::ArtifactStore};

const CHUNK_SIZE: usize = 64 * 1024;

const TIMEOUT: Duration = Duration::from_secs(30);

pub trait ProgressDisplay {
    /// `total` is 0 when the server did not report a length.
    fn progress(&mut self, current: u64, total: u64);

    fn error(&mut self, msg: &str);

    fn finish(&mut self);
}

pub struct BasicProgressDisplay {
    interval: Duration,
    last_render: Instant,
    avg: VecDeque<(Instant, u64)>,
}

// Speed is a simple moving average over 5 seconds.
static AVG_INTERVAL: Duration = Duration::from_millis(100);
static AVG_WINDOW_SIZE: usize = 5000 / AVG_INTERVAL.as_millis() as usize;

impl BasicProgressDisplay {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_render: Instant::now() - interval,
            avg: VecDeque::new(),
        }
    }

    fn clear_line(&self) {
        eprint!("\x1b[2K\r");
    }

    fn speed_mib_s(&self) -> f64 {
        let (Some(front), Some(back)) = (self.avg.front(), self.avg.back()) else {
            return 0.0;
        };

        let avg_window_mib = (back.1 - front.1) as f64 / 1024.0 / 1024.0;
        let avg_window_duration = back.0 - front.0;

        if avg_window_duration.is_zero() {
            0.0
        } else {
            avg_window_mib / avg_window_duration.as_secs_f64()
        }
    }
}

impl ProgressDisplay for BasicProgressDisplay {
    fn progress(&mut self, current: u64, total: u64) {
        let now = Instant::now();

        if self
            .avg
            .back()
            .is_none_or(|(last, _)| now - *last > AVG_INTERVAL)
        {
            if self.avg.len() == AVG_WINDOW_SIZE {
                self.avg.pop_front();
            }

            self.avg.push_back((now, current));
        }

        if now - self.last_render > self.interval {
            let current_mib = current as f64 / 1024.0 / 1024.0;
            let speed_mib_s = self.speed_mib_s();

            self.clear_line();
            if total == 0 {
                eprint!("{current_mib:.1} MiB ({speed_mib_s:.1} MiB/s)");
            } else {
                let total_mib = total as f64 / 1024.0 / 1024.0;
                eprint!("{current_mib:.1} / {total_mib:.1} MiB ({speed_mib_s:.1} MiB/s)");
            }

            self.last_render = now;
        }
    }

    fn error(&mut self, msg: &str) {
        self.clear_line();
        eprintln!("{msg}");
    }

    fn finish(&mut self) {
        self.clear_line();
    }
}

/// Which known OTA host a URL points to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UrlKind {
    Google,
    GrapheneOs,
    Invalid,
}

pub fn classify(url: &str) -> UrlKind {
    if url.contains("dl.google.com") {
        UrlKind::Google
    } else if url.contains("releases.grapheneos.org") {
        UrlKind::GrapheneOs
    } else {
        UrlKind::Invalid
    }
}

/// Last path component of a URL, ignoring any query string or fragment.
pub fn url_file_name(url: &str) -> Option<&str> {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    let name = url[..end].rsplit('/').next()?;

    if name.is_empty() || name == "." || name == ".." || name.contains('\\') {
        None
    } else {
        Some(name)
    }
}

fn delete_if_exists(path: &Path) -> Result<()> {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            return Err(e).context(format!("Failed to delete file: {path:?}"));
        }
    }

    Ok(())
}

fn copy_response(
    mut response: impl Read,
    writer: &mut impl Write,
    total: u64,
    display: &mut dyn ProgressDisplay,
    cancel_signal: &AtomicBool,
) -> Result<u64> {
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut current = 0u64;

    display.progress(current, total);

    loop {
        if cancel_signal.load(Ordering::SeqCst) {
            bail!("Received cancel signal");
        }

        let n = match response.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to download at offset {current}"));
            }
        };

        writer
            .write_all(&buf[..n])
            .with_context(|| format!("Failed to write {n} bytes at offset {current}"))?;

        current += n as u64;
        display.progress(current, total);
    }

    if total != 0 && current != total {
        bail!("Expected {total} bytes, but received {current} bytes");
    }

    Ok(current)
}

/// Download `url` to `output` with a single streaming GET request. Progress is
/// reported against the `Content-Length` header, if any. A non-success status
/// aborts the download without retrying. A partially written `output` is
/// removed on failure. Returns the number of bytes written.
pub fn download_file(
    url: &str,
    output: &Path,
    display: &mut dyn ProgressDisplay,
    cancel_signal: &AtomicBool,
) -> Result<u64> {
    let response = attohttpc::get(url)
        .connect_timeout(TIMEOUT)
        .read_timeout(TIMEOUT)
        .send()
        .with_context(|| format!("Failed to start download: {url}"))?;

    let status = response.status();
    if !status.is_success() {
        bail!("Download failed with HTTP status code {}: {url}", status.as_u16());
    }

    let total = response
        .headers()
        .get("Content-Length")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.parse().ok())
        .unwrap_or(0);

    debug!("Downloading {total} bytes from {url} to {output:?}");

    let file =
        File::create(output).with_context(|| format!("Failed to open for writing: {output:?}"))?;
    let mut writer = BufWriter::new(file);

    let result = copy_response(response, &mut writer, total, display, cancel_signal)
        .and_then(|n| {
            writer
                .flush()
                .with_context(|| format!("Failed to flush: {output:?}"))?;
            Ok(n)
        });

    match result {
        Ok(n) => {
            display.finish();
            Ok(n)
        }
        Err(e) => {
            display.error(&format!("Download failed: {url}"));
            drop(writer);
            if let Err(delete_err) = delete_if_exists(output) {
                warn!("{delete_err:?}");
            }
            Err(e)
        }
    }
}

/// Source of OTA payloads. This is a seam so the interactive flow can be
/// driven without network access.
pub trait OtaFetcher {
    fn fetch(&mut self, url: &str, output: &Path) -> Result<()>;
}

/// [`OtaFetcher`] that performs real HTTP downloads.
pub struct HttpFetcher<'a> {
    cancel_signal: &'a AtomicBool,
}

impl<'a> HttpFetcher<'a> {
    pub fn new(cancel_signal: &'a AtomicBool) -> Self {
        Self { cancel_signal }
    }
}

impl OtaFetcher for HttpFetcher<'_> {
    fn fetch(&mut self, url: &str, output: &Path) -> Result<()> {
        let mut display = BasicProgressDisplay::new(Duration::from_millis(50));

        download_file(url, output, &mut display, self.cancel_signal)?;

        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// The OTA was downloaded and copied into the store.
    Downloaded { download: PathBuf, ota: PathBuf },
    /// `<id>.zip` already existed. Nothing was downloaded or overwritten.
    AlreadyPresent(PathBuf),
    /// The URL does not point to a known OTA host. Nothing was downloaded.
    InvalidUrl,
}

/// Download an OTA for `selection` into the store.
///
/// The payload is saved under its URL file name in the version directory and
/// then copied to `<id>.zip`. An existing `<id>.zip` is never overwritten and
/// is checked before any network request is made.
pub fn download_ota(
    store: &ArtifactStore,
    selection: &BuildSelection,
    url: &str,
    fetcher: &mut dyn OtaFetcher,
) -> Result<DownloadOutcome> {
    let url = url.trim();

    let kind = classify(url);
    if kind == UrlKind::Invalid {
        return Ok(DownloadOutcome::InvalidUrl);
    }

    let destination = store.ota_path(selection);
    if destination.exists() {
        info!("OTA already present, skipping download: {destination:?}");
        return Ok(DownloadOutcome::AlreadyPresent(destination));
    }

    let version_dir = store.version_dir(selection);
    fs::create_dir_all(&version_dir)
        .with_context(|| format!("Failed to create directory: {version_dir:?}"))?;

    let dest_name = format!("{}.zip", selection.id);
    let download_name = match url_file_name(url) {
        Some(n) if n != dest_name => n.to_owned(),
        _ => format!("{dest_name}.download"),
    };
    let download = version_dir.join(download_name);

    info!("Downloading {kind:?} OTA to {download:?}");

    fetcher
        .fetch(url, &download)
        .with_context(|| format!("Failed to download OTA: {url}"))?;

    if destination.exists() {
        warn!("OTA appeared during download, leaving it untouched: {destination:?}");
        return Ok(DownloadOutcome::AlreadyPresent(destination));
    }

    fs::copy(&download, &destination)
        .with_context(|| format!("Failed to copy {download:?} to {destination:?}"))?;

    Ok(DownloadOutcome::Downloaded {
        download,
        ota: destination,
    })
}
