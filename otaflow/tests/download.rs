/*
 * SPDX-FileCopyrightText: 2026 otaflow contributors
 * SPDX-License-Identifier: GPL-3.0-only
 */

mod common;

use std::{
    fs,
    io::{BufRead, BufReader, Write},
    net::TcpListener,
    path::{Path, PathBuf},
    sync::atomic::AtomicBool,
    thread::{self, JoinHandle},
};

use anyhow::Result;

use otaflow::{
    download::{self, DownloadOutcome, OtaFetcher, ProgressDisplay},
    selection::{BuildSelection, BuildType, Device},
    store::ArtifactStore,
};

use common::{StubFetcher, touch};

#[derive(Default)]
struct NullDisplay;

impl ProgressDisplay for NullDisplay {
    fn progress(&mut self, _current: u64, _total: u64) {}

    fn error(&mut self, _msg: &str) {}

    fn finish(&mut self) {}
}

/// Fetcher that races another writer: the destination OTA is created while
/// the download is still in progress.
struct RacingFetcher {
    destination: PathBuf,
}

impl OtaFetcher for RacingFetcher {
    fn fetch(&mut self, _url: &str, output: &Path) -> Result<()> {
        fs::write(&self.destination, b"from another writer")?;
        fs::write(output, b"downloaded")?;

        Ok(())
    }
}

/// Serve a single canned HTTP response on a loopback port. Returns the base
/// URL and a handle that yields the request line.
fn serve_once(response: Vec<u8>) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(stream);

        let mut request_line = String::new();
        reader.read_line(&mut request_line).unwrap();

        loop {
            let mut line = String::new();
            let n = reader.read_line(&mut line).unwrap();
            if n == 0 || line == "\r\n" {
                break;
            }
        }

        let mut stream = reader.into_inner();
        stream.write_all(&response).unwrap();
        stream.flush().unwrap();

        request_line
    });

    (format!("http://{addr}"), handle)
}

fn ok_response(body: &[u8]) -> Vec<u8> {
    let mut response = format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len(),
    )
    .into_bytes();
    response.extend_from_slice(body);
    response
}

fn selection() -> BuildSelection {
    BuildSelection {
        build_type: BuildType::Aosp,
        device: Device::Oriole,
        version: "TQ3A".to_owned(),
        id: "230901.001".to_owned(),
    }
}

#[test]
fn download_file_writes_body() {
    let body = b"not really an OTA".repeat(1000);
    let (base, handle) = serve_once(ok_response(&body));

    let temp_dir = tempfile::tempdir().unwrap();
    let output = temp_dir.path().join("ota.zip");

    let n = download::download_file(
        &format!("{base}/ota.zip"),
        &output,
        &mut NullDisplay,
        &AtomicBool::new(false),
    )
    .unwrap();

    assert_eq!(n, body.len() as u64);
    assert_eq!(fs::read(&output).unwrap(), body);
    assert!(handle.join().unwrap().starts_with("GET /ota.zip "));
}

#[test]
fn download_file_rejects_error_status() {
    let (base, handle) = serve_once(
        b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_vec(),
    );

    let temp_dir = tempfile::tempdir().unwrap();
    let output = temp_dir.path().join("ota.zip");

    let e = download::download_file(
        &format!("{base}/missing.zip"),
        &output,
        &mut NullDisplay,
        &AtomicBool::new(false),
    )
    .unwrap_err();

    assert!(e.to_string().contains("404"), "{e:#}");
    assert!(!output.exists());
    handle.join().unwrap();
}

#[test]
fn existing_ota_is_not_downloaded_again() {
    let temp_dir = tempfile::tempdir().unwrap();
    let store = ArtifactStore::new(temp_dir.path());
    let selection = selection();
    let ota = store.ota_path(&selection);
    touch(&ota);
    fs::write(&ota, b"original").unwrap();

    let mut fetcher = StubFetcher::new(b"replacement");
    let outcome = download::download_ota(
        &store,
        &selection,
        "https://dl.google.com/dl/android/aosp/oriole-ota.zip",
        &mut fetcher,
    )
    .unwrap();

    assert_eq!(outcome, DownloadOutcome::AlreadyPresent(ota.clone()));
    assert!(fetcher.requests.is_empty());
    assert_eq!(fs::read(&ota).unwrap(), b"original");
}

#[test]
fn invalid_url_is_not_fetched() {
    let temp_dir = tempfile::tempdir().unwrap();
    let store = ArtifactStore::new(temp_dir.path());
    let selection = selection();

    let mut fetcher = StubFetcher::new(b"payload");
    let outcome = download::download_ota(
        &store,
        &selection,
        "ftp://mirror.example.org/oriole-ota.zip",
        &mut fetcher,
    )
    .unwrap();

    assert_eq!(outcome, DownloadOutcome::InvalidUrl);
    assert!(fetcher.requests.is_empty());
    assert!(!store.version_dir(&selection).exists());
}

#[test]
fn download_named_like_destination() {
    let temp_dir = tempfile::tempdir().unwrap();
    let store = ArtifactStore::new(temp_dir.path());
    let selection = selection();

    let mut fetcher = StubFetcher::new(b"payload");
    let outcome = download::download_ota(
        &store,
        &selection,
        " https://releases.grapheneos.org/230901.001.zip\n",
        &mut fetcher,
    )
    .unwrap();

    let version_dir = store.version_dir(&selection);
    assert_eq!(
        outcome,
        DownloadOutcome::Downloaded {
            download: version_dir.join("230901.001.zip.download"),
            ota: version_dir.join("230901.001.zip"),
        }
    );
    assert_eq!(fetcher.requests[0].0, "https://releases.grapheneos.org/230901.001.zip");
    assert_eq!(fs::read(store.ota_path(&selection)).unwrap(), b"payload");
}

#[test]
fn ota_created_during_download_is_kept() {
    let temp_dir = tempfile::tempdir().unwrap();
    let store = ArtifactStore::new(temp_dir.path());
    let selection = selection();
    let ota = store.ota_path(&selection);

    let mut fetcher = RacingFetcher {
        destination: ota.clone(),
    };
    let outcome = download::download_ota(
        &store,
        &selection,
        "https://dl.google.com/dl/android/aosp/oriole-ota.zip",
        &mut fetcher,
    )
    .unwrap();

    assert_eq!(outcome, DownloadOutcome::AlreadyPresent(ota.clone()));
    assert_eq!(fs::read(&ota).unwrap(), b"from another writer");
    assert_eq!(
        fs::read(store.version_dir(&selection).join("oriole-ota.zip")).unwrap(),
        b"downloaded"
    );
}
