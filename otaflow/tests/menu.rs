/*
 * SPDX-FileCopyrightText: 2026 otaflow contributors
 * SPDX-License-Identifier: GPL-3.0-only
 */

mod common;

use std::{fs, path::Path, sync::atomic::AtomicBool};

use anyhow::Result;
use assert_matches::assert_matches;
use tempfile::TempDir;

use otaflow::{
    cli::menu::{FlowEnd, Menu},
    config::Config,
    patch::PatchVariant,
    selection::{BuildSelection, BuildType, Device},
    store::ArtifactStore,
};

use common::{RecordingRunner, StubFetcher, test_config, touch};

struct Session {
    result: Result<FlowEnd>,
    output: String,
}

fn run_menu(
    config: &Config,
    input: &str,
    runner: &mut RecordingRunner,
    fetcher: &mut StubFetcher,
    cancel_signal: &AtomicBool,
) -> Session {
    let mut input = input.as_bytes();
    let mut output = Vec::<u8>::new();

    let result = Menu::new(
        config,
        &mut input,
        &mut output,
        runner,
        fetcher,
        cancel_signal,
    )
    .run();

    Session {
        result,
        output: String::from_utf8(output).unwrap(),
    }
}

fn cheetah_selection() -> BuildSelection {
    BuildSelection {
        build_type: BuildType::Pixel,
        device: Device::Cheetah,
        version: "TQ2A".to_owned(),
        id: "230505.002".to_owned(),
    }
}

fn setup() -> (TempDir, Config, ArtifactStore) {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = test_config(temp_dir.path());
    let store = ArtifactStore::new(&config.root);

    (temp_dir, config, store)
}

fn add_magisk(config: &Config, version: &str) {
    touch(&config.magisk_apk(version));
}

fn arg_path<'a>(invocation: &'a otaflow::tool::Invocation, flag: &str) -> &'a Path {
    Path::new(invocation.flag_value(flag).unwrap())
}

#[test]
fn already_extracted_short_circuits() {
    let (_temp_dir, config, store) = setup();
    let selection = cheetah_selection();
    touch(&store.ota_path(&selection));
    for name in ["boot.img", "init_boot.img"] {
        touch(&store.boot_dir(&selection).join(name));
    }

    let mut runner = RecordingRunner::default();
    let mut fetcher = StubFetcher::new(b"");
    let cancel = AtomicBool::new(false);

    let session = run_menu(
        &config,
        "pixel\ncheetah\ntq2a.230505.002\n",
        &mut runner,
        &mut fetcher,
        &cancel,
    );

    assert_eq!(
        session.result.unwrap(),
        FlowEnd::AlreadyExtracted(selection)
    );
    assert!(session.output.contains("Boot image already extracted."));
    assert!(runner.pipelines.is_empty());
    assert!(fetcher.requests.is_empty());
}

#[test]
fn partial_extraction_is_redone() {
    let (_temp_dir, config, store) = setup();
    let selection = cheetah_selection();
    touch(&store.ota_path(&selection));
    touch(&store.boot_dir(&selection).join("boot.img"));
    add_magisk(&config, "25.2");

    let mut runner = RecordingRunner::default();
    let mut fetcher = StubFetcher::new(b"");
    let cancel = AtomicBool::new(false);

    let session = run_menu(
        &config,
        "pixel\ncheetah\nTQ2A.230505.002\n25.2\n",
        &mut runner,
        &mut fetcher,
        &cancel,
    );

    assert_matches!(session.result, Ok(FlowEnd::Patched { .. }));
    assert!(runner.find("extract").is_some());
    assert!(store.boot_images_exist(&selection));
}

#[test]
fn invalid_input_reprompts_and_uses_preinit() {
    let (_temp_dir, config, store) = setup();
    let selection = cheetah_selection();
    touch(&store.ota_path(&selection));
    add_magisk(&config, "26.1");

    let mut runner = RecordingRunner::default();
    let mut fetcher = StubFetcher::new(b"");
    let cancel = AtomicBool::new(false);

    let session = run_menu(
        &config,
        "Pixel\npixel\nnexus\ncheetah\nTQ2A\nTQ2A.230505.002\nabc\n26.1\n",
        &mut runner,
        &mut fetcher,
        &cancel,
    );

    let end = session.result.unwrap();
    assert_eq!(
        end,
        FlowEnd::Patched {
            selection: selection.clone(),
            magisk: "26.1".parse().unwrap(),
            variant: PatchVariant::Preinit {
                partition: "persist"
            },
        }
    );

    assert_eq!(session.output.matches("Please enter the buildtype").count(), 2);
    assert_eq!(session.output.matches("Please enter the device").count(), 2);
    assert_eq!(session.output.matches("Please enter the build-number").count(), 2);
    assert_eq!(session.output.matches("Please enter the magisk version").count(), 2);
    assert!(session.output.contains("Unknown build type: \"Pixel\""));
    assert!(session.output.contains("Invalid Magisk version: \"abc\""));
    assert!(session.output.contains("MAGISK: 26.1\n"));
    assert!(fetcher.requests.is_empty());

    assert_eq!(runner.pipelines.len(), 2);

    let extract = runner.find("extract").unwrap();
    assert_eq!(arg_path(extract, "--input"), store.ota_path(&selection));
    assert_eq!(arg_path(extract, "--directory"), store.boot_dir(&selection));
    assert!(extract.get_args().iter().any(|a| a == "--boot-only"));

    let patch = runner.find("patch").unwrap();
    assert!(patch.has_flag_value("--magisk-preinit-device", "persist"));
    assert!(patch.has_flag_value("--magisk", config.magisk_apk("26.1")));
    assert!(patch.has_flag_value("--privkey-avb", &config.keys.avb_key));
    assert!(patch.has_flag_value("--privkey-ota", &config.keys.ota_key));
    assert!(patch.has_flag_value("--cert-ota", &config.keys.ota_cert));
}

#[test]
fn missing_magisk_apk_reprompts() {
    let (_temp_dir, config, store) = setup();
    let selection = cheetah_selection();
    touch(&store.ota_path(&selection));
    add_magisk(&config, "25.2");

    let mut runner = RecordingRunner::default();
    let mut fetcher = StubFetcher::new(b"");
    let cancel = AtomicBool::new(false);

    let session = run_menu(
        &config,
        "pixel\ncheetah\nTQ2A.230505.002\n25.1\n25.2\n",
        &mut runner,
        &mut fetcher,
        &cancel,
    );

    assert_matches!(
        session.result,
        Ok(FlowEnd::Patched {
            variant: PatchVariant::Standard,
            ..
        })
    );
    assert!(session.output.contains("Magisk APK not found"));

    let patch = runner.find("patch").unwrap();
    assert!(!patch.get_args().iter().any(|a| a == "--magisk-preinit-device"));
    assert!(patch.has_flag_value("--magisk", config.magisk_apk("25.2")));
}

#[test]
fn invalid_url_ends_flow() {
    let (_temp_dir, config, store) = setup();

    let mut runner = RecordingRunner::default();
    let mut fetcher = StubFetcher::new(b"payload");
    let cancel = AtomicBool::new(false);

    let session = run_menu(
        &config,
        "graphene\nraven\nTQ3A.230805.001\nhttps://example.com/raven-ota.zip\n",
        &mut runner,
        &mut fetcher,
        &cancel,
    );

    let selection = BuildSelection {
        build_type: BuildType::Graphene,
        device: Device::Raven,
        version: "TQ3A".to_owned(),
        id: "230805.001".to_owned(),
    };

    assert_eq!(session.result.unwrap(), FlowEnd::InvalidUrl(selection.clone()));
    assert!(session.output.contains("Invalid URL."));
    assert!(fetcher.requests.is_empty());
    assert!(runner.pipelines.is_empty());
    assert!(!store.ota_exists(&selection));
}

#[test]
fn download_then_patch() {
    let (_temp_dir, config, store) = setup();
    let selection = cheetah_selection();
    add_magisk(&config, "25.2");

    let mut runner = RecordingRunner::default();
    let mut fetcher = StubFetcher::new(b"ota payload");
    let cancel = AtomicBool::new(false);

    let url = "https://dl.google.com/dl/android/aosp/cheetah-ota-tq2a.230505.002-abcdef12.zip";
    let session = run_menu(
        &config,
        &format!("pixel\ncheetah\nTQ2A.230505.002\n{url}\n25.2\n"),
        &mut runner,
        &mut fetcher,
        &cancel,
    );

    assert_matches!(
        session.result,
        Ok(FlowEnd::Patched {
            variant: PatchVariant::Standard,
            ..
        })
    );

    assert_eq!(fetcher.requests.len(), 1);
    let (requested, download) = &fetcher.requests[0];
    assert_eq!(requested, url);
    assert_eq!(
        download,
        &store
            .version_dir(&selection)
            .join("cheetah-ota-tq2a.230505.002-abcdef12.zip")
    );

    assert_eq!(fs::read(store.ota_path(&selection)).unwrap(), b"ota payload");
    assert!(session.output.contains("OTA update downloaded and copied to"));

    // Extraction happens before patching.
    assert_eq!(runner.pipelines.len(), 2);
    assert!(runner.pipelines[0][0].get_args().iter().any(|a| a == "extract"));
    assert!(runner.pipelines[1][0].get_args().iter().any(|a| a == "patch"));
}

#[test]
fn closed_input_is_an_error() {
    let (_temp_dir, config, _store) = setup();

    let mut runner = RecordingRunner::default();
    let mut fetcher = StubFetcher::new(b"");
    let cancel = AtomicBool::new(false);

    let session = run_menu(&config, "pixel\n", &mut runner, &mut fetcher, &cancel);

    let e = session.result.unwrap_err();
    assert!(format!("{e:#}").contains("Standard input was closed"));
    assert!(runner.pipelines.is_empty());
}

#[test]
fn cancel_signal_stops_prompting() {
    let (_temp_dir, config, _store) = setup();

    let mut runner = RecordingRunner::default();
    let mut fetcher = StubFetcher::new(b"");
    let cancel = AtomicBool::new(true);

    let session = run_menu(
        &config,
        "pixel\ncheetah\n",
        &mut runner,
        &mut fetcher,
        &cancel,
    );

    let e = session.result.unwrap_err();
    assert!(format!("{e:#}").contains("Received cancel signal"));
}

#[test]
fn patch_failure_is_reported() {
    let (_temp_dir, config, store) = setup();
    let selection = cheetah_selection();
    touch(&store.ota_path(&selection));
    add_magisk(&config, "26.1");

    let mut runner = RecordingRunner::failing_on("patch");
    let mut fetcher = StubFetcher::new(b"");
    let cancel = AtomicBool::new(false);

    let session = run_menu(
        &config,
        "pixel\ncheetah\nTQ2A.230505.002\n26.1\n",
        &mut runner,
        &mut fetcher,
        &cancel,
    );

    let e = session.result.unwrap_err();
    let message = format!("{e:#}");
    assert!(message.contains("Failed to patch OTA"), "{message}");
    assert!(message.contains("exit code 1"), "{message}");
    assert!(!session.output.contains("Patched OTA"));
}

#[test]
fn extract_failure_is_reported() {
    let (_temp_dir, config, store) = setup();
    let selection = cheetah_selection();
    touch(&store.ota_path(&selection));

    let mut runner = RecordingRunner::failing_on("extract");
    let mut fetcher = StubFetcher::new(b"");
    let cancel = AtomicBool::new(false);

    let session = run_menu(
        &config,
        "pixel\ncheetah\nTQ2A.230505.002\n",
        &mut runner,
        &mut fetcher,
        &cancel,
    );

    let e = session.result.unwrap_err();
    assert!(format!("{e:#}").contains("Failed to extract boot images"));
    assert_eq!(runner.pipelines.len(), 1);
}
