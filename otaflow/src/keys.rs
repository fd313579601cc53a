/*
 * SPDX-FileCopyrightText: 2026 otaflow contributors
 * SPDX-License-Identifier: GPL-3.0-only
 */

//! Provisioning of the signing keys used for patching.
//!
//! Four artifacts are maintained: the AVB private key, the AVB public key
//! metadata derived from it, the OTA private key, and the self-signed OTA
//! certificate derived from that. Regenerating a private key deletes its
//! derived artifact so that it gets recreated from the new key.

use std::{fmt, fs, io, path::Path};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::{
    config::{KeyPaths, Tools},
    tool::{Invocation, ToolRunner, display_pipeline},
};

pub const KEY_BITS: &str = "4096";
pub const CERT_VALIDITY_DAYS: &str = "10000";
pub const CERT_SUBJECT: &str = "/CN=OTA/";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyArtifact {
    AvbKey,
    AvbPublicKey,
    OtaKey,
    OtaCert,
}

impl fmt::Display for KeyArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::AvbKey => "AVB private key",
            Self::AvbPublicKey => "AVB public key metadata",
            Self::OtaKey => "OTA private key",
            Self::OtaCert => "OTA certificate",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StepResult {
    Present,
    Generated,
    /// The generation command failed or did not produce the file.
    Failed(String),
    /// Not attempted because the artifact it is derived from is missing.
    Skipped,
}

impl StepResult {
    fn is_usable(&self) -> bool {
        matches!(self, Self::Present | Self::Generated)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProvisionReport {
    pub steps: Vec<(KeyArtifact, StepResult)>,
}

impl ProvisionReport {
    pub fn result(&self, artifact: KeyArtifact) -> Option<&StepResult> {
        self.steps
            .iter()
            .find(|(a, _)| *a == artifact)
            .map(|(_, r)| r)
    }

    pub fn is_complete(&self) -> bool {
        self.steps.iter().all(|(_, r)| r.is_usable())
    }
}

/// `openssl genrsa 4096 | openssl pkcs8 -topk8 -scrypt -out <output>`
pub fn generate_key_pipeline(openssl: &str, output: &Path) -> Vec<Invocation> {
    vec![
        Invocation::new(openssl).args(["genrsa", KEY_BITS]),
        Invocation::new(openssl)
            .args(["pkcs8", "-topk8", "-scrypt", "-out"])
            .arg(output),
    ]
}

/// `avbtool extract_public_key --key <key> --output <output>`
pub fn extract_public_key_invocation(
    avbtool: &[String],
    key: &Path,
    output: &Path,
) -> Result<Invocation> {
    let invocation = Invocation::from_argv(avbtool)
        .context("AVB tool command line is empty")?
        .arg("extract_public_key")
        .arg("--key")
        .arg(key)
        .arg("--output")
        .arg(output);

    Ok(invocation)
}

/// Self-signed SHA-256 certificate valid for 10000 days with subject `/CN=OTA/`.
pub fn generate_cert_invocation(openssl: &str, key: &Path, output: &Path) -> Invocation {
    Invocation::new(openssl)
        .args(["req", "-new", "-x509", "-sha256", "-key"])
        .arg(key)
        .arg("-out")
        .arg(output)
        .args(["-days", CERT_VALIDITY_DAYS, "-subj", CERT_SUBJECT])
}

fn delete_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e).with_context(|| format!("Failed to delete file: {path:?}")),
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {parent:?}"))?;
        }
    }

    Ok(())
}

pub struct KeyProvisioner<'a> {
    keys: &'a KeyPaths,
    tools: &'a Tools,
    runner: &'a mut dyn ToolRunner,
}

impl<'a> KeyProvisioner<'a> {
    pub fn new(keys: &'a KeyPaths, tools: &'a Tools, runner: &'a mut dyn ToolRunner) -> Self {
        Self {
            keys,
            tools,
            runner,
        }
    }

    /// Run all four steps in order. Failures of individual steps are recorded
    /// in the report rather than returned as errors. Only filesystem errors
    /// (eg. being unable to delete a stale derived artifact) abort.
    pub fn provision(&mut self) -> Result<ProvisionReport> {
        let mut report = ProvisionReport::default();

        let avb_key = self.ensure_avb_key()?;
        let avb_pkmd = if avb_key.is_usable() {
            self.ensure_avb_public_key()?
        } else {
            StepResult::Skipped
        };
        report.steps.push((KeyArtifact::AvbKey, avb_key));
        report.steps.push((KeyArtifact::AvbPublicKey, avb_pkmd));

        let ota_key = self.ensure_ota_key()?;
        let ota_cert = if ota_key.is_usable() {
            self.ensure_ota_cert()?
        } else {
            StepResult::Skipped
        };
        report.steps.push((KeyArtifact::OtaKey, ota_key));
        report.steps.push((KeyArtifact::OtaCert, ota_cert));

        Ok(report)
    }

    /// Run `pipeline` to create `output`. Spawn failures and non-zero exit
    /// statuses are reported as [`StepResult::Failed`].
    fn generate(
        &mut self,
        artifact: KeyArtifact,
        pipeline: &[Invocation],
        output: &Path,
    ) -> Result<StepResult> {
        info!("{artifact} does not exist: {output:?}");
        ensure_parent(output)?;

        let outcome = match self.runner.run(pipeline) {
            Ok(o) => o,
            Err(e) => {
                warn!("Failed to generate {artifact}: {e}");
                return Ok(StepResult::Failed(e.to_string()));
            }
        };

        if let Err(e) = outcome.check(pipeline) {
            warn!("Failed to generate {artifact}: {e}");
            return Ok(StepResult::Failed(e.to_string()));
        }

        if !output.is_file() {
            let msg = format!(
                "{} succeeded, but did not create {output:?}",
                display_pipeline(pipeline),
            );
            warn!("Failed to generate {artifact}: {msg}");
            return Ok(StepResult::Failed(msg));
        }

        info!("Generated {artifact}: {output:?}");

        Ok(StepResult::Generated)
    }

    /// Generate a private key at `key` and invalidate `derived` on success.
    fn ensure_private_key(
        &mut self,
        artifact: KeyArtifact,
        key: &Path,
        derived: &Path,
    ) -> Result<StepResult> {
        if key.is_file() {
            return Ok(StepResult::Present);
        }

        let pipeline = generate_key_pipeline(&self.tools.openssl, key);
        let result = self.generate(artifact, &pipeline, key)?;

        if result == StepResult::Generated && delete_if_exists(derived)? {
            info!("Deleted artifact derived from the old key: {derived:?}");
        }

        Ok(result)
    }

    pub fn ensure_avb_key(&mut self) -> Result<StepResult> {
        let keys = self.keys;

        self.ensure_private_key(KeyArtifact::AvbKey, &keys.avb_key, &keys.avb_pkmd)
    }

    pub fn ensure_avb_public_key(&mut self) -> Result<StepResult> {
        let keys = self.keys;
        if keys.avb_pkmd.is_file() {
            return Ok(StepResult::Present);
        }

        let invocation =
            extract_public_key_invocation(&self.tools.avbtool, &keys.avb_key, &keys.avb_pkmd)?;

        self.generate(KeyArtifact::AvbPublicKey, &[invocation], &keys.avb_pkmd)
    }

    pub fn ensure_ota_key(&mut self) -> Result<StepResult> {
        let keys = self.keys;

        self.ensure_private_key(KeyArtifact::OtaKey, &keys.ota_key, &keys.ota_cert)
    }

    pub fn ensure_ota_cert(&mut self) -> Result<StepResult> {
        let keys = self.keys;
        if keys.ota_cert.is_file() {
            return Ok(StepResult::Present);
        }

        let invocation =
            generate_cert_invocation(&self.tools.openssl, &keys.ota_key, &keys.ota_cert);

        self.generate(KeyArtifact::OtaCert, &[invocation], &keys.ota_cert)
    }
}
