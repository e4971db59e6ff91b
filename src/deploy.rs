//! Static-site deploy pipeline: walk, hash, upload, promote.
//!
//! The ordering is strict: the release version is computed before
//! anything is sent, every file is uploaded under that version, and
//! only then is the `main` channel pointed at it. Any earlier failure
//! aborts with the channel untouched, so the prior release stays live.

use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::info;

use crate::api::Service;
use crate::release;

/// The channel this client promotes releases to.
pub const LIVE_CHANNEL: &str = "main";

const APPS_DOMAIN: &str = "apps.bongocloud.co.tz";

/// Name of the per-project hosting bucket.
pub fn hosting_bucket(project_id: &str) -> String {
    format!("hosting-{}", project_id.to_lowercase())
}

#[derive(Debug)]
pub struct DeployReport {
    pub version: String,
    pub uploaded: Vec<String>,
    pub live_url: String,
}

/// Deploy `dir` as a new release of the project's site and point the
/// live channel at it.
pub async fn deploy<S: Service + ?Sized>(
    service: &S,
    project_id: &str,
    dir: &Path,
) -> Result<DeployReport> {
    if !dir.is_dir() {
        bail!("invalid directory: {}", dir.display());
    }

    let site = project_id;
    let bucket = hosting_bucket(project_id);

    let (version, files) = release::version_for_dir(dir)?;
    info!(%version, files = files.len(), "release version computed");

    println!("Deploying {} files to {} ...", files.len(), bucket);
    let uploaded = service
        .upload_site_version(&bucket, site, &version, &files, dir)
        .await
        .context("upload failed")?;
    for name in &uploaded {
        println!(" - {name}");
    }

    service
        .point_channel(&bucket, site, LIVE_CHANNEL, &version)
        .await
        .context("failed to point main channel")?;

    Ok(DeployReport {
        version,
        uploaded,
        live_url: format!("https://{site}.{APPS_DOMAIN}"),
    })
}
