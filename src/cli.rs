//! Command surface for the `twigga` binary: argument parsing, the
//! per-verb handlers, and the startup profile overlay.
//!
//! Handlers are generic over [`Service`] so they can be driven against
//! a mock in tests. Recognized precondition failures (not logged in,
//! no active project) print guidance and return `Ok`; anything
//! unexpected bubbles to `main` as an error.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde_json::{json, Map, Value};
use tracing::{error, warn};

use crate::api::{ApiClient, Service};
use crate::auth;
use crate::config::{self, Profile};
use crate::deploy::{self, hosting_bucket};
use crate::id::generate_document_id;
use crate::release;

const LOGIN_HINT: &str = "You need to be authenticated, try 'twigga login'";

/// Twigga CLI: manage twigga projects (auth, storage, hosting).
#[derive(Parser)]
#[clap(
    name = "twigga",
    version,
    about = "Manage Twigga projects: authentication, storage buckets and static-site hosting"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Log in to Twigga through the browser
    Login,
    /// Log out the current user
    Logout,
    /// List all projects you are a member of
    Projects,
    /// Print the active project
    Project,
    /// Select the active project and prepare its hosting bucket
    Use {
        /// Project id, as printed by 'twigga projects'
        project_id: String,
    },
    /// Manage storage buckets
    Bucket {
        #[clap(subcommand)]
        command: BucketCommands,
    },
    /// List bucket records for the active project
    Buckets,
    /// Work with objects in a storage bucket
    Storage {
        #[clap(subcommand)]
        command: StorageCommands,
    },
    /// Deploy a static site directory to the project's hosting bucket
    Deploy {
        /// Directory containing the built site
        dir: PathBuf,
    },
}

#[derive(Subcommand)]
pub enum BucketCommands {
    /// Create a bucket and its tracking record
    Create { folder_name: String },
}

#[derive(Subcommand)]
pub enum StorageCommands {
    /// Upload a file or directory (relative paths preserved)
    Upload { bucket: String, path: PathBuf },
    /// List the objects in a bucket
    Files { bucket: String },
}

/// Async entrypoint shared by `main()` and integration tests.
pub async fn run(cli: Cli) -> Result<()> {
    let cfg_path = config::default_config_path()?;
    let mut profile = startup_profile(&cfg_path);
    let service = ApiClient::from_profile(&profile)?;
    dispatch(cli, &service, &cfg_path, &mut profile).await
}

async fn dispatch<S: Service + ?Sized>(
    cli: Cli,
    service: &S,
    cfg_path: &Path,
    profile: &mut Profile,
) -> Result<()> {
    match cli.command {
        Commands::Login => login(service, cfg_path, profile).await,
        Commands::Logout => logout(cfg_path, profile),
        Commands::Projects => projects(service, profile).await,
        Commands::Project => {
            project(profile);
            Ok(())
        }
        Commands::Use { project_id } => use_project(service, cfg_path, profile, &project_id).await,
        Commands::Bucket {
            command: BucketCommands::Create { folder_name },
        } => bucket_create(service, profile, &folder_name).await,
        Commands::Buckets => buckets(service, profile).await,
        Commands::Storage {
            command: StorageCommands::Upload { bucket, path },
        } => storage_upload(service, profile, &bucket, &path).await,
        Commands::Storage {
            command: StorageCommands::Files { bucket },
        } => storage_files(service, profile, &bucket).await,
        Commands::Deploy { dir } => deploy_site(service, profile, &dir).await,
    }
}

/// Every invocation starts from the bootstrap profile; the on-disk one
/// takes over only when it represents a logged-in session, so the
/// bootstrap application token keeps authorizing anonymous verbs.
fn startup_profile(cfg_path: &Path) -> Profile {
    let bootstrap = Profile::bootstrap();
    match config::load(cfg_path) {
        Ok(stored) if stored.status => stored,
        Ok(_) => bootstrap,
        Err(e) => {
            warn!(error = %e, "no stored profile, continuing with defaults");
            bootstrap
        }
    }
}

async fn login<S: Service + ?Sized>(
    service: &S,
    cfg_path: &Path,
    profile: &mut Profile,
) -> Result<()> {
    if profile.status {
        println!("Already logged in — type 'twigga logout' and try 'twigga login' again.");
        return Ok(());
    }
    config::ensure(cfg_path)?;
    auth::login(service, cfg_path, profile).await
}

fn logout(cfg_path: &Path, profile: &mut Profile) -> Result<()> {
    profile.clear_session();
    config::save(cfg_path, profile)?;
    println!("Logged out successfully.");
    Ok(())
}

async fn projects<S: Service + ?Sized>(service: &S, profile: &Profile) -> Result<()> {
    if !profile.status {
        println!("{LOGIN_HINT}");
        return Ok(());
    }

    let user = service.get_token_data(&profile.token).await?;
    let user_id = user
        .get("id")
        .and_then(Value::as_str)
        .context("user record is missing 'id'")?
        .to_string();

    let filter = json!({ "members": [user_id] });
    let resp = service.query_documents("Twigga", "Projects", filter).await?;
    let docs = documents_of(&resp);

    println!("List of projects ({})", docs.len());
    println!("------------------------------------------------------");
    println!("{:<28}{}", "ProjectName", "ProjectId");
    for doc in docs {
        let name = doc.get("projectName").and_then(Value::as_str).unwrap_or("-");
        let id = doc.get("projectId").and_then(Value::as_str).unwrap_or("-");
        println!("{name:<28}{id}");
    }
    Ok(())
}

fn project(profile: &Profile) {
    if !profile.status {
        println!("{LOGIN_HINT}");
    } else if profile.project_id.is_empty() {
        println!(
            "No active project. Try 'twigga use <projectId>' or list projects with 'twigga projects'"
        );
    } else {
        println!("Active project with ID: {}", profile.project_id);
    }
}

async fn use_project<S: Service + ?Sized>(
    service: &S,
    cfg_path: &Path,
    profile: &mut Profile,
    project_id: &str,
) -> Result<()> {
    if !profile.status {
        println!("{LOGIN_HINT}");
        return Ok(());
    }

    profile.project_id = project_id.to_string();
    let bucket = hosting_bucket(project_id);

    // Creation and the public policy are idempotent in intent, so
    // failures are logged rather than aborting the selection.
    if let Err(e) = service.add_bucket(&bucket).await {
        error!(error = %e, bucket, "hosting bucket creation failed");
    }
    if let Err(e) = service.set_bucket_policy(&bucket, "public").await {
        error!(error = %e, bucket, "hosting bucket policy update failed");
    }

    config::save(cfg_path, profile)?;
    println!("Project is set");
    Ok(())
}

async fn bucket_create<S: Service + ?Sized>(
    service: &S,
    profile: &Profile,
    folder_name: &str,
) -> Result<()> {
    if !profile.status {
        println!("{LOGIN_HINT}");
        return Ok(());
    }
    if profile.project_id.is_empty() {
        println!("No active project. Try 'twigga use <projectId>'");
        return Ok(());
    }

    let filter = json!({ "projectId": profile.project_id, "folder": folder_name });
    let resp = service.query_documents("Twigga", "Buckets", filter).await?;
    if !documents_of(&resp).is_empty() {
        println!("Message: folder {folder_name} exists already!");
        return Ok(());
    }

    let doc = json!({
        "folder": folder_name,
        "folderId": generate_document_id(),
        "projectId": profile.project_id,
        "createdAt": Utc::now().to_rfc3339(),
    });
    if let Err(e) = service.create_document_auto("Twigga", "Buckets", doc).await {
        warn!(error = %e, folder_name, "bucket record insert failed");
    }

    match service.add_bucket(folder_name).await {
        Ok(_) => println!("Message: bucket created"),
        Err(e) => println!("Message: {e}"),
    }
    Ok(())
}

async fn buckets<S: Service + ?Sized>(service: &S, profile: &Profile) -> Result<()> {
    if !profile.status {
        println!("{LOGIN_HINT}");
        return Ok(());
    }
    if profile.project_id.is_empty() {
        println!("No active project. Try 'twigga use <projectId>'");
        return Ok(());
    }

    let filter = json!({ "projectId": profile.project_id });
    let resp = service.query_documents("Twigga", "Buckets", filter).await?;
    let docs = documents_of(&resp);

    println!("LIST OF BUCKETS");
    println!("{:<20}{}", "FolderName", "FolderId");
    println!("---------------------------------");
    for doc in docs {
        let folder = doc.get("folder").and_then(Value::as_str).unwrap_or("-");
        let folder_id = doc.get("folderId").and_then(Value::as_str).unwrap_or("-");
        println!("{folder:<20}{folder_id}");
    }
    Ok(())
}

async fn storage_upload<S: Service + ?Sized>(
    service: &S,
    profile: &Profile,
    bucket: &str,
    path: &Path,
) -> Result<()> {
    if !profile.status {
        println!("{LOGIN_HINT}");
        return Ok(());
    }

    let meta =
        std::fs::metadata(path).with_context(|| format!("cannot stat {}", path.display()))?;
    let (files, base_dir) = if meta.is_dir() {
        (release::walk_files(path)?, path.to_path_buf())
    } else {
        // Single file: its base name becomes the object name.
        (
            vec![path.to_path_buf()],
            path.parent().unwrap_or(Path::new(".")).to_path_buf(),
        )
    };

    println!("Uploading {} files to bucket {} ...", files.len(), bucket);
    let uploaded = service.upload_files(bucket, &files, &base_dir).await?;
    println!("Uploaded:");
    for name in uploaded {
        println!(" - {name}");
    }
    Ok(())
}

async fn storage_files<S: Service + ?Sized>(
    service: &S,
    profile: &Profile,
    bucket: &str,
) -> Result<()> {
    if !profile.status {
        println!("{LOGIN_HINT}");
        return Ok(());
    }

    let files = service.get_files(bucket).await?;
    println!("Objects in bucket {bucket} ({})", files.len());
    for file in files {
        let name = file.get("name").and_then(Value::as_str).unwrap_or("-");
        println!(" - {name}");
    }
    Ok(())
}

async fn deploy_site<S: Service + ?Sized>(
    service: &S,
    profile: &Profile,
    dir: &Path,
) -> Result<()> {
    if !profile.status {
        println!("{LOGIN_HINT}");
        return Ok(());
    }
    if profile.project_id.is_empty() {
        println!("No active project. Try 'twigga projects'");
        return Ok(());
    }

    let report = deploy::deploy(service, &profile.project_id, dir).await?;
    println!("Site deployed and pointed: {}", report.live_url);
    Ok(())
}

/// The `documents` array of a query response; absent, null or empty all
/// mean "no documents".
fn documents_of(resp: &Map<String, Value>) -> Vec<&Map<String, Value>> {
    resp.get("documents")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(Value::as_object).collect())
        .unwrap_or_default()
}
