//! The preview upload workflow.
//!
//! 1. Look up the app by bundle id
//! 2. Look up the version by platform and version string
//! 3. Find the localization for the locale, creating it if missing
//! 4. Find the preview set for the preview type, creating it if missing
//! 5. Reserve an app preview in that set
//! 6. Upload the file chunk by chunk and commit it
//! 7. Poll until the preview is processed

use std::path::PathBuf;

use anyhow::Context;
use ascflow_client::{Document, JsonTransport, Resource};
use ascflow_upload::{AssetClient, AssetUploadRequest};
use clap::Parser;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;

/// Uploads an app preview video and waits until it is processed.
#[derive(Debug, Clone, PartialEq, Eq, Parser)]
#[command(
    version,
    about,
    after_help = "e.g.  ascflow-preview-upload com.example.myapp IOS 1.0.2 en-US IPHONE_65 /path/to/movie.mp4"
)]
pub struct Args {
    /// Bundle identifier of the app
    pub bundle_id: String,

    /// Platform of the version (IOS, MAC_OS, TV_OS, ...)
    pub platform: String,

    /// Version string, e.g. 1.0.2
    #[arg(value_name = "VERSION")]
    pub version_string: String,

    /// Localization locale, e.g. en-US
    pub locale: String,

    /// Preview type, e.g. IPHONE_65
    pub preview_type: String,

    /// Video file to upload
    pub file_path: PathBuf,
}

/// Runs the whole workflow; returns the preview's `self` URL.
pub async fn run(config: &Config, args: &Args, cancel: &CancellationToken) -> anyhow::Result<String> {
    let client = AssetClient::connect(&config.session())?
        .with_upload_config(config.upload())
        .with_poll_config(config.poll());
    upload_preview(&client, args, cancel).await
}

async fn upload_preview(
    client: &AssetClient,
    args: &Args,
    cancel: &CancellationToken,
) -> anyhow::Result<String> {
    let api = client.transport();

    info!(bundle_id = %args.bundle_id, "finding (or creating) app preview set");
    let app = first(
        api,
        &format!("apps?filter[bundleId]={}", args.bundle_id),
    )
    .await?
    .with_context(|| format!("no app found with bundle id {}", args.bundle_id))?;

    let version = first(
        api,
        &format!(
            "apps/{}/appStoreVersions?filter[versionString]={}&filter[platform]={}",
            app.id, args.version_string, args.platform
        ),
    )
    .await?
    .with_context(|| {
        format!(
            "no app store version found with version {} on {}",
            args.version_string, args.platform
        )
    })?;

    let localizations = list(
        api,
        &format!("appStoreVersions/{}/appStoreVersionLocalizations", version.id),
    )
    .await?;
    let localization = match find_by_attribute(localizations, "locale", &args.locale) {
        Some(found) => found,
        None => {
            info!(locale = %args.locale, "creating localization");
            let created: Document = api
                .post(
                    "appStoreVersionLocalizations",
                    &json!({"data": {
                        "type": "appStoreVersionLocalizations",
                        "attributes": {"locale": args.locale},
                        "relationships": {"appStoreVersion": {"data": {
                            "type": "appStoreVersions",
                            "id": version.id,
                        }}}
                    }}),
                )
                .await?;
            created.data
        }
    };

    let sets_url = localization
        .related_link("appPreviewSets")
        .map(str::to_string)
        .unwrap_or_else(|| format!("{}/appPreviewSets", localization.path()));
    let preview_set = match find_by_attribute(list(api, &sets_url).await?, "previewType", &args.preview_type) {
        Some(found) => found,
        None => {
            info!(preview_type = %args.preview_type, "creating app preview set");
            let created: Document = api
                .post(
                    "appPreviewSets",
                    &json!({"data": {
                        "type": "appPreviewSets",
                        "attributes": {"previewType": args.preview_type},
                        "relationships": {"appStoreVersionLocalization": {"data": {
                            "type": "appStoreVersionLocalizations",
                            "id": localization.id,
                        }}}
                    }}),
                )
                .await?;
            created.data
        }
    };

    let file_name = args
        .file_path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("{} has no file name", args.file_path.display()))?;
    let bytes = tokio::fs::read(&args.file_path)
        .await
        .with_context(|| format!("reading {}", args.file_path.display()))?;

    info!(file_name, size = bytes.len(), "reserving app preview");
    let reserved: Document = api
        .post(
            "appPreviews",
            &json!({"data": {
                "type": "appPreviews",
                "attributes": {"fileName": file_name, "fileSize": bytes.len()},
                "relationships": {"appPreviewSet": {"data": {
                    "type": "appPreviewSets",
                    "id": preview_set.id,
                }}}
            }}),
        )
        .await?;
    let preview = reserved.data;

    info!(preview = %preview.path(), "uploading preview asset");
    let asset = AssetUploadRequest::from_resource(&preview)?;
    client.upload_asset(&asset, bytes, cancel).await?;

    let self_url = preview
        .links
        .self_link
        .clone()
        .unwrap_or_else(|| preview.path());
    info!(url = %self_url, "asset uploaded, polling for success");
    client
        .poll_for_upload_success(&self_url, "app preview", cancel)
        .await?;

    Ok(self_url)
}

async fn list(api: &JsonTransport, path: &str) -> anyhow::Result<Vec<Resource>> {
    let doc: Document<Vec<Resource>> = api.get(path).await?;
    Ok(doc.data)
}

async fn first(api: &JsonTransport, path: &str) -> anyhow::Result<Option<Resource>> {
    Ok(list(api, path).await?.into_iter().next())
}

fn find_by_attribute(resources: Vec<Resource>, name: &str, value: &str) -> Option<Resource> {
    resources
        .into_iter()
        .find(|r| r.attribute(name).and_then(|v| v.as_str()) == Some(value))
}
