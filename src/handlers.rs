use crate::archive::{archive_file_name, check_folder, stream_folder_as_archive, ChannelSink};
use crate::config::Config;
use crate::deletion::delete_all;
use crate::error::{Result, StoreError};
use crate::file_system::build_tree;
use crate::models::{
    DeleteRequest, DeleteResponse, DirectoryQuery, DirectoryRequest, DownloadQuery, TreeResponse,
    UploadQuery,
};
use crate::sandbox::{build_breadcrumbs, join_relative, resolve, ResolvedPath};
use actix_files::NamedFile;
use actix_multipart::Multipart;
use actix_web::http::header::{ContentDisposition, DispositionParam, DispositionType};
use actix_web::{delete, get, post, web, HttpRequest, HttpResponse};
use futures::TryStreamExt;
use log::{debug, error, info, warn};
use serde_json::json;
use std::io;
use std::path::Path;
use std::time::Instant;
use tokio::fs as tokio_fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

const ARCHIVE_CHANNEL_CAPACITY: usize = 16;

pub fn register(cfg: &mut web::ServiceConfig) {
    cfg.service(connect)
        .service(show_tree_directory)
        .service(list_directory)
        .service(delete_files)
        .service(download_folder)
        .service(download_file)
        .service(upload)
        .route("/createFolder", web::post().to(create_folder))
        .route("/createDirectory", web::post().to(create_folder));
}

#[get("/api/connect")]
pub async fn connect() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "success": true, "message": "Connection successful" }))
}

fn resolve_logged(requested: &str, config: &Config) -> Result<ResolvedPath> {
    resolve(requested, config).map_err(|e| {
        warn!("Path validation failed for '{}': {}", requested, e);
        e
    })
}

async fn tree_response(resolved: ResolvedPath, max_depth: usize) -> Result<HttpResponse> {
    let start_time = Instant::now();
    let relative = resolved.relative.clone();

    let tree = web::block(move || build_tree(&resolved, max_depth))
        .await?
        .map_err(|e| {
            warn!("Failed to build tree for '{}': {}", relative, e);
            e
        })?;

    info!(
        "Listed '{}' ({} entries) in {:.2?}.",
        relative,
        tree.count() - 1,
        start_time.elapsed()
    );
    Ok(HttpResponse::Ok().json(TreeResponse {
        data: tree,
        path: build_breadcrumbs(&relative),
        message: "Successfully listed directory".to_string(),
    }))
}

#[get("/showTreeDirectory")]
pub async fn show_tree_directory(
    query: web::Query<DirectoryQuery>,
    config: web::Data<Config>,
) -> Result<HttpResponse> {
    let requested = query
        .path
        .clone()
        .unwrap_or_else(|| config.storage_prefix.clone());
    info!("Received request for directory tree: '{}'", requested);

    let resolved = resolve_logged(&requested, &config)?;
    tree_response(resolved, config.path_tree_max_depth).await
}

#[get("/listDirectory")]
pub async fn list_directory(config: web::Data<Config>) -> Result<HttpResponse> {
    info!("Received request for the whole store listing");
    let resolved = resolve_logged(&config.storage_prefix, &config)?;
    tree_response(resolved, config.tree_max_depth).await
}

#[delete("/delete")]
pub async fn delete_files(
    req: web::Json<DeleteRequest>,
    config: web::Data<Config>,
) -> Result<HttpResponse> {
    let nodes = req.into_inner().files_to_be_deleted;
    info!("Received delete request for {} top-level entries.", nodes.len());
    let start_time = Instant::now();

    let config = config.into_inner();
    let report = web::block(move || delete_all(&nodes, &config)).await?;

    info!(
        "Delete finished in {:.2?}: {} deleted, {} failed.",
        start_time.elapsed(),
        report.success_count,
        report.failure_count
    );
    let message = if report.failure_count == 0 {
        format!("Deleted {} items", report.success_count)
    } else {
        format!(
            "Deleted {} items, {} could not be deleted",
            report.success_count, report.failure_count
        )
    };
    Ok(HttpResponse::Ok().json(DeleteResponse { report, message }))
}

#[get("/folder/{path:.*}")]
pub async fn download_folder(
    path: web::Path<String>,
    config: web::Data<Config>,
) -> Result<HttpResponse> {
    let requested = path.into_inner();
    if requested.is_empty() {
        return Err(StoreError::BadRequest("folder path parameter missing".into()));
    }
    info!("Received folder download request: '{}'", requested);

    let resolved = resolve_logged(&requested, &config)?;
    let folder = resolved.absolute.clone();
    web::block(move || check_folder(&folder)).await?.map_err(|e| {
        warn!("Cannot archive '{}': {}", resolved.relative, e);
        // Report the client path rather than the absolute one.
        match e {
            StoreError::NotFound(_) => StoreError::NotFound(resolved.relative.clone()),
            StoreError::NotADirectory(_) => StoreError::NotADirectory(resolved.relative.clone()),
            other => other,
        }
    })?;

    let (tx, rx) = mpsc::channel(ARCHIVE_CHANNEL_CAPACITY);
    let folder = resolved.absolute.clone();
    let boundary = resolved.boundary.clone();
    let relative = resolved.relative.clone();
    tokio::task::spawn_blocking(move || {
        let start_time = Instant::now();
        let error_tx = tx.clone();
        match stream_folder_as_archive(&folder, &boundary, ChannelSink::new(tx)) {
            Ok(archived) => info!(
                "Streamed archive of '{}' ({} files) in {:.2?}.",
                relative,
                archived,
                start_time.elapsed()
            ),
            Err(e) => {
                error!("Archive of '{}' aborted: {}", relative, e);
                let _ = error_tx.blocking_send(Err(io::Error::other(e.to_string())));
            }
        }
    });

    let disposition = ContentDisposition {
        disposition: DispositionType::Attachment,
        parameters: vec![DispositionParam::Filename(archive_file_name(resolved.name()))],
    };
    Ok(HttpResponse::Ok()
        .content_type("application/zip")
        .insert_header(disposition)
        .streaming(ReceiverStream::new(rx)))
}

#[get("/download")]
pub async fn download_file(
    req: HttpRequest,
    query: web::Query<DownloadQuery>,
    config: web::Data<Config>,
) -> Result<HttpResponse> {
    info!("Received file download request: '{}'", query.file_name);
    let resolved = resolve_logged(&query.file_name, &config)?;

    let metadata = tokio_fs::metadata(&resolved.absolute)
        .await
        .map_err(|e| not_found_or_io(&resolved, e))?;
    if metadata.is_dir() {
        return Err(StoreError::BadRequest(format!(
            "'{}' is a directory",
            resolved.relative
        )));
    }

    let file = NamedFile::open_async(&resolved.absolute)
        .await
        .map_err(|e| not_found_or_io(&resolved, e))?;
    debug!("Serving '{}' ({} bytes)", resolved.relative, metadata.len());
    Ok(file
        .set_content_disposition(ContentDisposition {
            disposition: DispositionType::Attachment,
            parameters: vec![DispositionParam::Filename(resolved.name().to_string())],
        })
        .into_response(&req))
}

fn not_found_or_io(resolved: &ResolvedPath, err: io::Error) -> StoreError {
    match err.kind() {
        io::ErrorKind::NotFound => {
            warn!("File not found: '{}'", resolved.relative);
            StoreError::NotFound(resolved.relative.clone())
        }
        _ => StoreError::Io(err),
    }
}

pub async fn create_folder(
    req: web::Json<DirectoryRequest>,
    config: web::Data<Config>,
) -> Result<HttpResponse> {
    info!("Received create folder request: '{}'", req.directory);
    let resolved = resolve_logged(&req.directory, &config)?;
    if resolved.is_root() {
        return Err(StoreError::BadRequest("folder name missing".into()));
    }

    tokio_fs::create_dir(&resolved.absolute)
        .await
        .map_err(|e| match e.kind() {
            io::ErrorKind::AlreadyExists => {
                StoreError::BadRequest(format!("'{}' already exists", resolved.relative))
            }
            io::ErrorKind::NotFound => StoreError::NotFound(format!(
                "parent of '{}' does not exist",
                resolved.relative
            )),
            _ => StoreError::Io(e),
        })?;

    info!("Created folder '{}'", resolved.relative);
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Created folder successfully",
        "path": resolved.relative,
    })))
}

/// Reduces a client-supplied upload name to a plain file name, rejecting
/// empty names and macOS metadata files.
pub fn upload_file_name(raw: &str) -> Result<String> {
    let name = Path::new(raw)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("");
    if name.is_empty() || name == "." || name == ".." {
        return Err(StoreError::BadRequest("filename not found in form part".into()));
    }
    if name == ".DS_Store" || name.starts_with("._") {
        return Err(StoreError::BadRequest(
            "system files like .DS_Store are not allowed".into(),
        ));
    }
    Ok(name.to_string())
}

#[post("/upload")]
pub async fn upload(
    query: web::Query<UploadQuery>,
    config: web::Data<Config>,
    mut payload: Multipart,
) -> Result<HttpResponse> {
    let dest = query
        .dest_path
        .as_deref()
        .map(|p| p.trim_end_matches('/'))
        .filter(|p| !p.is_empty())
        .unwrap_or(config.storage_prefix.as_str())
        .to_string();
    info!("Received upload into '{}'", dest);

    let resolved = resolve_logged(&dest, &config)?;
    tokio_fs::create_dir_all(&resolved.absolute).await?;

    let mut uploaded = Vec::new();
    while let Some(mut field) = payload
        .try_next()
        .await
        .map_err(|err| StoreError::BadRequest(format!("multipart error: {}", err)))?
    {
        let content_disposition = field.content_disposition().clone();
        if content_disposition.get_name() != Some("file") {
            continue;
        }
        let name = upload_file_name(content_disposition.get_filename().unwrap_or(""))?;
        let target = resolved.absolute.join(&name);

        let mut out = tokio_fs::File::create(&target).await?;
        let mut written = 0usize;
        while let Some(chunk) = field
            .try_next()
            .await
            .map_err(|err| StoreError::BadRequest(format!("multipart error: {}", err)))?
        {
            out.write_all(&chunk).await?;
            written += chunk.len();
        }
        out.flush().await?;

        debug!("Stored '{}' ({} bytes)", target.display(), written);
        uploaded.push(join_relative(&resolved.relative, &name));
    }

    info!("Uploaded {} files into '{}'", uploaded.len(), resolved.relative);
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": format!("File uploaded successfully to {}", resolved.relative),
        "files": uploaded,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_file_name() {
        assert_eq!(upload_file_name("report.pdf").unwrap(), "report.pdf");
        assert_eq!(upload_file_name("../../etc/passwd").unwrap(), "passwd");
        assert!(upload_file_name("").is_err());
        assert!(upload_file_name("..").is_err());
        assert!(upload_file_name(".DS_Store").is_err());
        assert!(upload_file_name("._photo.jpg").is_err());
    }
}
