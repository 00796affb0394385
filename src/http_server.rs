//! HTTP server implementation using Axum.
//!
//! One handler per transformation. Handlers own argument construction for
//! the external tools; option fields arrive as opaque strings and are
//! forwarded verbatim as argv entries, so semantic validation (range
//! expressions, passwords) is the invoked tool's job.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path as FsPath, PathBuf};

use axum::body::{Body, Bytes};
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tokio_util::io::ReaderStream;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::bundle;
use crate::error::{Error, Result};
use crate::ingress::{self, sanitize_name};
use crate::reaper;
use crate::runner::Invocation;
use crate::state::AppState;
use crate::workspace::JobDescriptor;

const PDF: &[&str] = &["pdf"];
const IMAGES: &[&str] = &["jpg", "jpeg", "png"];

/// Pointer to a downloadable artifact inside a job's workspace.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadResponse {
    pub job_id: String,
    pub filename: String,
    pub download_url: String,
    pub expires_at_minutes: u64,
}

impl DownloadResponse {
    fn new(job: &JobDescriptor, output: &FsPath, ttl_minutes: u64) -> Self {
        let filename = output
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            job_id: job.id.clone(),
            download_url: format!("/download/{}/{}", job.id, filename),
            filename,
            expires_at_minutes: ttl_minutes,
        }
    }
}

/// One uploaded file from a multipart form.
struct Upload {
    name: String,
    bytes: Bytes,
}

/// Parsed multipart body: file parts grouped by field name, text parts as
/// a flat string map.
#[derive(Default)]
struct Form {
    files: HashMap<String, Vec<Upload>>,
    fields: HashMap<String, String>,
}

impl Form {
    async fn read(mut multipart: Multipart) -> Result<Self> {
        let mut form = Form::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| Error::BadRequest(e.to_string()))?
        {
            let key = field.name().unwrap_or_default().to_string();
            match field.file_name().map(str::to_string) {
                Some(name) => {
                    let bytes = field
                        .bytes()
                        .await
                        .map_err(|e| Error::BadRequest(e.to_string()))?;
                    form.files.entry(key).or_default().push(Upload { name, bytes });
                }
                None => {
                    let text = field
                        .text()
                        .await
                        .map_err(|e| Error::BadRequest(e.to_string()))?;
                    form.fields.insert(key, text);
                }
            }
        }
        Ok(form)
    }

    fn files(&self, key: &str) -> &[Upload] {
        self.files.get(key).map(Vec::as_slice).unwrap_or_default()
    }

    fn single_file(&self, key: &str, what: &str) -> Result<&Upload> {
        self.files(key)
            .first()
            .ok_or_else(|| Error::BadRequest(format!("upload {what}")))
    }

    fn text(&self, key: &str) -> &str {
        self.fields.get(key).map(String::as_str).unwrap_or_default()
    }
}

fn path_arg(path: &FsPath) -> String {
    path.to_string_lossy().into_owned()
}

impl AppState {
    fn store(&self, job: &JobDescriptor, upload: &Upload, allowed: &[&str]) -> Result<PathBuf> {
        ingress::store(
            &job.dir,
            &upload.name,
            &upload.bytes,
            self.config.max_file_bytes(),
            allowed,
        )
    }

    /// Stores an upload under a fixed name, validating type and size
    /// against the client-supplied original name first.
    fn store_as(
        &self,
        job: &JobDescriptor,
        upload: &Upload,
        fixed_name: &str,
        allowed: &[&str],
    ) -> Result<PathBuf> {
        if !ingress::has_allowed_extension(&upload.name, allowed) {
            return Err(Error::UnsupportedType {
                name: sanitize_name(&upload.name),
            });
        }
        ingress::store(
            &job.dir,
            fixed_name,
            &upload.bytes,
            self.config.max_file_bytes(),
            allowed,
        )
    }

    fn python(&self, args: Vec<String>) -> Invocation {
        Invocation::python(&self.config.processor_dir, args)
    }
}

/// Run the HTTP server on the given port with the provided state.
pub async fn run_server(port: u16, state: AppState) {
    reaper::spawn(
        state.workspaces.root().to_path_buf(),
        state.config.ttl(),
        state.workspaces.active(),
    );

    // The per-file ceiling lives in ingress; this only bounds the request
    // body as a whole (multi-file endpoints accept several files).
    let body_limit = state.config.max_file_bytes() as usize * 10;
    let cors = cors_layer(&state.config.cors_origin);

    let app = Router::new()
        .route("/health", get(health))
        .route("/download/:job_id/:filename", get(download))
        .route("/merge-pdf", post(merge_pdf))
        .route("/split-pdf", post(split_pdf))
        .route("/compress-pdf", post(compress_pdf))
        .route("/pdf-to-word", post(pdf_to_word))
        .route("/word-to-pdf", post(word_to_pdf))
        .route("/pdf-to-pptx", post(pdf_to_pptx))
        .route("/pptx-to-pdf", post(pptx_to_pdf))
        .route("/pdf-to-excel", post(pdf_to_excel))
        .route("/excel-to-pdf", post(excel_to_pdf))
        .route("/jpg-to-pdf", post(jpg_to_pdf))
        .route("/pdf-to-jpg", post(pdf_to_jpg))
        .route("/rotate-pdf", post(rotate_pdf))
        .route("/unlock-pdf", post(unlock_pdf))
        .route("/protect-pdf", post(protect_pdf))
        .route("/organize-pdf", post(organize_pdf))
        .route("/watermark-pdf", post(watermark_pdf))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}

fn cors_layer(origin: &str) -> CorsLayer {
    if origin == "*" {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }
    match origin.parse::<HeaderValue>() {
        Ok(value) => CorsLayer::new()
            .allow_origin(value)
            .allow_methods(Any)
            .allow_headers(Any),
        Err(_) => {
            warn!(%origin, "invalid CORS origin, allowing any");
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    }
}

async fn health() -> &'static str {
    "OK"
}

/// Resolves a `(job_id, filename)` pair strictly inside that job's
/// workspace. Anything that escapes, or does not exist, is a 404.
fn resolve_download(root: &FsPath, job_id: &str, filename: &str) -> Result<PathBuf> {
    if job_id != sanitize_name(job_id) || filename != sanitize_name(filename) {
        return Err(Error::NotFound);
    }
    // `..` and `.` survive sanitization (dots are allowed characters), so
    // both segments are confined on their canonical paths: the job dir
    // must sit strictly below the work root, the file strictly below the
    // job dir.
    let root = root.canonicalize().map_err(|_| Error::NotFound)?;
    let dir = root.join(job_id).canonicalize().map_err(|_| Error::NotFound)?;
    if !dir.starts_with(&root) || dir == root {
        return Err(Error::NotFound);
    }
    let resolved = dir.join(filename).canonicalize().map_err(|_| Error::NotFound)?;
    if !resolved.starts_with(&dir) || !resolved.is_file() {
        return Err(Error::NotFound);
    }
    Ok(resolved)
}

async fn download(
    State(state): State<AppState>,
    Path((job_id, filename)): Path<(String, String)>,
) -> Result<Response> {
    let path = resolve_download(state.workspaces.root(), &job_id, &filename)?;
    serve_file(&path, &filename).await
}

/// Streams the artifact as an attachment; bundles of page images can be
/// large, so the body is never buffered whole.
async fn serve_file(path: &FsPath, filename: &str) -> Result<Response> {
    let file = tokio::fs::File::open(path).await.map_err(|_| Error::NotFound)?;
    let disposition = format!("attachment; filename=\"{filename}\"");
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}

fn respond(state: &AppState, job: &JobDescriptor, output: &FsPath) -> Json<DownloadResponse> {
    Json(DownloadResponse::new(job, output, state.config.ttl_minutes))
}

async fn merge_pdf(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<DownloadResponse>> {
    let form = Form::read(multipart).await?;
    let files = form.files("files");
    if files.len() < 2 {
        return Err(Error::BadRequest("upload at least two PDF files".into()));
    }
    let mut job = state.workspaces.allocate()?;
    let mut inputs = Vec::new();
    for upload in files {
        inputs.push(state.store(&job, upload, PDF)?);
    }
    let out = job.dir.join("merged.pdf");

    let mut args = vec!["merge".to_string(), "--inputs".to_string()];
    args.extend(inputs.iter().map(|p| path_arg(p)));
    args.push("--output".to_string());
    args.push(path_arg(&out));
    state.run_tool(&state.python(args)).await?;

    job.outputs.push(out.clone());
    Ok(respond(&state, &job, &out))
}

async fn split_pdf(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<DownloadResponse>> {
    let form = Form::read(multipart).await?;
    let upload = form.single_file("files", "a PDF")?;
    let range = form.text("range").trim().to_string();

    let mut job = state.workspaces.allocate()?;
    let input = state.store_as(&job, upload, "input.pdf", PDF)?;
    let out_dir = job.dir.join("split");
    std::fs::create_dir_all(&out_dir)?;

    state
        .run_tool(&state.python(vec![
            "split".to_string(),
            "--input".to_string(),
            path_arg(&input),
            "--ranges".to_string(),
            range,
            "--outdir".to_string(),
            path_arg(&out_dir),
        ]))
        .await?;

    let zip_path = job.dir.join("split.zip");
    let entries = bundle::entries_from_dir(&out_dir)?;
    let dest = zip_path.clone();
    tokio::task::spawn_blocking(move || bundle::bundle(&entries, &dest))
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e)))??;

    job.outputs.push(zip_path.clone());
    Ok(respond(&state, &job, &zip_path))
}

async fn compress_pdf(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<DownloadResponse>> {
    let form = Form::read(multipart).await?;
    let upload = form.single_file("files", "a PDF")?;

    let mut job = state.workspaces.allocate()?;
    let input = state.store_as(&job, upload, "input.pdf", PDF)?;
    let out = job.dir.join("compressed.pdf");

    // Ghostscript first; if it is missing or errors, re-save through the
    // Python processor instead.
    let ghostscript = Invocation::new(
        "gs",
        vec![
            "-sDEVICE=pdfwrite".to_string(),
            "-dCompatibilityLevel=1.4".to_string(),
            "-dPDFSETTINGS=/ebook".to_string(),
            "-dNOPAUSE".to_string(),
            "-dQUIET".to_string(),
            "-dBATCH".to_string(),
            format!("-sOutputFile={}", path_arg(&out)),
            path_arg(&input),
        ],
    );
    let fallback = state.python(vec![
        "compress".to_string(),
        "--input".to_string(),
        path_arg(&input),
        "--output".to_string(),
        path_arg(&out),
    ]);
    state.run_tool_with_fallback(&ghostscript, &fallback).await?;

    job.outputs.push(out.clone());
    Ok(respond(&state, &job, &out))
}

/// Shared shape of the single-input processor conversions
/// (pdf-to-word, pdf-to-pptx, pdf-to-excel).
async fn processor_convert(
    state: AppState,
    multipart: Multipart,
    op: &str,
    output_name: &str,
) -> Result<Json<DownloadResponse>> {
    let form = Form::read(multipart).await?;
    let upload = form.single_file("files", "a PDF")?;

    let mut job = state.workspaces.allocate()?;
    let input = state.store_as(&job, upload, "input.pdf", PDF)?;
    let out = job.dir.join(output_name);

    state
        .run_tool(&state.python(vec![
            op.to_string(),
            "--input".to_string(),
            path_arg(&input),
            "--output".to_string(),
            path_arg(&out),
        ]))
        .await?;

    job.outputs.push(out.clone());
    Ok(respond(&state, &job, &out))
}

/// Shared shape of the LibreOffice conversions (word/pptx/excel to PDF).
/// soffice names the output after the input, so `input.<ext>` comes back
/// as `input.pdf`.
async fn office_to_pdf(
    state: AppState,
    multipart: Multipart,
    ext: &str,
    what: &str,
) -> Result<Json<DownloadResponse>> {
    let form = Form::read(multipart).await?;
    let upload = form.single_file("files", what)?;

    let mut job = state.workspaces.allocate()?;
    let input = state.store_as(&job, upload, &format!("input.{ext}"), &[ext])?;

    state
        .run_tool(&Invocation::new(
            "soffice",
            vec![
                "--headless".to_string(),
                "--convert-to".to_string(),
                "pdf".to_string(),
                "--outdir".to_string(),
                path_arg(&job.dir),
                path_arg(&input),
            ],
        ))
        .await?;

    let out = job.dir.join("input.pdf");
    job.outputs.push(out.clone());
    Ok(respond(&state, &job, &out))
}

async fn pdf_to_word(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<DownloadResponse>> {
    processor_convert(state, multipart, "pdf_to_word", "output.docx").await
}

async fn word_to_pdf(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<DownloadResponse>> {
    office_to_pdf(state, multipart, "docx", "a .docx").await
}

async fn pdf_to_pptx(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<DownloadResponse>> {
    processor_convert(state, multipart, "pdf_to_pptx", "slides.pptx").await
}

async fn pptx_to_pdf(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<DownloadResponse>> {
    office_to_pdf(state, multipart, "pptx", "a .pptx").await
}

async fn pdf_to_excel(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<DownloadResponse>> {
    processor_convert(state, multipart, "pdf_to_excel", "tables.xlsx").await
}

async fn excel_to_pdf(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<DownloadResponse>> {
    office_to_pdf(state, multipart, "xlsx", "an .xlsx").await
}

async fn jpg_to_pdf(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<DownloadResponse>> {
    let form = Form::read(multipart).await?;
    let files = form.files("files");
    if files.is_empty() {
        return Err(Error::BadRequest("upload one or more images".into()));
    }
    let mut job = state.workspaces.allocate()?;
    let mut images = Vec::new();
    for upload in files {
        images.push(state.store(&job, upload, IMAGES)?);
    }
    let out = job.dir.join("images.pdf");

    let mut args = vec!["jpg_to_pdf".to_string(), "--images".to_string()];
    args.extend(images.iter().map(|p| path_arg(p)));
    args.push("--output".to_string());
    args.push(path_arg(&out));
    state.run_tool(&state.python(args)).await?;

    job.outputs.push(out.clone());
    Ok(respond(&state, &job, &out))
}

async fn pdf_to_jpg(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<DownloadResponse>> {
    let form = Form::read(multipart).await?;
    let upload = form.single_file("files", "a PDF")?;

    let mut job = state.workspaces.allocate()?;
    let input = state.store_as(&job, upload, "input.pdf", PDF)?;
    let out_dir = job.dir.join("images");
    std::fs::create_dir_all(&out_dir)?;

    state
        .run_tool(&state.python(vec![
            "pdf_to_jpg".to_string(),
            "--input".to_string(),
            path_arg(&input),
            "--outdir".to_string(),
            path_arg(&out_dir),
        ]))
        .await?;

    let zip_path = job.dir.join("images.zip");
    let entries = bundle::entries_from_dir(&out_dir)?;
    let dest = zip_path.clone();
    tokio::task::spawn_blocking(move || bundle::bundle(&entries, &dest))
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e)))??;

    job.outputs.push(zip_path.clone());
    Ok(respond(&state, &job, &zip_path))
}

async fn rotate_pdf(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<DownloadResponse>> {
    let form = Form::read(multipart).await?;
    let upload = form.single_file("files", "a PDF")?;
    let rotation = match form.text("rotation").trim() {
        "" => "90".to_string(),
        value => value.to_string(),
    };
    let range = form.text("range").trim().to_string();

    let mut job = state.workspaces.allocate()?;
    let input = state.store_as(&job, upload, "input.pdf", PDF)?;
    let out = job.dir.join("rotated.pdf");

    state
        .run_tool(&state.python(vec![
            "rotate".to_string(),
            "--input".to_string(),
            path_arg(&input),
            "--output".to_string(),
            path_arg(&out),
            "--rotation".to_string(),
            rotation,
            "--ranges".to_string(),
            range,
        ]))
        .await?;

    job.outputs.push(out.clone());
    Ok(respond(&state, &job, &out))
}

async fn unlock_pdf(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<DownloadResponse>> {
    let form = Form::read(multipart).await?;
    let upload = form.single_file("files", "a PDF")?;
    let password = form.text("password").to_string();

    let mut job = state.workspaces.allocate()?;
    let input = state.store_as(&job, upload, "input.pdf", PDF)?;
    let out = job.dir.join("unlocked.pdf");

    state
        .run_tool(&state.python(vec![
            "unlock".to_string(),
            "--input".to_string(),
            path_arg(&input),
            "--output".to_string(),
            path_arg(&out),
            "--password".to_string(),
            password,
        ]))
        .await?;

    job.outputs.push(out.clone());
    Ok(respond(&state, &job, &out))
}

async fn protect_pdf(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<DownloadResponse>> {
    let form = Form::read(multipart).await?;
    let upload = form.single_file("files", "a PDF")?;
    let password = form.text("newPassword").to_string();
    if password.is_empty() {
        return Err(Error::BadRequest("upload a PDF and set a password".into()));
    }

    let mut job = state.workspaces.allocate()?;
    let input = state.store_as(&job, upload, "input.pdf", PDF)?;
    let out = job.dir.join("protected.pdf");

    state
        .run_tool(&state.python(vec![
            "protect".to_string(),
            "--input".to_string(),
            path_arg(&input),
            "--output".to_string(),
            path_arg(&out),
            "--password".to_string(),
            password,
        ]))
        .await?;

    job.outputs.push(out.clone());
    Ok(respond(&state, &job, &out))
}

async fn organize_pdf(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<DownloadResponse>> {
    let form = Form::read(multipart).await?;
    let files = form.files("files");
    if files.is_empty() {
        return Err(Error::BadRequest("upload PDFs".into()));
    }
    let order_json = form.text("order").to_string();

    let mut job = state.workspaces.allocate()?;
    let mut pdfs = Vec::new();
    for upload in files {
        pdfs.push(state.store(&job, upload, PDF)?);
    }
    let out = job.dir.join("organized.pdf");

    if pdfs.len() > 1 {
        // Several documents: merge them in the requested order.
        let order: Vec<usize> = serde_json::from_str(&order_json).unwrap_or_default();
        let ordered: Vec<&PathBuf> = if order.len() == pdfs.len()
            && order.iter().all(|&i| i < pdfs.len())
        {
            order.iter().map(|&i| &pdfs[i]).collect()
        } else {
            pdfs.iter().collect()
        };
        let mut args = vec!["merge".to_string(), "--inputs".to_string()];
        args.extend(ordered.iter().map(|p| path_arg(p)));
        args.push("--output".to_string());
        args.push(path_arg(&out));
        state.run_tool(&state.python(args)).await?;
    } else {
        // One document: reorder its pages; the order array is forwarded
        // verbatim for the processor to interpret.
        state
            .run_tool(&state.python(vec![
                "reorder_pages".to_string(),
                "--input".to_string(),
                path_arg(&pdfs[0]),
                "--output".to_string(),
                path_arg(&out),
                "--order".to_string(),
                order_json,
            ]))
            .await?;
    }

    job.outputs.push(out.clone());
    Ok(respond(&state, &job, &out))
}

async fn watermark_pdf(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<DownloadResponse>> {
    let form = Form::read(multipart).await?;
    let upload = form.single_file("files", "a PDF")?;
    let text = form.text("watermarkText").to_string();

    let mut job = state.workspaces.allocate()?;
    let input = state.store_as(&job, upload, "input.pdf", PDF)?;
    let out = job.dir.join("watermarked.pdf");

    if let Some(image) = form.files("watermarkImage").first() {
        let ext = image
            .name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_else(|| "png".to_string());
        let image_path = state.store_as(&job, image, &format!("wm.{ext}"), IMAGES)?;
        state
            .run_tool(&state.python(vec![
                "watermark_image".to_string(),
                "--input".to_string(),
                path_arg(&input),
                "--output".to_string(),
                path_arg(&out),
                "--image".to_string(),
                path_arg(&image_path),
            ]))
            .await?;
    } else {
        state
            .run_tool(&state.python(vec![
                "watermark_text".to_string(),
                "--input".to_string(),
                path_arg(&input),
                "--output".to_string(),
                path_arg(&out),
                "--text".to_string(),
                text,
            ]))
            .await?;
    }

    job.outputs.push(out.clone());
    Ok(respond(&state, &job, &out))
}
