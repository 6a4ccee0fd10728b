use crate::state::SharedState;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, Response, StatusCode},
};
use std::path::PathBuf;
use tokio::fs::File;
use tokio_util::io::ReaderStream;

pub async fn serve_output_file(
    State(state): State<SharedState>,
    Path(file_name): Path<String>,
) -> Result<Response<Body>, (StatusCode, String)> {
    // 1. Reject anything that is not a plain file name (the router decodes
    //    percent-escapes before we see the value)
    if file_name.contains('/') || file_name.contains('\\') || file_name.contains("..") {
        return Err((StatusCode::NOT_FOUND, "File not found".to_string()));
    }

    // 2. Construct the file path inside the configured output directory
    let mut file_path = PathBuf::from(&state.config.stream.output_dir);
    file_path.push(&file_name);

    // 3. Open the file for reading
    let file = File::open(&file_path)
        .await
        .map_err(|_| (StatusCode::NOT_FOUND, "File not found".to_string()))?;

    // 4. Determine the Content-Type; playlists and segments get the media
    //    types HLS players expect
    let content_type = content_type_for(&file_name);

    // Create a stream from the file
    let stream = ReaderStream::new(file);
    let body = Body::from_stream(stream);

    // Return the response with appropriate headers and the file content
    Ok(Response::builder()
        .header(header::CONTENT_TYPE, content_type)
        .body(body)
        .unwrap())
}

fn content_type_for(file_name: &str) -> String {
    if file_name.ends_with(".m3u8") {
        "application/vnd.apple.mpegurl".to_string()
    } else if file_name.ends_with(".ts") {
        "video/mp2t".to_string()
    } else {
        mime_guess::from_path(file_name)
            .first_or_octet_stream()
            .to_string()
    }
}
