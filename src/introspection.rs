//! Introspection HTTP endpoint: `GET /`, `/status`, `/configs`, `/logs`.
//!
//! A tiny synchronous HTTP server on its own thread. `/configs` and
//! `/logs` ship zip archives of a directory, and every error path still
//! answers 200 with a JSON `error` field — preserved deliberately for
//! wire compatibility with whatever already polls this endpoint.

use std::io::{Cursor, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tiny_http::{Header, Response, Server};
use tracing::{error, info, warn};
use zip::write::SimpleFileOptions;

use crate::config::TunnelDescriptor;
use crate::status::StatusRegistry;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const VERSION: &str = env!("CARGO_PKG_VERSION");

pub struct IntrospectionConfig {
    pub tunnel_manager_id: String,
    pub inspection_port: u16,
    pub inspection_localhost_only: bool,
    pub tunnel_dirs: PathBuf,
    pub log_path: PathBuf,
    pub descriptors: Vec<TunnelDescriptor>,
}

/// Start the endpoint on a dedicated OS thread. The Supervisor restarts
/// this if the thread dies, per the main poll loop's contract; this
/// function just binds and blocks, returning only on a bind failure.
pub fn spawn(config: Arc<IntrospectionConfig>, status: Arc<StatusRegistry>) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let bind_host = if config.inspection_localhost_only {
            "127.0.0.1"
        } else {
            "0.0.0.0"
        };
        let addr = format!("{bind_host}:{}", config.inspection_port);

        let server = match Server::http(&addr) {
            Ok(server) => server,
            Err(e) => {
                error!(addr = %addr, error = %e, "introspection endpoint failed to bind");
                return;
            }
        };

        info!(addr = %addr, "introspection endpoint listening");

        for request in server.incoming_requests() {
            let url = request.url().to_string();
            let response = handle(&url, &config, &status);
            if let Err(e) = request.respond(response) {
                warn!(error = %e, "failed to write introspection response");
            }
        }
    })
}

fn handle(
    url: &str,
    config: &IntrospectionConfig,
    status: &StatusRegistry,
) -> Response<Cursor<Vec<u8>>> {
    match url {
        "/" => json_response(&json!({
            "status": "ok",
            "version": VERSION,
            "tunnel_manager_id": config.tunnel_manager_id,
        })),
        "/status" => status_response(config, status),
        "/configs" => zip_response(&config.tunnel_dirs, |_| true)
            .unwrap_or_else(|e| error_response(config, &e)),
        "/logs" => zip_response(&config.log_path, |name| name.contains(".log"))
            .unwrap_or_else(|e| error_response(config, &e)),
        _ => error_response(config, "not found"),
    }
}

fn status_response(config: &IntrospectionConfig, status: &StatusRegistry) -> Response<Cursor<Vec<u8>>> {
    let (created_at, mac_address, tunnels) = status.snapshot();

    let mut descriptor_status = serde_json::Map::new();
    for descriptor in &config.descriptors {
        let live = probe_tcp(&descriptor.local_host, descriptor.local_port);
        descriptor_status.insert(
            descriptor.name.clone(),
            json!({
                "remote_host": descriptor.local_host,
                "remote_port": descriptor.local_port,
                "status": if live { "up" } else { "down" },
            }),
        );
    }

    let mut status_data = serde_json::Map::new();
    for (name, stats) in &tunnels {
        status_data.insert(
            name.clone(),
            json!({
                "started_times": stats.started_times,
                "last_start": stats.last_start,
            }),
        );
    }

    json_response(&json!({
        "tunnel_manager_id": config.tunnel_manager_id,
        "created_at": created_at,
        "mac_address": mac_address,
        "status_data": status_data,
        "descriptors": descriptor_status,
    }))
}

fn probe_tcp(host: &str, port: u16) -> bool {
    let Ok(mut addrs) = (host, port).to_socket_addrs() else {
        return false;
    };
    let Some(addr) = addrs.next() else {
        return false;
    };
    TcpStream::connect_timeout(&addr, PROBE_TIMEOUT).is_ok()
}

fn zip_response(
    dir: &Path,
    include: impl Fn(&str) -> bool,
) -> Result<Response<Cursor<Vec<u8>>>, String> {
    let entries = std::fs::read_dir(dir).map_err(|e| format!("cannot read {}: {e}", dir.display()))?;

    let mut buffer = Vec::new();
    {
        let mut writer = zip::ZipWriter::new(Cursor::new(&mut buffer));
        let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if !include(&name) {
                continue;
            }
            let mut contents = Vec::new();
            std::fs::File::open(&path)
                .and_then(|mut f| f.read_to_end(&mut contents))
                .map_err(|e| format!("cannot read {}: {e}", path.display()))?;

            writer
                .start_file(name, options)
                .map_err(|e| format!("zip write failed: {e}"))?;
            writer
                .write_all(&contents)
                .map_err(|e| format!("zip write failed: {e}"))?;
        }
        writer.finish().map_err(|e| format!("zip finalize failed: {e}"))?;
    }

    let header = Header::from_bytes(&b"Content-Type"[..], &b"application/zip"[..])
        .expect("static header is valid");
    Ok(Response::from_data(buffer).with_header(header))
}

fn error_response(config: &IntrospectionConfig, message: &str) -> Response<Cursor<Vec<u8>>> {
    json_response(&json!({
        "error": message,
        "tunnel_manager_id": config.tunnel_manager_id,
    }))
}

fn json_response(body: &serde_json::Value) -> Response<Cursor<Vec<u8>>> {
    let bytes = serde_json::to_vec(body).unwrap_or_else(|_| b"{}".to_vec());
    let header = Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
        .expect("static header is valid");
    Response::from_data(bytes).with_header(header)
}
