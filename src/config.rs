use std::{env, net::SocketAddr, path::PathBuf};

use anyhow::Result;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub upload_root: PathBuf,
    pub output_root: PathBuf,
    pub engine_path: PathBuf,
    pub worker_count: usize,
    pub queue_capacity: usize,
    pub max_file_age_hours: u64,
    pub max_upload_bytes: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let bind_raw =
            env::var("PDF_CONVERT_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
        let bind_normalized = bind_raw
            .trim()
            .trim_matches('"')
            .trim_matches('\'')
            .to_string();
        let bind_addr = bind_normalized
            .parse::<SocketAddr>()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 8080)));

        let upload_root = PathBuf::from(
            env::var("PDF_CONVERT_UPLOAD_ROOT").unwrap_or_else(|_| "uploads".to_string()),
        );

        let output_root = PathBuf::from(
            env::var("PDF_CONVERT_OUTPUT_ROOT").unwrap_or_else(|_| "output_images".to_string()),
        );

        let engine_path = PathBuf::from(
            env::var("PDF_CONVERT_ENGINE_PATH").unwrap_or_else(|_| "./pdf_to_images".to_string()),
        );

        let worker_count = env::var("PDF_CONVERT_WORKER_COUNT")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|&n| n > 0)
            .unwrap_or(4);

        let queue_capacity = env::var("PDF_CONVERT_QUEUE_CAPACITY")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|&n| n > 0)
            .unwrap_or(128);

        let max_file_age_hours = env::var("PDF_CONVERT_MAX_FILE_AGE_HOURS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(24);

        let max_upload_bytes = env::var("PDF_CONVERT_MAX_UPLOAD_BYTES")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(50 * 1024 * 1024);

        Ok(Self {
            bind_addr,
            upload_root,
            output_root,
            engine_path,
            worker_count,
            queue_capacity,
            max_file_age_hours,
            max_upload_bytes,
        })
    }
}
