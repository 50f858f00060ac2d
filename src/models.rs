use std::{collections::HashMap, path::PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Jpeg,
    Png,
    Tiff,
}

impl ImageFormat {
    /// `jpg` is accepted as an alias and normalized to `jpeg`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "jpeg" | "jpg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "tiff" => Some(Self::Tiff),
            _ => None,
        }
    }

    pub fn as_flag(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpeg",
            Self::Png => "png",
            Self::Tiff => "tiff",
        }
    }
}

#[derive(Debug, Error)]
#[error("{message}")]
pub struct ValidationError {
    pub message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertOptions {
    pub format: ImageFormat,
    pub threads: u32,
    pub dpi: u32,
    pub quality: u32,
    pub grayscale: bool,
    pub size: Option<String>,
    pub prefix: Option<String>,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            format: ImageFormat::Jpeg,
            threads: 4,
            dpi: 300,
            quality: 100,
            grayscale: false,
            size: None,
            prefix: None,
        }
    }
}

impl ConvertOptions {
    /// Builds options from the raw text fields of a submission. Numeric
    /// bounds are left to the conversion engine; only the shape is checked.
    pub fn from_fields(fields: &HashMap<String, String>) -> Result<Self, ValidationError> {
        let defaults = Self::default();

        let format = match fields.get("format") {
            Some(raw) => ImageFormat::parse(raw)
                .ok_or_else(|| ValidationError::new(format!("unsupported output format: {raw}")))?,
            None => defaults.format,
        };

        let threads = parse_field(fields, "threads", defaults.threads)?;
        let dpi = parse_field(fields, "dpi", defaults.dpi)?;
        let quality = parse_field(fields, "quality", defaults.quality)?;

        let grayscale = fields
            .get("grayscale")
            .map(|v| {
                matches!(
                    v.trim().to_ascii_lowercase().as_str(),
                    "1" | "true" | "yes" | "on"
                )
            })
            .unwrap_or(false);

        let size = fields
            .get("size")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        let prefix = fields
            .get("prefix")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        Ok(Self {
            format,
            threads,
            dpi,
            quality,
            grayscale,
            size,
            prefix,
        })
    }
}

fn parse_field(
    fields: &HashMap<String, String>,
    name: &str,
    default: u32,
) -> Result<u32, ValidationError> {
    match fields.get(name) {
        Some(raw) => raw
            .trim()
            .parse::<u32>()
            .map_err(|_| ValidationError::new(format!("invalid value for {name}: {raw}"))),
        None => Ok(default),
    }
}

#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub input_path: PathBuf,
    pub output_dir: PathBuf,
    pub options: ConvertOptions,
}

#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub task_id: String,
    pub source_filename: String,
    pub status: TaskState,
    pub created_at: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub success: Option<bool>,
    pub archive_name: Option<String>,
    pub error: Option<String>,
    pub log: Option<String>,
    pub request: Option<ConversionRequest>,
}

impl TaskRecord {
    pub fn new(
        task_id: String,
        source_filename: String,
        request: ConversionRequest,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id,
            source_filename,
            status: TaskState::Queued,
            created_at: now,
            start_time: None,
            end_time: None,
            success: None,
            archive_name: None,
            error: None,
            log: None,
            request: Some(request),
        }
    }

    pub fn complete(&mut self, archive_name: String, log: String, now: DateTime<Utc>) {
        debug_assert!(!self.status.is_terminal());
        self.status = TaskState::Completed;
        self.end_time = Some(now);
        self.success = Some(true);
        self.archive_name = Some(archive_name);
        self.log = Some(log);
        self.error = None;
        self.request = None;
    }

    pub fn fail(&mut self, error: String, log: String, now: DateTime<Utc>) {
        debug_assert!(!self.status.is_terminal());
        self.status = TaskState::Failed;
        self.end_time = Some(now);
        self.success = Some(false);
        self.error = Some(error);
        self.log = Some(log);
        self.archive_name = None;
        self.request = None;
    }

    pub fn to_response(&self) -> TaskStatusResponse {
        TaskStatusResponse {
            task_id: self.task_id.clone(),
            status: self.status,
            filename: self.source_filename.clone(),
            start_time: self.start_time,
            end_time: self.end_time,
            download_url: self
                .archive_name
                .as_ref()
                .map(|name| format!("/download/{name}")),
            error: self.error.clone(),
            log: self.log.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatusResponse {
    pub task_id: String,
    pub status: TaskState,
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAcceptedResponse {
    pub task_id: String,
    pub status: TaskState,
    pub status_url: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn sample_request() -> ConversionRequest {
        ConversionRequest {
            input_path: PathBuf::from("uploads/report.pdf"),
            output_dir: PathBuf::from("output_images/report_20250101000000_abc123"),
            options: ConvertOptions::default(),
        }
    }

    #[test]
    fn jpg_is_normalized_to_jpeg() {
        assert_eq!(ImageFormat::parse("jpg"), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::parse("JPG"), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::Jpeg.as_flag(), "jpeg");
    }

    #[test]
    fn unknown_format_is_rejected() {
        assert_eq!(ImageFormat::parse("bmp"), None);
        let err = ConvertOptions::from_fields(&fields(&[("format", "bmp")]));
        assert!(err.is_err());
    }

    #[test]
    fn options_default_when_fields_absent() {
        let options = ConvertOptions::from_fields(&HashMap::new()).expect("defaults");
        assert_eq!(options, ConvertOptions::default());
    }

    #[test]
    fn malformed_threads_is_a_validation_error() {
        let err = ConvertOptions::from_fields(&fields(&[("threads", "many")]));
        assert!(err.is_err());
    }

    #[test]
    fn empty_size_and_prefix_are_dropped() {
        let options =
            ConvertOptions::from_fields(&fields(&[("size", "  "), ("prefix", "")])).expect("parse");
        assert_eq!(options.size, None);
        assert_eq!(options.prefix, None);
    }

    #[test]
    fn grayscale_accepts_common_truthy_values() {
        for raw in ["1", "true", "YES", "on"] {
            let options =
                ConvertOptions::from_fields(&fields(&[("grayscale", raw)])).expect("parse");
            assert!(options.grayscale, "expected {raw} to enable grayscale");
        }
        let options = ConvertOptions::from_fields(&fields(&[("grayscale", "no")])).expect("parse");
        assert!(!options.grayscale);
    }

    #[test]
    fn completed_record_has_archive_and_end_time() {
        let now = Utc::now();
        let mut record =
            TaskRecord::new("report_1".into(), "report.pdf".into(), sample_request(), now);
        record.complete("report_1.zip".into(), "rendered 3 pages".into(), now);

        assert_eq!(record.status, TaskState::Completed);
        assert_eq!(record.success, Some(true));
        assert_eq!(record.archive_name.as_deref(), Some("report_1.zip"));
        assert_eq!(record.error, None);
        assert!(record.end_time.is_some());
        assert!(record.request.is_none());
    }

    #[test]
    fn failed_record_has_error_and_no_archive() {
        let now = Utc::now();
        let mut record =
            TaskRecord::new("report_1".into(), "report.pdf".into(), sample_request(), now);
        record.fail("engine exited with 2".into(), "corrupt file".into(), now);

        assert_eq!(record.status, TaskState::Failed);
        assert_eq!(record.success, Some(false));
        assert_eq!(record.archive_name, None);
        assert!(record.error.is_some());
        assert!(record.end_time.is_some());
    }

    #[test]
    fn terminal_response_is_stable_across_calls() {
        let now = Utc::now();
        let mut record =
            TaskRecord::new("report_1".into(), "report.pdf".into(), sample_request(), now);
        record.complete("report_1.zip".into(), "done".into(), now);

        assert_eq!(record.to_response(), record.to_response());
        assert_eq!(
            record.to_response().download_url.as_deref(),
            Some("/download/report_1.zip")
        );
    }
}
