//! Per-file checks applied to client uploads before any bytes are stored.

use serde::Serialize;

use super::super::evidence::domain::EvidenceRequest;
use super::super::evidence::templates::REQUEST_WIDE_FORMATS;

/// Why a single file in an upload batch was turned away. Never fatal to the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum FileRejection {
    #[error("file is empty")]
    Empty,
    #[error("file exceeds the {limit_bytes} byte upload limit")]
    TooLarge { limit_bytes: u64 },
    #[error("file has no extension")]
    MissingExtension,
    #[error("`.{extension}` files are not accepted for this request")]
    UnsupportedFormat { extension: String },
    #[error("declared content type `{declared}` is not valid")]
    InvalidMime { declared: String },
    #[error("declared content type `{declared}` does not match a `.{extension}` file")]
    MimeMismatch { declared: String, extension: String },
    #[error("`{item_key}` is not one of the requested items")]
    UnknownItem { item_key: String },
    #[error("upload quota exhausted for this link")]
    QuotaExceeded,
    #[error("file could not be stored")]
    StorageFailed,
}

/// A file that passed validation, with its normalized metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedFile {
    pub extension: String,
    pub mime_type: String,
    pub item_key: Option<String>,
}

/// Lowercased extension of `filename`, if it has one.
pub fn extension_of(filename: &str) -> Option<String> {
    let name = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let (stem, extension) = name.rsplit_once('.')?;
    if stem.is_empty() || extension.is_empty() {
        return None;
    }
    Some(extension.to_ascii_lowercase())
}

/// Check one file against the request checklist and the organization's size limit.
///
/// `item_key` has already been resolved with [`assign_item_key`]; `requested_key` is what the
/// client sent, kept so an unknown key is reported rather than silently dropped.
///
/// [`assign_item_key`]: super::super::evidence::matching::assign_item_key
pub fn validate_file(
    request: &EvidenceRequest,
    filename: &str,
    declared_mime: &str,
    size_bytes: u64,
    requested_key: Option<&str>,
    item_key: Option<String>,
    max_upload_bytes: u64,
) -> Result<AcceptedFile, FileRejection> {
    if let Some(requested) = requested_key.map(str::trim).filter(|key| !key.is_empty()) {
        if item_key.is_none() {
            return Err(FileRejection::UnknownItem {
                item_key: requested.to_string(),
            });
        }
    }
    if size_bytes == 0 {
        return Err(FileRejection::Empty);
    }
    if size_bytes > max_upload_bytes {
        return Err(FileRejection::TooLarge {
            limit_bytes: max_upload_bytes,
        });
    }

    let extension = extension_of(filename).ok_or(FileRejection::MissingExtension)?;
    let accepted = match item_key.as_deref().and_then(|key| request.item(key)) {
        Some(item) => item
            .accepted_formats
            .iter()
            .any(|format| format.eq_ignore_ascii_case(&extension)),
        None => REQUEST_WIDE_FORMATS.contains(&extension.as_str()),
    };
    if !accepted {
        return Err(FileRejection::UnsupportedFormat { extension });
    }

    let mime_type = check_mime(declared_mime, &extension)?;
    Ok(AcceptedFile {
        extension,
        mime_type,
        item_key,
    })
}

/// The declared type must parse and agree with what the extension implies. Clients that send
/// `application/octet-stream` or nothing get the guessed type.
fn check_mime(declared: &str, extension: &str) -> Result<String, FileRejection> {
    let guessed = mime_guess::from_ext(extension).first();
    let declared = declared.trim();
    if declared.is_empty() {
        return Ok(guessed
            .map(|mime| mime.essence_str().to_string())
            .unwrap_or_else(|| mime::APPLICATION_OCTET_STREAM.to_string()));
    }

    let parsed: mime::Mime = declared
        .parse()
        .map_err(|_| FileRejection::InvalidMime {
            declared: declared.to_string(),
        })?;
    if parsed.essence_str() == mime::APPLICATION_OCTET_STREAM.essence_str() {
        return Ok(guessed
            .map(|mime| mime.essence_str().to_string())
            .unwrap_or_else(|| parsed.essence_str().to_string()));
    }

    let agrees = mime_guess::from_ext(extension)
        .iter()
        .any(|candidate| candidate.essence_str() == parsed.essence_str());
    if !agrees {
        return Err(FileRejection::MimeMismatch {
            declared: parsed.essence_str().to_string(),
            extension: extension.to_string(),
        });
    }
    Ok(parsed.essence_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::review::domain::{ClientId, EvidenceRequestId};
    use crate::workflows::review::evidence::domain::{EvidenceRequestStatus, RequestType};
    use crate::workflows::review::evidence::templates::requested_items;
    use chrono::Utc;

    const LIMIT: u64 = 1024;

    fn request(request_type: RequestType) -> EvidenceRequest {
        let now = Utc::now();
        EvidenceRequest {
            id: EvidenceRequestId::from("evr-1"),
            client_id: ClientId::from("cli-1"),
            tax_year: 2024,
            request_type,
            status: EvidenceRequestStatus::Sent,
            title: "title".to_string(),
            reason: "reason".to_string(),
            requested_items: requested_items(request_type),
            email_draft: String::new(),
            email_sent_at: Some(now),
            linked_finding_ids: Vec::new(),
            due_date: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn extension_is_lowercased_and_requires_a_stem() {
        assert_eq!(extension_of("Contract.PDF").as_deref(), Some("pdf"));
        assert_eq!(extension_of("dir.v2/report.xlsx").as_deref(), Some("xlsx"));
        assert_eq!(extension_of(".pdf"), None);
        assert_eq!(extension_of("README"), None);
    }

    #[test]
    fn accepts_pdf_for_contract_item() {
        let req = request(RequestType::VendorContract);
        let accepted = validate_file(
            &req,
            "contract.pdf",
            "application/pdf",
            100,
            Some("signed_contract"),
            Some("signed_contract".to_string()),
            LIMIT,
        )
        .expect("pdf is accepted");
        assert_eq!(accepted.mime_type, "application/pdf");
        assert_eq!(accepted.item_key.as_deref(), Some("signed_contract"));
    }

    #[test]
    fn rejects_formats_the_item_does_not_accept() {
        let req = request(RequestType::VendorContract);
        let rejection = validate_file(
            &req,
            "contract.csv",
            "text/csv",
            100,
            None,
            Some("signed_contract".to_string()),
            LIMIT,
        )
        .unwrap_err();
        assert_eq!(
            rejection,
            FileRejection::UnsupportedFormat {
                extension: "csv".to_string()
            }
        );

        let unmatched = validate_file(&req, "tool.exe", "", 100, None, None, LIMIT).unwrap_err();
        assert!(matches!(unmatched, FileRejection::UnsupportedFormat { .. }));
    }

    #[test]
    fn rejects_mismatched_or_malformed_mime() {
        let req = request(RequestType::General);
        let key = Some("supporting_document".to_string());
        assert!(matches!(
            validate_file(&req, "a.pdf", "image/png", 10, None, key.clone(), LIMIT),
            Err(FileRejection::MimeMismatch { .. })
        ));
        assert!(matches!(
            validate_file(&req, "a.pdf", "not a mime", 10, None, key.clone(), LIMIT),
            Err(FileRejection::InvalidMime { .. })
        ));
        let octet = validate_file(
            &req,
            "a.pdf",
            "application/octet-stream",
            10,
            None,
            key,
            LIMIT,
        )
        .expect("octet-stream falls back to the guessed type");
        assert_eq!(octet.mime_type, "application/pdf");
    }

    #[test]
    fn enforces_size_and_known_item() {
        let req = request(RequestType::General);
        assert_eq!(
            validate_file(&req, "a.pdf", "application/pdf", 0, None, None, LIMIT),
            Err(FileRejection::Empty)
        );
        assert_eq!(
            validate_file(&req, "a.pdf", "application/pdf", LIMIT + 1, None, None, LIMIT),
            Err(FileRejection::TooLarge { limit_bytes: LIMIT })
        );
        assert_eq!(
            validate_file(&req, "a.pdf", "application/pdf", 10, Some("w9"), None, LIMIT),
            Err(FileRejection::UnknownItem {
                item_key: "w9".to_string()
            })
        );
    }
}
