//! Deciding which requested items an upload satisfies.
//!
//! An item is satisfied by any non-rejected file carrying its exact `item_key`. Uploads that
//! name no item are assigned to the request's only item, or failing that its only required
//! item; otherwise they count as received files but satisfy nothing.

use super::domain::{EvidenceFile, EvidenceFileStatus, EvidenceRequest, EvidenceRequestStatus};

pub fn assign_item_key(request: &EvidenceRequest, requested: Option<&str>) -> Option<String> {
    match requested.map(str::trim).filter(|key| !key.is_empty()) {
        Some(key) => request.item(key).map(|item| item.item_key.clone()),
        None if request.requested_items.len() == 1 => {
            Some(request.requested_items[0].item_key.clone())
        }
        None => {
            let mut required = request.required_items();
            match (required.next(), required.next()) {
                (Some(item), None) => Some(item.item_key.clone()),
                _ => None,
            }
        }
    }
}

fn counts(file: &EvidenceFile) -> bool {
    file.status != EvidenceFileStatus::Rejected
}

pub fn item_satisfied(item_key: &str, files: &[EvidenceFile]) -> bool {
    files
        .iter()
        .any(|file| counts(file) && file.item_key.as_deref() == Some(item_key))
}

/// Required item keys with no matching file, in checklist order.
pub fn missing_required_items(request: &EvidenceRequest, files: &[EvidenceFile]) -> Vec<String> {
    request
        .required_items()
        .filter(|item| !item_satisfied(&item.item_key, files))
        .map(|item| item.item_key.clone())
        .collect()
}

/// Status implied by the files on hand, never behind the current status.
pub fn status_after_upload(
    request: &EvidenceRequest,
    files: &[EvidenceFile],
) -> EvidenceRequestStatus {
    let current = request.status;
    if !current.accepts_uploads() {
        return current;
    }

    let required = request.required_items().count();
    let missing = missing_required_items(request, files).len();
    let any_files = files.iter().any(counts);

    let computed = if required == 0 {
        if any_files {
            EvidenceRequestStatus::Received
        } else {
            current
        }
    } else if missing == 0 {
        EvidenceRequestStatus::Received
    } else if missing < required {
        EvidenceRequestStatus::PartiallyReceived
    } else {
        current
    };

    if current.can_advance_to(computed) {
        computed
    } else {
        current
    }
}

/// Share of required items satisfied, 0–100. Requests with no required items count as covered
/// once any file arrives.
pub fn coverage_pct(request: &EvidenceRequest, files: &[EvidenceFile]) -> f64 {
    let required = request.required_items().count();
    if required == 0 {
        return if files.iter().any(counts) { 100.0 } else { 0.0 };
    }
    let satisfied = required - missing_required_items(request, files).len();
    satisfied as f64 / required as f64 * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::review::domain::{ClientId, EvidenceFileId, EvidenceRequestId};
    use crate::workflows::review::evidence::domain::{RequestType, UploadChannel};
    use crate::workflows::review::evidence::templates::requested_items;
    use chrono::Utc;

    fn request(request_type: RequestType, status: EvidenceRequestStatus) -> EvidenceRequest {
        let now = Utc::now();
        EvidenceRequest {
            id: EvidenceRequestId::from("evr-1"),
            client_id: ClientId::from("cli-1"),
            tax_year: 2024,
            request_type,
            status,
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

    fn file(item_key: Option<&str>, status: EvidenceFileStatus) -> EvidenceFile {
        EvidenceFile {
            id: EvidenceFileId::generate(),
            request_id: EvidenceRequestId::from("evr-1"),
            original_filename: "doc.pdf".to_string(),
            mime_type: "application/pdf".to_string(),
            size_bytes: 10,
            status,
            uploaded_via: UploadChannel::ClientLink,
            item_key: item_key.map(str::to_string),
            finding_id: None,
            storage_key: "blob".to_string(),
            rejection_reason: None,
            uploaded_at: Utc::now(),
        }
    }

    #[test]
    fn unkeyed_upload_goes_to_the_only_item_or_only_required_item() {
        let single = request(RequestType::General, EvidenceRequestStatus::Sent);
        assert_eq!(
            assign_item_key(&single, None).as_deref(),
            Some("supporting_document")
        );

        let vendor = request(RequestType::VendorContract, EvidenceRequestStatus::Sent);
        assert_eq!(
            assign_item_key(&vendor, None).as_deref(),
            Some("signed_contract")
        );

        let multi = request(RequestType::PayrollSupport, EvidenceRequestStatus::Sent);
        assert_eq!(assign_item_key(&multi, None), None);
        assert_eq!(
            assign_item_key(&multi, Some("w2_forms")).as_deref(),
            Some("w2_forms")
        );
        assert_eq!(assign_item_key(&multi, Some("unknown")), None);
    }

    #[test]
    fn status_advances_partial_then_received() {
        let req = request(RequestType::PayrollSupport, EvidenceRequestStatus::Sent);
        let mut files = vec![file(None, EvidenceFileStatus::Uploaded)];
        assert_eq!(status_after_upload(&req, &files), EvidenceRequestStatus::Sent);

        files.push(file(Some("w2_forms"), EvidenceFileStatus::Uploaded));
        assert_eq!(
            status_after_upload(&req, &files),
            EvidenceRequestStatus::PartiallyReceived
        );

        files.push(file(Some("payroll_register"), EvidenceFileStatus::Linked));
        assert_eq!(
            status_after_upload(&req, &files),
            EvidenceRequestStatus::Received
        );
        assert_eq!(coverage_pct(&req, &files), 100.0);
    }

    #[test]
    fn rejected_files_do_not_satisfy_items_and_status_never_regresses() {
        let req = request(RequestType::PayrollSupport, EvidenceRequestStatus::Received);
        let files = vec![file(Some("w2_forms"), EvidenceFileStatus::Rejected)];
        assert_eq!(
            missing_required_items(&req, &files),
            vec!["w2_forms".to_string(), "payroll_register".to_string()]
        );
        assert_eq!(
            status_after_upload(&req, &files),
            EvidenceRequestStatus::Received
        );
        assert_eq!(coverage_pct(&req, &files), 0.0);
    }
}
