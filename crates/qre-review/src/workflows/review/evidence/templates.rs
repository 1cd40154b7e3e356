use std::fmt::Write as _;

use chrono::NaiveDate;

use super::domain::{RequestType, RequestedItem};

/// Formats accepted anywhere on a request when an upload does not match a specific item.
pub const REQUEST_WIDE_FORMATS: &[&str] = &[
    "pdf", "png", "jpg", "jpeg", "csv", "xlsx", "xls", "docx", "doc", "txt",
];

const DOCUMENT_FORMATS: &[&str] = &["pdf", "docx", "doc", "png", "jpg", "jpeg"];
const SPREADSHEET_FORMATS: &[&str] = &["xlsx", "xls", "csv", "pdf"];

/// Rule id prefixes mapped to the request category that gathers their evidence.
const RULE_PREFIX_CATEGORIES: &[(&str, RequestType)] = &[
    ("vendor_", RequestType::VendorContract),
    ("contractor_", RequestType::VendorContract),
    ("wage_", RequestType::PayrollSupport),
    ("payroll_", RequestType::PayrollSupport),
    ("allocation_", RequestType::TimeAllocation),
    ("time_", RequestType::TimeAllocation),
    ("large_tx", RequestType::ExpenseSupport),
    ("supply_", RequestType::ExpenseSupport),
];

/// Infer the request category from the rule that produced a finding.
pub fn infer_request_type(rule_id: &str) -> RequestType {
    RULE_PREFIX_CATEGORIES
        .iter()
        .find(|(prefix, _)| rule_id.starts_with(prefix))
        .map(|(_, request_type)| *request_type)
        .unwrap_or(RequestType::General)
}

fn item(
    key: &str,
    label: &str,
    required: bool,
    formats: &[&str],
    description: &str,
) -> RequestedItem {
    RequestedItem {
        item_key: key.to_string(),
        label: label.to_string(),
        required,
        accepted_formats: formats.iter().map(|format| format.to_string()).collect(),
        description: description.to_string(),
    }
}

/// Checklist sent to the client for a request category.
pub fn requested_items(request_type: RequestType) -> Vec<RequestedItem> {
    match request_type {
        RequestType::VendorContract => vec![
            item(
                "signed_contract",
                "Signed contract or statement of work",
                true,
                DOCUMENT_FORMATS,
                "Executed agreement covering the research services performed.",
            ),
            item(
                "vendor_invoices",
                "Vendor invoices",
                false,
                SPREADSHEET_FORMATS,
                "Invoices or payment ledger for the tax year.",
            ),
            item(
                "form_1099",
                "Form 1099-NEC",
                false,
                &["pdf"],
                "1099 issued to the vendor, if applicable.",
            ),
        ],
        RequestType::PayrollSupport => vec![
            item(
                "w2_forms",
                "Form W-2",
                true,
                &["pdf"],
                "W-2 for each employee listed in the request.",
            ),
            item(
                "payroll_register",
                "Payroll register",
                true,
                SPREADSHEET_FORMATS,
                "Year-end payroll register showing gross wages.",
            ),
        ],
        RequestType::TimeAllocation => vec![
            item(
                "time_records",
                "Time-tracking records",
                true,
                SPREADSHEET_FORMATS,
                "Timesheets or project time exports for the tax year.",
            ),
            item(
                "project_list",
                "Project list",
                false,
                SPREADSHEET_FORMATS,
                "Projects the employee contributed to.",
            ),
        ],
        RequestType::ExpenseSupport => vec![
            item(
                "invoice",
                "Invoice",
                true,
                DOCUMENT_FORMATS,
                "Invoice for the flagged transaction.",
            ),
            item(
                "proof_of_payment",
                "Proof of payment",
                false,
                DOCUMENT_FORMATS,
                "Bank statement or receipt showing payment.",
            ),
        ],
        RequestType::General => vec![item(
            "supporting_document",
            "Supporting documentation",
            true,
            REQUEST_WIDE_FORMATS,
            "Any document that supports the flagged item.",
        )],
    }
}

pub fn default_title(request_type: RequestType, tax_year: i32) -> String {
    let subject = match request_type {
        RequestType::VendorContract => "Vendor contract documentation",
        RequestType::PayrollSupport => "Payroll support",
        RequestType::TimeAllocation => "Time allocation records",
        RequestType::ExpenseSupport => "Expense support",
        RequestType::General => "Supporting documentation",
    };
    format!("{subject} for tax year {tax_year}")
}

/// Plain-text email the reviewer can edit before sending.
pub fn email_draft(
    client_name: &str,
    title: &str,
    reason: &str,
    items: &[RequestedItem],
    due_date: Option<NaiveDate>,
) -> String {
    let mut body = String::new();
    let _ = writeln!(body, "Hello {client_name},");
    let _ = writeln!(body);
    let _ = writeln!(
        body,
        "As part of your research credit study we need a few documents: {title}."
    );
    if !reason.trim().is_empty() {
        let _ = writeln!(body, "Reason: {}", reason.trim());
    }
    let _ = writeln!(body);
    let _ = writeln!(body, "Please upload the following:");
    for item in items {
        let marker = if item.required { "required" } else { "optional" };
        let _ = writeln!(
            body,
            "- {} ({marker}; {})",
            item.label,
            item.accepted_formats.join(", ")
        );
    }
    let _ = writeln!(body);
    if let Some(due) = due_date {
        let _ = writeln!(body, "Please upload by {}.", due.format("%B %-d, %Y"));
    }
    let _ = writeln!(
        body,
        "Use the secure upload link below; no account is required."
    );
    let _ = writeln!(body);
    let _ = write!(body, "Thank you.");
    body
}
