use crate::domain::models::CostCategory;

const ALLOWED_CONTENT_TYPES: [&str; 5] = [
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/webp",
    "application/pdf",
];

/// Expense-category requests need a usage date before they can be recorded;
/// the issue date of the resulting accounting deal is derived from it.
pub fn usage_date_required(category: CostCategory, has_usage_date: bool) -> Result<(), String> {
    if category.is_expense() && !has_usage_date {
        return Err("usage date is required for expense requests".to_string());
    }
    Ok(())
}

pub fn validate_upload(content_type: &str, size: u64, max_bytes: u64) -> Result<(), String> {
    if !ALLOWED_CONTENT_TYPES.contains(&content_type) {
        return Err(format!("unsupported file type: {content_type}"));
    }
    if size > max_bytes {
        return Err(format!(
            "file exceeds the {} MiB upload limit",
            max_bytes / (1024 * 1024)
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEN_MIB: u64 = 10 * 1024 * 1024;

    #[test]
    fn expense_without_usage_date_is_rejected() {
        assert!(usage_date_required(CostCategory::Expense, false).is_err());
        assert!(usage_date_required(CostCategory::ExpenseBillable, false).is_err());
        assert!(usage_date_required(CostCategory::Expense, true).is_ok());
        assert!(usage_date_required(CostCategory::Sga, false).is_ok());
        assert!(usage_date_required(CostCategory::SgaBillable, false).is_ok());
    }

    #[test]
    fn upload_type_whitelist() {
        assert!(validate_upload("application/pdf", 1024, TEN_MIB).is_ok());
        assert!(validate_upload("image/webp", 1024, TEN_MIB).is_ok());
        assert!(validate_upload("text/html", 1024, TEN_MIB).is_err());
        assert!(validate_upload("application/zip", 1024, TEN_MIB).is_err());
    }

    #[test]
    fn upload_size_limit() {
        assert!(validate_upload("image/png", TEN_MIB, TEN_MIB).is_ok());
        assert!(validate_upload("image/png", TEN_MIB + 1, TEN_MIB).is_err());
    }
}
