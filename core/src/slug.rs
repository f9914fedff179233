//! Page slug derivation and page field validation.

use crate::errors::{Result, RosterError};

/// Derive the public slug for a page.
///
/// Lowercase ASCII alphanumerics of the customer name are kept, every other
/// run of characters becomes a single `-`, and the area code is appended.
pub fn derive_slug(customer_name: &str, area_code: &str) -> String {
    let mut base = String::with_capacity(customer_name.len());
    let mut pending_dash = false;
    for ch in customer_name.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !base.is_empty() {
                base.push('-');
            }
            pending_dash = false;
            base.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }

    if base.is_empty() {
        format!("page-{area_code}")
    } else {
        format!("{base}-{area_code}")
    }
}

/// Area codes are 4 or 5 ASCII digits.
pub fn validate_area_code(area_code: &str) -> Result<()> {
    let len_ok = (4..=5).contains(&area_code.len());
    if len_ok && area_code.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(RosterError::validation(format!(
            "area code must be 4-5 digits, got {area_code:?}"
        )))
    }
}

pub fn validate_customer_name(customer_name: &str) -> Result<String> {
    let trimmed = customer_name.trim();
    if trimmed.is_empty() {
        return Err(RosterError::validation("customer name must not be empty"));
    }
    Ok(trimmed.to_string())
}

/// Accepts `#RGB` and `#RRGGBB`.
pub fn validate_brand_color(color: &str) -> Result<()> {
    let valid = color
        .strip_prefix('#')
        .is_some_and(|hex| matches!(hex.len(), 3 | 6) && hex.bytes().all(|b| b.is_ascii_hexdigit()));
    if valid {
        Ok(())
    } else {
        Err(RosterError::validation(format!(
            "brand color must be #RGB or #RRGGBB, got {color:?}"
        )))
    }
}
