//! Input validation for API requests.
//!
//! Validators return `Err(message)` for the caller to attach to a field via
//! `ValidationErrorBuilder`. Validators that normalize (phone, admission and
//! staff numbers, email) return the normalized value.

use lazy_static::lazy_static;
use regex::Regex;

use crate::identity::normalize_phone;

lazy_static! {
    /// Loose email shape check; delivery is not verified here
    static ref EMAIL_REGEX: Regex = Regex::new(
        r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9-]+(\.[A-Za-z0-9-]+)*\.[A-Za-z]{2,}$"
    ).unwrap();

    /// Admission numbers: ADM followed by letters, digits, dashes or slashes
    static ref ADMISSION_NUMBER_REGEX: Regex = Regex::new(
        r"^ADM[A-Z0-9/-]{1,29}$"
    ).unwrap();

    /// Staff numbers: letters, digits and dashes, not starting with ADM
    static ref STAFF_NUMBER_REGEX: Regex = Regex::new(
        r"^[A-Z0-9][A-Z0-9-]{1,29}$"
    ).unwrap();

    static ref PIN_REGEX: Regex = Regex::new(r"^\d{4,6}$").unwrap();
}

/// Validate a person's full name
pub fn validate_full_name(name: &str) -> Result<(), String> {
    let name = name.trim();
    if name.is_empty() {
        return Err("Name is required".to_string());
    }

    if name.chars().count() < 2 {
        return Err("Name is too short (min 2 characters)".to_string());
    }

    if name.chars().count() > 120 {
        return Err("Name is too long (max 120 characters)".to_string());
    }

    Ok(())
}

/// Validate a school name
pub fn validate_school_name(name: &str) -> Result<(), String> {
    let name = name.trim();
    if name.is_empty() {
        return Err("School name is required".to_string());
    }

    if name.chars().count() > 200 {
        return Err("School name is too long (max 200 characters)".to_string());
    }

    Ok(())
}

/// Validate an email address and return it lowercased
pub fn validate_email(email: &str) -> Result<String, String> {
    let email = email.trim();
    if email.is_empty() {
        return Err("Email is required".to_string());
    }

    if email.len() > 254 {
        return Err("Email is too long (max 254 characters)".to_string());
    }

    if !EMAIL_REGEX.is_match(email) {
        return Err("Invalid email address".to_string());
    }

    Ok(email.to_lowercase())
}

/// Validate a staff login email. Emails starting with `adm` would be read
/// as admission numbers at login, so they are refused.
pub fn validate_staff_email(email: &str) -> Result<String, String> {
    let email = validate_email(email)?;
    if email.to_uppercase().starts_with("ADM") {
        return Err(
            "Staff email cannot start with \"adm\"; it would sign in as an admission number"
                .to_string(),
        );
    }

    Ok(email)
}

/// Validate a phone number and return it in `254XXXXXXXXX` form
pub fn validate_phone(phone: &str) -> Result<String, String> {
    if phone.trim().is_empty() {
        return Err("Phone number is required".to_string());
    }

    normalize_phone(phone)
        .ok_or_else(|| "Invalid phone number. Use 07XXXXXXXX or 2547XXXXXXXX".to_string())
}

/// Validate an admission number and return it uppercased
pub fn validate_admission_number(adm: &str) -> Result<String, String> {
    let adm = adm.trim().to_uppercase();
    if adm.is_empty() {
        return Err("Admission number is required".to_string());
    }

    if !adm.starts_with("ADM") {
        return Err("Admission number must start with ADM".to_string());
    }

    if !ADMISSION_NUMBER_REGEX.is_match(&adm) {
        return Err(
            "Admission number may only contain letters, digits, dashes and slashes".to_string(),
        );
    }

    Ok(adm)
}

/// Validate a staff number and return it uppercased
pub fn validate_staff_number(number: &str) -> Result<String, String> {
    let number = number.trim().to_uppercase();
    if number.is_empty() {
        return Err("Staff number is required".to_string());
    }

    // Would be classified as an admission number at login
    if number.starts_with("ADM") {
        return Err("Staff number cannot start with ADM".to_string());
    }

    // Would be classified as a phone number at login
    if normalize_phone(&number).is_some() {
        return Err("Staff number cannot look like a phone number".to_string());
    }

    if !STAFF_NUMBER_REGEX.is_match(&number) {
        return Err("Staff number must be 2-30 letters, digits or dashes".to_string());
    }

    Ok(number)
}

/// Validate password strength
pub fn validate_password(password: &str) -> Result<(), String> {
    if password.len() < 8 {
        return Err("Password must be at least 8 characters".to_string());
    }

    if password.len() > 128 {
        return Err("Password is too long (max 128 characters)".to_string());
    }

    if !password.chars().any(|c| c.is_alphabetic()) {
        return Err("Password must contain at least one letter".to_string());
    }

    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err("Password must contain at least one digit".to_string());
    }

    Ok(())
}

/// Validate a student PIN (4-6 digits)
pub fn validate_pin(pin: &str) -> Result<(), String> {
    if !PIN_REGEX.is_match(pin) {
        return Err("PIN must be 4 to 6 digits".to_string());
    }

    // Reject trivially guessable PINs
    let first = pin.chars().next();
    if pin.chars().all(|c| Some(c) == first) || "0123456789".contains(pin) {
        return Err("PIN is too easy to guess".to_string());
    }

    Ok(())
}

/// Largest opening fee balance accepted, in cents
pub const MAX_FEE_BALANCE_CENTS: i64 = 1_000_000_000_000;

/// Validate an opening fee balance in cents
pub fn validate_fee_balance(cents: i64) -> Result<(), String> {
    if cents < 0 {
        return Err("Fee balance cannot be negative".to_string());
    }

    if cents > MAX_FEE_BALANCE_CENTS {
        return Err(format!(
            "Fee balance cannot exceed {} cents",
            MAX_FEE_BALANCE_CENTS
        ));
    }

    Ok(())
}
