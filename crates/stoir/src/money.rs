//! Rupiah formatting in the Indonesian style: `.` groups thousands and
//! amounts carry no decimals.

pub fn format_number(value: i64) -> String {
    let digits = value.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if value < 0 {
        grouped.push('-');
    }
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }
    grouped
}

pub fn format_currency(value: i64) -> String {
    let grouped = format_number(value);
    match grouped.strip_prefix('-') {
        Some(digits) => format!("-Rp{digits}"),
        None => format!("Rp{grouped}"),
    }
}

/// `qty * price` less a percentage discount, rounded to whole rupiah.
/// `None` when the gross amount does not fit in an `i64`.
pub fn subtotal(qty: i64, price: i64, discount_pct: f64) -> Option<i64> {
    let gross = qty.checked_mul(price)? as f64;
    Some((gross * (1.0 - discount_pct / 100.0)).round() as i64)
}
