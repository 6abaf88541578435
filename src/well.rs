//! Well labels of the form `{row letters}{column digits}`.

use std::cmp::Ordering;

/// Split a well label into its row letters and column digits.
///
/// With `strip_zeros`, leading zeros are removed from the column so that
/// `"A01"` and `"A1"` split identically.
pub fn split_well_label(label: &str, strip_zeros: bool) -> crate::Result<(String, String)> {
    let label = label.trim();
    let digits_at = label
        .find(|c: char| c.is_ascii_digit())
        .ok_or_else(|| invalid_label(label))?;
    let (row, column) = label.split_at(digits_at);
    if row.is_empty()
        || !row.chars().all(|c| c.is_ascii_alphabetic())
        || !column.chars().all(|c| c.is_ascii_digit())
    {
        return Err(invalid_label(label));
    }
    let column = if strip_zeros {
        match column.trim_start_matches('0') {
            "" => "0",
            trimmed => trimmed,
        }
    } else {
        column
    };
    Ok((row.to_string(), column.to_string()))
}

fn invalid_label(label: &str) -> crate::Error {
    crate::Error::not_found(format!(
        "invalid well label {label:?}; expected a label like \"A1\" or \"B02\""
    ))
}

/// Canonical form of a well label: leading column zeros removed.
pub fn normalize_well_label(label: &str) -> crate::Result<String> {
    let (row, column) = split_well_label(label, true)?;
    Ok(join_well_label(&row, &column))
}

pub fn join_well_label(row: &str, column: &str) -> String {
    format!("{row}{column}")
}

/// Path of a well group below the plate root, `row/column`.
pub fn well_path(label: &str) -> crate::Result<String> {
    let (row, column) = split_well_label(label, true)?;
    Ok(format!("{row}/{column}"))
}

/// Order rows so that `"Z"` precedes `"AA"` on 1536-well plates.
pub fn compare_rows(a: &str, b: &str) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// Order numeric column labels by value.
pub fn compare_columns(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a.cmp(b),
    }
}

/// Plate order of well labels: by row, then by numeric column.
pub fn compare_wells(a: &str, b: &str) -> Ordering {
    match (split_well_label(a, true), split_well_label(b, true)) {
        (Ok((ra, ca)), Ok((rb, cb))) => {
            compare_rows(&ra, &rb).then_with(|| compare_columns(&ca, &cb))
        }
        _ => a.cmp(b),
    }
}
