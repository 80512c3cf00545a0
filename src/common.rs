use std::path::Path;

use anyhow::{Result, bail};

pub fn sql_escape_path(path: &Path) -> String {
    path.to_string_lossy().replace('\'', "''")
}

pub fn source_expr(input_path: &Path) -> Result<String> {
    let escaped = sql_escape_path(input_path);
    let extension = input_path
        .extension()
        .and_then(|x| x.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    match extension.as_str() {
        "parquet" => Ok(format!("read_parquet('{escaped}')")),
        "csv" => Ok(format!("read_csv_auto('{escaped}', header=true)")),
        _ => bail!(
            "Unsupported input extension for {}. Use .csv or .parquet",
            input_path.display()
        ),
    }
}

pub fn truncate_for_log(text: &str) -> String {
    let trimmed = text.trim();
    let max_len = 300usize;
    if trimmed.len() <= max_len {
        trimmed.to_string()
    } else {
        let mut end = max_len;
        while !trimmed.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &trimmed[..end])
    }
}
