use std::collections::HashSet;

/// Characters that are unsafe in file names on at least one platform.
const FORBIDDEN: [char; 9] = ['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

/// Fallback name for a display name that sanitizes to nothing usable.
const FALLBACK_NAME: &str = "download";

/// Makes a display name safe to use as a single path component.
///
/// Replaces `\ / : * ? " < > |` with `_`. Control characters are replaced
/// as well, and names that would resolve to the current or parent
/// directory (`""`, `.`, `..`) fall back to a fixed name.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if FORBIDDEN.contains(&c) || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();

    let trimmed = cleaned.trim();
    if trimmed.is_empty() || trimmed.chars().all(|c| c == '.') {
        return FALLBACK_NAME.to_string();
    }
    trimmed.to_string()
}

/// Chooses the local file name for every entry of a page, in page order.
///
/// With an explicit `output` name, a single file keeps it verbatim and
/// several files become `{output}_{index}` (1-based). Without one, display
/// names are sanitized and later duplicates get `_{index}` inserted before
/// their extension.
pub fn resolve_output_names(display_names: &[&str], output: Option<&str>) -> Vec<String> {
    if let Some(output) = output {
        if display_names.len() == 1 {
            return vec![output.to_string()];
        }
        return (1..=display_names.len())
            .map(|idx| format!("{output}_{idx}"))
            .collect();
    }

    let mut used = HashSet::new();
    display_names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let mut candidate = sanitize_file_name(name);
            while used.contains(&candidate) {
                candidate = with_index_suffix(&candidate, i + 1);
            }
            used.insert(candidate.clone());
            candidate
        })
        .collect()
}

/// `report.pdf` + 2 → `report_2.pdf`; `README` + 2 → `README_2`.
fn with_index_suffix(name: &str, idx: usize) -> String {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}_{idx}.{ext}"),
        _ => format!("{name}_{idx}"),
    }
}
