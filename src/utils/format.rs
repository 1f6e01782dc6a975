/// Shorten a long identifier to `head..tail` for log lines.
pub fn truncate_id(id: &str) -> String {
    let chars: Vec<char> = id.chars().collect();
    if chars.len() <= 16 {
        return id.to_string();
    }
    let head: String = chars[..8].iter().collect();
    let tail: String = chars[chars.len() - 6..].iter().collect();
    format!("{}..{}", head, tail)
}

/// Render a progress ratio in `[0, 1]` as a percentage with one decimal.
pub fn format_progress(ratio: f64) -> String {
    format!("{:.1}%", ratio.clamp(0.0, 1.0) * 100.0)
}
