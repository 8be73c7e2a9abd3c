//! Unified diff preview for `spindebug rewrite --diff`.

use similar::TextDiff;

/// Unified diff between the original and rewritten manifest, empty when equal.
pub fn unified_diff(original: &str, rewritten: &str, path: &str) -> String {
    let original = normalize_line_endings(original);
    let rewritten = normalize_line_endings(rewritten);
    if original == rewritten {
        return String::new();
    }
    let old_header = format!("a/{path}");
    let new_header = format!("b/{path}");
    TextDiff::from_lines(&original, &rewritten)
        .unified_diff()
        .header(&old_header, &new_header)
        .context_radius(3)
        .to_string()
}

fn normalize_line_endings(content: &str) -> String {
    content.replace("\r\n", "\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_documents_have_no_diff() {
        assert!(unified_diff("a = 1\n", "a = 1\r\n", "spin.toml").is_empty());
    }

    #[test]
    fn changed_line_appears_in_hunk() {
        let diff = unified_diff(
            "[component.web]\nsource = \"web.wasm\"\n",
            "[component.web]\nsource = \"shim.wasm\"\n",
            "spin.toml",
        );
        assert!(diff.contains("--- a/spin.toml"));
        assert!(diff.contains("+++ b/spin.toml"));
        assert!(diff.contains("-source = \"web.wasm\""));
        assert!(diff.contains("+source = \"shim.wasm\""));
    }
}
