/// Characters Trac allows in page names that are unsafe in file names.
/// `/` is kept since it expresses directory structure.
const RESERVED_CHARS: &[char] = &['\\', ':', '*', '?', '"', '\'', '<', '>', '|', ' '];

/// Fold a raw Trac page name into a filesystem-safe relative path.
pub fn normalize_page_name(raw: &str) -> String {
    raw.chars()
        .map(|ch| if RESERVED_CHARS.contains(&ch) { '_' } else { ch })
        .collect()
}

/// Final `/`-separated segment of a normalized name.
pub fn basename(normalized: &str) -> &str {
    normalized.rsplit('/').next().unwrap_or(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_characters_become_underscores() {
        assert_eq!(
            normalize_page_name(r#"a\b:c*d?e"f'g<h>i|j k"#),
            "a_b_c_d_e_f_g_h_i_j_k"
        );
    }

    #[test]
    fn path_separators_survive() {
        assert_eq!(
            normalize_page_name("Dev/Release Notes/2.5"),
            "Dev/Release_Notes/2.5"
        );
    }

    #[test]
    fn normalization_is_idempotent() {
        for raw in [
            "WikiStart",
            "Foo Bar/Baz:Qux",
            "ünïcödé page?",
            "",
            "  leading",
            "a|b|c/d e",
        ] {
            let once = normalize_page_name(raw);
            assert_eq!(normalize_page_name(&once), once, "input {raw:?}");
        }
    }

    #[test]
    fn non_ascii_names_pass_through() {
        assert_eq!(normalize_page_name("Über/Straße"), "Über/Straße");
    }

    #[test]
    fn basename_takes_last_segment() {
        assert_eq!(basename("A/B/C"), "C");
        assert_eq!(basename("Solo"), "Solo");
        assert_eq!(basename("trailing/"), "");
    }
}
