//! Identifier construction shared by the statement generators.

use sha2::{Digest, Sha256};

/// Hex characters appended to a truncated identifier.
const HASH_LEN: usize = 4;

/// Double-quote an identifier.  Already-quoted names pass through.
pub fn quote_identifier(name: &str) -> String {
    if name.len() >= 2 && name.starts_with('"') && name.ends_with('"') {
        return name.to_string();
    }
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Single-quote a string literal.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Shorten `name` to at most `max_length` bytes, replacing the tail with a
/// short digest of the full name so distinct long names stay distinct.
pub fn truncate_name(name: &str, max_length: Option<usize>) -> String {
    let Some(max_length) = max_length else {
        return name.to_string();
    };
    if name.len() <= max_length {
        return name.to_string();
    }
    let digest = format!("{:x}", Sha256::digest(name.as_bytes()));
    let mut cut = max_length.saturating_sub(HASH_LEN);
    while !name.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}{}", &name[..cut], &digest[..HASH_LEN])
}

/// Association table name used when a many-to-many field has no override.
pub fn default_m2m_table(owner_table: &str, field_name: &str) -> String {
    format!("{owner_table}_{field_name}")
}

/// Column names of an association table.  A relation from a model to itself
/// needs distinct `from_`/`to_` prefixes.
pub fn m2m_columns(owner_model: &str, related_model: &str, self_referential: bool) -> (String, String) {
    let owner = owner_model.to_lowercase();
    if self_referential {
        (format!("from_{owner}_id"), format!("to_{owner}_id"))
    } else {
        (format!("{owner}_id"), format!("{}_id", related_model.to_lowercase()))
    }
}

pub fn index_name(table: &str, column: &str, unique: bool, max_length: Option<usize>) -> String {
    let suffix = if unique { "_uniq" } else { "" };
    truncate_name(&format!("{table}_{column}{suffix}"), max_length)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("tests_testmodel"), "\"tests_testmodel\"");
        assert_eq!(quote_identifier("\"already\""), "\"already\"");
        assert_eq!(quote_identifier("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_quote_literal_escapes() {
        assert_eq!(quote_literal("O'Brien"), "'O''Brien'");
    }

    #[test]
    fn test_truncate_name_keeps_short_names() {
        assert_eq!(truncate_name("short", Some(63)), "short");
        assert_eq!(truncate_name(&"x".repeat(200), None).len(), 200);
    }

    #[test]
    fn test_truncate_name_is_bounded_and_distinct() {
        let a = format!("{}_a", "t".repeat(80));
        let b = format!("{}_b", "t".repeat(80));
        let ta = truncate_name(&a, Some(63));
        let tb = truncate_name(&b, Some(63));
        assert_eq!(ta.len(), 63);
        assert_ne!(ta, tb);
        assert_eq!(ta, truncate_name(&a, Some(63)));
    }

    #[test]
    fn test_truncate_name_respects_char_boundaries() {
        let name = "é".repeat(40);
        let truncated = truncate_name(&name, Some(63));
        assert!(truncated.len() <= 63);
    }

    #[test]
    fn test_m2m_columns() {
        assert_eq!(
            m2m_columns("Entry", "Tag", false),
            ("entry_id".to_string(), "tag_id".to_string())
        );
        assert_eq!(
            m2m_columns("Person", "Person", true),
            ("from_person_id".to_string(), "to_person_id".to_string())
        );
    }

    #[test]
    fn test_index_name() {
        assert_eq!(index_name("blog_entry", "slug", false, None), "blog_entry_slug");
        assert_eq!(index_name("blog_entry", "slug", true, None), "blog_entry_slug_uniq");
    }
}
