//! Evaluates a parsed query against one listing entry.

use super::parser::{Expr, Field, Predicate, ValueMatcher};
use crate::entry::{Entry, EntryKind};

pub fn evaluate(expr: &Expr, entry: &Entry) -> bool {
    match expr {
        Expr::And(a, b) => evaluate(a, entry) && evaluate(b, entry),
        Expr::Or(a, b) => evaluate(a, entry) || evaluate(b, entry),
        Expr::Not(inner) => !evaluate(inner, entry),
        Expr::Predicate(predicate) => test_predicate(predicate, entry),
    }
}

fn test_predicate(predicate: &Predicate, entry: &Entry) -> bool {
    let text = match predicate.field {
        Field::Hidden => return matches_bool(&predicate.matcher, entry.hidden),
        Field::ReadOnly => return matches_bool(&predicate.matcher, entry.read_only),
        Field::Name => entry.name.clone(),
        Field::FileName => {
            if entry.kind == EntryKind::Dir {
                return false;
            }
            entry.name.clone()
        }
        Field::Folder => match entry.path.parent() {
            Some(parent) => parent.to_string(),
            None => return false,
        },
        Field::Path => entry.path.to_string(),
    };
    matches_text(&predicate.matcher, &text)
}

fn matches_bool(matcher: &ValueMatcher, actual: bool) -> bool {
    matches!(matcher, ValueMatcher::Bool(expected) if *expected == actual)
}

fn matches_text(matcher: &ValueMatcher, text: &str) -> bool {
    match matcher {
        ValueMatcher::Contains(needle) => text.to_lowercase().contains(needle.as_str()),
        ValueMatcher::Equals(value) => text.to_lowercase() == *value,
        ValueMatcher::Glob(pattern) => pattern.matches(text),
        ValueMatcher::Bool(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::super::parser::parse;
    use super::*;
    use crate::path_ref::PathRef;

    fn entry(path: &str, kind: EntryKind, read_only: bool) -> Entry {
        let path: PathRef = path.parse().unwrap();
        Entry {
            name: path.name().unwrap(),
            hidden: path.name().unwrap().starts_with('.'),
            path,
            kind,
            size: None,
            modified: None,
            read_only,
            trash_id: None,
        }
    }

    fn check(query: &str, entry: &Entry) -> bool {
        evaluate(&parse(query).unwrap(), entry)
    }

    #[test]
    fn test_boolean_combination_with_readonly() {
        let query = "(name:foo OR name:bar) AND readonly:false";
        assert!(check(query, &entry("/docs/bar.txt", EntryKind::File, false)));
        assert!(!check(query, &entry("/docs/bar.txt", EntryKind::File, true)));
        assert!(!check(query, &entry("/docs/baz.txt", EntryKind::File, false)));
    }

    #[test]
    fn test_literal_dot_is_not_a_wildcard() {
        let axb = entry("/tmp/axb", EntryKind::File, false);
        assert!(!check("a.b", &axb));
        assert!(!check("a.b*", &axb));
        assert!(check("a?b", &axb));
        assert!(check("a.b", &entry("/tmp/a.b", EntryKind::File, false)));
    }

    #[test]
    fn test_filename_skips_folders() {
        let folder = entry("/tmp/reports", EntryKind::Dir, false);
        assert!(check("name:report", &folder));
        assert!(!check("filename:report", &folder));
        assert!(check("filename:report", &entry("/tmp/report.pdf", EntryKind::File, false)));
        assert!(check("filename:report", &entry("/tmp/report-link", EntryKind::Link, false)));
    }

    #[test]
    fn test_folder_and_path_fields() {
        let e = entry("rclone://gdrive/Work/2024/plan.md", EntryKind::File, false);
        assert!(check("folder:work", &e));
        assert!(!check("folder:plan", &e));
        assert!(check("folder:*/2024", &e));
        assert!(check("path:2024/plan", &e));
        assert!(check("path:*.md", &e));
    }

    #[test]
    fn test_exact_contains_and_hidden() {
        let e = entry("/home/me/.Bashrc", EntryKind::File, false);
        assert!(check("name:=.bashrc", &e));
        assert!(!check("name:=bash", &e));
        assert!(check("bash hidden:yes", &e));
        assert!(!check("NOT hidden:true", &e));
    }
}
