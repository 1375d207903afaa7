//! `*` and `?` wildcard matching.
//!
//! Patterns compile to a token list and match by backtracking over characters. Every other
//! character, `.` and `+` included, only ever matches itself.

#[derive(Debug, Clone, PartialEq, Eq)]
enum GlobToken {
    Literal(char),
    /// `?`
    AnyOne,
    /// `*`
    AnyMany,
}

/// An anchored, case-insensitive wildcard pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobPattern {
    tokens: Vec<GlobToken>,
}

pub fn has_wildcards(value: &str) -> bool {
    value.contains(['*', '?'])
}

impl GlobPattern {
    pub fn new(pattern: &str) -> Self {
        let mut tokens = Vec::new();
        for c in pattern.to_lowercase().chars() {
            match c {
                // Consecutive stars are one star
                '*' if tokens.last() == Some(&GlobToken::AnyMany) => {}
                '*' => tokens.push(GlobToken::AnyMany),
                '?' => tokens.push(GlobToken::AnyOne),
                other => tokens.push(GlobToken::Literal(other)),
            }
        }
        Self { tokens }
    }

    pub fn matches(&self, text: &str) -> bool {
        let text: Vec<char> = text.to_lowercase().chars().collect();
        let (mut t, mut p) = (0, 0);
        // Where to resume after the last `*`: (pattern index after it, text index it covers up to)
        let mut resume: Option<(usize, usize)> = None;

        while t < text.len() {
            match self.tokens.get(p) {
                Some(GlobToken::AnyMany) => {
                    resume = Some((p + 1, t));
                    p += 1;
                }
                Some(GlobToken::AnyOne) => {
                    t += 1;
                    p += 1;
                }
                Some(GlobToken::Literal(c)) if *c == text[t] => {
                    t += 1;
                    p += 1;
                }
                _ => match resume {
                    Some((after_star, covered)) => {
                        // Let the star eat one more character and retry
                        p = after_star;
                        t = covered + 1;
                        resume = Some((after_star, covered + 1));
                    }
                    None => return false,
                },
            }
        }
        self.tokens[p..].iter().all(|token| *token == GlobToken::AnyMany)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_star_and_question_mark() {
        assert!(GlobPattern::new("*.txt").matches("notes.txt"));
        assert!(GlobPattern::new("*.txt").matches(".txt"));
        assert!(!GlobPattern::new("*.txt").matches("notes.txt.bak"));
        assert!(GlobPattern::new("img_????.jpg").matches("IMG_0042.JPG"));
        assert!(!GlobPattern::new("img_????.jpg").matches("img_42.jpg"));
        assert!(GlobPattern::new("a*b*c").matches("aXXbYYc"));
        assert!(GlobPattern::new("**").matches(""));
    }

    #[test]
    fn test_metacharacters_are_literal() {
        assert!(!GlobPattern::new("a.b*").matches("axbc"));
        assert!(GlobPattern::new("a.b*").matches("a.bc"));
        assert!(GlobPattern::new("c++*").matches("c++ notes"));
        assert!(!GlobPattern::new("c++*").matches("cc"));
        assert!(GlobPattern::new("[draft]*").matches("[draft] plan"));
        assert!(!GlobPattern::new("[draft]*").matches("d plan"));
    }

    #[test]
    fn test_anchored_at_both_ends() {
        assert!(!GlobPattern::new("rep*").matches("my report"));
        assert!(GlobPattern::new("*rep*").matches("my report"));
    }

    #[test]
    fn test_non_ascii() {
        assert!(GlobPattern::new("ré?umé*").matches("Résumé 2024.pdf"));
    }
}
