//! Cache key layout.
//!
//! Physical keys are `<prefix>:<namespace>:<key>`. Namespaces partition
//! subsystems sharing one store; the prefix is the deployment-wide root.

/// Namespace for fixed-window rate limit counters.
pub const RATE_LIMIT: &str = "rate_limit";

/// Namespace for persisted circuit breaker state.
pub const CIRCUIT_BREAKER: &str = "circuit_breaker";

/// Build the physical key for `key` inside `namespace`.
pub fn compose(prefix: &str, namespace: &str, key: &str) -> String {
    if prefix.is_empty() {
        format!("{}:{}", namespace, key)
    } else {
        format!("{}:{}:{}", prefix, namespace, key)
    }
}

/// Backslash-escape glob metacharacters so `segment` matches only itself.
pub fn escape_glob(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for c in segment.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Build a physical glob pattern: literal prefix and namespace, caller's glob for the key.
pub fn compose_pattern(prefix: &str, namespace: &str, pattern: &str) -> String {
    compose(&escape_glob(prefix), &escape_glob(namespace), pattern)
}

/// Glob match with Redis `MATCH` semantics.
///
/// `*` matches any run of characters (including none), `?` exactly one,
/// `[...]` one character from a class (`^` negates, `a-z` is a range) and
/// `\` escapes the next character, also inside a class. An unterminated
/// class runs to the end of the pattern.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();

    let (mut pi, mut ti) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() {
            let next = match p[pi] {
                '*' => {
                    star = Some((pi, ti));
                    pi += 1;
                    continue;
                }
                '?' => Some(pi + 1),
                '[' => {
                    let (matched, after) = match_class(&p, pi + 1, t[ti]);
                    matched.then_some(after)
                }
                '\\' if pi + 1 < p.len() => (p[pi + 1] == t[ti]).then_some(pi + 2),
                c => (c == t[ti]).then_some(pi + 1),
            };
            if let Some(next) = next {
                pi = next;
                ti += 1;
                continue;
            }
        }
        // Mismatch: backtrack to the last star, letting it swallow one more char.
        match star {
            Some((sp, st)) => {
                pi = sp + 1;
                ti = st + 1;
                star = Some((sp, st + 1));
            }
            None => return false,
        }
    }

    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

/// Match `c` against the class starting at `i` (just past `[`).
/// Returns whether it matched and the index just past the closing `]`.
fn match_class(p: &[char], mut i: usize, c: char) -> (bool, usize) {
    let negate = p.get(i) == Some(&'^');
    if negate {
        i += 1;
    }

    let mut matched = false;
    while i < p.len() {
        match p[i] {
            ']' => {
                i += 1;
                break;
            }
            '\\' if i + 1 < p.len() => {
                matched |= p[i + 1] == c;
                i += 2;
            }
            lo if i + 2 < p.len() && p[i + 1] == '-' => {
                let hi = p[i + 2];
                let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
                matched |= (lo..=hi).contains(&c);
                i += 3;
            }
            other => {
                matched |= other == c;
                i += 1;
            }
        }
    }

    (matched != negate, i)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose() {
        assert_eq!(compose("edu", RATE_LIMIT, "ip:1.2.3.4"), "edu:rate_limit:ip:1.2.3.4");
        assert_eq!(compose("", CIRCUIT_BREAKER, "supabase"), "circuit_breaker:supabase");
    }

    #[test]
    fn test_glob_star_and_question() {
        assert!(glob_match("edu:lessons:*", "edu:lessons:42"));
        assert!(glob_match("edu:lessons:*", "edu:lessons:"));
        assert!(glob_match("edu:lessons:user-?", "edu:lessons:user-7"));
        assert!(!glob_match("edu:lessons:user-?", "edu:lessons:user-77"));
        assert!(glob_match("*:42", "edu:lessons:42"));
        assert!(glob_match("edu:*:user:*:v2", "edu:lessons:user:9:v2"));
        assert!(!glob_match("edu:lessons:*", "edu:chat:1"));

        assert!(glob_match("edu:lessons:user:[12]:*", "edu:lessons:user:1:progress"));
        assert!(glob_match("edu:lessons:user:[12]:*", "edu:lessons:user:2:streak"));
        assert!(!glob_match("edu:lessons:user:[12]:*", "edu:lessons:user:3:progress"));
        assert!(glob_match("user:[^a]", "user:b"));
        assert!(!glob_match("user:[^a]", "user:a"));
        assert!(glob_match("level-[a-c]", "level-b"));
        assert!(glob_match("level-[c-a]", "level-b"));
        assert!(!glob_match("level-[a-c]", "level-d"));
        assert!(glob_match("k[\\]]", "k]"));
        assert!(glob_match("k[\\-x]", "k-"));
        assert!(!glob_match("k[]", "k]"));
        assert!(glob_match("k[ab", "kb"));
    }

    #[test]
    fn test_glob_escape() {
        assert!(glob_match("a\\*b", "a*b"));
        assert!(!glob_match("a\\*b", "axb"));
        assert!(glob_match("a\\[b]", "a[b]"));
        assert!(glob_match("end\\", "end\\"));
    }

    #[test]
    fn test_escaped_segments_match_literally() {
        assert_eq!(escape_glob("edu*[1]"), "edu\\*\\[1\\]");
        let pattern = compose_pattern("edu*", "lessons", "*");
        assert!(glob_match(&pattern, "edu*:lessons:1"));
        assert!(!glob_match(&pattern, "edu-staging:lessons:1"));
    }
}
