//! Scope strings and scope lists.
//!
//! A scope string is a whitespace separated list of tokens. Tokens may not
//! contain `"` or `\`, so each token is percent/plus decoded on parse, which
//! lets arbitrary characters be embedded.

use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};

/// Characters quoted when a scope list is turned back into a string.
const SCOPE_TOKEN: &AsciiSet = &CONTROLS.add(b' ').add(b'%').add(b'+').add(b'"').add(b'\\');

/// Convert a scope string into its list of decoded tokens.
#[must_use]
pub fn scope_string_to_list(scope: &str) -> Vec<String> {
    let scopes: Vec<String> = scope.split_whitespace().map(unquote_plus).collect();
    tracing::trace!(scope, ?scopes, "Converted scope string");
    scopes
}

/// Convert a list of scope tokens into a scope string.
#[must_use]
pub fn scope_list_to_string<S: AsRef<str>>(scopes: &[S]) -> String {
    scopes
        .iter()
        .map(|s| utf8_percent_encode(s.as_ref(), SCOPE_TOKEN).to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

/// True if every requested scope appears in the granted scopes.
///
/// An empty request is always granted.
#[must_use]
pub fn is_scope_granted<G: AsRef<str>, R: AsRef<str>>(granted: &[G], requested: &[R]) -> bool {
    let result =
        requested.iter().all(|r| granted.iter().any(|g| g.as_ref() == r.as_ref()));
    tracing::trace!(result, "Checked requested scopes against granted scopes");
    result
}

fn unquote_plus(token: &str) -> String {
    let spaced = token.replace('+', " ");
    percent_decode_str(&spaced).decode_utf8_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_and_decode() {
        assert_eq!(scope_string_to_list("read  write\tadmin"), vec!["read", "write", "admin"]);
        assert_eq!(scope_string_to_list("a%20b c+d"), vec!["a b", "c d"]);
        assert!(scope_string_to_list("").is_empty());
        assert!(scope_string_to_list("   ").is_empty());
    }

    #[test]
    fn test_dn_scope_survives() {
        let dn = "/O=STFC/OU=CEDA/CN=resource.example.org";
        assert_eq!(scope_string_to_list(dn), vec![dn]);
        assert_eq!(scope_list_to_string(&[dn]), dn);
    }

    #[test]
    fn test_list_to_string_quotes_specials() {
        let s = scope_list_to_string(&["a b", "50%", "x+y"]);
        assert_eq!(s, "a%20b 50%25 x%2By");
        assert_eq!(scope_string_to_list(&s), vec!["a b", "50%", "x+y"]);
    }

    #[test]
    fn test_is_scope_granted() {
        let granted = scope_string_to_list("read write");
        assert!(is_scope_granted(&granted, &["read"]));
        assert!(is_scope_granted(&granted, &["write", "read"]));
        assert!(!is_scope_granted(&granted, &["admin"]));
        assert!(!is_scope_granted(&granted, &["read", "admin"]));
        assert!(is_scope_granted::<_, &str>(&granted, &[]));
        assert!(is_scope_granted::<&str, &str>(&[], &[]));
        assert!(!is_scope_granted::<&str, _>(&[], &["read"]));
    }
}
