//! # FTP Regex
//!
//! Regular expressions to parse FTP replies

use lazy_regex::{Lazy, Regex};

/// This regex captures the content of the first parenthesized group of a reply,
/// e.g. `h1,h2,h3,h4,p1,p2` in `227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)`.
/// Field validation is left to the caller.
pub static PASV_GROUP_RE: Lazy<Regex> = lazy_regex!(r"\(([^()]*)\)");

#[cfg(test)]
mod test {

    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn should_match_pasv_group() {
        let response = "227 Entering Passive Mode (213,229,112,130,216,4)";
        let caps = PASV_GROUP_RE.captures(response).unwrap();
        assert_eq!(&caps[1], "213,229,112,130,216,4");
    }

    #[test]
    fn should_match_first_group_only() {
        let response = "227 Entering Passive Mode (1,2,3,4,5,6) (7,8,9,10,11,12)";
        let caps = PASV_GROUP_RE.captures(response).unwrap();
        assert_eq!(&caps[1], "1,2,3,4,5,6");
    }

    #[test]
    fn should_not_match_without_group() {
        assert!(PASV_GROUP_RE.captures("227 Entering Passive Mode").is_none());
        assert!(PASV_GROUP_RE.captures("227 Entering (1,2,3").is_none());
    }
}
