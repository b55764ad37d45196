/// Replace `${ENV_VAR}` placeholders in raw config text.
///
/// Unresolvable variables are left as-is.
pub fn substitute_env(input: &str) -> String {
    substitute_env_with(input, |name| std::env::var(name).ok())
}

/// Replace `${ENV_VAR}` placeholders using a custom lookup.
pub(crate) fn substitute_env_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) if end > 0 => {
                let name = &after[..end];
                match lookup(name) {
                    Some(value) => result.push_str(&value),
                    None => {
                        result.push_str("${");
                        result.push_str(name);
                        result.push('}');
                    },
                }
                rest = &after[end + 1..];
            },
            // `${}` or unterminated: keep literally.
            _ => {
                result.push_str("${");
                rest = after;
            },
        }
    }
    result.push_str(rest);
    result
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    fn lookup(name: &str) -> Option<String> {
        match name {
            "HERALD_TEST_TOKEN" => Some("123:abc".to_string()),
            "HERALD_TEST_DIR" => Some("/srv/herald".to_string()),
            _ => None,
        }
    }

    #[rstest]
    #[case("token = \"${HERALD_TEST_TOKEN}\"", "token = \"123:abc\"")]
    #[case("${HERALD_TEST_DIR}/mailers", "/srv/herald/mailers")]
    #[case("${HERALD_TEST_DIR}${HERALD_TEST_TOKEN}", "/srv/herald123:abc")]
    #[case("${HERALD_UNKNOWN_XYZ}", "${HERALD_UNKNOWN_XYZ}")]
    #[case("cost = $5", "cost = $5")]
    #[case("empty ${}", "empty ${}")]
    #[case("open ${HERALD_TEST_DIR", "open ${HERALD_TEST_DIR")]
    fn substitution(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(substitute_env_with(input, lookup), expected);
    }

    #[test]
    fn no_placeholders() {
        assert_eq!(substitute_env("plain text"), "plain text");
    }
}
