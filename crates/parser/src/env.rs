//! `${NAME}` environment-variable interpolation.

/// Resolve every `${NAME}` reference in `input` against the process
/// environment. Unset variables resolve to the empty string; a `$` that is
/// not followed by `{` passes through untouched.
pub fn interpolate(input: &str) -> String {
    if !input.contains("${") {
        return input.to_string();
    }

    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                if let Ok(value) = std::env::var(name) {
                    out.push_str(&value);
                }
                rest = &after[end + 1..];
            }
            None => {
                // Unterminated reference; keep the literal text.
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_strings_pass_through() {
        assert_eq!(interpolate("no refs here"), "no refs here");
    }

    #[test]
    fn set_variable_is_substituted() {
        std::env::set_var("DROVER_TEST_ENV_A", "hay");
        assert_eq!(interpolate("bale of ${DROVER_TEST_ENV_A}"), "bale of hay");
    }

    #[test]
    fn unset_variable_resolves_empty() {
        std::env::remove_var("DROVER_TEST_ENV_MISSING");
        assert_eq!(interpolate("x${DROVER_TEST_ENV_MISSING}y"), "xy");
    }

    #[test]
    fn multiple_references_in_one_value() {
        std::env::set_var("DROVER_TEST_ENV_B", "1");
        std::env::set_var("DROVER_TEST_ENV_C", "2");
        assert_eq!(
            interpolate("${DROVER_TEST_ENV_B}-${DROVER_TEST_ENV_C}"),
            "1-2"
        );
    }

    #[test]
    fn unterminated_reference_is_literal() {
        assert_eq!(interpolate("oops ${NOPE"), "oops ${NOPE");
    }
}
