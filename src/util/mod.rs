pub mod env;
pub mod password;
pub mod telemetry;

/// Performs `&str` comparisons in constant time so the admin token check doesn't leak how many
/// leading bytes matched
pub fn constant_time_cmp(a: &str, b: &str) -> bool {
    ring::constant_time::verify_slices_are_equal(a.as_bytes(), b.as_bytes()).is_ok()
}

/// Fresh v4 uuid rendered as a string, used as the primary key for every table
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_const_time_cmp() {
        let expects = "test_string";
        let passing = "test_string";

        let bad_start = "__st_string";
        let bad_end = "test_str___";

        let short = "test_strin";
        let long = "test_string_";

        assert!(constant_time_cmp(expects, passing));
        assert!(!constant_time_cmp(expects, bad_start));
        assert!(!constant_time_cmp(expects, bad_end));
        assert!(!constant_time_cmp(expects, short));
        assert!(!constant_time_cmp(expects, long));
    }

    #[test]
    fn test_new_id_is_unique() {
        assert_ne!(new_id(), new_id());
        assert_eq!(new_id().len(), 36);
    }
}
