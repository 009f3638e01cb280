//! Error-path composition: `profile.name`, `items[3]`, `scores["k"]`.

use objwire_types::Value;

pub(crate) fn field(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{path}.{name}")
    }
}

pub(crate) fn index(path: &str, i: usize) -> String {
    format!("{path}[{i}]")
}

pub(crate) fn key(path: &str, key: &Value) -> String {
    match key {
        Value::Str(s) => format!("{path}[{s:?}]"),
        Value::Int(i) => format!("{path}[{i}]"),
        other => format!("{path}[<{}>]", other.kind_name()),
    }
}

/// Re-root a path produced against a nested value.
pub(crate) fn rebase(path: &str, root: &str, inner: &str) -> String {
    match inner.strip_prefix(root) {
        Some(rest) => format!("{path}{rest}"),
        None => path.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compose_paths() {
        assert_eq!(field("", "name"), "name");
        assert_eq!(field("profile", "name"), "profile.name");
        assert_eq!(index("items", 3), "items[3]");
        assert_eq!(key("scores", &Value::from("k")), "scores[\"k\"]");
        assert_eq!(key("m", &Value::Int(4)), "m[4]");
    }

    #[test]
    fn rebase_identity_path() {
        assert_eq!(rebase("owner", "identity", "identity.class_id"), "owner.class_id");
        assert_eq!(rebase("owner", "identity", "identity"), "owner");
    }
}
