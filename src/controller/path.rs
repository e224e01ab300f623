/// Join a controller prefix and a route path into one normalized path.
///
/// Both parts get a leading slash, a `/` prefix collapses to nothing,
/// repeated slashes are merged, and a trailing slash is dropped unless the
/// whole path is `/`.
pub fn compose_path(prefix: &str, path: &str) -> String {
    let prefix = normalize(prefix);
    let prefix = if prefix == "/" { "" } else { prefix.as_str() };
    let joined = format!("{prefix}{}", normalize(path));

    let mut out = String::with_capacity(joined.len());
    for ch in joined.chars() {
        if ch == '/' && out.ends_with('/') {
            continue;
        }
        out.push(ch);
    }
    if out.len() > 1 && out.ends_with('/') {
        out.pop();
    }
    out
}

fn normalize(part: &str) -> String {
    let part = part.trim();
    if part.starts_with('/') {
        part.to_string()
    } else {
        format!("/{part}")
    }
}

/// Convert `:id` and `*rest` segments to axum's `{id}` and `{*rest}`.
pub fn to_axum_path(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            if let Some(name) = segment.strip_prefix(':') {
                format!("{{{name}}}")
            } else if let Some(name) = segment.strip_prefix('*') {
                let name = if name.is_empty() { "wildcard" } else { name };
                format!("{{*{name}}}")
            } else {
                segment.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_path() {
        assert_eq!(compose_path("users", ":id"), "/users/:id");
        assert_eq!(compose_path("/", "/"), "/");
        assert_eq!(compose_path("/", ""), "/");
        assert_eq!(compose_path("api/", "/items/"), "/api/items");
        assert_eq!(compose_path("", "health"), "/health");
        assert_eq!(compose_path("users", "/"), "/users");
    }

    #[test]
    fn test_to_axum_path() {
        assert_eq!(to_axum_path("/users/:id"), "/users/{id}");
        assert_eq!(to_axum_path("/files/*path"), "/files/{*path}");
        assert_eq!(to_axum_path("/"), "/");
    }
}
