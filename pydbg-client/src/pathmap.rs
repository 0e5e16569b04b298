// Local <-> remote path mapping
//
// Lets breakpoints be set against local project files while the debuggee runs
// from a deployed copy elsewhere. Prefix matching is ASCII case-insensitive.

use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathMapping {
    pub local: String,
    pub remote: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapDirection {
    ToDebuggee,
    FromDebuggee,
}

#[derive(Debug, Clone, Default)]
pub struct PathMapper {
    mappings: Vec<PathMapping>,
}

impl PathMapper {
    pub fn new(mappings: Vec<PathMapping>) -> Self {
        Self { mappings }
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Rewrite `file` using the first mapping whose source prefix matches.
    /// Unmatched paths are returned unchanged.
    pub fn map(&self, file: &str, direction: MapDirection) -> String {
        for mapping in &self.mappings {
            let (from, to) = match direction {
                MapDirection::ToDebuggee => (&mapping.local, &mapping.remote),
                MapDirection::FromDebuggee => (&mapping.remote, &mapping.local),
            };

            if from.is_empty() || !starts_with_ignore_case(file, from) {
                continue;
            }

            let remainder = &file[from.len()..];
            // A prefix only counts at a path-component boundary
            if !ends_with_separator(from)
                && !remainder.is_empty()
                && !remainder.starts_with(['/', '\\'])
            {
                continue;
            }

            let mapped = join(to, remainder.trim_start_matches(['/', '\\']));
            debug!("Filename mapped from {} to {}", file, mapped);
            return mapped;
        }
        file.to_string()
    }
}

fn starts_with_ignore_case(file: &str, prefix: &str) -> bool {
    file.len() >= prefix.len()
        && file.is_char_boundary(prefix.len())
        && file[..prefix.len()].eq_ignore_ascii_case(prefix)
}

fn ends_with_separator(path: &str) -> bool {
    path.ends_with('/') || path.ends_with('\\')
}

fn join(base: &str, rest: &str) -> String {
    if rest.is_empty() {
        return base.to_string();
    }
    if base.is_empty() || ends_with_separator(base) {
        return format!("{}{}", base, rest);
    }
    let separator = if base.contains('\\') && !base.contains('/') {
        '\\'
    } else {
        '/'
    };
    let rest: String = rest
        .chars()
        .map(|c| if c == '/' || c == '\\' { separator } else { c })
        .collect();
    format!("{}{}{}", base, separator, rest)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapper() -> PathMapper {
        PathMapper::new(vec![
            PathMapping {
                local: r"C:\Users\me\MyProject".into(),
                remote: r"\\cluster\deploy\MyProject".into(),
            },
            PathMapping {
                local: "/home/me/app/".into(),
                remote: "/srv/app".into(),
            },
        ])
    }

    #[test]
    fn test_map_to_debuggee() {
        let m = mapper();
        assert_eq!(
            m.map(r"c:\users\ME\MyProject\pkg\foo.py", MapDirection::ToDebuggee),
            r"\\cluster\deploy\MyProject\pkg\foo.py"
        );
        assert_eq!(
            m.map("/home/me/app/main.py", MapDirection::ToDebuggee),
            "/srv/app/main.py"
        );
    }

    #[test]
    fn test_map_from_debuggee() {
        let m = mapper();
        assert_eq!(
            m.map("/srv/app/lib/util.py", MapDirection::FromDebuggee),
            "/home/me/app/lib/util.py"
        );
    }

    #[test]
    fn test_prefix_must_end_at_component_boundary() {
        let m = mapper();
        assert_eq!(
            m.map("/srv/application/x.py", MapDirection::FromDebuggee),
            "/srv/application/x.py"
        );
    }

    #[test]
    fn test_unmapped_paths_pass_through() {
        assert_eq!(mapper().map("/tmp/x.py", MapDirection::ToDebuggee), "/tmp/x.py");
        assert_eq!(
            PathMapper::default().map("a.py", MapDirection::FromDebuggee),
            "a.py"
        );
    }
}
