//! ---
//! ptf_section: "05-orchestration"
//! ptf_subsection: "module"
//! ptf_type: "source"
//! ptf_scope: "code"
//! ptf_description: "Assembly identity normalisation for settings lookup."
//! ptf_version: "v0.0.0-prealpha"
//! ptf_owner: "tbd"
//! ---

const VERSION_KEY: &str = "Version=";
const DROPPED_KEYS: [&str; 2] = ["Culture=", "PublicKeyToken="];

fn starts_with_ignore_case(value: &str, prefix: &str) -> bool {
    value
        .get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

/// Reduce a qualified assembly name to `"Name, Version=x"`.
///
/// Culture and public key token are dropped so that differently qualified
/// spellings of one assembly share a cache entry. Without a version only the
/// name is kept.
pub fn normalize_assembly_name(qualified: &str) -> String {
    let mut name = String::new();
    let mut version = None;

    for part in qualified.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        if starts_with_ignore_case(part, VERSION_KEY) {
            version = Some(part[VERSION_KEY.len()..].trim());
        } else if !DROPPED_KEYS
            .iter()
            .any(|key| starts_with_ignore_case(part, key))
        {
            if !name.is_empty() {
                name.push_str(", ");
            }
            name.push_str(part.trim_matches('"'));
        }
    }

    match version {
        Some(version) if !version.is_empty() => format!("{name}, Version={version}"),
        _ => name,
    }
}
