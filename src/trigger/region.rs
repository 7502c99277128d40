//! Region inference from the cluster naming convention
//! `<prefix>-<region>-<suffix>`, e.g. `prod-eu-west-1-main`.

/// Parse the region embedded in a cluster name.
///
/// The rightmost region-shaped segment followed by at least one more
/// segment wins. Both standard (`us-east-1`) and partitioned
/// (`us-gov-west-1`) forms are recognized.
pub fn region_from_cluster_name(cluster_name: &str) -> Option<String> {
    let parts: Vec<&str> = cluster_name.split('-').collect();

    (0..parts.len()).rev().find_map(|start| {
        let len = region_len(&parts[start..])?;
        // A suffix must follow the region
        (start + len < parts.len()).then(|| parts[start..start + len].join("-"))
    })
}

/// Length in segments of a region starting at `parts[0]`, if any
fn region_len(parts: &[&str]) -> Option<usize> {
    let is_geo = |s: &str| s.len() == 2 && s.chars().all(|c| c.is_ascii_lowercase());
    let is_direction = |s: &str| s.len() >= 3 && s.chars().all(|c| c.is_ascii_lowercase());
    let is_number = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());

    match parts {
        [geo, "gov", dir, num, ..] if is_geo(*geo) && is_direction(*dir) && is_number(*num) => Some(4),
        [geo, dir, num, ..] if is_geo(*geo) && is_direction(*dir) && is_number(*num) => Some(3),
        _ => None,
    }
}
