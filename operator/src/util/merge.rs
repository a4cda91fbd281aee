use std::collections::BTreeMap;

/// Merges label maps left-to-right; later maps win on key collision. Used
/// to build the `ResourceLabels()` set a provisioner hangs its
/// `ResourceIdentifier` off of — project/control-plane/cluster ownership
/// labels plus the provisioner's own `application` label.
pub fn merge_labels(maps: &[&BTreeMap<String, String>]) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for map in maps {
        for (k, v) in map.iter() {
            out.insert(k.clone(), v.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_maps_win_on_collision() {
        let mut a = BTreeMap::new();
        a.insert("project".to_string(), "acme".to_string());
        a.insert("shared".to_string(), "a".to_string());
        let mut b = BTreeMap::new();
        b.insert("shared".to_string(), "b".to_string());
        b.insert("application".to_string(), "cilium".to_string());

        let merged = merge_labels(&[&a, &b]);
        assert_eq!(merged.get("project"), Some(&"acme".to_string()));
        assert_eq!(merged.get("shared"), Some(&"b".to_string()));
        assert_eq!(merged.get("application"), Some(&"cilium".to_string()));
    }
}
