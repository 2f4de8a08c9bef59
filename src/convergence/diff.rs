//! Desired-vs-observed comparison
//!
//! A desired mapping matches an observed resource when it is a recursive
//! subset of it: every key the caller set must be present with a matching
//! value, extra observed keys (ids, etags, read-only properties) are ignored.

use serde_json::Value;

/// True when `desired` is contained in `observed`
pub fn is_subset(desired: &Value, observed: &Value) -> bool {
    match (desired, observed) {
        (Value::Object(want), Value::Object(have)) => want
            .iter()
            .all(|(key, value)| have.get(key).map_or(value.is_null(), |v| is_subset(value, v))),
        (Value::Array(want), Value::Array(have)) => {
            want.len() == have.len() && pairs_up(want, have)
        }
        (Value::String(want), Value::String(have)) if is_resource_id(want) => {
            want.eq_ignore_ascii_case(have)
        }
        (want, have) => want == have,
    }
}

/// JSON pointers of every desired leaf that does not match the observed value
pub fn differences(desired: &Value, observed: &Value) -> Vec<String> {
    let mut out = Vec::new();
    collect("", desired, observed, &mut out);
    out
}

fn collect(path: &str, desired: &Value, observed: &Value, out: &mut Vec<String>) {
    match (desired, observed) {
        (Value::Object(want), Value::Object(have)) => {
            for (key, value) in want {
                let child = format!("{}/{}", path, key.replace('~', "~0").replace('/', "~1"));
                match have.get(key) {
                    Some(v) => collect(&child, value, v, out),
                    None if value.is_null() => {}
                    None => out.push(child),
                }
            }
        }
        _ if is_subset(desired, observed) => {}
        _ => out.push(if path.is_empty() { "/".to_string() } else { path.to_string() }),
    }
}

/// Every desired element matches its own observed element, in any order
fn pairs_up(want: &[Value], have: &[Value]) -> bool {
    let fits: Vec<Vec<bool>> = want
        .iter()
        .map(|w| have.iter().map(|h| is_subset(w, h)).collect())
        .collect();
    let mut owner: Vec<Option<usize>> = vec![None; have.len()];
    (0..want.len()).all(|w| {
        let mut seen = vec![false; have.len()];
        claim(w, &fits, &mut owner, &mut seen)
    })
}

/// Augmenting-path step: give `w` a free observed element, moving earlier
/// claims along when another element fits them
fn claim(w: usize, fits: &[Vec<bool>], owner: &mut [Option<usize>], seen: &mut [bool]) -> bool {
    for h in 0..owner.len() {
        if !fits[w][h] || seen[h] {
            continue;
        }
        seen[h] = true;
        let free = match owner[h] {
            None => true,
            Some(other) => claim(other, fits, owner, seen),
        };
        if free {
            owner[h] = Some(w);
            return true;
        }
    }
    false
}

fn is_resource_id(s: &str) -> bool {
    s.get(..15)
        .map_or(false, |prefix| prefix.eq_ignore_ascii_case("/subscriptions/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_subset_ignores_extra_observed_keys() {
        let desired = json!({"sku": {"name": "Standard"}, "properties": {"publicIPAllocationMethod": "Static"}});
        let observed = json!({
            "id": "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Network/publicIPAddresses/pip-1",
            "etag": "W/\"1\"",
            "sku": {"name": "Standard", "tier": "Regional"},
            "properties": {
                "provisioningState": "Succeeded",
                "publicIPAllocationMethod": "Static",
                "ipAddress": "20.1.2.3"
            }
        });
        assert!(is_subset(&desired, &observed));
        assert!(differences(&desired, &observed).is_empty());
    }

    #[test]
    fn test_scalar_mismatch_reports_pointer() {
        let desired = json!({"properties": {"maxSessionLimit": 10, "loadBalancerType": "BreadthFirst"}});
        let observed = json!({"properties": {"maxSessionLimit": 5, "loadBalancerType": "BreadthFirst"}});
        assert!(!is_subset(&desired, &observed));
        assert_eq!(differences(&desired, &observed), vec!["/properties/maxSessionLimit"]);
    }

    #[test]
    fn test_missing_key_is_a_difference() {
        let desired = json!({"tags": {"env": "prod"}});
        let observed = json!({"tags": {}});
        assert_eq!(differences(&desired, &observed), vec!["/tags/env"]);

        let desired = json!({"tags": {"env": null}});
        assert!(is_subset(&desired, &observed));
    }

    #[test]
    fn test_arrays_are_unordered_subsets() {
        let desired = json!({"rules": [
            {"name": "AllowHTTPS", "properties": {"priority": 1001}},
            {"name": "AllowRDP", "properties": {"priority": 1000}}
        ]});
        let observed = json!({"rules": [
            {"name": "AllowRDP", "etag": "x", "properties": {"priority": 1000, "provisioningState": "Succeeded"}},
            {"name": "AllowHTTPS", "etag": "y", "properties": {"priority": 1001, "provisioningState": "Succeeded"}}
        ]});
        assert!(is_subset(&desired, &observed));

        let shorter = json!({"rules": [{"name": "AllowRDP"}]});
        assert!(!is_subset(&shorter, &observed));
        assert_eq!(differences(&shorter, &observed), vec!["/rules"]);
    }

    #[test]
    fn test_array_elements_match_one_to_one() {
        let desired = json!({"addressPrefixes": ["10.0.0.0/16", "10.0.0.0/16"]});
        let observed = json!({"addressPrefixes": ["10.0.0.0/16", "10.1.0.0/16"]});
        assert!(!is_subset(&desired, &observed));
        assert_eq!(differences(&desired, &observed), vec!["/addressPrefixes"]);

        // The loose element must not take the only fit of the stricter one
        let desired = json!([{"name": "rdp"}, {"name": "rdp", "priority": 1000}]);
        let observed = json!([{"name": "rdp", "priority": 1000}, {"name": "rdp", "priority": 2000}]);
        assert!(is_subset(&desired, &observed));

        let desired = json!([{"name": "rdp", "priority": 1000}, {"name": "rdp", "priority": 1000}]);
        assert!(!is_subset(&desired, &observed));
    }

    #[test]
    fn test_resource_ids_compare_case_insensitively() {
        let desired = json!({"id": "/subscriptions/abc/resourceGroups/avd-rg/providers/Microsoft.Network/virtualNetworks/v/subnets/s"});
        let observed = json!({"id": "/subscriptions/abc/resourceGroups/AVD-RG/providers/Microsoft.Network/virtualNetworks/v/subnets/s"});
        assert!(is_subset(&desired, &observed));

        let desired = json!({"name": "avd-rg"});
        let observed = json!({"name": "AVD-RG"});
        assert!(!is_subset(&desired, &observed));
    }

    #[test]
    fn test_pointer_escaping() {
        let desired = json!({"tags": {"a/b": "1"}});
        let observed = json!({"tags": {"a/b": "2"}});
        assert_eq!(differences(&desired, &observed), vec!["/tags/a~1b"]);
    }
}
