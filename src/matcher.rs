//! Resolve a catalogue record title to the best-matching named WMS layer.
//!
//! Matching is fuzzy: titles are lower-cased and compared by Levenshtein
//! distance, with an exact-equality short-circuit. Category layers (no
//! `<Name>`) are never candidates. The resolver never raises past its
//! boundary — a failed capabilities fetch degrades to a flagged null
//! match.

use tracing::{debug, warn};

use crate::models::{LayerMatch, ServiceCapabilities};
use crate::wms::MapClient;

/// A [`LayerMatch`] plus scan accounting.
#[derive(Debug)]
pub struct MatchScan {
    pub layer_match: LayerMatch,
    /// Number of layer titles actually compared against the target. An
    /// exact match on the first named layer leaves this at 1.
    pub titles_compared: usize,
}

/// Resolve `target_title` against the named layers of the service at
/// `service_url`. Fetches capabilities exactly once; any fetch or parse
/// failure returns a null match with `capabilities_fetch_error` set.
pub async fn resolve(client: &dyn MapClient, service_url: &str, target_title: &str) -> LayerMatch {
    let caps = match client.fetch_capabilities(service_url).await {
        Ok(caps) => caps,
        Err(e) => {
            warn!(url = service_url, error = %e, "capabilities fetch failed");
            return LayerMatch::fetch_error();
        }
    };
    let scan = match_layers(&caps, target_title);
    debug!(
        url = service_url,
        matched = scan.layer_match.name.as_deref().unwrap_or("<none>"),
        distance = scan.layer_match.distance,
        "layer match complete"
    );
    scan.layer_match
}

/// Scan the capability tree for the named layer whose title best matches
/// `target_title`.
///
/// Rules, in order:
/// 1. an exact match on the normalized title stops the scan immediately
///    with distance 0 — later layers are never inspected;
/// 2. otherwise the minimum-distance candidate wins, ties resolving to
///    the first-encountered layer in document order;
/// 3. `single_choice` reflects whether exactly one named layer exists,
///    independent of the match outcome.
pub fn match_layers(caps: &ServiceCapabilities, target_title: &str) -> MatchScan {
    let target = target_title.to_lowercase();
    let named_total = caps.layers.iter().filter(|l| l.is_named()).count();

    let mut best: Option<(usize, usize)> = None; // (layer index, distance)
    let mut exact = false;
    let mut titles_compared = 0usize;

    for (idx, layer) in caps.layers.iter().enumerate() {
        if !layer.is_named() {
            continue;
        }
        titles_compared += 1;

        let candidate = layer.title.to_lowercase();
        if candidate == target {
            best = Some((idx, 0));
            exact = true;
            break;
        }

        let dist = levenshtein(&target, &candidate);
        match best {
            Some((_, best_dist)) if dist >= best_dist => {}
            _ => best = Some((idx, dist)),
        }
    }

    let mut layer_match = LayerMatch {
        single_choice: named_total == 1,
        access_constraints: caps.access_constraints.clone(),
        ..LayerMatch::empty()
    };

    if let Some((idx, dist)) = best {
        let winner = &caps.layers[idx];
        layer_match.title = Some(winner.title.clone());
        layer_match.name = winner.name.clone();
        layer_match.distance = dist as i64;
        layer_match.exact = exact;
        layer_match.native_bbox = winner.native.clone();
        layer_match.wgs84_bbox = winner.wgs84;
    }

    MatchScan {
        layer_match,
        titles_compared,
    }
}

/// Levenshtein edit distance over Unicode scalar values.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Bbox, Layer, NativeBbox};

    fn named(name: &str, title: &str) -> Layer {
        Layer {
            name: Some(name.to_string()),
            title: title.to_string(),
            native: Some(NativeBbox {
                bbox: Bbox {
                    min_x: 0.0,
                    min_y: 0.0,
                    max_x: 1.0,
                    max_y: 1.0,
                },
                srs: "EPSG:27700".to_string(),
            }),
            wgs84: None,
        }
    }

    fn category(title: &str) -> Layer {
        Layer {
            name: None,
            title: title.to_string(),
            native: None,
            wgs84: None,
        }
    }

    fn caps(layers: Vec<Layer>) -> ServiceCapabilities {
        ServiceCapabilities {
            access_constraints: Some("none".to_string()),
            layers,
        }
    }

    #[test]
    fn levenshtein_basics() {
        assert_eq!(levenshtein("", ""), 0);
        assert_eq!(levenshtein("abc", ""), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("flood zones", "flood zones"), 0);
    }

    #[test]
    fn exact_match_short_circuits() {
        let caps = caps(vec![
            named("a", "Flood Zones"),
            named("b", "Flood Zones"),
            named("c", "Something Else"),
        ]);
        let scan = match_layers(&caps, "flood zones");
        assert_eq!(scan.layer_match.distance, 0);
        assert!(scan.layer_match.exact);
        // First exact layer wins and the scan stops there.
        assert_eq!(scan.layer_match.name.as_deref(), Some("a"));
        assert_eq!(scan.titles_compared, 1);
    }

    #[test]
    fn distance_zero_iff_exact() {
        let caps = caps(vec![named("a", "Flood Zoness")]);
        let scan = match_layers(&caps, "Flood Zones");
        assert!(!scan.layer_match.exact);
        assert_eq!(scan.layer_match.distance, 1);
    }

    #[test]
    fn ties_resolve_to_first_encountered() {
        // Both candidates are distance 1 from the target.
        let caps = caps(vec![named("first", "flood zonx"), named("second", "flood zony")]);
        let scan = match_layers(&caps, "flood zone");
        assert_eq!(scan.layer_match.name.as_deref(), Some("first"));
        assert_eq!(scan.layer_match.distance, 1);
    }

    #[test]
    fn category_layers_are_not_candidates() {
        let caps = caps(vec![category("Flood Zones"), named("w", "Woodland")]);
        let scan = match_layers(&caps, "Flood Zones");
        assert_eq!(scan.layer_match.name.as_deref(), Some("w"));
        assert!(!scan.layer_match.exact);
    }

    #[test]
    fn single_choice_reflects_named_count_only() {
        let one = caps(vec![category("Group"), named("w", "Woodland")]);
        let scan = match_layers(&one, "completely different title");
        assert!(scan.layer_match.single_choice);

        let two = caps(vec![named("w", "Woodland"), named("f", "Woodland")]);
        let scan = match_layers(&two, "Woodland");
        assert!(scan.layer_match.exact);
        assert!(!scan.layer_match.single_choice);
    }

    #[test]
    fn no_named_layers_yields_null_match() {
        let caps = caps(vec![category("Group A"), category("Group B")]);
        let scan = match_layers(&caps, "anything");
        assert!(scan.layer_match.name.is_none());
        assert_eq!(scan.layer_match.distance, -1);
        assert!(!scan.layer_match.single_choice);
        assert_eq!(scan.titles_compared, 0);
    }

    #[test]
    fn matching_is_case_insensitive_for_comparison() {
        let caps = caps(vec![named("w", "ANCIENT WOODLAND")]);
        let scan = match_layers(&caps, "ancient woodland");
        assert!(scan.layer_match.exact);
        // Reported title keeps the service's original casing.
        assert_eq!(scan.layer_match.title.as_deref(), Some("ANCIENT WOODLAND"));
    }

    #[test]
    fn winner_carries_bboxes_and_constraints() {
        let caps = caps(vec![named("w", "Woodland")]);
        let scan = match_layers(&caps, "Woodland");
        let m = scan.layer_match;
        assert_eq!(m.access_constraints.as_deref(), Some("none"));
        assert_eq!(m.native_bbox.unwrap().srs, "EPSG:27700");
    }
}
