//! The Direction Resolver. A pure, synchronous function with no
//! knowledge of transport or storage — everything it needs is passed in.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::document::{fingerprint, Document};

/// Transfer direction, or the absence of one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    None,
    CloudToLocal,
    LocalToCloud,
    Conflict,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::CloudToLocal => "cloud_to_local",
            Self::LocalToCloud => "local_to_cloud",
            Self::Conflict => "conflict",
        };
        f.write_str(s)
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "cloud_to_local" => Ok(Self::CloudToLocal),
            "local_to_cloud" => Ok(Self::LocalToCloud),
            "conflict" => Ok(Self::Conflict),
            other => Err(format!("unknown direction: {other}")),
        }
    }
}

/// The hint a caller may pin a sync to instead of letting the resolver
/// decide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectionHint {
    Auto,
    CloudToLocal,
    LocalToCloud,
}

/// Decide transfer direction from the two observed documents and the
/// fingerprints last recorded as "in sync".
///
/// `sync_hash_cloud`/`sync_hash_local` are `None` for a record that has
/// never completed a sync (a fresh [`crate::store::model::SyncRecord`]).
pub fn resolve(
    cloud_doc: Option<&Document>,
    local_doc: Option<&Document>,
    sync_hash_cloud: Option<&str>,
    sync_hash_local: Option<&str>,
    exclude_fields: &[String],
) -> Direction {
    match (cloud_doc, local_doc) {
        (Some(_), None) => Direction::CloudToLocal,
        (None, Some(_)) => Direction::LocalToCloud,
        (None, None) => Direction::None,
        (Some(cloud), Some(local)) => {
            let hc = fingerprint(cloud, exclude_fields);
            let hl = fingerprint(local, exclude_fields);

            let cloud_changed = sync_hash_cloud != Some(hc.as_str());
            let local_changed = sync_hash_local != Some(hl.as_str());

            match (cloud_changed, local_changed) {
                (false, false) => Direction::None,
                (true, false) => Direction::CloudToLocal,
                (false, true) => Direction::LocalToCloud,
                (true, true) => Direction::Conflict,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(v: serde_json::Value) -> Document {
        v.as_object().unwrap().clone()
    }

    fn acme() -> Document {
        doc(json!({"name": "ACME-01", "customer_name": "Acme"}))
    }

    fn acme_edited() -> Document {
        doc(json!({"name": "ACME-01", "customer_name": "Acme Inc"}))
    }

    #[test]
    fn only_cloud_exists() {
        let d = resolve(Some(&acme()), None, None, None, &[]);
        assert_eq!(d, Direction::CloudToLocal);
    }

    #[test]
    fn only_local_exists() {
        let d = resolve(None, Some(&acme()), None, None, &[]);
        assert_eq!(d, Direction::LocalToCloud);
    }

    #[test]
    fn neither_exists() {
        assert_eq!(resolve(None, None, None, None, &[]), Direction::None);
    }

    #[test]
    fn both_unchanged_since_last_sync() {
        let hc = fingerprint(&acme(), &[]);
        let d = resolve(Some(&acme()), Some(&acme()), Some(&hc), Some(&hc), &[]);
        assert_eq!(d, Direction::None);
    }

    #[test]
    fn cloud_changed_only() {
        let hc_old = fingerprint(&acme(), &[]);
        let hl = fingerprint(&acme(), &[]);
        let d = resolve(Some(&acme_edited()), Some(&acme()), Some(&hc_old), Some(&hl), &[]);
        assert_eq!(d, Direction::CloudToLocal);
    }

    #[test]
    fn local_changed_only() {
        let hc = fingerprint(&acme(), &[]);
        let hl_old = fingerprint(&acme(), &[]);
        let d = resolve(Some(&acme()), Some(&acme_edited()), Some(&hc), Some(&hl_old), &[]);
        assert_eq!(d, Direction::LocalToCloud);
    }

    #[test]
    fn both_changed_is_conflict() {
        let hc_old = fingerprint(&acme(), &[]);
        let hl_old = fingerprint(&acme(), &[]);
        let d = resolve(
            Some(&acme_edited()),
            Some(&doc(json!({"name": "ACME-01", "customer_name": "Local Edit"}))),
            Some(&hc_old),
            Some(&hl_old),
            &[],
        );
        assert_eq!(d, Direction::Conflict);
    }

    /// A fresh record with two non-empty, diverging documents is a
    /// conflict, not `none`: there is no prior fingerprint to trust, so
    /// neither side can be assumed to be the source of the divergence.
    #[test]
    fn fresh_record_with_diverging_documents_is_conflict() {
        let d = resolve(
            Some(&acme()),
            Some(&acme_edited()),
            None,
            None,
            &[],
        );
        assert_eq!(d, Direction::Conflict);
    }

    /// Totality: every combination yields exactly one of the four outcomes.
    #[test]
    fn totality_over_sampled_inputs() {
        let a = acme();
        let b = acme_edited();
        let docs = [None, Some(&a), Some(&b)];
        let hashes: [Option<&str>; 2] = [None, Some("deadbeef")];
        for cloud in docs {
            for local in docs {
                for sc in hashes {
                    for sl in hashes {
                        let d = resolve(cloud, local, sc, sl, &[]);
                        assert!(matches!(
                            d,
                            Direction::None
                                | Direction::CloudToLocal
                                | Direction::LocalToCloud
                                | Direction::Conflict
                        ));
                    }
                }
            }
        }
    }
}
