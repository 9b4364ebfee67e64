//! Detection of polygons nested inside other polygons of the same layer.
//!
//! Mappers often draw an outline of a whole solar farm and, separately,
//! each panel row inside it. Both carry area, so area-based capacity
//! inference must skip the nested ones. Candidate pairs come from an R-tree
//! envelope prefilter; only pairs whose envelopes nest are tested exactly.

use std::collections::BTreeSet;

use geo::{Geometry, MultiPolygon, Relate};
use pvgeo_installation_models::NormalizedFeature;
use rstar::{AABB, Envelope as _, RTree, RTreeObject};

use crate::envelope_of;

/// A polygonal layer member stored in the R-tree.
struct LayerMember {
    mapping_id: i64,
    envelope: AABB<[f64; 2]>,
    polygon: MultiPolygon<f64>,
}

impl RTreeObject for LayerMember {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// Returns the identities of polygons that lie within another polygon of
/// the layer.
///
/// Only the inner member of a pair is reported. Members with the same
/// identity, and shapes that are topologically equal, never count as
/// containing each other. Non-polygonal features are ignored.
#[must_use]
pub fn find_contained(features: &[NormalizedFeature]) -> BTreeSet<i64> {
    let members: Vec<LayerMember> = features
        .iter()
        .filter_map(|feature| {
            let polygon = polygonal(&feature.geometry)?;
            Some(LayerMember {
                mapping_id: feature.mapping_id,
                envelope: envelope_of(&feature.geometry),
                polygon,
            })
        })
        .collect();

    let tree = RTree::bulk_load(members);
    let mut contained = BTreeSet::new();

    for member in tree.iter() {
        let is_inside_another = tree
            .locate_in_envelope_intersecting(&member.envelope)
            .filter(|other| other.mapping_id != member.mapping_id)
            .filter(|other| other.envelope.contains_envelope(&member.envelope))
            .any(|other| {
                let matrix = member.polygon.relate(&other.polygon);
                matrix.is_within() && !matrix.is_equal_topo()
            });

        if is_inside_another {
            contained.insert(member.mapping_id);
        }
    }

    log::info!(
        "Found {} mapped items entirely contained within others; \
         their area will not be used for inferring capacity",
        contained.len()
    );

    contained
}

fn polygonal(geometry: &Geometry<f64>) -> Option<MultiPolygon<f64>> {
    match geometry {
        Geometry::Polygon(polygon) => Some(MultiPolygon(vec![polygon.clone()])),
        Geometry::MultiPolygon(multi) => Some(multi.clone()),
        _ => None,
    }
}
