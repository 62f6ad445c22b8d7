use crate::types::{Body, MAX_BODIES};

/// Tracking id forwarded to the sensor for an unfilled selection slot.
pub const UNSET_TRACKING_ID: u32 = 0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SelectedBody {
    /// Slot within the frame the body was found in.
    pub index: usize,
    pub tracking_id: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Selection {
    pub primary: Option<SelectedBody>,
    pub secondary: Option<SelectedBody>,
}

impl Selection {
    /// The pair handed to the sensor's "keep tracking these" request.
    pub fn tracked_ids(&self) -> [u32; 2] {
        let id = |slot: Option<SelectedBody>| slot.map_or(UNSET_TRACKING_ID, |b| b.tracking_id);
        [id(self.primary), id(self.secondary)]
    }
}

struct Nearest {
    depth: f32,
    body: Option<SelectedBody>,
}

impl Nearest {
    const EMPTY: Nearest = Nearest {
        depth: f32::INFINITY,
        body: None,
    };
}

/// Picks the nearest and second-nearest candidate bodies in one pass.
///
/// Comparisons are strict, so among equal depths the lower slot index wins.
pub fn select_targets(bodies: &[Body]) -> Selection {
    let mut first = Nearest::EMPTY;
    let mut second = Nearest::EMPTY;

    for (index, body) in bodies.iter().take(MAX_BODIES).enumerate() {
        if !body.state.is_candidate() {
            continue;
        }
        let candidate = Nearest {
            depth: body.depth,
            body: Some(SelectedBody {
                index,
                tracking_id: body.tracking_id,
            }),
        };
        if candidate.depth < first.depth {
            second = std::mem::replace(&mut first, candidate);
        } else if candidate.depth < second.depth {
            second = candidate;
        }
    }

    Selection {
        primary: first.body,
        secondary: second.body,
    }
}
