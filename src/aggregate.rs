//! Majority vote over per-frame labels.

use crate::{Label, NUM_CLASSES};

/// Reduce an ordered sequence of per-frame labels to one label.
///
/// The label with the highest count wins. On a tie, the label that reached the
/// winning count first (scanning left to right) is kept: the leader only
/// changes when another label's running count strictly exceeds it.
///
/// An empty sequence yields `Label::Unknown`.
pub fn aggregate(labels: &[Label]) -> Label {
    let mut tally = Tally::default();
    for &label in labels {
        tally.push(label);
    }
    tally.leader()
}

/// Running counter with a current leader.
#[derive(Clone, Debug)]
pub struct Tally {
    counts: [usize; NUM_CLASSES + 1],
    leader: Option<(Label, usize)>,
}

impl Default for Tally {
    fn default() -> Self {
        Self {
            counts: [0; NUM_CLASSES + 1],
            leader: None,
        }
    }
}

impl Tally {
    pub fn push(&mut self, label: Label) {
        let slot = &mut self.counts[label as usize];
        *slot += 1;
        let count = *slot;
        match self.leader {
            Some((_, best)) if count <= best => {}
            _ => self.leader = Some((label, count)),
        }
    }

    pub fn leader(&self) -> Label {
        self.leader.map_or(Label::Unknown, |(label, _)| label)
    }

    pub fn count(&self, label: Label) -> usize {
        self.counts[label as usize]
    }

    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use Label::*;

    #[test]
    fn empty_sequence_is_unknown() {
        assert_eq!(aggregate(&[]), Unknown);
    }

    #[test]
    fn clear_majority_wins() {
        assert_eq!(aggregate(&[Abuse, Arrest, Abuse, Normal, Abuse]), Abuse);
    }

    #[test]
    fn tie_goes_to_first_label_to_reach_the_max() {
        // Arrest reaches 2 at index 1, Normal only at index 3.
        assert_eq!(aggregate(&[Arrest, Arrest, Normal, Normal]), Arrest);
    }

    #[test]
    fn tie_break_is_not_first_occurrence() {
        // Fighting occurs first, but Arson reaches 2 before Fighting does.
        assert_eq!(aggregate(&[Fighting, Arson, Arson, Fighting]), Arson);
    }

    #[test]
    fn tie_break_is_not_enum_order() {
        assert_eq!(aggregate(&[Normal, Abuse]), Normal);
        assert_eq!(aggregate(&[Abuse, Normal]), Abuse);
    }

    #[test]
    fn late_overtake_replaces_leader() {
        assert_eq!(
            aggregate(&[Arson, Arson, Burglary, Burglary, Burglary]),
            Burglary
        );
    }

    #[test]
    fn matches_brute_force_on_generated_sequences() {
        // Walk a fixed pseudo-random sequence family and compare against a
        // direct "first index at which a label hits the max count" search.
        let mut state = 0x2545_f491_u32;
        for len in 0..40 {
            let mut labels = Vec::with_capacity(len);
            for _ in 0..len {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                labels.push(Label::CLASSES[(state % 4) as usize]);
            }
            assert_eq!(aggregate(&labels), brute_force(&labels), "{labels:?}");
        }
    }

    fn brute_force(labels: &[Label]) -> Label {
        let max = Label::CLASSES
            .iter()
            .map(|c| labels.iter().filter(|l| *l == c).count())
            .max()
            .unwrap_or(0);
        if max == 0 {
            return Unknown;
        }
        let mut seen = std::collections::HashMap::new();
        for &label in labels {
            let count = seen.entry(label).or_insert(0);
            *count += 1;
            if *count == max {
                return label;
            }
        }
        Unknown
    }

    #[test]
    fn tally_tracks_counts() {
        let mut tally = Tally::default();
        for label in [Assault, Assault, Explosion] {
            tally.push(label);
        }
        assert_eq!(tally.count(Assault), 2);
        assert_eq!(tally.count(Explosion), 1);
        assert_eq!(tally.total(), 3);
        assert_eq!(tally.leader(), Assault);
    }
}
