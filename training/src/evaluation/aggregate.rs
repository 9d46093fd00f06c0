//! Patient-level aggregation of clip logits.

use std::collections::BTreeMap;

use lungfusion_core::{CovidStatus, PatientId, PredictionRecord};

/// Raw logits produced for one clip.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipLogits {
    pub patient_id: PatientId,
    pub logits: Vec<f32>,
}

/// Element-wise mean of equal-length logit vectors. Accumulates in f64.
pub fn mean_logits(logits: &[Vec<f32>]) -> Vec<f32> {
    let Some(width) = logits.first().map(Vec::len) else {
        return Vec::new();
    };
    let mut sums = vec![0f64; width];
    for row in logits {
        for (sum, &value) in sums.iter_mut().zip(row) {
            *sum += value as f64;
        }
    }
    let n = logits.len() as f64;
    sums.into_iter().map(|s| (s / n) as f32).collect()
}

/// Index of the largest value; ties go to the lowest index.
pub fn argmax(values: &[f32]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate().skip(1) {
        if v > values[best] {
            best = i;
        }
    }
    best
}

/// Average raw logits per patient and take the argmax.
///
/// Output is sorted by patient id and independent of input order up to
/// floating-point summation error.
pub fn aggregate_patient_logits(
    clips: impl IntoIterator<Item = ClipLogits>,
) -> Vec<PredictionRecord> {
    let mut grouped: BTreeMap<PatientId, Vec<Vec<f32>>> = BTreeMap::new();
    for clip in clips {
        grouped.entry(clip.patient_id).or_default().push(clip.logits);
    }

    grouped
        .into_iter()
        .map(|(patient_id, logits)| {
            let mean = mean_logits(&logits);
            PredictionRecord {
                status: CovidStatus::from_class_index(argmax(&mean)),
                patient_id,
                mean_logits: mean,
                clip_count: logits.len(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn clip(id: &str, logits: &[f32]) -> ClipLogits {
        ClipLogits {
            patient_id: PatientId::new(id),
            logits: logits.to_vec(),
        }
    }

    #[test]
    fn test_mean_of_raw_logits_decides() {
        // Mean [1.0, 0.0] -> class 0 even though one clip votes positive.
        let records = aggregate_patient_logits(vec![clip("7", &[2.0, -1.0]), clip("7", &[0.0, 1.0])]);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, CovidStatus::Negative);
        assert_eq!(records[0].mean_logits, vec![1.0, 0.0]);
        assert_eq!(records[0].clip_count, 2);
    }

    #[test]
    fn test_records_sorted_by_patient() {
        let records = aggregate_patient_logits(vec![
            clip("b", &[0.0, 1.0]),
            clip("a", &[1.0, 0.0]),
            clip("c", &[0.0, 1.0]),
        ]);
        let ids: Vec<&str> = records.iter().map(|r| r.patient_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(records[1].status, CovidStatus::Positive);
    }

    #[test]
    fn test_argmax_tie_prefers_first() {
        assert_eq!(argmax(&[0.5, 0.5]), 0);
        assert_eq!(argmax(&[0.1, 0.9]), 1);
        assert_eq!(argmax(&[]), 0);
    }

    #[test]
    fn test_empty_input() {
        assert!(aggregate_patient_logits(Vec::new()).is_empty());
        assert!(mean_logits(&[]).is_empty());
    }

    proptest! {
        #[test]
        fn test_aggregation_is_order_invariant(
            rows in prop::collection::vec((0u8..4, -5.0f32..5.0, -5.0f32..5.0), 1..30),
        ) {
            let clips: Vec<ClipLogits> = rows
                .iter()
                .map(|&(p, a, b)| clip(&p.to_string(), &[a, b]))
                .collect();
            let mut reversed = clips.clone();
            reversed.reverse();

            let forward = aggregate_patient_logits(clips);
            let backward = aggregate_patient_logits(reversed);
            prop_assert_eq!(forward.len(), backward.len());
            for (f, b) in forward.iter().zip(&backward) {
                prop_assert_eq!(&f.patient_id, &b.patient_id);
                prop_assert_eq!(f.clip_count, b.clip_count);
                for (x, y) in f.mean_logits.iter().zip(&b.mean_logits) {
                    prop_assert!((x - y).abs() < 1e-4);
                }
            }
        }
    }
}
