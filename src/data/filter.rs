use super::model::{ActivityLabel, RawSubjectRecord, UnifiedSample};

// ---------------------------------------------------------------------------
// Row selection: activity filter and stride decimation
// ---------------------------------------------------------------------------

/// Indices of rows whose label is one of the four study conditions.
/// Only the first `len` rows are considered.
pub fn activity_indices(labels: &[i64], len: usize) -> Vec<usize> {
    labels
        .iter()
        .take(len)
        .enumerate()
        .filter(|(_, code)| ActivityLabel::from_code(**code).is_some())
        .map(|(i, _)| i)
        .collect()
}

/// Keep items 0, `stride`, 2 * `stride`, ... (no averaging).
///
/// The result has `ceil(items.len() / stride)` elements.
pub fn decimate<T: Copy>(items: &[T], stride: usize) -> Vec<T> {
    items.iter().step_by(stride.max(1)).copied().collect()
}

/// Align, filter, decimate and label one subject's chest record.
///
/// Channels are truncated to the shortest sequence, rows with other label
/// codes are dropped, and every `stride`-th remaining row is kept.
pub fn subject_samples(
    subject_id: &str,
    record: &RawSubjectRecord,
    stride: usize,
) -> Vec<UnifiedSample> {
    let len = record.aligned_len();
    let kept = activity_indices(&record.labels, len);

    decimate(&kept, stride)
        .into_iter()
        .filter_map(|i| {
            let label = ActivityLabel::from_code(record.labels[i])?;
            Some(UnifiedSample {
                subject_id: subject_id.to_string(),
                eda: record.eda[i],
                temperature: record.temp[i],
                ecg: record.ecg[i],
                respiration: record.resp[i],
                label_code: label.code(),
                condition_name: label.name(),
            })
        })
        .collect()
}
