//! Conversions between petal outputs and class labels.
//!
//! A "sparse" label is a list of class indices; the dense equivalent is a
//! one-hot (single index) or multi-hot (several indices) vector.

/// Index of the largest output (first one wins on ties).
pub fn argmax(output: &[f32]) -> usize {
    let mut max_value = output[0];
    let mut label = 0;
    for (i, &v) in output.iter().enumerate() {
        if v > max_value {
            max_value = v;
            label = i;
        }
    }
    label
}

/// Indices of every output at or above `threshold`.
pub fn output_to_labels(output: &[f32], threshold: f32) -> Vec<u32> {
    output
        .iter()
        .enumerate()
        .filter(|(_, &v)| v >= threshold)
        .map(|(i, _)| i as u32)
        .collect()
}

/// Writes a one-hot vector: `low` everywhere, `upper` at `label`.
///
/// An out-of-range label leaves the vector all-`low`.
pub fn label_to_output(label: u32, output: &mut [f32], low: f32, upper: f32) {
    output.fill(low);
    if (label as usize) < output.len() {
        output[label as usize] = upper;
    } else {
        log::error!(
            "label {label} is out of bounds for output with {} classes",
            output.len()
        );
    }
}

/// Writes a multi-hot vector: `low` everywhere, `upper` at every label.
///
/// Out-of-range labels are skipped.
pub fn labels_to_output(labels: &[u32], output: &mut [f32], low: f32, upper: f32) {
    output.fill(low);
    for &label in labels {
        if (label as usize) < output.len() {
            output[label as usize] = upper;
        } else {
            log::error!(
                "label {label} is out of bounds for output with {} classes",
                output.len()
            );
        }
    }
}
