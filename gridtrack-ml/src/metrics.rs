//! Classification metrics computed on the held-out split.

/// Probabilities are clipped to `[EPS, 1 - EPS]` before taking logs.
const EPS: f64 = 1e-15;

/// Fraction of predictions equal to the true label. `0.0` for empty input.
pub fn accuracy(y_true: &[usize], y_pred: &[usize]) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }
    let correct = y_true
        .iter()
        .zip(y_pred)
        .filter(|(t, p)| t == p)
        .count();
    correct as f64 / y_true.len() as f64
}

/// Mean cross-entropy of the true class under the predicted distribution.
pub fn log_loss(y_true: &[usize], probabilities: &[Vec<f64>]) -> f64 {
    if y_true.is_empty() {
        return 0.0;
    }
    let total: f64 = y_true
        .iter()
        .zip(probabilities)
        .map(|(&label, probs)| {
            let p = probs.get(label).copied().unwrap_or(0.0).clamp(EPS, 1.0 - EPS);
            -p.ln()
        })
        .sum();
    total / y_true.len() as f64
}
