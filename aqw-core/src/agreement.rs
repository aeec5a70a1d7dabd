//! Agreement engine
//!
//! Computes inter-annotator agreement over the current set of submitted
//! labels for a task. All metrics return values in [0, 1]: the
//! chance-corrected metrics are rescaled from [-1, 1] via (k+1)/2 so
//! reports can compare methods on one axis.
//!
//! Two metrics are documented simplifications carried over from the
//! reference workflow: Scott's pi delegates to Fleiss' kappa, and
//! Krippendorff's alpha uses a two-term disagreement ratio rather than
//! the full distance-matrix form. Downstream reports expect these exact
//! values; replacing them with the textbook formulas is a product
//! decision, not a bug fix.

use aqw_common::config::AgreementConfig;
use aqw_common::models::AgreementMetric;
use std::collections::BTreeMap;

/// Inter-annotator agreement scorer
///
/// Pure computation; holds only the configured threshold below which a
/// score counts as disagreement worth analyzing.
pub struct AgreementEngine {
    low_agreement_threshold: f64,
}

impl AgreementEngine {
    pub fn new() -> Self {
        Self {
            low_agreement_threshold: 0.75,
        }
    }

    pub fn from_config(config: &AgreementConfig) -> Self {
        Self {
            low_agreement_threshold: config.low_agreement_threshold,
        }
    }

    /// Score agreement over one task's current labels with the chosen
    /// metric. A single label (or none) trivially agrees with itself
    /// and scores 1.0.
    pub fn score(&self, labels: &[String], metric: AgreementMetric) -> f64 {
        if labels.len() <= 1 {
            return 1.0;
        }
        match metric {
            AgreementMetric::PercentAgreement => percent_agreement(labels),
            AgreementMetric::CohensKappa => cohens_kappa(labels),
            AgreementMetric::FleissKappa => fleiss_kappa(labels),
            AgreementMetric::KrippendorffsAlpha => krippendorffs_alpha(labels),
            // Approximated by Fleiss' kappa in this system
            AgreementMetric::ScottsPi => fleiss_kappa(labels),
        }
    }

    /// Score the same labels under every metric, in report order
    pub fn compare_methods(&self, labels: &[String]) -> Vec<(AgreementMetric, f64)> {
        AgreementMetric::ALL
            .iter()
            .map(|&metric| (metric, self.score(labels, metric)))
            .collect()
    }

    /// Whether a score clears the configured agreement threshold
    pub fn meets_threshold(&self, score: f64) -> bool {
        score >= self.low_agreement_threshold
    }

    pub fn low_agreement_threshold(&self) -> f64 {
        self.low_agreement_threshold
    }
}

impl Default for AgreementEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn label_counts(labels: &[String]) -> BTreeMap<&str, usize> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for label in labels {
        *counts.entry(label.as_str()).or_insert(0) += 1;
    }
    counts
}

/// Proportion of labels equal to the modal label
fn percent_agreement(labels: &[String]) -> f64 {
    let counts = label_counts(labels);
    let modal = counts.values().copied().max().unwrap_or(0);
    modal as f64 / labels.len() as f64
}

/// Cohen's kappa for exactly two raters; chance agreement is estimated
/// as 1/|distinct labels|. Falls back to percent agreement for any
/// other rater count.
fn cohens_kappa(labels: &[String]) -> f64 {
    if labels.len() != 2 {
        return percent_agreement(labels);
    }
    let distinct = label_counts(labels).len();
    if distinct <= 1 {
        return 1.0;
    }

    let p_o = if labels[0] == labels[1] { 1.0 } else { 0.0 };
    let p_e = 1.0 / distinct as f64;
    rescale((p_o - p_e) / (1.0 - p_e))
}

/// Fleiss' kappa for N raters on a single item
fn fleiss_kappa(labels: &[String]) -> f64 {
    let n = labels.len() as f64;
    let counts = label_counts(labels);
    if counts.len() <= 1 {
        return 1.0;
    }

    let sum_squares: f64 = counts.values().map(|&c| (c * c) as f64).sum();
    let p_i = (sum_squares - n) / (n * (n - 1.0));
    let p_e: f64 = counts.values().map(|&c| (c as f64 / n).powi(2)).sum();

    rescale((p_i - p_e) / (1.0 - p_e))
}

/// Simplified Krippendorff's alpha: 1 - D_o/D_e with D_o the modal
/// disagreement share and D_e = (U-1)/U over U distinct labels
fn krippendorffs_alpha(labels: &[String]) -> f64 {
    let distinct = label_counts(labels).len();
    if distinct <= 1 {
        return 1.0;
    }

    let d_o = 1.0 - percent_agreement(labels);
    let d_e = (distinct as f64 - 1.0) / distinct as f64;
    rescale(1.0 - d_o / d_e)
}

/// Map a chance-corrected coefficient from [-1, 1] into [0, 1]
fn rescale(kappa: f64) -> f64 {
    ((kappa + 1.0) / 2.0).clamp(0.0, 1.0)
}
