use std::collections::BTreeMap;

/// Accumulates criterion gains per column and normalizes them into the
/// per-ensemble importance shares.
#[derive(Debug, Default)]
pub struct ImportanceMaker {
    gains: BTreeMap<String, f64>,
}

impl ImportanceMaker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, column: String, gain: f64) {
        if gain.is_finite() && gain > 0.0 {
            *self.gains.entry(column).or_insert(0.0) += gain;
        }
    }

    /// Shares summing to one, largest first; ties resolve by column name.
    pub fn normalized(&self) -> Vec<(String, f64)> {
        let total: f64 = self.gains.values().sum();
        if total <= 0.0 {
            return Vec::new();
        }

        let mut shares: Vec<(String, f64)> = self
            .gains
            .iter()
            .map(|(column, gain)| (column.clone(), gain / total))
            .collect();
        shares.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap().then_with(|| a.0.cmp(&b.0)));
        shares
    }
}
