use super::Order;
use serde::Serialize;
use std::collections::BTreeMap;

/// Result of checking a container against the dense-ordering invariant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DensityReport {
    pub count: usize,
    /// Positions in `0..count` that no active row occupies.
    pub missing: Vec<Order>,
    /// Positions held by more than one active row.
    pub duplicated: Vec<Order>,
    /// Positions outside `0..count`.
    pub out_of_range: Vec<Order>,
}

impl DensityReport {
    #[must_use]
    pub fn from_orders(orders: impl IntoIterator<Item = Order>) -> Self {
        let mut seen: BTreeMap<Order, usize> = BTreeMap::new();
        let mut count = 0;
        for order in orders {
            *seen.entry(order).or_default() += 1;
            count += 1;
        }

        let upper = Order::try_from(count).unwrap_or(Order::MAX);
        let missing = (0..upper).filter(|order| !seen.contains_key(order)).collect();
        let duplicated = seen
            .iter()
            .filter(|(_, hits)| **hits > 1)
            .map(|(order, _)| *order)
            .collect();
        let out_of_range = seen
            .keys()
            .copied()
            .filter(|order| !(0..upper).contains(order))
            .collect();

        Self {
            count,
            missing,
            duplicated,
            out_of_range,
        }
    }

    #[must_use]
    pub fn is_dense(&self) -> bool {
        self.missing.is_empty() && self.duplicated.is_empty() && self.out_of_range.is_empty()
    }
}
