use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Group, Property};

/// Price per parent unit in the first band; also the catch-up rate for a
/// mid-cycle parent addition.
pub const PARENT_UNIT_CENTS: i64 = 1399;

/// Flat per-unit price for child (grouped duplicate) listings.
pub const CHILD_UNIT_CENTS: i64 = 399;

/// Banded tier schedule over parent units: (upper bound inclusive, cents).
const TIER_BANDS: &[(i64, i64)] = &[
    (1, 1399),
    (5, 1199),
    (15, 899),
    (30, 549),
    (i64::MAX, 399),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierLine {
    pub band: String,
    pub units: i64,
    pub unit_amount_cents: i64,
    pub subtotal_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingQuantities {
    pub parent_qty: i64,
    pub child_qty: i64,
    pub tier_breakdown: Vec<TierLine>,
}

impl BillingQuantities {
    pub fn tier_total_cents(&self) -> i64 {
        self.tier_breakdown.iter().map(|line| line.subtotal_cents).sum()
    }
}

/// Derives billing buckets from the portfolio shape. Every group of size n
/// contributes 1 parent and n-1 children; every ungrouped property is a
/// parent. Pure and deterministic.
pub fn calculate(properties: &[Property], groups: &[(Group, Vec<Uuid>)]) -> BillingQuantities {
    let property_ids: HashSet<Uuid> = properties.iter().map(|p| p.id).collect();

    let mut parent_qty = 0i64;
    let mut child_qty = 0i64;
    let mut grouped: HashSet<Uuid> = HashSet::new();

    for (_, member_ids) in groups {
        let members: Vec<Uuid> = member_ids
            .iter()
            .copied()
            .filter(|id| property_ids.contains(id))
            .collect();
        if members.is_empty() {
            continue;
        }
        parent_qty += 1;
        child_qty += members.len() as i64 - 1;
        grouped.extend(members);
    }

    parent_qty += properties
        .iter()
        .filter(|p| !grouped.contains(&p.id))
        .count() as i64;

    BillingQuantities {
        parent_qty,
        child_qty,
        tier_breakdown: tier_breakdown(parent_qty),
    }
}

/// Decomposes a parent count over the tier bands.
pub fn tier_breakdown(parent_qty: i64) -> Vec<TierLine> {
    let mut lines = Vec::new();
    let mut remaining = parent_qty.max(0);
    let mut lower = 1i64;
    for &(upper, cents) in TIER_BANDS {
        if remaining == 0 {
            break;
        }
        let band_capacity = if upper == i64::MAX {
            remaining
        } else {
            upper - lower + 1
        };
        let units = remaining.min(band_capacity);
        let band = if upper == i64::MAX {
            format!("{lower}+")
        } else if lower == upper {
            format!("{lower}")
        } else {
            format!("{lower}-{upper}")
        };
        lines.push(TierLine {
            band,
            units,
            unit_amount_cents: cents,
            subtotal_cents: units * cents,
        });
        remaining -= units;
        lower = upper.saturating_add(1);
    }
    lines
}

/// Total recurring parent amount for a given parent count.
pub fn tier_total_cents(parent_qty: i64) -> i64 {
    tier_breakdown(parent_qty)
        .iter()
        .map(|line| line.subtotal_cents)
        .sum()
}
