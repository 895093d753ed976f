//! Money math for extracted line items
//!
//! This is the single source of truth for subtotal/discount/net/tax totals.
//! No other module re-derives these values; every strategy funnels its raw
//! `(quantity, unit price, discount%)` triple through [`line_totals`].

use serde::{Deserialize, Serialize};

/// Computed monetary fields of a line item. Flattened into
/// [`crate::models::LineItem`] on serialization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LineTotals {
    pub subtotal: f64,
    pub discount_amount: f64,
    pub net_total: f64,
    pub tax_amount: f64,
    pub net_total_incl_tax: f64,
}

/// Coerce a raw numeric input into something safe to do money math with.
/// Negative and non-finite values become 0.
fn coerce(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

/// Compute all derived totals for one line item.
///
/// Pure and total: never errors, bad inputs coerce to 0 and the discount
/// clamps to [0, 100].
pub fn line_totals(
    quantity: f64,
    unit_price_excl_tax: f64,
    discount_percent: f64,
    tax_rate_percent: f64,
) -> LineTotals {
    let quantity = coerce(quantity);
    let unit_price = coerce(unit_price_excl_tax);
    let discount = coerce(discount_percent).min(100.0);
    let tax_rate = coerce(tax_rate_percent);

    let subtotal = quantity * unit_price;
    let discount_amount = subtotal * discount / 100.0;
    let net_total = subtotal - discount_amount;
    let tax_amount = net_total * tax_rate / 100.0;
    let net_total_incl_tax = net_total + tax_amount;

    LineTotals {
        subtotal,
        discount_amount,
        net_total,
        tax_amount,
        net_total_incl_tax,
    }
}

/// Back out a tax-exclusive unit price from a tax-inclusive one.
/// Used when a learned algorithm declares `prices_include_tax`.
pub fn exclusive_price(price_incl_tax: f64, tax_rate_percent: f64) -> f64 {
    let price = coerce(price_incl_tax);
    let rate = coerce(tax_rate_percent);
    price / (1.0 + rate / 100.0)
}
