pub mod calculator;
pub mod checkout;
pub mod reconciler;
pub mod stripe;
pub mod webhook;

pub use calculator::{
    calculate as calculate_quantities, tier_total_cents, BillingQuantities, TierLine,
    CHILD_UNIT_CENTS, PARENT_UNIT_CENTS,
};
pub use reconciler::{reconcile_after_portfolio_change, reconcile_user};
pub use stripe::{BillingProvider, CheckoutRequest, ProviderSubscription, StripeClient};
pub use webhook::{stripe_webhook, verify_signature};
