use anyhow::Result;
use sqlx::PgPool;
use tracing::{error, info};

use crate::models::{Group, User};
use crate::store;

use super::calculator::{self, BillingQuantities, CHILD_UNIT_CENTS, PARENT_UNIT_CENTS};
use super::stripe::{BillingProvider, PROPERTY_TYPE_CHILD, PROPERTY_TYPE_PRINCIPAL};

/// Mid-cycle catch-up deltas. Reductions never produce credits; deltas are
/// clamped at zero and the next cycle absorbs the shrink.
pub fn catch_up_deltas(
    parent_qty: i64,
    child_qty: i64,
    old_parent: i64,
    old_child: i64,
) -> (i64, i64) {
    ((parent_qty - old_parent).max(0), (child_qty - old_child).max(0))
}

/// Entry point invoked after any portfolio or group-membership mutation.
/// Billing failures are logged and never roll the mutation back; the next
/// reconciliation recomputes from live state and converges.
pub async fn reconcile_after_portfolio_change(
    pool: &PgPool,
    provider: &dyn BillingProvider,
    user_id: i32,
) {
    match reconcile_user(pool, provider, user_id).await {
        Ok(Some(quantities)) => {
            info!(
                user_id,
                parent_qty = quantities.parent_qty,
                child_qty = quantities.child_qty,
                tier_total_cents = quantities.tier_total_cents(),
                "billing reconciliation complete"
            );
        }
        Ok(None) => {}
        Err(err) => {
            error!(?err, user_id, "billing reconciliation failed");
        }
    }
}

/// Compares desired quantities against provider state and updates the
/// subscription child item, the recurring parent invoice item, and any
/// mid-cycle catch-up items. Returns `None` when the user has no
/// subscription yet.
pub async fn reconcile_user(
    pool: &PgPool,
    provider: &dyn BillingProvider,
    user_id: i32,
) -> Result<Option<BillingQuantities>> {
    let Some(user) = store::get_user(pool, user_id).await? else {
        return Ok(None);
    };
    let Some(subscription_id) = user.subscription_id.clone() else {
        return Ok(None);
    };

    let quantities = desired_quantities(pool, &user).await?;
    let subscription = provider.subscription(&subscription_id).await?;
    let customer_id = user
        .customer_id
        .clone()
        .unwrap_or_else(|| subscription.customer_id.clone());

    let parent_item = provider.recurring_parent_item(&customer_id).await?;

    if subscription.is_trialing() {
        // During trial only the steady state is tracked; no catch-up items.
        provider
            .set_child_quantity(
                &subscription_id,
                subscription.child_item_id.as_deref(),
                quantities.child_qty,
            )
            .await?;
        provider
            .upsert_recurring_parent_item(
                &customer_id,
                &subscription_id,
                parent_item.as_ref().map(|item| item.id.as_str()),
                quantities.tier_total_cents(),
                quantities.parent_qty,
                &quantities.tier_breakdown,
            )
            .await?;
        return Ok(Some(quantities));
    }

    let old_parent = parent_item.as_ref().map(|item| item.quantity).unwrap_or(0);
    let old_child = subscription.child_quantity;
    let (delta_parent, delta_child) = catch_up_deltas(
        quantities.parent_qty,
        quantities.child_qty,
        old_parent,
        old_child,
    );

    provider
        .set_child_quantity(
            &subscription_id,
            subscription.child_item_id.as_deref(),
            quantities.child_qty,
        )
        .await?;

    if delta_parent > 0 {
        provider
            .create_catch_up_item(
                &customer_id,
                &subscription_id,
                delta_parent * PARENT_UNIT_CENTS,
                delta_parent,
                PROPERTY_TYPE_PRINCIPAL,
            )
            .await?;
    }
    if delta_child > 0 {
        provider
            .create_catch_up_item(
                &customer_id,
                &subscription_id,
                delta_child * CHILD_UNIT_CENTS,
                delta_child,
                PROPERTY_TYPE_CHILD,
            )
            .await?;
    }

    provider
        .upsert_recurring_parent_item(
            &customer_id,
            &subscription_id,
            parent_item.as_ref().map(|item| item.id.as_str()),
            quantities.tier_total_cents(),
            quantities.parent_qty,
            &quantities.tier_breakdown,
        )
        .await?;

    Ok(Some(quantities))
}

/// Loads the portfolio shape and runs the pure calculator over it.
pub async fn desired_quantities(pool: &PgPool, user: &User) -> Result<BillingQuantities> {
    let properties = store::list_team_properties(pool, user.team_id).await?;
    let groups = store::list_user_groups(pool, user.id).await?;
    let mut groups_with_members: Vec<(Group, Vec<uuid::Uuid>)> = Vec::with_capacity(groups.len());
    for group in groups {
        let member_ids = store::group_member_ids(pool, group.id).await?;
        groups_with_members.push((group, member_ids));
    }
    Ok(calculator::calculate(&properties, &groups_with_members))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn growth_produces_positive_deltas() {
        assert_eq!(catch_up_deltas(3, 1, 2, 1), (1, 0));
        assert_eq!(catch_up_deltas(3, 4, 2, 1), (1, 3));
    }

    #[test]
    fn shrink_never_produces_credits() {
        assert_eq!(catch_up_deltas(1, 0, 5, 3), (0, 0));
        assert_eq!(catch_up_deltas(2, 5, 2, 5), (0, 0));
    }

    #[test]
    fn mid_cycle_parent_addition_is_one_unit_at_full_rate() {
        // Steady state parent=2 child=1; one ungrouped property is added.
        let (dp, dc) = catch_up_deltas(3, 1, 2, 1);
        assert_eq!(dp * PARENT_UNIT_CENTS, 1399);
        assert_eq!(dc, 0);
        // The rewritten recurring item for parent_qty=3 totals 3797 cents.
        assert_eq!(calculator::tier_total_cents(3), 3797);
    }
}
