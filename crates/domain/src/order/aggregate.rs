//! Order aggregate implementation.

use chrono::{DateTime, Utc};
use common::{Money, OrderId, ProductId, UserId};
use serde::Serialize;

use super::{LineItem, OrderError, OrderState, PaymentMethod, PaymentReference};

/// Order aggregate root.
///
/// Fields are private: the total is derived from the line items and only
/// changes through the composition methods, and the state only changes through
/// [`Order::transition_to`] and [`Order::mark_paid`]. Mutations act on the
/// in-memory value; a repository write is needed for them to take effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Order {
    /// Assigned by the repository on creation.
    id: Option<OrderId>,

    /// Storage revision, bumped by the repository on every write.
    version: i64,

    user_id: UserId,
    state: OrderState,

    /// Always the sum of `items[*].subtotal`.
    total: Money,

    shipping_address: String,
    payment_method: PaymentMethod,

    /// Set only by settlement.
    payment_reference: Option<PaymentReference>,

    items: Vec<LineItem>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Raw fields of a persisted order, as read back from storage.
///
/// [`Order::restore`] re-validates them; the total is recomputed rather than
/// trusted.
#[derive(Debug, Clone)]
pub struct OrderParts {
    pub id: OrderId,
    pub version: i64,
    pub user_id: UserId,
    pub state: OrderState,
    pub shipping_address: String,
    pub payment_method: PaymentMethod,
    pub payment_reference: Option<PaymentReference>,
    pub items: Vec<LineItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// Construction
impl Order {
    /// Creates an empty, unpersisted order in `Pending` state.
    pub fn new(
        user_id: UserId,
        shipping_address: impl Into<String>,
        payment_method: PaymentMethod,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            version: 0,
            user_id,
            state: OrderState::Pending,
            total: Money::zero(),
            shipping_address: shipping_address.into(),
            payment_method,
            payment_reference: None,
            items: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Creates an unpersisted pending order holding `items`.
    ///
    /// Fails with [`OrderError::NoItems`] when `items` is empty.
    pub fn with_items(
        user_id: UserId,
        shipping_address: impl Into<String>,
        payment_method: PaymentMethod,
        items: Vec<LineItem>,
    ) -> Result<Self, OrderError> {
        if items.is_empty() {
            return Err(OrderError::NoItems);
        }
        let total = sum_subtotals(&items)?;
        let mut order = Self::new(user_id, shipping_address, payment_method);
        order.items = items;
        order.total = total;
        Ok(order)
    }

    /// Rebuilds an order from stored fields, checking every invariant.
    pub fn restore(parts: OrderParts) -> Result<Self, OrderError> {
        let OrderParts {
            id,
            version,
            user_id,
            state,
            shipping_address,
            payment_method,
            payment_reference,
            items,
            created_at,
            updated_at,
        } = parts;

        match (&payment_reference, state) {
            (None, s) if s.requires_payment_reference() => {
                return Err(OrderError::MissingPaymentReference { state });
            }
            (Some(_), OrderState::Pending | OrderState::Cancelled) => {
                return Err(OrderError::UnexpectedPaymentReference { state });
            }
            _ => {}
        }

        let total = sum_subtotals(&items)?;

        Ok(Self {
            id: Some(id),
            version,
            user_id,
            state,
            total,
            shipping_address,
            payment_method,
            payment_reference,
            items,
            created_at,
            updated_at,
        })
    }

    /// Stamps the identity and revision a repository assigned on write.
    pub fn into_persisted(mut self, id: OrderId, version: i64) -> Self {
        self.id = Some(id);
        self.version = version;
        self
    }
}

// Query methods
impl Order {
    pub fn id(&self) -> Option<OrderId> {
        self.id
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn state(&self) -> OrderState {
        self.state
    }

    /// Returns the order total, always equal to the sum of item subtotals.
    pub fn total(&self) -> Money {
        self.total
    }

    pub fn shipping_address(&self) -> &str {
        &self.shipping_address
    }

    pub fn payment_method(&self) -> PaymentMethod {
        self.payment_method
    }

    pub fn payment_reference(&self) -> Option<&PaymentReference> {
        self.payment_reference.as_ref()
    }

    /// Returns the line items in insertion order.
    pub fn items(&self) -> &[LineItem] {
        &self.items
    }

    /// Returns the first line item for `product_id`, if any.
    pub fn item(&self, product_id: ProductId) -> Option<&LineItem> {
        self.items.iter().find(|item| item.product_id() == product_id)
    }

    /// Returns the sum of all item quantities.
    pub fn total_quantity(&self) -> u64 {
        self.items.iter().map(|item| u64::from(item.quantity())).sum()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

// Line item composition
impl Order {
    /// Appends a line item and recomputes the total.
    pub fn add_item(&mut self, item: LineItem) -> Result<(), OrderError> {
        self.ensure_items_editable()?;

        let total = self
            .total
            .checked_add(item.subtotal())
            .ok_or(OrderError::AmountOverflow)?;

        self.items.push(item);
        self.total = total;
        self.touch();
        Ok(())
    }

    /// Removes every line item referencing `product_id` and recomputes the total.
    ///
    /// Returns how many items were removed. Removing an absent product is a
    /// no-op in any state.
    pub fn remove_item(&mut self, product_id: ProductId) -> Result<usize, OrderError> {
        if !self.items.iter().any(|item| item.product_id() == product_id) {
            return Ok(0);
        }
        self.ensure_items_editable()?;

        let before = self.items.len();
        self.items.retain(|item| item.product_id() != product_id);
        let removed = before - self.items.len();

        if removed > 0 {
            self.total = sum_subtotals(&self.items)?;
            self.touch();
        }
        Ok(removed)
    }

    /// Sets the quantity of the first item for `product_id` and recomputes
    /// its subtotal and the order total.
    ///
    /// Returns `false` (and changes nothing) when no item matches, whatever
    /// the state.
    pub fn update_item_quantity(
        &mut self,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<bool, OrderError> {
        if quantity == 0 {
            return Err(OrderError::InvalidQuantity { quantity });
        }

        let Some(index) = self
            .items
            .iter()
            .position(|item| item.product_id() == product_id)
        else {
            return Ok(false);
        };
        self.ensure_items_editable()?;

        let updated = self.items[index].with_quantity(quantity)?;
        let total = (self.total - self.items[index].subtotal())
            .checked_add(updated.subtotal())
            .ok_or(OrderError::AmountOverflow)?;

        self.items[index] = updated;
        self.total = total;
        self.touch();
        Ok(true)
    }

    fn ensure_items_editable(&self) -> Result<(), OrderError> {
        if self.state.can_modify_items() {
            Ok(())
        } else {
            Err(OrderError::ItemsLocked { state: self.state })
        }
    }
}

// Lifecycle transitions
impl Order {
    /// Applies an administrative transition (cancel, ship, deliver).
    ///
    /// `Paid` is never a valid target here: it needs a payment reference and is
    /// reached through [`Order::mark_paid`]. Cancelling clears any recorded
    /// payment reference.
    pub fn transition_to(&mut self, target: OrderState) -> Result<(), OrderError> {
        if target == OrderState::Paid {
            return Err(OrderError::InvalidTransition {
                from: self.state,
                to: target,
            });
        }
        self.state.validate_transition(target)?;

        if target == OrderState::Cancelled {
            self.payment_reference = None;
        }
        self.state = target;
        self.touch();
        Ok(())
    }

    /// Records the payment reference and moves the order to `Paid` in one step.
    pub fn mark_paid(&mut self, reference: PaymentReference) -> Result<(), OrderError> {
        self.state.validate_transition(OrderState::Paid)?;

        self.payment_reference = Some(reference);
        self.state = OrderState::Paid;
        self.touch();
        Ok(())
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now().max(self.updated_at);
    }
}

fn sum_subtotals(items: &[LineItem]) -> Result<Money, OrderError> {
    Money::checked_sum(items.iter().map(LineItem::subtotal)).ok_or(OrderError::AmountOverflow)
}
